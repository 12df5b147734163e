use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// A regex wrapper that serializes as a string but compiles lazily at runtime
pub struct Regex {
    pattern: String,
    compiled: OnceLock<Option<Arc<onig::Regex>>>,
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Create a new regex with the same pattern but fresh lazy compilation
        Regex::new(self.pattern.clone())
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        Self {
            pattern,
            compiled: OnceLock::new(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn compiled(&self) -> Option<&Arc<onig::Regex>> {
        self.compiled
            .get_or_init(|| onig::Regex::new(&self.pattern).ok().map(Arc::new))
            .as_ref()
    }

    /// Validate that this regex pattern compiles successfully
    pub fn validate(&self) -> Result<(), onig::Error> {
        onig::Regex::new(&self.pattern).map(|_| ())
    }

    pub fn has_backreferences(&self) -> bool {
        has_backreferences(&self.pattern)
    }
}

impl Serialize for Regex {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for Regex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let pattern = String::deserialize(deserializer)?;
        Ok(Regex::new(pattern))
    }
}

/// Walks the pattern and calls `on_backref` for every `\N` it finds.
/// Escaped backslashes (`\\1`) are not backreferences.
fn scan_backreferences(pattern: &str, mut on_backref: impl FnMut(usize, usize, usize)) {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let digits = bytes[i + 1..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits > 0 && bytes[i + 1] != b'0' {
                on_backref(i, i + 1 + digits, parse_digits(&bytes[i + 1..i + 1 + digits]));
                i += 1 + digits;
            } else {
                i += 2;
            }
        } else {
            i += 1;
        }
    }
}

fn parse_digits(digits: &[u8]) -> usize {
    digits
        .iter()
        .fold(0usize, |acc, d| acc.saturating_mul(10).saturating_add((d - b'0') as usize))
}

pub fn has_backreferences(pattern: &str) -> bool {
    let mut found = false;
    scan_backreferences(pattern, |_, _, _| found = true);
    found
}

/// Escapes text so it is matched literally when inserted in a pattern
pub fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '-' | '\\' | '{' | '}' | '*' | '+' | '?' | '|' | '^' | '$' | '.' | ',' | '[' | ']'
                | '(' | ')' | '#'
        ) || c.is_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Substitutes the `\N` backreferences of an `end`/`while` pattern with the text the `begin`
/// pattern captured on this line. Groups that didn't capture anything become empty.
pub fn resolve_backreferences(
    pattern: &str,
    line: &str,
    captures: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut last = 0;
    scan_backreferences(pattern, |start, end, group| {
        out.push_str(&pattern[last..start]);
        if let Some(Some((s, e))) = captures.get(group)
            && let Some(text) = line.get(*s..*e)
        {
            out.push_str(&escape_regex(text));
        }
        last = end;
    });
    out.push_str(&pattern[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_backreferences() {
        assert!(has_backreferences(r"(\2)([[:alpha:]_]\w*)?"));
        assert!(has_backreferences(r"^\s*\1$"));
        assert!(!has_backreferences(r"\\1"));
        assert!(!has_backreferences(r#"""""#));
        assert!(!has_backreferences(r"\0"));
    }

    #[test]
    fn substitutes_and_escapes_captured_text() {
        let line = r#"r"""x"""#;
        let captures = vec![Some((0, 4)), Some((0, 1)), Some((1, 4))];
        assert_eq!(
            resolve_backreferences(r"(\2)(\w+)?", line, &captures),
            r#"(""")(\w+)?"#
        );

        let line = "<<END.x";
        let captures = vec![Some((0, 7)), Some((2, 7))];
        assert_eq!(resolve_backreferences(r"^\1$", line, &captures), r"^END\.x$");
    }

    #[test]
    fn missing_groups_become_empty() {
        let captures = vec![Some((0, 1)), None];
        assert_eq!(resolve_backreferences(r"a\1b\3", "x", &captures), "ab");
    }

    #[test]
    fn compiles_lazily_and_once() {
        let re = Regex::new(r"\p{L}[[:alnum:]_!]*".to_string());
        let first = re.compiled().cloned().unwrap();
        let second = re.compiled().cloned().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Regex::new("(unclosed".to_string()).compiled().is_none());
    }
}
