use std::fmt;
use std::ops::{Deref, Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::scope::Scope;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrammarId(pub u16);

impl GrammarId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl<T> Index<GrammarId> for Vec<T> {
    type Output = T;

    fn index(&self, index: GrammarId) -> &Self::Output {
        &self[index.as_index()]
    }
}

impl<T> IndexMut<GrammarId> for Vec<T> {
    fn index_mut(&mut self, index: GrammarId) -> &mut Self::Output {
        &mut self[index.as_index()]
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u16);

impl RuleId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl Deref for RuleId {
    type Target = u16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> Index<RuleId> for Vec<T> {
    type Output = T;

    fn index(&self, index: RuleId) -> &Self::Output {
        &self[index.as_index()]
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegexId(pub u16);

impl<T> Index<RegexId> for Vec<T> {
    type Output = T;

    fn index(&self, index: RegexId) -> &Self::Output {
        &self[index.0 as usize]
    }
}

/// The root rule of every grammar is always the first one compiled
pub const ROOT_RULE_ID: RuleId = RuleId(0);
/// Stands for the `end` pattern of the current region in pattern sets.
/// Grammars can't have that many rules so it never points to a real one.
pub const END_RULE_ID: RuleId = RuleId(u16::MAX);

/// A rule in a specific grammar of the registry
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct GlobalRuleRef {
    pub grammar: GrammarId,
    pub rule: RuleId,
}

impl GlobalRuleRef {
    pub fn root(grammar: GrammarId) -> Self {
        Self {
            grammar,
            rule: ROOT_RULE_ID,
        }
    }
}

/// A `name`/`contentName` value.
///
/// Most of them are plain scopes known at compile time, some refer to capture groups
/// (`$1`, `${2:/downcase}`) and can only be built once we have a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeName {
    Static(Vec<Scope>),
    Dynamic(String),
}

impl ScopeName {
    pub fn new(raw: &str) -> Self {
        if has_capture_reference(raw) {
            Self::Dynamic(raw.to_owned())
        } else {
            Self::Static(Scope::new_many(raw))
        }
    }

    /// `captures` are absolute byte positions in `line`
    pub fn resolve(&self, line: &str, captures: &[Option<(usize, usize)>]) -> Vec<Scope> {
        match self {
            ScopeName::Static(scopes) => scopes.clone(),
            ScopeName::Dynamic(template) => {
                Scope::new_many(&substitute_captures(template, line, captures))
            }
        }
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeName::Static(scopes) => {
                for (i, s) in scopes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{s}")?;
                }
                Ok(())
            }
            ScopeName::Dynamic(template) => f.write_str(template),
        }
    }
}

fn has_capture_reference(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'$'
            && matches!(bytes.get(i + 1), Some(c) if c.is_ascii_digit() || *c == b'{')
    })
}

/// Replaces `$n`, `${n}`, `${n:/downcase}` and `${n:/upcase}` with the captured text.
/// References to groups that didn't participate are replaced with nothing.
fn substitute_captures(template: &str, line: &str, captures: &[Option<(usize, usize)>]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];

        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            let idx: usize = after[..digits].parse().unwrap_or(usize::MAX);
            out.push_str(captured_text(line, captures, idx));
            rest = &after[digits..];
            continue;
        }

        if let Some(inner) = after.strip_prefix('{')
            && let Some(close) = inner.find('}')
        {
            let body = &inner[..close];
            let (num, command) = body.split_once(":/").unwrap_or((body, ""));
            if let Ok(idx) = num.parse::<usize>() {
                let text = captured_text(line, captures, idx);
                match command {
                    "downcase" => out.push_str(&text.to_lowercase()),
                    "upcase" => out.push_str(&text.to_uppercase()),
                    _ => out.push_str(text),
                }
                rest = &inner[close + 1..];
                continue;
            }
        }

        out.push('$');
        rest = after;
    }
    out.push_str(rest);
    out
}

fn captured_text<'a>(line: &'a str, captures: &[Option<(usize, usize)>], idx: usize) -> &'a str {
    match captures.get(idx) {
        Some(Some((start, end))) => line.get(*start..*end).unwrap_or(""),
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_names_are_split() {
        let name = ScopeName::new("meta.bracket.julia meta.embedded.julia");
        let ScopeName::Static(scopes) = &name else {
            panic!("expected a static name");
        };
        assert_eq!(scopes.len(), 2);
    }

    #[test]
    fn substitutes_capture_groups() {
        let line = "cxx\"\"\"";
        let captures = vec![Some((0, 6)), Some((0, 3)), Some((3, 6))];
        let name = ScopeName::new("string.quoted.other.$1.julia");
        assert_eq!(
            name.resolve(line, &captures),
            vec![Scope::new("string.quoted.other.cxx.julia")]
        );

        let name = ScopeName::new("meta.${1:/upcase}.${9}");
        assert_eq!(name.resolve(line, &captures), vec![Scope::new("meta.CXX.")]);
    }

    #[test]
    fn lone_dollar_is_kept() {
        assert!(!has_capture_reference("keyword.operator.$"));
        assert_eq!(substitute_captures("a$b", "", &[]), "a$b");
    }
}
