use std::borrow::Cow;
use std::fmt;

/// Stands in for a disabled anchor: a noncharacter that never shows up in real text.
const NEVER_MATCHES: &str = "\u{FFFF}";

/// Which of `\A` and `\G` can match at the current scan position.
///
/// Oniguruma has no way to turn those anchors off per search so, like vscode-textmate, the
/// disabled ones are rewritten out of the pattern. Pattern sets are cached per rule and
/// per variant.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub(crate) enum AnchorActive {
    /// `\A` only: first line of the document
    A,
    /// `\G` only: right where the previous match or `begin` ended
    G,
    AG,
    None,
}

impl AnchorActive {
    pub(crate) fn new(
        is_first_line: bool,
        anchor_position: Option<usize>,
        current_pos: usize,
    ) -> Self {
        let g_active = anchor_position == Some(current_pos);
        match (is_first_line, g_active) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    fn allows_a(self) -> bool {
        matches!(self, AnchorActive::A | AnchorActive::AG)
    }

    fn allows_g(self) -> bool {
        matches!(self, AnchorActive::G | AnchorActive::AG)
    }

    /// Rewrites the disabled anchors. An escaped backslash followed by `A` or `G` is a
    /// literal and stays as is.
    pub(crate) fn replace_anchors(self, pat: &str) -> Cow<'_, str> {
        if self.allows_a() && self.allows_g() {
            return Cow::Borrowed(pat);
        }

        let bytes = pat.as_bytes();
        let mut out: Option<String> = None;
        let mut last = 0;
        let mut i = 0;
        while i + 1 < bytes.len() {
            if bytes[i] != b'\\' {
                i += 1;
                continue;
            }
            let disabled = match bytes[i + 1] {
                b'A' => !self.allows_a(),
                b'G' => !self.allows_g(),
                _ => false,
            };
            if disabled {
                let out = out.get_or_insert_with(|| String::with_capacity(pat.len()));
                out.push_str(&pat[last..i]);
                out.push_str(NEVER_MATCHES);
                last = i + 2;
            }
            // skips whatever is escaped, including another backslash
            i += 2;
        }

        match out {
            Some(mut out) => {
                out.push_str(&pat[last..]);
                Cow::Owned(out)
            }
            None => Cow::Borrowed(pat),
        }
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allow_A={}, allow_G={}", self.allows_a(), self.allows_g())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn g_is_only_active_at_the_anchor() {
        assert_eq!(AnchorActive::new(false, Some(3), 3), AnchorActive::G);
        assert_eq!(AnchorActive::new(false, Some(3), 4), AnchorActive::None);
        assert_eq!(AnchorActive::new(true, None, 0), AnchorActive::A);
        assert_eq!(AnchorActive::new(true, Some(0), 0), AnchorActive::AG);
    }

    #[test]
    fn disabled_anchors_are_rewritten() {
        let pat = r"\A#!|\G\s+";
        assert!(matches!(AnchorActive::AG.replace_anchors(pat), Cow::Borrowed(_)));
        assert_eq!(AnchorActive::A.replace_anchors(pat), "\\A#!|\u{FFFF}\\s+");
        assert_eq!(AnchorActive::G.replace_anchors(pat), "\u{FFFF}#!|\\G\\s+");
        assert_eq!(
            AnchorActive::None.replace_anchors(pat),
            "\u{FFFF}#!|\u{FFFF}\\s+"
        );
        assert!(matches!(AnchorActive::None.replace_anchors("a+"), Cow::Borrowed(_)));
    }

    #[test]
    fn escaped_backslashes_are_not_anchors() {
        let pat = r"\\A|\\G";
        assert!(matches!(AnchorActive::None.replace_anchors(pat), Cow::Borrowed(_)));
        assert_eq!(AnchorActive::None.replace_anchors(r"\\\A"), "\\\\\u{FFFF}");
        assert_eq!(AnchorActive::G.replace_anchors(r"é\A\\G"), "é\u{FFFF}\\\\G");
    }
}
