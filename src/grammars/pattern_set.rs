use std::fmt::{Debug, Formatter};

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::grammars::GlobalRuleRef;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    pub rule_ref: GlobalRuleRef,
    pub start: usize,
    pub end: usize,
    /// Absolute positions in the line, index 0 being the whole match
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

/// The candidate rules of a context, compiled together.
///
/// Searching returns the match starting the earliest in the line and, when several rules
/// match at that position, the one declared first: it is not a longest-match search.
pub struct PatternSet {
    rule_refs: Vec<GlobalRuleRef>,
    regset: Option<RegSet>,
}

impl PatternSet {
    pub fn new(items: Vec<(GlobalRuleRef, String)>) -> Result<Self, String> {
        if items.is_empty() {
            return Ok(Self {
                rule_refs: Vec::new(),
                regset: None,
            });
        }

        let (rule_refs, patterns): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        let pattern_strs: Vec<&str> = patterns.iter().map(|s| s.as_str()).collect();

        let regset = RegSet::with_options(&pattern_strs, RegexOptions::REGEX_OPTION_CAPTURE_GROUP)
            .map_err(|e| {
                format!(
                    "Failed to compile pattern set with {} patterns: {:?}",
                    pattern_strs.len(),
                    e
                )
            })?;

        Ok(Self {
            rule_refs,
            regset: Some(regset),
        })
    }

    pub fn len(&self) -> usize {
        self.rule_refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_refs.is_empty()
    }

    pub(crate) fn find_at(&self, text: &str, pos: usize) -> Option<PatternSetMatch> {
        let regset = self.regset.as_ref()?;

        // We need to give the full text with a start position because some regex do lookbehind
        let (pattern_index, captures) = regset.captures_with_options(
            text,
            pos,
            text.len(),
            onig::RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        )?;
        let (start, end) = captures.pos(0)?;
        let capture_pos: Vec<Option<(usize, usize)>> =
            (0..captures.len()).map(|i| captures.pos(i)).collect();

        Some(PatternSetMatch {
            rule_ref: self.rule_refs[pattern_index],
            start,
            end,
            capture_pos,
        })
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} rules)", self.len())
    }
}
