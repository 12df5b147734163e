use std::fmt;

use crate::grammars::{GlobalRuleRef, GrammarId};
use crate::scope::Scope;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// The rule that created this frame, the grammar root for the first one
    pub rule_ref: GlobalRuleRef,
    /// "name" scopes: applied to the begin/end delimiters
    pub name_scopes: Vec<Scope>,
    /// "name" + "contentName" scopes: applied to everything between the delimiters
    pub content_scopes: Vec<Scope>,
    /// The `end`/`while` pattern with the `begin` backreferences substituted, if it had any
    pub end_pattern: Option<String>,
    /// The `begin` match consumed the newline, so `\G` matches at the start of the next line
    pub begin_rule_has_captured_eol: bool,
    /// Position of the `\G` anchor when this frame was pushed. Only meaningful within a line.
    pub anchor_position: Option<usize>,
    /// Where the `begin` matched on the current line, `None` once the line is done
    pub enter_position: Option<usize>,
}

/// The active contexts, outermost first. This is all the tokenizer remembers from one line
/// to the next.
///
/// There is always at least the root frame of the grammar tokenization started with.
#[derive(Clone)]
pub struct StateStack {
    pub(crate) frames: Vec<StackFrame>,
    /// Nothing has been tokenized with this stack yet: `\A` can match
    pub(crate) is_first_line: bool,
}

impl StateStack {
    pub fn new(grammar_id: GrammarId, grammar_scope: Scope) -> Self {
        Self {
            frames: vec![StackFrame {
                rule_ref: GlobalRuleRef::root(grammar_id),
                name_scopes: vec![grammar_scope],
                content_scopes: vec![grammar_scope],
                end_pattern: None,
                begin_rule_has_captured_eol: false,
                anchor_position: None,
                enter_position: None,
            }],
            is_first_line: true,
        }
    }

    /// Enters a new context. Both its name and content scopes start as `scopes`, the content
    /// scopes are extended once the `begin` delimiter has been emitted.
    pub fn push(
        &mut self,
        rule_ref: GlobalRuleRef,
        anchor_position: Option<usize>,
        begin_rule_has_captured_eol: bool,
        enter_position: Option<usize>,
        scopes: Vec<Scope>,
    ) {
        self.frames.push(StackFrame {
            rule_ref,
            name_scopes: scopes.clone(),
            content_scopes: scopes,
            end_pattern: None,
            begin_rule_has_captured_eol,
            anchor_position,
            enter_position,
        });
    }

    /// Exits the current context. The root frame is never popped.
    pub fn pop(&mut self) -> Option<StackFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Drops every frame above `depth`, keeping at least the root
    pub(crate) fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth.max(1));
    }

    pub(crate) fn set_content_scopes(&mut self, content_scopes: Vec<Scope>) {
        self.top_mut().content_scopes = content_scopes;
    }

    pub(crate) fn set_end_pattern(&mut self, end_pattern: String) {
        self.top_mut().end_pattern = Some(end_pattern);
    }

    /// Forgets the positions that only make sense within the line that was just tokenized
    pub(crate) fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
            frame.anchor_position = None;
        }
    }

    pub fn top(&self) -> &StackFrame {
        // `frames` is never empty: the root can't be popped
        &self.frames[self.frames.len() - 1]
    }

    pub(crate) fn top_mut(&mut self) -> &mut StackFrame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Number of frames, 1 when only the root is active
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// The scopes text gets at this point: the content scopes of the innermost context
    pub fn scopes(&self) -> &[Scope] {
        &self.top().content_scopes
    }
}

/// Two stacks are equal if they have the same contexts, wherever they are in the document.
impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        self.frames == other.frames
    }
}

impl Eq for StateStack {}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;

        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(
                f,
                "{indent}grammar={}, rule={}",
                frame.rule_ref.grammar.0, frame.rule_ref.rule.0
            )?;

            let join = |scopes: &[Scope]| {
                scopes
                    .iter()
                    .map(|s| s.build_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            if !frame.name_scopes.is_empty() {
                write!(f, " name=[{}]", join(&frame.name_scopes))?;
            }
            if frame.content_scopes != frame.name_scopes {
                write!(f, ", content=[{}]", join(&frame.content_scopes))?;
            }
            if let Some(pattern) = &frame.end_pattern {
                write!(f, ", end_pattern={pattern:?}")?;
            }
            if frame.begin_rule_has_captured_eol {
                write!(f, ", captured_eol")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::RuleId;

    fn rule(id: u16) -> GlobalRuleRef {
        GlobalRuleRef {
            grammar: GrammarId(0),
            rule: RuleId(id),
        }
    }

    fn root() -> StateStack {
        StateStack::new(GrammarId(0), Scope::new("source.julia"))
    }

    #[test]
    fn never_pops_the_root() {
        let mut stack = root();
        assert!(stack.pop().is_none());
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.scopes(), &[Scope::new("source.julia")]);
    }

    #[test]
    fn push_then_pop_restores_the_stack() {
        let initial = root();
        let mut stack = initial.clone();
        let scopes = vec![Scope::new("source.julia"), Scope::new("string.quoted.double.julia")];
        stack.push(rule(3), None, false, Some(0), scopes.clone());
        stack.set_end_pattern("\"".to_string());
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.scopes(), scopes.as_slice());
        assert_ne!(stack, initial);

        let popped = stack.pop().unwrap();
        assert_eq!(popped.end_pattern.as_deref(), Some("\""));
        assert_eq!(stack, initial);
    }

    #[test]
    fn equality_ignores_document_position() {
        let mut stack = root();
        stack.is_first_line = false;
        assert_eq!(stack, root());
    }

    #[test]
    fn truncate_keeps_the_root() {
        let mut stack = root();
        stack.push(rule(1), None, false, None, Vec::new());
        stack.push(rule(2), None, false, None, Vec::new());
        stack.truncate(0);
        assert_eq!(stack.depth(), 1);
    }
}
