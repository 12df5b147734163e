//! This file follows the logic of <https://github.com/microsoft/vscode-textmate>

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::time::{Duration, Instant};

use onig::{Region, SearchOptions};
use serde::{Deserialize, Serialize};

use crate::Registry;
use crate::error::{Error, ScopelexResult};
use crate::grammars::{
    BeginEnd, BeginWhile, END_RULE_ID, GlobalRuleRef, GrammarId, PatternSet, Rule, RuleId,
    resolve_backreferences,
};
use crate::scope::Scope;
use crate::tokenizer::anchors::AnchorActive;

mod anchors;
mod stack;

pub use stack::{StackFrame, StateStack};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Scopes from outermost to innermost, the grammar scope first
    pub scopes: Vec<Scope>,
}

/// What wins when a region's `end` and one of its `patterns` match at the same position.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum EndPatternPriority {
    /// `end` first, unless the rule sets `applyEndPatternLast`
    #[default]
    Declared,
    /// `end` first for every rule
    EndFirst,
    /// `patterns` first for every rule
    EndLast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizerOptions {
    pub(crate) max_steps_per_line: usize,
    pub(crate) time_limit_per_line: Option<Duration>,
    pub(crate) end_pattern_priority: EndPatternPriority,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            max_steps_per_line: 20_000,
            time_limit_per_line: None,
            end_pattern_priority: EndPatternPriority::default(),
        }
    }
}

impl TokenizerOptions {
    /// How many matches can be attempted on a single line, captures included, before giving
    /// up on the rest of the line.
    pub fn max_steps_per_line(mut self, value: usize) -> Self {
        self.max_steps_per_line = value;
        self
    }

    /// Gives up on the rest of a line after that long
    pub fn time_limit_per_line(mut self, value: Duration) -> Self {
        self.time_limit_per_line = Some(value);
        self
    }

    pub fn end_pattern_priority(mut self, value: EndPatternPriority) -> Self {
        self.end_pattern_priority = value;
        self
    }
}

/// The result of tokenizing a single line
#[derive(Debug, Clone)]
pub struct TokenizedLine {
    pub tokens: Vec<Token>,
    /// The state to give when tokenizing the next line
    pub stack: StateStack,
    /// The work limit was reached and the end of the line got the current scopes
    /// without being matched against anything.
    pub stopped_early: bool,
}

/// Small wrapper so we make we only produce valid tokens.
/// Called in the tokenizer a few times and easier to use a struct than pass
/// mutable vec and usize everywhere
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
}

impl TokenAccumulator {
    fn new(start: usize) -> Self {
        Self {
            tokens: Vec::new(),
            last_end_pos: start,
        }
    }

    fn produce(&mut self, end_pos: usize, scopes: &[Scope]) {
        // Zero-width matches don't produce anything
        if self.last_end_pos >= end_pos {
            return;
        }

        log::trace!(
            "[produce] [{}..{end_pos}] {}",
            self.last_end_pos,
            scopes
                .iter()
                .map(|s| s.build_string())
                .collect::<Vec<_>>()
                .join(" ")
        );

        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.to_vec(),
        });
        self.last_end_pos = end_pos;
    }

    /// Removes the newline added at the end of every line. Empty lines have no tokens.
    fn finalize(&mut self, line_len: usize) {
        if let Some(tok) = self.tokens.last()
            && tok.span.start == line_len - 1
        {
            self.tokens.pop();
        }

        if let Some(t) = self.tokens.last_mut()
            && t.span.end == line_len
        {
            t.span.end -= 1;
        }
    }
}

/// Bounds the work done on one line. Shared with the re-tokenization of captures.
#[derive(Debug)]
struct Budget {
    steps_left: usize,
    deadline: Option<Instant>,
    exhausted: bool,
}

impl Budget {
    fn new(options: &TokenizerOptions) -> Self {
        Self {
            steps_left: options.max_steps_per_line,
            deadline: options.time_limit_per_line.map(|d| Instant::now() + d),
            exhausted: false,
        }
    }

    /// Returns false once there is nothing left to spend
    fn take_step(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        if self.steps_left == 0 || self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.exhausted = true;
            return false;
        }
        self.steps_left -= 1;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PatternSetKey {
    rule_ref: GlobalRuleRef,
    anchors: AnchorActive,
    /// Only set for `end` patterns that had backreferences
    end_pattern: Option<String>,
}

/// The next position one character further, `None` at the end of the line
fn next_char_boundary(line: &str, pos: usize) -> Option<usize> {
    line.get(pos..)?
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
}

/// Tokenizes the lines of a document one after the other, starting with the root rule of
/// a grammar.
///
/// Pattern sets are cached per tokenizer so reusing one for several documents is cheaper
/// than creating a new one each time.
#[derive(Debug)]
pub struct Tokenizer<'g> {
    /// The grammar we started with, what `$base` refers to
    base_grammar_id: GrammarId,
    registry: &'g Registry,
    options: TokenizerOptions,
    pattern_cache: HashMap<PatternSetKey, PatternSet>,
}

impl<'g> Tokenizer<'g> {
    pub fn new(base_grammar_id: GrammarId, registry: &'g Registry) -> Self {
        Self {
            base_grammar_id,
            registry,
            options: TokenizerOptions::default(),
            pattern_cache: HashMap::new(),
        }
    }

    pub fn with_options(mut self, options: TokenizerOptions) -> Self {
        self.options = options;
        self
    }

    /// The state to tokenize the first line of a document with
    pub fn initial_stack(&self) -> StateStack {
        StateStack::new(
            self.base_grammar_id,
            self.registry.grammars[self.base_grammar_id].scope,
        )
    }

    fn get_or_create_pattern_set(
        &mut self,
        rule_ref: GlobalRuleRef,
        anchors: AnchorActive,
        end_pattern: Option<&str>,
    ) -> ScopelexResult<&PatternSet> {
        let key = PatternSetKey {
            rule_ref,
            anchors,
            end_pattern: end_pattern.map(str::to_owned),
        };

        if !self.pattern_cache.contains_key(&key) {
            let set = self.build_pattern_set(rule_ref, anchors, end_pattern)?;
            log::trace!("[pattern_set] built for {rule_ref:?} ({anchors:?}): {set:?}");
            self.pattern_cache.insert(key.clone(), set);
        }

        Ok(&self.pattern_cache[&key])
    }

    fn build_pattern_set(
        &self,
        rule_ref: GlobalRuleRef,
        anchors: AnchorActive,
        end_pattern: Option<&str>,
    ) -> ScopelexResult<PatternSet> {
        let registry = self.registry;
        let grammar = &registry.grammars[rule_ref.grammar];

        let mut patterns: Vec<(GlobalRuleRef, String)> = registry
            .collect_patterns(self.base_grammar_id, rule_ref)
            .into_iter()
            .map(|(rule, pat)| (rule, anchors.replace_anchors(pat).into_owned()))
            .collect();

        if let Rule::BeginEnd(b) = &grammar.rules[rule_ref.rule] {
            let is_dynamic = end_pattern.is_some();
            let end = anchors
                .replace_anchors(end_pattern.unwrap_or_else(|| grammar.regex(b.end).pattern()))
                .into_owned();

            // Static patterns were validated when compiling the grammar
            if is_dynamic && registry.regex_cache.get_or_compile(&end).is_none() {
                log::debug!("End pattern {end:?} doesn't compile, the region can't end here");
            } else {
                let end_ref = GlobalRuleRef {
                    grammar: rule_ref.grammar,
                    rule: END_RULE_ID,
                };
                let end_last = match self.options.end_pattern_priority {
                    EndPatternPriority::Declared => b.apply_end_pattern_last,
                    EndPatternPriority::EndFirst => false,
                    EndPatternPriority::EndLast => true,
                };
                if end_last {
                    patterns.push((end_ref, end));
                } else {
                    patterns.insert(0, (end_ref, end));
                }
            }
        }

        PatternSet::new(patterns).map_err(Error::TokenizeRegex)
    }

    /// Re-checks the `while` condition of every active `BeginWhile` region, outermost first,
    /// at the start of a line. The first one not matching is popped with everything above it.
    ///
    /// Returns where scanning should resume along with the anchor position and whether we are
    /// still at the start of the document.
    fn check_while_conditions(
        &mut self,
        stack: &mut StateStack,
        line: &str,
        acc: &mut TokenAccumulator,
        is_first_line: bool,
        budget: &mut Budget,
    ) -> ScopelexResult<(usize, Option<usize>, bool)> {
        let registry = self.registry;
        let mut pos = 0;
        let mut anchor_position = stack.top().begin_rule_has_captured_eol.then_some(0);
        let mut is_first_line = is_first_line;

        for depth in 0..stack.depth() {
            let frame = &stack.frames[depth];
            let grammar = &registry.grammars[frame.rule_ref.grammar];
            let Rule::BeginWhile(rule) = &grammar.rules[frame.rule_ref.rule] else {
                continue;
            };

            let while_pat = frame
                .end_pattern
                .as_deref()
                .unwrap_or_else(|| grammar.regex(rule.while_).pattern());
            let anchors = AnchorActive::new(is_first_line, anchor_position, pos);
            log::trace!("[check_while_conditions] {while_pat:?} at {pos} ({anchors:?})");

            let pattern = anchors.replace_anchors(while_pat);
            let re = if frame.end_pattern.is_none() && matches!(pattern, Cow::Borrowed(_)) {
                grammar.regex(rule.while_).compiled().cloned()
            } else {
                registry.regex_cache.get_or_compile(&pattern)
            };

            let mut region = Region::new();
            let matched = re
                .and_then(|re| {
                    re.search_with_options(
                        line,
                        pos,
                        line.len(),
                        SearchOptions::SEARCH_OPTION_NONE,
                        Some(&mut region),
                    )
                })
                .is_some_and(|start| start == pos);

            if !matched {
                log::debug!(
                    "[check_while_conditions] {:?} no longer matches, popping",
                    rule.name.as_ref().map(|n| n.to_string())
                );
                stack.truncate(depth);
                break;
            }

            acc.produce(pos, &frame.content_scopes);
            let end = region.pos(0).map_or(pos, |(_, end)| end);
            if !rule.while_captures.is_empty() {
                let capture_pos: Vec<_> = (0..region.len()).map(|i| region.pos(i)).collect();
                let mut while_stack = stack.clone();
                while_stack.truncate(depth + 1);
                self.resolve_captures(
                    &while_stack,
                    line,
                    &rule.while_captures,
                    &capture_pos,
                    acc,
                    is_first_line,
                    budget,
                )?;
            }
            acc.produce(end, &stack.frames[depth].content_scopes);

            if end > pos {
                pos = end;
                anchor_position = Some(pos);
                is_first_line = false;
            }
        }

        Ok((pos, anchor_position, is_first_line))
    }

    /// Emits the tokens of capture groups. Groups whose rule has `patterns` are tokenized
    /// again with those patterns, limited to the text of the group.
    #[allow(clippy::too_many_arguments)]
    fn resolve_captures(
        &mut self,
        stack: &StateStack,
        line: &str,
        rule_captures: &[Option<RuleId>],
        captures: &[Option<(usize, usize)>],
        acc: &mut TokenAccumulator,
        is_first_line: bool,
        budget: &mut Budget,
    ) -> ScopelexResult<()> {
        if rule_captures.is_empty() {
            return Ok(());
        }

        let registry = self.registry;
        let grammar_id = stack.top().rule_ref.grammar;
        // (scopes, end_pos) of the enclosing groups that only have a name
        let mut local_stack: Vec<(Vec<Scope>, usize)> = Vec::with_capacity(2);

        for (capture_rule, capture) in rule_captures.iter().zip(captures) {
            let (Some(rule_id), Some((cap_start, cap_end))) = (capture_rule, capture) else {
                continue;
            };
            let (cap_start, cap_end) = (*cap_start, *cap_end);
            if cap_start == cap_end {
                continue;
            }

            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= cap_start
            {
                acc.produce(*end_pos, scopes);
                local_stack.pop();
            }

            let base = match local_stack.last() {
                Some((scopes, _)) => scopes.clone(),
                None => stack.scopes().to_vec(),
            };
            acc.produce(cap_start, &base);

            let rule_ref = GlobalRuleRef {
                grammar: grammar_id,
                rule: *rule_id,
            };
            let rule = &registry.grammars[grammar_id].rules[*rule_id];

            if rule.has_patterns() {
                let mut name_scopes = stack.scopes().to_vec();
                name_scopes.extend(rule.get_name_scopes(line, captures));
                let mut content_scopes = name_scopes.clone();
                content_scopes.extend(rule.get_content_scopes(line, captures));

                let mut capture_stack = stack.clone();
                capture_stack.push(rule_ref, None, false, Some(cap_start), name_scopes);
                capture_stack.set_content_scopes(content_scopes);

                let mut capture_acc = TokenAccumulator::new(cap_start);
                self.scan(
                    &mut capture_stack,
                    &line[..cap_end],
                    cap_start,
                    None,
                    is_first_line && cap_start == 0,
                    &mut capture_acc,
                    budget,
                )?;
                for token in capture_acc.tokens {
                    acc.produce(token.span.end, &token.scopes);
                }
                continue;
            }

            let name_scopes = rule.get_name_scopes(line, captures);
            if !name_scopes.is_empty() {
                let mut scopes = base;
                scopes.extend(name_scopes);
                local_stack.push((scopes, cap_end));
            }
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            acc.produce(end_pos, &scopes);
        }

        Ok(())
    }

    /// Moves one character forward without matching anything. Returns false if we were
    /// at the end of the line, in which case the rest of the line has been emitted.
    fn force_advance(
        line: &str,
        pos: &mut usize,
        stack: &StateStack,
        acc: &mut TokenAccumulator,
    ) -> bool {
        match next_char_boundary(line, *pos) {
            Some(next) => {
                *pos = next;
                true
            }
            None => {
                acc.produce(line.len(), stack.scopes());
                false
            }
        }
    }

    /// The main loop: finds the earliest match among the candidates of the innermost
    /// context, emits the gap before it and the match itself, then pushes or pops as needed
    /// until the line is consumed.
    #[allow(clippy::too_many_arguments)]
    fn scan(
        &mut self,
        stack: &mut StateStack,
        line: &str,
        start: usize,
        anchor_position: Option<usize>,
        is_first_line: bool,
        acc: &mut TokenAccumulator,
        budget: &mut Budget,
    ) -> ScopelexResult<()> {
        let registry = self.registry;
        let mut pos = start;
        let mut anchor_position = anchor_position;
        let mut is_first_line = is_first_line;

        loop {
            if !budget.take_step() {
                log::warn!(
                    "Giving up on the rest of the line at position {pos}, \
                     the remaining text gets the current scopes"
                );
                acc.produce(line.len(), stack.scopes());
                break;
            }

            log::trace!("[scan] {pos}: {:?}", line.get(pos..).unwrap_or(""));
            let anchors = AnchorActive::new(is_first_line, anchor_position, pos);
            let top = stack.top();
            let Some(m) = self
                .get_or_create_pattern_set(top.rule_ref, anchors, top.end_pattern.as_deref())?
                .find_at(line, pos)
            else {
                acc.produce(line.len(), stack.scopes());
                break;
            };

            let has_advanced = m.end > pos;

            if m.rule_ref.rule == END_RULE_ID {
                let top_ref = stack.top().rule_ref;
                let end_captures: &[Option<RuleId>] =
                    match &registry.grammars[top_ref.grammar].rules[top_ref.rule] {
                        Rule::BeginEnd(b) => &b.end_captures,
                        _ => &[],
                    };
                log::debug!("[scan] end of {top_ref:?} at {}..{}", m.start, m.end);

                acc.produce(m.start, stack.scopes());
                let name_scopes = stack.top().name_scopes.clone();
                stack.set_content_scopes(name_scopes);
                self.resolve_captures(
                    stack,
                    line,
                    end_captures,
                    &m.capture_pos,
                    acc,
                    is_first_line,
                    budget,
                )?;
                acc.produce(m.end, stack.scopes());

                let Some(popped) = stack.pop() else {
                    // Only regions have an end, the root is never one
                    acc.produce(line.len(), stack.scopes());
                    break;
                };
                anchor_position = popped.anchor_position;

                // Entered and left without consuming anything, it would be entered again
                if !has_advanced && popped.enter_position == Some(pos) {
                    log::debug!("[scan] {top_ref:?} entered and left at {pos}, skipping a char");
                    if !Self::force_advance(line, &mut pos, stack, acc) {
                        break;
                    }
                    is_first_line = false;
                    continue;
                }
            } else {
                let rule = &registry.grammars[m.rule_ref.grammar].rules[m.rule_ref.rule];
                acc.produce(m.start, stack.scopes());

                match rule {
                    Rule::Match(r) => {
                        log::trace!("[scan] match {:?} at {}..{}", rule.original_name(), m.start, m.end);
                        let mut scopes = stack.scopes().to_vec();
                        scopes.extend(rule.get_name_scopes(line, &m.capture_pos));
                        stack.push(m.rule_ref, anchor_position, false, Some(m.start), scopes);
                        self.resolve_captures(
                            stack,
                            line,
                            &r.captures,
                            &m.capture_pos,
                            acc,
                            is_first_line,
                            budget,
                        )?;
                        acc.produce(m.end, stack.scopes());
                        stack.pop();

                        if !has_advanced {
                            if !Self::force_advance(line, &mut pos, stack, acc) {
                                break;
                            }
                            is_first_line = false;
                            continue;
                        }
                    }
                    Rule::BeginEnd(BeginEnd {
                        begin_captures,
                        end: end_regex,
                        end_has_backrefs: has_backrefs,
                        ..
                    })
                    | Rule::BeginWhile(BeginWhile {
                        begin_captures,
                        while_: end_regex,
                        while_has_backrefs: has_backrefs,
                        ..
                    }) => {
                        let reentering = stack
                            .frames()
                            .iter()
                            .any(|f| f.rule_ref == m.rule_ref && f.enter_position == Some(m.start));
                        if !has_advanced && reentering {
                            log::debug!(
                                "[scan] {:?} would be entered again at {pos}, skipping a char",
                                rule.original_name()
                            );
                            if !Self::force_advance(line, &mut pos, stack, acc) {
                                break;
                            }
                            is_first_line = false;
                            continue;
                        }

                        log::debug!(
                            "[scan] entering {:?} at {}..{}",
                            rule.original_name(),
                            m.start,
                            m.end
                        );
                        let mut scopes = stack.scopes().to_vec();
                        scopes.extend(rule.get_name_scopes(line, &m.capture_pos));
                        stack.push(
                            m.rule_ref,
                            anchor_position,
                            m.end == line.len(),
                            Some(m.start),
                            scopes,
                        );
                        self.resolve_captures(
                            stack,
                            line,
                            begin_captures,
                            &m.capture_pos,
                            acc,
                            is_first_line,
                            budget,
                        )?;
                        acc.produce(m.end, stack.scopes());
                        anchor_position = Some(m.end);

                        let mut content_scopes = stack.top().name_scopes.clone();
                        content_scopes.extend(rule.get_content_scopes(line, &m.capture_pos));
                        stack.set_content_scopes(content_scopes);

                        if *has_backrefs {
                            let pattern =
                                registry.grammars[m.rule_ref.grammar].regex(*end_regex).pattern();
                            stack.set_end_pattern(resolve_backreferences(
                                pattern,
                                line,
                                &m.capture_pos,
                            ));
                        }
                    }
                    // Containers are flattened in pattern sets, they never match themselves
                    Rule::IncludeOnly(_) | Rule::Noop => {}
                }
            }

            if has_advanced {
                pos = m.end;
                is_first_line = false;
            }
        }

        Ok(())
    }

    /// Tokenizes a single line (without its newline) given the stack returned for the
    /// previous one, or `initial_stack()` for the first line.
    ///
    /// Never fails because of the text itself: every byte of the line ends up in exactly one
    /// token.
    pub fn tokenize_line(&mut self, line: &str, stack: StateStack) -> ScopelexResult<TokenizedLine> {
        // Always add a new line, some regex expect it
        let line = format!("{line}\n");
        let mut stack = stack;
        let mut budget = Budget::new(&self.options);
        let mut acc = TokenAccumulator::default();
        let is_first_line = stack.is_first_line;

        let (pos, anchor_position, is_first_line) = self.check_while_conditions(
            &mut stack,
            &line,
            &mut acc,
            is_first_line,
            &mut budget,
        )?;
        self.scan(
            &mut stack,
            &line,
            pos,
            anchor_position,
            is_first_line,
            &mut acc,
            &mut budget,
        )?;

        acc.finalize(line.len());
        stack.reset();
        stack.is_first_line = false;

        Ok(TokenizedLine {
            tokens: acc.tokens,
            stack,
            stopped_early: budget.exhausted,
        })
    }

    /// Tokenizes every line of `text`, which should only use `\n` as line separator.
    pub fn tokenize_string(&mut self, text: &str) -> ScopelexResult<Vec<Vec<Token>>> {
        if text.is_empty() {
            return Ok(vec![]);
        }

        let mut stack = self.initial_stack();
        let mut lines_tokens = Vec::new();

        for line in text.split('\n') {
            let tokenized = self.tokenize_line(line, stack)?;
            lines_tokens.push(tokenized.tokens);
            stack = tokenized.stack;
        }

        Ok(lines_tokens)
    }
}
