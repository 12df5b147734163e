use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grammars::common::{ROOT_RULE_ID, RegexId, RuleId, ScopeName};
use crate::grammars::raw::{Captures, RawGrammar, RawRule};
use crate::grammars::regex::Regex;
use crate::scope::Scope;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(u16);

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Repository(HashMap<String, RuleId>);

impl Repository {
    /// Look up a rule by name in this repository
    pub fn get(&self, name: &str) -> Option<RuleId> {
        self.0.get(name).copied()
    }
}

const MAX_REPOSITORY_DEPTH: usize = 8;
/// Ids are `u16` and `u16::MAX` is reserved for the `end` of a region in pattern sets
const MAX_IDS: usize = u16::MAX as usize;
/// Oniguruma can't have more groups than that in a pattern anyway
const MAX_CAPTURE_INDEX: usize = u16::MAX as usize;

/// The repositories visible from a rule, innermost last.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
pub struct RepositoryStack {
    stack: [Option<RepositoryId>; MAX_REPOSITORY_DEPTH],
    len: u8,
}

impl RepositoryStack {
    pub fn push(mut self, id: RepositoryId) -> Option<Self> {
        if self.len as usize == MAX_REPOSITORY_DEPTH {
            return None;
        }
        self.stack[self.len as usize] = Some(id);
        self.len += 1;
        Some(self)
    }

    /// Innermost repository first, which is the lookup order for `#name`
    pub fn iter_innermost_first(&self) -> impl Iterator<Item = RepositoryId> + '_ {
        self.stack[..self.len as usize].iter().rev().flatten().copied()
    }
}

/// What an `include` points to.
///
/// Allowed values:
///  * self, e.g. `$self`
///  * base, e.g. `$base`: the root of the grammar tokenization started with
///  * relative reference, e.g. `#string`
///  * other grammar, e.g. `source.julia`
///  * rule of another grammar, e.g. `source.cpp#root_context`
///
/// Relative references are turned into `Rule` when the grammar is compiled, references to
/// other grammars are only looked up by name when tokenizing since those grammars
/// might not be loaded at all.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    Self_,
    Base,
    Rule(RuleId),
    Local {
        name: String,
        repository_stack: RepositoryStack,
    },
    Other {
        scope: String,
        rule: Option<String>,
    },
}

impl Reference {
    fn parse(value: &str, repository_stack: RepositoryStack) -> Self {
        match value {
            "$self" => Self::Self_,
            "$base" => Self::Base,
            s if s.starts_with('#') => Self::Local {
                name: s[1..].to_string(),
                repository_stack,
            },
            s => match s.split_once('#') {
                Some((scope, rule)) => Self::Other {
                    scope: scope.to_string(),
                    rule: Some(rule.to_string()),
                },
                None => Self::Other {
                    scope: s.to_string(),
                    rule: None,
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: RuleId,
    pub name: Option<ScopeName>,
    /// None for scope-only rules, eg a capture that only assigns a scope
    pub regex_id: Option<RegexId>,
    pub captures: Vec<Option<RuleId>>,
}

/// A dispatch-only container: never matches by itself, its patterns are tried in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeOnly {
    pub id: RuleId,
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub patterns: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginEnd {
    pub id: RuleId,
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegexId,
    pub end_has_backrefs: bool,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginWhile {
    pub id: RuleId,
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegexId,
    pub while_has_backrefs: bool,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    Match(Match),
    IncludeOnly(IncludeOnly),
    BeginEnd(BeginEnd),
    BeginWhile(BeginWhile),
    Noop,
}

impl Rule {
    fn name(&self) -> Option<&ScopeName> {
        match self {
            Rule::Match(r) => r.name.as_ref(),
            Rule::IncludeOnly(r) => r.name.as_ref(),
            Rule::BeginEnd(r) => r.name.as_ref(),
            Rule::BeginWhile(r) => r.name.as_ref(),
            Rule::Noop => None,
        }
    }

    fn content_name(&self) -> Option<&ScopeName> {
        match self {
            Rule::IncludeOnly(r) => r.content_name.as_ref(),
            Rule::BeginEnd(r) => r.content_name.as_ref(),
            Rule::BeginWhile(r) => r.content_name.as_ref(),
            Rule::Match(_) | Rule::Noop => None,
        }
    }

    /// Scopes given by `name`, applied to the whole match including delimiters
    pub fn get_name_scopes(&self, line: &str, captures: &[Option<(usize, usize)>]) -> Vec<Scope> {
        self.name()
            .map(|n| n.resolve(line, captures))
            .unwrap_or_default()
    }

    /// Scopes given by `contentName`, applied between the delimiters
    pub fn get_content_scopes(
        &self,
        line: &str,
        captures: &[Option<(usize, usize)>],
    ) -> Vec<Scope> {
        self.content_name()
            .map(|n| n.resolve(line, captures))
            .unwrap_or_default()
    }

    pub fn patterns(&self) -> &[Reference] {
        match self {
            Rule::IncludeOnly(r) => &r.patterns,
            Rule::BeginEnd(r) => &r.patterns,
            Rule::BeginWhile(r) => &r.patterns,
            Rule::Match(_) | Rule::Noop => &[],
        }
    }

    pub fn has_patterns(&self) -> bool {
        !self.patterns().is_empty()
    }

    fn patterns_mut(&mut self) -> Option<&mut Vec<Reference>> {
        match self {
            Rule::IncludeOnly(r) => Some(&mut r.patterns),
            Rule::BeginEnd(r) => Some(&mut r.patterns),
            Rule::BeginWhile(r) => Some(&mut r.patterns),
            Rule::Match(_) | Rule::Noop => None,
        }
    }

    /// Used for debugging only
    pub fn original_name(&self) -> Option<String> {
        self.name().map(|n| n.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledGrammar {
    pub name: String,
    pub display_name: Option<String>,
    pub scope_name: String,
    pub scope: Scope,
    pub file_types: Vec<String>,
    pub regexes: Vec<Regex>,
    pub rules: Vec<Rule>,
    pub repositories: Vec<Repository>,
    /// The repository of the root rule, the one `other.scope#name` references look into
    pub root_repository: Option<RepositoryId>,
    /// Scope names of the other grammars this one includes
    pub external_scopes: Vec<String>,
}

impl CompiledGrammar {
    pub fn from_raw_grammar(raw: RawGrammar) -> Result<Self, CompileError> {
        if raw.scope_name.trim().is_empty() {
            return Err(CompileError::MissingScopeName { grammar: raw.name });
        }

        let mut grammar = Self {
            name: raw.name,
            display_name: raw.display_name,
            scope: Scope::new(&raw.scope_name),
            scope_name: raw.scope_name,
            file_types: raw.file_types,
            regexes: Vec::new(),
            rules: Vec::new(),
            repositories: Vec::new(),
            root_repository: None,
            external_scopes: Vec::new(),
        };

        let has_root_repository = !raw.repository.is_empty();
        let root_rule = RawRule {
            patterns: raw.patterns,
            repository: raw.repository,
            ..Default::default()
        };
        let root_rule_id = grammar.compile_rule(root_rule, RepositoryStack::default())?;
        debug_assert_eq!(root_rule_id, ROOT_RULE_ID);
        if has_root_repository {
            // The root repository is always the first one compiled
            grammar.root_repository = Some(RepositoryId(0));
        }

        grammar.resolve_local_references()?;
        Ok(grammar)
    }

    /// Looks up a rule in the root repository, which is what other grammars can refer to
    pub fn get_repository_rule(&self, name: &str) -> Option<RuleId> {
        self.root_repository
            .and_then(|id| self.repositories[id.0 as usize].get(name))
    }

    pub fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[id]
    }

    fn compile_rule(
        &mut self,
        raw_rule: RawRule,
        repository_stack: RepositoryStack,
    ) -> Result<RuleId, CompileError> {
        if self.rules.len() >= MAX_IDS {
            return Err(CompileError::TooManyRules {
                grammar: self.name.clone(),
            });
        }
        let id = RuleId(self.rules.len() as u16);

        // push a no-op to reserve its spot
        self.rules.push(Rule::Noop);

        let repository_stack = if raw_rule.repository.is_empty() {
            repository_stack
        } else {
            let repo_id = self.compile_repository(raw_rule.repository, repository_stack)?;
            repository_stack
                .push(repo_id)
                .ok_or_else(|| CompileError::RepositoryTooDeep {
                    grammar: self.name.clone(),
                })?
        };

        let name = raw_rule.name.as_deref().map(ScopeName::new);
        let content_name = raw_rule.content_name.as_deref().map(ScopeName::new);

        // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L389-L447
        let rule = if let Some(pat) = raw_rule.match_ {
            Rule::Match(Match {
                id,
                name,
                regex_id: Some(self.compile_regex(pat, true)?.0),
                captures: self.compile_captures(raw_rule.captures, repository_stack)?,
            })
        } else if let Some(begin_pat) = raw_rule.begin {
            let begin = self.compile_regex(begin_pat, true)?.0;
            // `captures` is the fallback for all the specific captures
            let begin_captures = if raw_rule.begin_captures.is_empty() {
                raw_rule.captures.clone()
            } else {
                raw_rule.begin_captures
            };
            let begin_captures = self.compile_captures(begin_captures, repository_stack)?;

            if let Some(while_pat) = raw_rule.while_ {
                let (while_, while_has_backrefs) = self.compile_regex(while_pat, false)?;
                let while_captures = if raw_rule.while_captures.is_empty() {
                    raw_rule.captures
                } else {
                    raw_rule.while_captures
                };
                Rule::BeginWhile(BeginWhile {
                    id,
                    name,
                    content_name,
                    begin,
                    begin_captures,
                    while_,
                    while_has_backrefs,
                    while_captures: self.compile_captures(while_captures, repository_stack)?,
                    patterns: self.compile_patterns(raw_rule.patterns, repository_stack)?,
                })
            } else if let Some(end_pat) = raw_rule.end {
                let (end, end_has_backrefs) = self.compile_regex(end_pat, false)?;
                let end_captures = if raw_rule.end_captures.is_empty() {
                    raw_rule.captures
                } else {
                    raw_rule.end_captures
                };
                Rule::BeginEnd(BeginEnd {
                    id,
                    name,
                    content_name,
                    begin,
                    begin_captures,
                    end,
                    end_has_backrefs,
                    end_captures: self.compile_captures(end_captures, repository_stack)?,
                    apply_end_pattern_last: raw_rule.apply_end_pattern_last,
                    patterns: self.compile_patterns(raw_rule.patterns, repository_stack)?,
                })
            } else {
                // a rule that has begin without while/end is just a match, probably a typo
                Rule::Match(Match {
                    id,
                    name,
                    regex_id: Some(begin),
                    captures: begin_captures,
                })
            }
        } else if name.is_some() && raw_rule.patterns.is_empty() && raw_rule.include.is_none() {
            // Scope-only rule, typically a capture
            Rule::Match(Match {
                id,
                name,
                regex_id: None,
                captures: Vec::new(),
            })
        } else {
            // vscode-textmate does something funny here:
            // - if patterns are NOT present and includes are, it moves includes to patterns;
            // - however, if patterns ARE present, includes are ignored
            // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L404
            let patterns = match raw_rule.include {
                Some(include) if raw_rule.patterns.is_empty() => vec![RawRule {
                    include: Some(include),
                    ..Default::default()
                }],
                _ => raw_rule.patterns,
            };

            if patterns.is_empty() {
                Rule::Noop
            } else {
                Rule::IncludeOnly(IncludeOnly {
                    id,
                    name,
                    content_name,
                    patterns: self.compile_patterns(patterns, repository_stack)?,
                })
            }
        };

        self.rules[id.as_index()] = rule;
        Ok(id)
    }

    /// `validate` is false for `end`/`while` patterns: when they contain backreferences they
    /// are not valid until the `begin` captures have been substituted.
    fn compile_regex(
        &mut self,
        pattern: String,
        validate: bool,
    ) -> Result<(RegexId, bool), CompileError> {
        if self.regexes.len() >= MAX_IDS {
            return Err(CompileError::TooManyRegexes {
                grammar: self.name.clone(),
            });
        }
        let regex_id = RegexId(self.regexes.len() as u16);
        let re = Regex::new(pattern);
        let has_backrefs = re.has_backreferences();

        if (validate || !has_backrefs)
            && let Err(error) = re.validate()
        {
            return Err(CompileError::InvalidRegex {
                pattern: re.pattern().to_owned(),
                error,
            });
        }
        self.regexes.push(re);

        Ok((regex_id, has_backrefs))
    }

    fn compile_repository(
        &mut self,
        raw_repository: HashMap<String, RawRule>,
        repository_stack: RepositoryStack,
    ) -> Result<RepositoryId, CompileError> {
        if self.repositories.len() >= MAX_IDS {
            return Err(CompileError::TooManyRepositories {
                grammar: self.name.clone(),
            });
        }
        let repo_id = RepositoryId(self.repositories.len() as u16);

        self.repositories.push(Repository::default());
        let stack = repository_stack
            .push(repo_id)
            .ok_or_else(|| CompileError::RepositoryTooDeep {
                grammar: self.name.clone(),
            })?;

        let mut rules = HashMap::new();

        for (name, raw_rule) in raw_repository {
            rules.insert(name, self.compile_rule(raw_rule, stack)?);
        }

        self.repositories[repo_id.0 as usize] = Repository(rules);

        Ok(repo_id)
    }

    fn compile_captures(
        &mut self,
        captures: Captures,
        repository_stack: RepositoryStack,
    ) -> Result<Vec<Option<RuleId>>, CompileError> {
        if captures.is_empty() {
            return Ok(Vec::new());
        }

        let max_capture = captures.0.keys().max().copied().unwrap_or_default();
        if max_capture > MAX_CAPTURE_INDEX {
            return Err(CompileError::InvalidCaptureIndex {
                grammar: self.name.clone(),
                index: max_capture,
            });
        }
        let mut out: Vec<Option<RuleId>> = vec![None; max_capture + 1];

        for (key, rule) in captures.0 {
            out[key] = Some(self.compile_rule(rule, repository_stack)?);
        }

        Ok(out)
    }

    fn compile_patterns(
        &mut self,
        rules: Vec<RawRule>,
        repository_stack: RepositoryStack,
    ) -> Result<Vec<Reference>, CompileError> {
        let mut out = Vec::with_capacity(rules.len());

        for r in rules {
            if let Some(include) = r.include {
                // vscode ignores other rule contents is there's an include
                // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L495
                out.push(Reference::parse(&include, repository_stack));
            } else {
                out.push(Reference::Rule(self.compile_rule(r, repository_stack)?));
            }
        }

        Ok(out)
    }

    /// Turns every `#name` into the rule it points to and records which other grammars
    /// are referenced.
    fn resolve_local_references(&mut self) -> Result<(), CompileError> {
        let mut external_scopes = BTreeSet::new();
        let repositories = &self.repositories;

        for rule in &mut self.rules {
            let Some(patterns) = rule.patterns_mut() else {
                continue;
            };
            for reference in patterns.iter_mut() {
                match reference {
                    Reference::Local {
                        name,
                        repository_stack,
                    } => {
                        let found = repository_stack
                            .iter_innermost_first()
                            .find_map(|repo_id| repositories[repo_id.0 as usize].get(name));
                        match found {
                            Some(rule_id) => *reference = Reference::Rule(rule_id),
                            None => {
                                return Err(CompileError::UnresolvedInclude {
                                    grammar: self.name.clone(),
                                    include: format!("#{name}"),
                                });
                            }
                        }
                    }
                    Reference::Other { scope, .. } if *scope != self.scope_name => {
                        external_scopes.insert(scope.clone());
                    }
                    _ => (),
                }
            }
        }

        self.external_scopes = external_scopes.into_iter().collect();
        Ok(())
    }
}

/// Errors that can occur during grammar compilation
#[derive(Debug)]
pub enum CompileError {
    InvalidRegex { pattern: String, error: onig::Error },
    UnresolvedInclude { grammar: String, include: String },
    MissingScopeName { grammar: String },
    RepositoryTooDeep { grammar: String },
    TooManyRules { grammar: String },
    TooManyRegexes { grammar: String },
    TooManyRepositories { grammar: String },
    InvalidCaptureIndex { grammar: String, index: usize },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::InvalidRegex { pattern, error } => {
                write!(f, "invalid regex pattern '{}': {}", pattern, error)
            }
            CompileError::UnresolvedInclude { grammar, include } => {
                write!(f, "unresolved include '{}' in grammar '{}'", include, grammar)
            }
            CompileError::MissingScopeName { grammar } => {
                write!(f, "grammar '{}' has no scopeName", grammar)
            }
            CompileError::RepositoryTooDeep { grammar } => write!(
                f,
                "grammar '{}' nests repositories more than {} levels deep",
                grammar, MAX_REPOSITORY_DEPTH
            ),
            CompileError::TooManyRules { grammar } => {
                write!(f, "grammar '{}' has too many rules", grammar)
            }
            CompileError::TooManyRegexes { grammar } => {
                write!(f, "grammar '{}' has too many patterns", grammar)
            }
            CompileError::TooManyRepositories { grammar } => {
                write!(f, "grammar '{}' has too many repositories", grammar)
            }
            CompileError::InvalidCaptureIndex { grammar, index } => write!(
                f,
                "capture group {} in grammar '{}' is above the limit of {}",
                index, grammar, MAX_CAPTURE_INDEX
            ),
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> Result<CompiledGrammar, CompileError> {
        RawGrammar::from_json(json).unwrap().compile()
    }

    #[test]
    fn can_compile_fixture_grammars() {
        for path in [
            "src/fixtures/grammars/julia.json",
            "src/fixtures/grammars/julia-console.json",
        ] {
            let raw_grammar = RawGrammar::load_from_file(path).unwrap();
            assert!(raw_grammar.compile().is_ok(), "{path} failed to compile");
        }
    }

    #[test]
    fn resolves_local_references_innermost_first() {
        let grammar = compile(
            r##"{
                "name": "test",
                "scopeName": "source.test",
                "patterns": [{ "include": "#outer" }],
                "repository": {
                    "outer": {
                        "patterns": [{ "include": "#inner" }],
                        "repository": {
                            "inner": { "match": "a", "name": "inner.a" }
                        }
                    },
                    "inner": { "match": "b", "name": "outer.b" }
                }
            }"##,
        )
        .unwrap();

        let outer = grammar.get_repository_rule("outer").unwrap();
        let Reference::Rule(target) = &grammar.rules[outer].patterns()[0] else {
            panic!("local include was not resolved");
        };
        let Rule::Match(m) = &grammar.rules[*target] else {
            panic!("expected a match rule");
        };
        assert_eq!(grammar.regex(m.regex_id.unwrap()).pattern(), "a");
    }

    #[test]
    fn records_external_scopes() {
        let grammar = compile(
            r##"{
                "name": "test",
                "scopeName": "source.test",
                "patterns": [
                    { "include": "source.cpp#root_context" },
                    { "include": "source.shell" },
                    { "include": "source.test#self_ref" },
                    { "include": "$self" }
                ],
                "repository": { "self_ref": { "match": "x" } }
            }"##,
        )
        .unwrap();
        assert_eq!(grammar.external_scopes, vec!["source.cpp", "source.shell"]);
    }

    #[test]
    fn captures_are_the_fallback_for_begin_and_end() {
        let grammar = compile(
            r#"{
                "name": "test",
                "scopeName": "source.test",
                "patterns": [{
                    "begin": "(<)",
                    "end": "(>)",
                    "captures": { "1": { "name": "punctuation.bracket" } }
                }]
            }"#,
        )
        .unwrap();
        let Reference::Rule(id) = grammar.rules[ROOT_RULE_ID].patterns()[0] else {
            panic!("expected a rule");
        };
        let Rule::BeginEnd(b) = &grammar.rules[id] else {
            panic!("expected a begin/end rule");
        };
        assert_eq!(b.begin_captures.len(), 2);
        assert_eq!(b.end_captures.len(), 2);
        assert!(b.end_captures[1].is_some());
    }

    #[test]
    fn invalid_regex_is_a_compile_error() {
        let res = compile(
            r#"{
                "name": "test",
                "scopeName": "source.test",
                "patterns": [{ "match": "(unclosed", "name": "broken" }]
            }"#,
        );
        assert!(matches!(res, Err(CompileError::InvalidRegex { .. })));
    }

    #[test]
    fn huge_capture_index_is_a_compile_error() {
        for key in ["18446744073709551615", "4000000000", "65536"] {
            let res = compile(&format!(
                r#"{{
                    "name": "test",
                    "scopeName": "source.test",
                    "patterns": [{{ "match": "(a)", "captures": {{ "{key}": {{ "name": "x" }} }} }}]
                }}"#
            ));
            assert!(
                matches!(res, Err(CompileError::InvalidCaptureIndex { .. })),
                "capture key {key} was accepted"
            );
        }
    }

    #[test]
    fn regex_ids_never_wrap() {
        let mut grammar =
            compile(r#"{"name": "test", "scopeName": "source.test", "patterns": []}"#).unwrap();
        grammar.regexes = (0..MAX_IDS).map(|_| Regex::new("a".to_string())).collect();

        let res = grammar.compile_regex("b".to_string(), true);
        assert!(matches!(res, Err(CompileError::TooManyRegexes { .. })));
        assert_eq!(grammar.regexes.len(), MAX_IDS);
    }

    #[test]
    fn repository_ids_never_wrap() {
        let mut grammar =
            compile(r#"{"name": "test", "scopeName": "source.test", "patterns": []}"#).unwrap();
        grammar.repositories = vec![Repository::default(); MAX_IDS];

        let res = grammar.compile_repository(HashMap::new(), RepositoryStack::default());
        assert!(matches!(res, Err(CompileError::TooManyRepositories { .. })));
    }

    #[test]
    fn end_with_backreferences_is_validated_later() {
        let grammar = compile(
            r#"{
                "name": "test",
                "scopeName": "source.test",
                "patterns": [{ "begin": "(\"+)", "end": "\\1" }]
            }"#,
        )
        .unwrap();
        let Reference::Rule(id) = grammar.rules[ROOT_RULE_ID].patterns()[0] else {
            panic!("expected a rule");
        };
        let Rule::BeginEnd(b) = &grammar.rules[id] else {
            panic!("expected a begin/end rule");
        };
        assert!(b.end_has_backrefs);
    }

    #[test]
    fn unresolved_local_include_is_a_compile_error() {
        let res = compile(
            r##"{
                "name": "test",
                "scopeName": "source.test",
                "patterns": [{ "include": "#nowhere" }]
            }"##,
        );
        assert!(matches!(res, Err(CompileError::UnresolvedInclude { .. })));
    }
}
