use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ScopelexResult};
use crate::grammars::{
    CompiledGrammar, GlobalRuleRef, GrammarId, Match, RawGrammar, Reference, Rule,
};
use crate::tokenizer::{Token, Tokenizer};

/// Where grammars come from when they are requested by scope name.
///
/// Returning `Ok(None)` means the grammar doesn't exist: grammars routinely include optional
/// companions (an embedded shell or C++ grammar, ...) so this is not an error unless it is
/// the grammar explicitly asked for.
pub trait GrammarLoader {
    fn load_grammar(&self, scope_name: &str) -> Result<Option<RawGrammar>, Error>;
}

impl<F> GrammarLoader for F
where
    F: Fn(&str) -> Result<Option<RawGrammar>, Error>,
{
    fn load_grammar(&self, scope_name: &str) -> Result<Option<RawGrammar>, Error> {
        self(scope_name)
    }
}

/// Regexes only known at tokenization time: `end`/`while` patterns with backreferences
/// substituted and patterns with `\A`/`\G` disabled.
/// Shared by every tokenizer using the registry, including across threads.
#[derive(Default)]
pub(crate) struct RegexCache {
    map: papaya::HashMap<String, Option<Arc<onig::Regex>>>,
}

impl RegexCache {
    /// Returns `None` if the pattern doesn't compile, which is remembered as well.
    pub(crate) fn get_or_compile(&self, pattern: &str) -> Option<Arc<onig::Regex>> {
        let map = self.map.pin();
        if let Some(re) = map.get(pattern) {
            return re.clone();
        }

        let compiled = match onig::Regex::new(pattern) {
            Ok(re) => Some(Arc::new(re)),
            Err(e) => {
                log::warn!("Dynamic pattern {pattern:?} failed to compile: {e}");
                None
            }
        };
        map.get_or_insert(pattern.to_owned(), compiled).clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.pin().len()
    }
}

impl Clone for RegexCache {
    fn clone(&self) -> Self {
        // It's only a cache, start from scratch
        Self::default()
    }
}

impl PartialEq for RegexCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for RegexCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegexCache({} entries)", self.len())
    }
}

/// Turns CRLF and lone CR line endings into LF, the only separator tokenizers split on.
#[inline]
pub fn normalize_string(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// The main struct in scopelex.
///
/// Holds all the compiled grammars and resolves the references between them. Grammars are
/// added first; tokenizers then borrow the registry immutably so it can't change while
/// anything is being tokenized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Registry {
    // Vector of compiled grammars for ID-based access
    pub(crate) grammars: Vec<CompiledGrammar>,
    // grammar scope name -> grammar ID, this is what includes refer to
    grammar_id_by_scope_name: HashMap<String, GrammarId>,
    // grammar name or alias -> grammar ID, this is what end users refer to
    grammar_id_by_name: HashMap<String, GrammarId>,
    #[serde(skip)]
    pub(crate) regex_cache: RegexCache,
}

impl Registry {
    /// Compiles and adds the grammar.
    /// A grammar with the same name or scope name as an existing one takes over its lookups.
    pub fn add_grammar(&mut self, raw_grammar: RawGrammar) -> ScopelexResult<GrammarId> {
        let grammar_id = GrammarId(self.grammars.len() as u16);
        let grammar = raw_grammar.compile()?;
        log::debug!(
            "Adding grammar {} ({}) as {grammar_id:?}",
            grammar.name,
            grammar.scope_name
        );
        self.grammar_id_by_scope_name
            .insert(grammar.scope_name.clone(), grammar_id);
        self.grammar_id_by_name
            .insert(grammar.name.clone(), grammar_id);
        self.grammars.push(grammar);
        Ok(grammar_id)
    }

    /// Reads the file and add it as a grammar.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> ScopelexResult<GrammarId> {
        let raw_grammar = RawGrammar::load_from_file(path)?;
        self.add_grammar(raw_grammar)
    }

    /// Parses the JSON grammar and adds it.
    pub fn add_grammar_from_str(&mut self, content: &str) -> ScopelexResult<GrammarId> {
        let raw_grammar = RawGrammar::from_json(content)?;
        self.add_grammar(raw_grammar)
    }

    /// Asks the loader for the grammar with that scope name as well as every grammar it
    /// includes, directly or not, that isn't in the registry yet.
    ///
    /// Included grammars the loader doesn't know about are skipped: their includes will
    /// never match anything.
    pub fn load_grammar(
        &mut self,
        scope_name: &str,
        loader: &impl GrammarLoader,
    ) -> ScopelexResult<GrammarId> {
        if let Some(id) = self.grammar_id_by_scope_name.get(scope_name) {
            return Ok(*id);
        }

        let raw = loader
            .load_grammar(scope_name)?
            .ok_or_else(|| Error::GrammarNotFound(scope_name.to_string()))?;
        let grammar_id = self.add_grammar(raw)?;

        let mut pending = self.grammars[grammar_id].external_scopes.clone();
        let mut requested = HashSet::new();
        while let Some(scope) = pending.pop() {
            if self.grammar_id_by_scope_name.contains_key(&scope) || !requested.insert(scope.clone())
            {
                continue;
            }
            match loader.load_grammar(&scope)? {
                Some(raw) => {
                    let dep_id = self.add_grammar(raw)?;
                    pending.extend(self.grammars[dep_id].external_scopes.iter().cloned());
                }
                None => log::debug!("Grammar {scope} is not available, its includes are ignored"),
            }
        }

        Ok(grammar_id)
    }

    /// Adds an alias for the given grammar
    pub fn add_alias(&mut self, grammar_name: &str, alias: &str) {
        if let Some(grammar_id) = self.grammar_id(grammar_name) {
            self.grammar_id_by_name.insert(alias.to_string(), grammar_id);
        }
    }

    /// Finds a grammar by name, alias or scope name
    pub fn grammar_id(&self, name: &str) -> Option<GrammarId> {
        self.grammar_id_by_name
            .get(name)
            .or_else(|| self.grammar_id_by_scope_name.get(name))
            .copied()
    }

    /// Checks whether the given grammar is available in the registry with its name, aliases
    /// or scope name
    pub fn contains_grammar(&self, name: &str) -> bool {
        self.grammar_id(name).is_some()
    }

    pub fn grammar(&self, grammar_id: GrammarId) -> &CompiledGrammar {
        &self.grammars[grammar_id]
    }

    /// A tokenizer starting with the root rule of the given grammar
    pub fn tokenizer(&self, name: &str) -> ScopelexResult<Tokenizer<'_>> {
        let grammar_id = self
            .grammar_id(name)
            .ok_or_else(|| Error::GrammarNotFound(name.to_string()))?;
        Ok(Tokenizer::new(grammar_id, self))
    }

    /// Tokenizes a whole document, returning the tokens of each line.
    pub fn tokenize(&self, name: &str, content: &str) -> ScopelexResult<Vec<Vec<Token>>> {
        let mut tokenizer = self.tokenizer(name)?;
        tokenizer.tokenize_string(&normalize_string(content))
    }

    /// Finds what an include points to. `grammar` is the grammar the reference is written
    /// in and `base_grammar_id` the one tokenization started with.
    pub(crate) fn resolve_reference(
        &self,
        base_grammar_id: GrammarId,
        grammar: GrammarId,
        reference: &Reference,
    ) -> Option<GlobalRuleRef> {
        match reference {
            Reference::Rule(rule) => Some(GlobalRuleRef {
                grammar,
                rule: *rule,
            }),
            Reference::Self_ => Some(GlobalRuleRef::root(grammar)),
            Reference::Base => Some(GlobalRuleRef::root(base_grammar_id)),
            Reference::Other { scope, rule } => {
                let Some(other_id) = self.grammar_id_by_scope_name.get(scope).copied() else {
                    log::trace!("Skipping include of {scope}: grammar not loaded");
                    return None;
                };
                match rule {
                    None => Some(GlobalRuleRef::root(other_id)),
                    Some(name) => {
                        let found = self.grammars[other_id].get_repository_rule(name);
                        if found.is_none() {
                            log::trace!("Skipping include of {scope}#{name}: no such rule");
                        }
                        found.map(|rule| GlobalRuleRef {
                            grammar: other_id,
                            rule,
                        })
                    }
                }
            }
            // Only exists while a grammar is being compiled
            Reference::Local { .. } => None,
        }
    }

    fn get_rule_patterns<'a>(
        &'a self,
        base_grammar_id: GrammarId,
        rule_ref: GlobalRuleRef,
        visited: &mut HashSet<GlobalRuleRef>,
        out: &mut Vec<(GlobalRuleRef, &'a str)>,
    ) {
        if !visited.insert(rule_ref) {
            return;
        }

        let grammar = &self.grammars[rule_ref.grammar];
        match &grammar.rules[rule_ref.rule] {
            Rule::Match(Match {
                regex_id: Some(regex_id),
                ..
            }) => out.push((rule_ref, grammar.regex(*regex_id).pattern())),
            Rule::IncludeOnly(i) => {
                self.get_pattern_set_data(base_grammar_id, rule_ref.grammar, &i.patterns, visited, out);
            }
            Rule::BeginEnd(b) => out.push((rule_ref, grammar.regex(b.begin).pattern())),
            Rule::BeginWhile(b) => out.push((rule_ref, grammar.regex(b.begin).pattern())),
            Rule::Match(_) | Rule::Noop => {}
        }
    }

    fn get_pattern_set_data<'a>(
        &'a self,
        base_grammar_id: GrammarId,
        grammar: GrammarId,
        references: &[Reference],
        visited: &mut HashSet<GlobalRuleRef>,
        out: &mut Vec<(GlobalRuleRef, &'a str)>,
    ) {
        for reference in references {
            if let Some(rule_ref) = self.resolve_reference(base_grammar_id, grammar, reference) {
                self.get_rule_patterns(base_grammar_id, rule_ref, visited, out);
            }
        }
    }

    /// The rules that can match inside the given rule, in declaration order, with includes
    /// and dispatch-only containers flattened. Nested regions only contribute their `begin`.
    pub(crate) fn collect_patterns(
        &self,
        base_grammar_id: GrammarId,
        rule_ref: GlobalRuleRef,
    ) -> Vec<(GlobalRuleRef, &str)> {
        let grammar = &self.grammars[rule_ref.grammar];
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        self.get_pattern_set_data(
            base_grammar_id,
            rule_ref.grammar,
            grammar.rules[rule_ref.rule].patterns(),
            &mut visited,
            &mut out,
        );
        out
    }

    #[cfg(feature = "dump")]
    /// Dump the compiled grammars to a binary file that can be loaded later
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> ScopelexResult<()> {
        let encoded = bitcode::serialize(self)?;
        let compressed = zstd::encode_all(encoded.as_slice(), 3)?;
        std::fs::write(path, compressed)?;
        Ok(())
    }

    #[cfg(feature = "dump")]
    /// Read a binary dump made by `dump_to_file`
    pub fn load_from_file(path: impl AsRef<Path>) -> ScopelexResult<Self> {
        let compressed = std::fs::read(path)?;
        let encoded = zstd::decode_all(compressed.as_slice())?;
        Ok(bitcode::deserialize(&encoded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FIXTURES, get_registry, line_tokens};

    fn fixture_loader(scope_name: &str) -> ScopelexResult<Option<RawGrammar>> {
        let file = match scope_name {
            "source.julia" => "julia.json",
            "source.julia.console" => "julia-console.json",
            _ => return Ok(None),
        };
        RawGrammar::load_from_file(format!("{FIXTURES}/{file}")).map(Some)
    }

    #[test]
    fn loads_included_grammars_through_the_loader() {
        let mut registry = Registry::default();
        let console = registry
            .load_grammar("source.julia.console", &fixture_loader)
            .unwrap();

        assert_eq!(registry.grammar(console).name, "julia-console");
        assert!(registry.contains_grammar("julia"));
        assert!(registry.contains_grammar("source.julia"));
        assert!(!registry.contains_grammar("source.shell"));
        assert!(!registry.contains_grammar("source.cpp"));

        // Already loaded, the loader isn't asked again
        let again = registry
            .load_grammar("source.julia.console", &|_: &str| -> ScopelexResult<Option<RawGrammar>> {
                panic!("should not be called")
            })
            .unwrap();
        assert_eq!(again, console);
    }

    #[test]
    fn missing_requested_grammar_is_an_error() {
        let mut registry = Registry::default();
        let res = registry.load_grammar("source.nope", &fixture_loader);
        assert!(matches!(res, Err(Error::GrammarNotFound(_))));
    }

    #[test]
    fn invalid_grammar_is_rejected() {
        let mut registry = Registry::default();
        let res = registry.add_grammar_from_str(
            r#"{"name": "bad", "scopeName": "source.bad", "patterns": [{"match": "[a-"}]}"#,
        );
        assert!(matches!(res, Err(Error::Compile(_))));
        assert!(!registry.contains_grammar("bad"));
    }

    #[test]
    fn can_use_aliases() {
        let mut registry = get_registry();
        registry.add_alias("julia", "jl");
        assert_eq!(registry.grammar_id("jl"), registry.grammar_id("source.julia"));
        assert!(matches!(
            registry.tokenizer("python"),
            Err(Error::GrammarNotFound(_))
        ));
    }

    #[test]
    fn collects_patterns_through_includes() {
        let registry = get_registry();
        let julia = registry.grammar_id("julia").unwrap();
        let patterns = registry.collect_patterns(julia, GlobalRuleRef::root(julia));
        // The block comment is declared before the line comment
        let block = patterns.iter().position(|(_, p)| *p == "#=").unwrap();
        let line = patterns.iter().position(|(_, p)| *p == "#").unwrap();
        assert!(block < line);
        // `source.cpp#root_context` is not loaded and contributes nothing
        assert!(patterns.iter().all(|(r, _)| r.grammar == julia));
    }

    #[test]
    fn normalizes_line_endings() {
        let registry = get_registry();
        assert_eq!(normalize_string("a\r\nb\rc\n"), "a\nb\nc\n");
        let lines = registry.tokenize("julia", "#= a\r\nb =#\rend").unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            line_tokens("end", &lines[2]),
            vec!["'end' source.julia keyword.control.end.julia"]
        );
    }

    const GRAMMAR_A: &str = r##"{
        "name": "a",
        "scopeName": "source.a",
        "patterns": [
            { "include": "#x" },
            { "match": "c", "name": "Ac" },
            { "include": "source.b#region" }
        ],
        "repository": {
            "x": { "patterns": [{ "include": "#y" }, { "match": "a", "name": "A" }] },
            "y": { "patterns": [{ "include": "#x" }, { "match": "y", "name": "Ay" }] }
        }
    }"##;

    const GRAMMAR_B: &str = r##"{
        "name": "b",
        "scopeName": "source.b",
        "patterns": [
            { "include": "#region" },
            { "include": "source.a#x" },
            { "match": "b", "name": "Bb" }
        ],
        "repository": {
            "region": {
                "begin": "<",
                "end": ">",
                "name": "B",
                "patterns": [{ "include": "$base" }]
            }
        }
    }"##;

    #[test]
    fn mutually_including_grammars_and_base() {
        let mut registry = Registry::default();
        registry.add_grammar_from_str(GRAMMAR_A).unwrap();
        registry.add_grammar_from_str(GRAMMAR_B).unwrap();
        let text = "ac<ac>";

        // `$base` in the region of `b` is the root of `a`, which matches `c`
        let from_a = registry.tokenize("a", text).unwrap();
        assert_eq!(
            line_tokens(text, &from_a[0]),
            vec![
                "'a' source.a A",
                "'c' source.a Ac",
                "'<' source.a B",
                "'a' source.a B A",
                "'c' source.a B Ac",
                "'>' source.a B",
            ]
        );

        // Starting from `b`, `$base` is `b` itself and only `a#x` is visible
        let from_b = registry.tokenize("b", text).unwrap();
        assert_eq!(
            line_tokens(text, &from_b[0]),
            vec![
                "'a' source.b A",
                "'c' source.b",
                "'<' source.b B",
                "'a' source.b B A",
                "'c' source.b B",
                "'>' source.b B",
            ]
        );
    }

    #[test]
    fn include_cycles_are_collected_once() {
        let mut registry = Registry::default();
        let a = registry.add_grammar_from_str(GRAMMAR_A).unwrap();
        registry.add_grammar_from_str(GRAMMAR_B).unwrap();

        let patterns: Vec<_> = registry
            .collect_patterns(a, GlobalRuleRef::root(a))
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(patterns, vec!["y", "a", "c", "<"]);
    }

    #[test]
    fn can_tokenize_in_parallel() {
        let registry = get_registry();
        let documents = [
            "#= a #= b =# c =#",
            "f(x) = \"$(x)\"",
            "r\"\"\"\nmulti\n\"\"\"",
            "struct Foo end",
        ];
        let expected: Vec<_> = documents
            .iter()
            .map(|d| registry.tokenize("julia", d).unwrap())
            .collect();

        let registry = &registry;
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = documents
                .iter()
                .map(|d| s.spawn(move || registry.tokenize("julia", d).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results, expected);
    }

    #[cfg(feature = "dump")]
    #[test]
    fn can_dump_and_load_registry() {
        let registry = get_registry();
        let path = std::env::temp_dir().join(format!("scopelex-{}.bin", std::process::id()));
        registry.dump_to_file(&path).unwrap();
        let loaded = Registry::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, registry);
        let text = "julia> begin\n       end";
        assert_eq!(
            loaded.tokenize("julia-console", text).unwrap(),
            registry.tokenize("julia-console", text).unwrap()
        );
    }
}
