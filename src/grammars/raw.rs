use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::compiled::{CompileError, CompiledGrammar};
use crate::error::ScopelexResult;

/// Capture groups of a `match`/`begin`/`end`/`while` pattern, keyed by group index.
///
/// # Examples
/// ```json
/// {
///   "0": { "name": "punctuation.definition.string.begin.julia" },
///   "1": { "name": "support.function.macro.julia" }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Captures(pub BTreeMap<usize, RawRule>);

impl Captures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Captures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: HashMap<String, RawRule> = HashMap::deserialize(deserializer)?;
        // Some grammars have non-numeric keys in there, they can never be referenced
        Ok(Captures(
            raw.into_iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|k| (k, v)))
                .collect(),
        ))
    }
}

/// Any rule of a TextMate grammar.
///
/// The various kinds of rules only differ by which fields are set so it's kept as a flat
/// struct and sorted out by the compiler:
///  * `include` set: a reference to another rule
///  * `match` set: a single regex rule
///  * `begin` + `end`: a region
///  * `begin` + `while`: a region that lasts as long as every line matches `while`
///  * only `patterns`: a container dispatching to its children
///
/// # Examples
/// ```json
/// {
///   "name": "comment.block.number-sign-equals.julia",
///   "begin": "#=",
///   "end": "=#",
///   "beginCaptures": { "0": { "name": "punctuation.definition.comment.begin.julia" } },
///   "endCaptures": { "0": { "name": "punctuation.definition.comment.end.julia" } },
///   "patterns": [{ "include": "#comment_block" }]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawRule {
    pub include: Option<String>,
    pub name: Option<String>,
    pub content_name: Option<String>,
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    pub captures: Captures,
    pub begin: Option<String>,
    pub begin_captures: Captures,
    pub end: Option<String>,
    pub end_captures: Captures,
    #[serde(rename(deserialize = "while"))]
    pub while_: Option<String>,
    pub while_captures: Captures,
    pub patterns: Vec<RawRule>,
    #[serde(deserialize_with = "deserialize_repository")]
    pub repository: HashMap<String, RawRule>,
    /// Whether the `end` pattern loses against `patterns` matching at the same position
    #[serde(deserialize_with = "deserialize_bool_or_int")]
    pub apply_end_pattern_last: bool,
}

/// Top-level structure of a TextMate grammar
///
/// # Examples
/// ```json
/// {
///   "name": "julia",
///   "scopeName": "source.julia",
///   "fileTypes": ["jl"],
///   "patterns": [{ "include": "#comment" }],
///   "repository": {
///     "comment": { "patterns": [{ "include": "#comment_block" }] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Name of the language, eg "julia"
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Unique identifier other grammars use to include this one, eg "source.julia"
    pub scope_name: String,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: HashMap<String, RawRule>,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ScopelexResult<Self> {
        let file = File::open(&path)?;
        let raw_grammar = serde_json::from_reader(BufReader::new(file))?;
        Ok(raw_grammar)
    }

    pub fn from_json(content: &str) -> ScopelexResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Compile this raw grammar into an optimized compiled grammar
    pub fn compile(self) -> Result<CompiledGrammar, CompileError> {
        CompiledGrammar::from_raw_grammar(self)
    }
}

/// Repository entries are normally a rule but a few grammars use a bare array of rules
#[derive(Deserialize)]
#[serde(untagged)]
enum RepositoryEntry {
    Rule(Box<RawRule>),
    Patterns(Vec<RawRule>),
}

fn deserialize_repository<'de, D>(deserializer: D) -> Result<HashMap<String, RawRule>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: HashMap<String, RepositoryEntry> = HashMap::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .map(|(name, entry)| {
            let rule = match entry {
                RepositoryEntry::Rule(rule) => *rule,
                RepositoryEntry::Patterns(patterns) => RawRule {
                    patterns,
                    ..Default::default()
                },
            };
            (name, rule)
        })
        .collect())
}

fn deserialize_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(i64),
    }

    Ok(match BoolOrInt::deserialize(deserializer)? {
        BoolOrInt::Bool(b) => b,
        BoolOrInt::Int(i) => i != 0,
    })
}
