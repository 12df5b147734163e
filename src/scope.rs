//! Interned scope names.
//!
//! A scope like "string.quoted.double.julia" is stored once in a process-wide repository
//! and referred to by a `u32` index everywhere else. Tokens carry many copies of the same
//! handful of scopes so this keeps them cheap to clone and compare.
//! The repository is read-mostly: it only grows while grammars are compiled or when a
//! scope name is built from capture groups.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, RwLock};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope(u32);

impl Scope {
    /// Interns the given scope name, surrounding whitespace is ignored.
    pub fn new(s: &str) -> Scope {
        let s = s.trim();
        if let Some(&idx) = SCOPE_REPO
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .index
            .get(s)
        {
            return Scope(idx);
        }

        let mut repo = SCOPE_REPO.write().unwrap_or_else(|e| e.into_inner());
        // Another thread might have registered it between the two locks
        if let Some(&idx) = repo.index.get(s) {
            return Scope(idx);
        }
        let idx = repo.names.len() as u32;
        repo.names.push(s.to_owned());
        repo.index.insert(s.to_owned(), idx);
        Scope(idx)
    }

    /// Builds all the scopes of a space separated list, eg a rule named
    /// "string.quoted.other.julia punctuation.definition.string.begin.julia"
    pub fn new_many(s: &str) -> Vec<Scope> {
        s.split_whitespace().map(Scope::new).collect()
    }

    pub fn build_string(self) -> String {
        SCOPE_REPO.read().unwrap_or_else(|e| e.into_inner()).names[self.0 as usize].clone()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{}\")", self.build_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build_string())
    }
}

// Indices are only meaningful inside the current process so scopes go over the wire
// as their names.
impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.build_string())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Scope::new(&name))
    }
}

#[derive(Default)]
struct ScopeRepository {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

static SCOPE_REPO: LazyLock<RwLock<ScopeRepository>> =
    LazyLock::new(|| RwLock::new(ScopeRepository::default()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_scopes() {
        let a = Scope::new("source.julia");
        let b = Scope::new("  source.julia ");
        assert_eq!(a, b);
        assert_eq!(a.build_string(), "source.julia");
    }

    #[test]
    fn empty_scope() {
        let scope = Scope::new("");
        assert_eq!(scope.build_string(), "");
    }

    #[test]
    fn splits_space_separated_names() {
        let scopes = Scope::new_many("string.quoted.other.julia  support.function.macro.julia");
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[1].to_string(), "support.function.macro.julia");
    }

    #[test]
    fn roundtrips_through_json_as_a_name() {
        let scope = Scope::new("comment.block.number-sign-equals.julia");
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, "\"comment.block.number-sign-equals.julia\"");
        let back: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);
    }
}
