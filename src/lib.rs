//! A TextMate grammar tokenizer: splits text into tokens, each carrying the stack of scope
//! names the grammar assigns to it, the same way editors based on vscode-textmate do.
//!
//! Grammars are added to a [`Registry`], which compiles them and resolves the includes
//! between them. A [`Tokenizer`] then works line by line, the [`StateStack`] it returns for
//! one line being the input of the next.

mod error;
mod grammars;
mod registry;
mod scope;
mod tokenizer;

#[cfg(test)]
mod test_utils;

pub use error::Error;
pub use grammars::{
    Captures, CompileError, CompiledGrammar, GlobalRuleRef, GrammarId, RawGrammar, RawRule,
    RuleId,
};
pub use registry::{GrammarLoader, Registry, normalize_string};
pub use scope::Scope;
pub use tokenizer::{
    EndPatternPriority, StackFrame, StateStack, Token, TokenizedLine, Tokenizer,
    TokenizerOptions,
};
