use std::fmt;
use std::io;

use crate::grammars::CompileError;

pub(crate) type ScopelexResult<T> = Result<T, Error>;

/// Errors that can occur during scopelex usage
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file
    /// or a dump file if the `dump` feature is enabled
    Io(io::Error),

    /// JSON parsing failed when loading a grammar.
    Json(serde_json::Error),

    /// A grammar could be parsed but not compiled: invalid regex, local include pointing
    /// nowhere etc. Such a grammar is never used for tokenization.
    Compile(CompileError),

    /// Bitcode encoding or decoding of a registry dump failed.
    #[cfg(feature = "dump")]
    Bitcode(bitcode::Error),

    /// A grammar was not found in the registry, or the loader didn't know
    /// the scope we asked it for.
    GrammarNotFound(String),

    /// A pattern set could not be assembled during tokenization.
    /// Individual patterns are validated when grammars are compiled, so this points at
    /// a grammar problem, never at the text being tokenized.
    TokenizeRegex(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::Compile(err) => write!(f, "grammar compilation error: {}", err),
            #[cfg(feature = "dump")]
            Error::Bitcode(err) => write!(f, "bitcode error: {}", err),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::TokenizeRegex(message) => write!(f, "regex compilation error: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Compile(err) => Some(err),
            #[cfg(feature = "dump")]
            Error::Bitcode(err) => Some(err),
            Error::GrammarNotFound(_) | Error::TokenizeRegex(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Error::Compile(err)
    }
}

#[cfg(feature = "dump")]
impl From<bitcode::Error> for Error {
    fn from(err: bitcode::Error) -> Self {
        Error::Bitcode(err)
    }
}
