mod common;
mod compiled;
mod pattern_set;
mod raw;
mod regex;

pub use common::*;
pub use compiled::*;
pub use pattern_set::{PatternSet, PatternSetMatch};
pub use raw::{Captures, RawGrammar, RawRule};
pub use regex::{Regex, escape_regex, has_backreferences, resolve_backreferences};
