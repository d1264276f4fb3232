//! Filter pattern compilation and routing-key matching.
//!
//! Patterns use the broker's topic wildcard language over `.`-delimited
//! keys: `*` matches exactly one segment, `#` matches the remainder of the
//! key greedily. Patterns compile once at subscribe time and are cached
//! for the lifetime of the registration that produced them.

pub mod filter_pattern;
pub mod pattern_set;


pub use filter_pattern::{FilterPattern, FilterPatternError};
pub use pattern_set::PatternSet;
