//! Compilation of a single wildcard filter into a matchable form.

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use arcstr::ArcStr;
use regex::Regex;
use thiserror::Error;

use crate::routing_key::KEY_DELIMITER;

/// Errors from filter pattern compilation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterPatternError {
	/// Pattern string was empty or whitespace-only
	#[error("Filter pattern cannot be empty")]
	EmptyPattern,

	/// A segment mixes wildcard characters with literal characters
	#[error(
		"Invalid filter pattern '{pattern}': segment '{segment}' mixes \
		 wildcard and literal characters"
	)]
	MixedWildcardSegment {
		/// The full offending pattern
		pattern: String,
		/// The segment that failed classification
		segment: String,
	},

	/// The derived regular expression failed to compile
	#[error("Filter pattern '{pattern}' failed to compile: {reason}")]
	CompileFailed {
		/// The pattern being compiled
		pattern: String,
		/// Description of the regex failure
		reason: String,
	},
}

impl FilterPatternError {
	/// Creates a new MixedWildcardSegment error
	pub fn mixed_wildcard(
		pattern: impl Into<String>,
		segment: impl Into<String>,
	) -> Self {
		Self::MixedWildcardSegment {
			pattern: pattern.into(),
			segment: segment.into(),
		}
	}

	/// Creates a new CompileFailed error
	pub fn compile_failed(
		pattern: impl Into<String>,
		reason: impl Into<String>,
	) -> Self {
		Self::CompileFailed {
			pattern: pattern.into(),
			reason: reason.into(),
		}
	}
}

/// A compiled routing-key filter.
///
/// Compilation translates the pattern into an anchored regular expression:
/// literal segments are escaped, `*` becomes `[^.]+` (exactly one
/// segment), `#` becomes `.*` (the remainder of the key, dots included).
/// `#` is accepted at any position; an unusual placement such as
/// `a.#.b` is compiled as written rather than rejected.
#[derive(Debug, Clone)]
pub struct FilterPattern {
	source: ArcStr,
	regex: Regex,
}

impl FilterPattern {
	/// Compiles a wildcard filter string.
	pub fn compile(
		pattern: impl Into<ArcStr>,
	) -> Result<Self, FilterPatternError> {
		let source: ArcStr = pattern.into();
		if source.trim().is_empty() {
			return Err(FilterPatternError::EmptyPattern);
		}

		let mut expression = String::with_capacity(source.len() + 8);
		expression.push('^');
		for (index, segment) in source.split(KEY_DELIMITER).enumerate() {
			if index > 0 {
				expression.push_str("\\.");
			}
			match segment {
				| "*" => expression.push_str("[^.]+"),
				| "#" => expression.push_str(".*"),
				| _ if segment.contains(['*', '#']) => {
					return Err(FilterPatternError::mixed_wildcard(
						source.as_str(),
						segment,
					));
				}
				| _ => expression.push_str(&regex::escape(segment)),
			}
		}
		expression.push('$');

		let regex = Regex::new(&expression).map_err(|err| {
			FilterPatternError::compile_failed(
				source.as_str(),
				err.to_string(),
			)
		})?;
		Ok(Self { source, regex })
	}

	/// Tests a concrete routing key against this pattern.
	pub fn matches_key(&self, routing_key: &str) -> bool {
		self.regex.is_match(routing_key)
	}

	/// The original pattern string.
	pub fn as_str(&self) -> &str {
		&self.source
	}
}

// Patterns compare by source string; the regex is derived state.
impl PartialEq for FilterPattern {
	fn eq(&self, other: &Self) -> bool {
		self.source == other.source
	}
}

impl Eq for FilterPattern {}

impl Hash for FilterPattern {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.source.hash(state);
	}
}

impl Display for FilterPattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.source)
	}
}

impl TryFrom<&str> for FilterPattern {
	type Error = FilterPatternError;

	fn try_from(pattern: &str) -> Result<Self, Self::Error> {
		Self::compile(pattern)
	}
}
