//! Ordered sets of compiled filter patterns.

use std::fmt::{self, Display};

use smallvec::SmallVec;

use super::filter_pattern::{FilterPattern, FilterPatternError};

/// An ordered collection of compiled patterns owned by one registration.
///
/// Most registrations derive one or two patterns (the to/from cross
/// product), so storage is inline-first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
	patterns: SmallVec<[FilterPattern; 2]>,
}

impl PatternSet {
	/// Creates an empty pattern set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Compiles every pattern string into one set.
	pub fn compile_all<I, S>(patterns: I) -> Result<Self, FilterPatternError>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let patterns = patterns
			.into_iter()
			.map(|p| FilterPattern::compile(p.as_ref()))
			.collect::<Result<_, _>>()?;
		Ok(Self { patterns })
	}

	/// Adds a compiled pattern to the set.
	pub fn push(&mut self, pattern: FilterPattern) {
		self.patterns.push(pattern);
	}

	/// Tests a delivery routing key against the set.
	///
	/// Matching is existential: any pattern hitting means deliver. An
	/// empty set, or an absent/empty routing key, matches everything;
	/// with no routing information there is nothing to filter on. Note
	/// this can mask a subscriber that meant to filter but registered no
	/// patterns.
	pub fn matches(&self, routing_key: Option<&str>) -> bool {
		let Some(key) = routing_key.filter(|key| !key.is_empty()) else {
			return true;
		};
		if self.patterns.is_empty() {
			return true;
		}
		self.patterns.iter().any(|pattern| pattern.matches_key(key))
	}

	/// Iterates the compiled patterns in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = &FilterPattern> {
		self.patterns.iter()
	}

	/// Number of patterns in the set.
	pub fn len(&self) -> usize {
		self.patterns.len()
	}

	/// True when the set holds no patterns.
	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}
}

impl FromIterator<FilterPattern> for PatternSet {
	fn from_iter<I: IntoIterator<Item = FilterPattern>>(iter: I) -> Self {
		Self {
			patterns: iter.into_iter().collect(),
		}
	}
}

impl Display for PatternSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for pattern in &self.patterns {
			if !first {
				write!(f, ", ")?;
			}
			write!(f, "{pattern}")?;
			first = false;
		}
		Ok(())
	}
}
