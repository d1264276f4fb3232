//! Canonical routing key construction and parsing.
//!
//! Application messages are published under a three-part key of the form
//! `type.recipient.sender`. The type portion may itself span several
//! segments when the message type lives in a namespace
//! (`orders::OrderMessage` becomes `orders.ordermessage`), which is why
//! [`RoutingKey::parse`] works from the tail of the key inward.

use std::fmt::{self, Display};

use arcstr::ArcStr;
use thiserror::Error;

/// Recipient used when the publisher does not name one.
pub const DEFAULT_RECIPIENT: &str = "broadcast";
/// Sender used when the publisher does not name one.
pub const DEFAULT_SENDER: &str = "anonymous";

/// Segment delimiter in routing keys and filter patterns.
pub const KEY_DELIMITER: char = '.';

/// Errors from routing key construction and parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingKeyError {
	/// Message type name was empty or whitespace-only
	#[error("Message type name cannot be empty")]
	EmptyTypeName,

	/// Key has too few segments to contain type, recipient and sender
	#[error(
		"Routing key '{key}' has {segments} segment(s), expected at least 3"
	)]
	TooFewSegments {
		/// The key that failed to parse
		key: String,
		/// Number of segments found
		segments: usize,
	},
}

impl RoutingKeyError {
	/// Creates a new TooFewSegments error
	pub fn too_few_segments(key: impl Into<String>, segments: usize) -> Self {
		Self::TooFewSegments {
			key: key.into(),
			segments,
		}
	}
}

/// Recipient/sender options supplied by the publisher.
///
/// Both sides are optional; missing values fall back to
/// [`DEFAULT_RECIPIENT`] and [`DEFAULT_SENDER`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOptions {
	/// Recipient identifier (`to` side of the key)
	pub to: Option<String>,
	/// Sender identifier (`from` side of the key)
	pub from: Option<String>,
}

impl RouteOptions {
	/// Options addressing a specific recipient.
	pub fn to(recipient: impl Into<String>) -> Self {
		Self {
			to: Some(recipient.into()),
			from: None,
		}
	}

	/// Options declaring the sending service.
	pub fn from_sender(sender: impl Into<String>) -> Self {
		Self {
			to: None,
			from: Some(sender.into()),
		}
	}

	/// Options with both sides set.
	pub fn between(
		recipient: impl Into<String>,
		sender: impl Into<String>,
	) -> Self {
		Self {
			to: Some(recipient.into()),
			from: Some(sender.into()),
		}
	}
}

/// A built, immutable routing key with its resolved components.
///
/// Created per publish via [`RoutingKey::build`]; segments are guaranteed
/// to be sanitized (`[a-z0-9_-]` plus the delimiter between them).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
	key: ArcStr,
	type_name: ArcStr,
	to: ArcStr,
	from: ArcStr,
}

impl RoutingKey {
	/// Builds the canonical key for a message type and routing options.
	///
	/// The type name is normalized (namespace separators collapse to `.`,
	/// each segment sanitized and lowercased); `to`/`from` are sanitized
	/// and defaulted. Identifiers that collide after sanitization (for
	/// example `api.server` and `api@server` both becoming `api_server`)
	/// are accepted as-is; avoiding such collisions is the caller's
	/// responsibility.
	pub fn build(
		type_name: &str,
		options: &RouteOptions,
	) -> Result<Self, RoutingKeyError> {
		let type_name = normalize_type_name(type_name)?;
		let to = options
			.to
			.as_deref()
			.map(sanitize)
			.unwrap_or_else(|| DEFAULT_RECIPIENT.to_string());
		let from = options
			.from
			.as_deref()
			.map(sanitize)
			.unwrap_or_else(|| DEFAULT_SENDER.to_string());

		let key = format!("{type_name}.{to}.{from}");
		Ok(Self {
			key: ArcStr::from(key),
			type_name: ArcStr::from(type_name),
			to: ArcStr::from(to),
			from: ArcStr::from(from),
		})
	}

	/// Parses a delivery routing key back into its components.
	///
	/// The trailing two segments are taken as recipient and sender;
	/// everything before them re-joins as the type name. Type names that
	/// themselves end in segments resembling identifiers are therefore
	/// ambiguous to reverse-parse; this is a documented limitation of the
	/// key format, not detected here.
	pub fn parse(raw: &str) -> Result<KeyParts, RoutingKeyError> {
		let segments: Vec<&str> = raw.split(KEY_DELIMITER).collect();
		if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
			return Err(RoutingKeyError::too_few_segments(
				raw,
				segments.len(),
			));
		}
		let (type_segments, tail) = segments.split_at(segments.len() - 2);
		Ok(KeyParts {
			type_name: ArcStr::from(type_segments.join(".")),
			to: ArcStr::from(tail[0]),
			from: ArcStr::from(tail[1]),
		})
	}

	/// The full key string.
	pub fn as_str(&self) -> &str {
		&self.key
	}

	/// Normalized message type portion of the key.
	pub fn type_name(&self) -> &ArcStr {
		&self.type_name
	}

	/// Recipient segment.
	pub fn to(&self) -> &ArcStr {
		&self.to
	}

	/// Sender segment.
	pub fn from(&self) -> &ArcStr {
		&self.from
	}
}

impl Display for RoutingKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.key)
	}
}

impl AsRef<str> for RoutingKey {
	fn as_ref(&self) -> &str {
		&self.key
	}
}

/// Components recovered from a delivery routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
	/// Type portion (all segments before the trailing two)
	pub type_name: ArcStr,
	/// Recipient segment
	pub to: ArcStr,
	/// Sender segment
	pub from: ArcStr,
}

/// Maps an identifier into a key-safe token.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`, and the result is
/// lowercased. Idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(value: &str) -> String {
	value
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
				c.to_ascii_lowercase()
			} else {
				'_'
			}
		})
		.collect()
}

/// Normalizes a message type name for use as the leading key segment(s).
///
/// Namespace separators (`::`) collapse to the key delimiter; each
/// resulting segment is sanitized.
pub fn normalize_type_name(
	type_name: &str,
) -> Result<String, RoutingKeyError> {
	if type_name.trim().is_empty() {
		return Err(RoutingKeyError::EmptyTypeName);
	}
	let normalized = type_name
		.split("::")
		.filter(|segment| !segment.is_empty())
		.map(sanitize)
		.collect::<Vec<_>>()
		.join(".");
	if normalized.is_empty() {
		return Err(RoutingKeyError::EmptyTypeName);
	}
	Ok(normalized)
}
