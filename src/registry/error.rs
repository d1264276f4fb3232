//! Error types for the subscription registry.

use thiserror::Error;

use crate::pattern::FilterPatternError;

/// Errors surfaced synchronously at subscribe time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
	/// Message type name was empty
	#[error("Message type name cannot be empty")]
	EmptyTypeName,

	/// A filter value was empty after sanitization
	#[error("Filter value for '{side}' cannot be empty")]
	EmptyFilterValue {
		/// Which side of the filter (`to` or `from`)
		side: &'static str,
	},

	/// A named handler reference was structurally invalid
	#[error("Named handler reference must have a receiver and a method")]
	InvalidHandlerReference,

	/// A derived filter pattern failed to compile
	#[error("Filter pattern error: {0}")]
	Pattern(#[from] FilterPatternError),
}

impl RegistryError {
	/// Creates a new EmptyFilterValue error
	pub fn empty_filter_value(side: &'static str) -> Self {
		Self::EmptyFilterValue { side }
	}
}

/// Failure reported by (or on behalf of) a single handler invocation.
///
/// Handler failures are recovered locally: they are logged and collected
/// per-handler, and never abort delivery to the remaining handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
	/// The handler itself reported a failure
	#[error("Handler failed: {reason}")]
	Failed {
		/// Handler-supplied description
		reason: String,
	},

	/// A named handler had no entry in the handler table
	#[error("No handler registered for '{receiver}.{method}'")]
	UnresolvedName {
		/// Receiver key of the reference
		receiver: String,
		/// Method name of the reference
		method: String,
	},
}

impl HandlerError {
	/// Creates a new Failed error
	pub fn failed(reason: impl Into<String>) -> Self {
		Self::Failed {
			reason: reason.into(),
		}
	}

	/// Creates a new UnresolvedName error
	pub fn unresolved(
		receiver: impl Into<String>,
		method: impl Into<String>,
	) -> Self {
		Self::UnresolvedName {
			receiver: receiver.into(),
			method: method.into(),
		}
	}
}
