//! Aggregate error type for the dispatch core public API.

use thiserror::Error;

use crate::broker::TransportError;
use crate::pattern::FilterPatternError;
use crate::registry::RegistryError;
use crate::routing_key::RoutingKeyError;

/// Errors that can occur in dispatch core operations
#[derive(Error, Debug)]
pub enum DispatchError {
	/// Routing key construction or parsing failed
	#[error("Routing key error: {0}")]
	RoutingKey(#[from] RoutingKeyError),

	/// A filter pattern failed to compile
	#[error("Filter pattern error: {0}")]
	Pattern(#[from] FilterPatternError),

	/// Subscription registry rejected the operation
	#[error("Registry error: {0}")]
	Registry(#[from] RegistryError),

	/// Broker transport operation failed
	#[error("Transport error: {0}")]
	Transport(#[from] TransportError),

	/// Payload serialization failed
	#[error("Serialization error: {0}")]
	Serialization(String),
}

impl From<std::convert::Infallible> for DispatchError {
	fn from(never: std::convert::Infallible) -> Self {
		match never {}
	}
}
