//! Payload serialization boundary.
//!
//! Serializers produce the [`Bytes`] payload that goes out on a publish
//! and decode the `Delivery::payload` bytes a handler receives back into
//! the message type.
//!
//! [`Bytes`]: bytes::Bytes

use std::fmt::Debug;

use bincode::{Decode, Encode};
use bytes::Bytes;

/// Encodes and decodes message payloads for one message type.
///
/// Implement this to use a custom payload format; [`BincodeSerializer`]
/// is the default, and the `json` feature ships [`JsonSerializer`] for
/// non-Rust peers.
pub trait MessageSerializer<T>:
	Default + Clone + Send + Sync + 'static
{
	/// Error type for serialization failures
	type SerializeError: Debug + Send + Sync + 'static;
	/// Error type for deserialization failures
	type DeserializeError: Debug + Send + Sync + 'static;

	/// Encodes a message into the payload published to the broker.
	fn serialize(&self, data: &T) -> Result<Bytes, Self::SerializeError>;
	/// Decodes a delivery payload back into the message type.
	fn deserialize(&self, bytes: &[u8]) -> Result<T, Self::DeserializeError>;
}

/// Default serializer using bincode format.
///
/// Requires types to implement `bincode::Encode` and `bincode::Decode`.
#[derive(Clone, Default)]
pub struct BincodeSerializer {
	config: bincode::config::Configuration,
}

impl BincodeSerializer {
	/// Creates a new serializer with default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a serializer with custom bincode configuration.
	pub fn with_config(config: bincode::config::Configuration) -> Self {
		Self { config }
	}
}

impl<T> MessageSerializer<T> for BincodeSerializer
where T: Encode + Decode<()> + 'static
{
	type SerializeError = bincode::error::EncodeError;
	type DeserializeError = bincode::error::DecodeError;

	fn serialize(&self, data: &T) -> Result<Bytes, Self::SerializeError> {
		bincode::encode_to_vec(data, self.config).map(Bytes::from)
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<T, Self::DeserializeError> {
		bincode::decode_from_slice(bytes, self.config).map(|(value, _)| value)
	}
}

/// JSON serializer for interoperability with non-Rust peers.
///
/// Enabled by the `json` feature.
#[cfg(feature = "json")]
#[derive(Clone, Default)]
pub struct JsonSerializer;

#[cfg(feature = "json")]
impl JsonSerializer {
	/// Creates a new JSON serializer.
	pub fn new() -> Self {
		Self
	}
}

#[cfg(feature = "json")]
impl<T> MessageSerializer<T> for JsonSerializer
where T: serde::Serialize + serde::de::DeserializeOwned + 'static
{
	type SerializeError = serde_json::Error;
	type DeserializeError = serde_json::Error;

	fn serialize(&self, data: &T) -> Result<Bytes, Self::SerializeError> {
		serde_json::to_vec(data).map(Bytes::from)
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<T, Self::DeserializeError> {
		serde_json::from_slice(bytes)
	}
}
