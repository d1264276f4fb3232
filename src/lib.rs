//! # Topic Dispatch
//!
//! A routing-key dispatch core for topic-exchange message brokers:
//! canonical `type.recipient.sender` keys, wildcard filter patterns and
//! a supervised connection with automatic consumer recovery.
//!
//! ## Features
//!
//! - **Canonical Routing Keys**: Deterministic `type.recipient.sender`
//!   keys built from sanitized identifiers
//! - **Wildcard Filter Patterns**: `*` matches one segment, `#` matches
//!   any remainder
//! - **Subscription Registry**: Multiple isolated handlers per message
//!   type with sender/recipient filtering
//! - **Connection Supervision**: Bounded reconnect with consumer replay
//!   and graceful shutdown
//! - **Async/Await Support**: Built on top of `tokio`
//! - **Message Serialization**: Pluggable serialization (Bincode
//!   included)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bincode::{Decode, Encode};
//! use topic_dispatch::prelude::*;
//!
//! #[derive(Encode, Decode, Debug)]
//! struct OrderMessage {
//!     order_id: u64,
//! }
//!
//! impl DispatchMessage for OrderMessage {
//!     fn type_name() -> &'static str {
//!         "OrderMessage"
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = my_broker_client();
//!     let (events_tx, events_rx) = tokio::sync::mpsc::channel(16);
//!     let (core, connection) =
//!         DispatchCore::connect(broker, CoreConfig::default(), events_rx)
//!             .await?;
//!
//!     // Handle orders sent by the monitor service
//!     core.subscribe(
//!         "OrderMessage",
//!         Handler::callable(|delivery| {
//!             println!("order payload: {} bytes", delivery.payload.len());
//!             Ok(())
//!         }),
//!         FilterOptions::from_sender("monitor"),
//!     )
//!     .await?;
//!
//!     // Publish an order addressed to the billing service
//!     let serializer = BincodeSerializer::new();
//!     core.publish(
//!         &serializer,
//!         &OrderMessage { order_id: 42 },
//!         &RouteOptions::to("billing"),
//!     )
//!     .await?;
//!
//!     connection.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Filter Patterns
//!
//! Subscriptions are narrowed with routing key wildcards:
//!
//! - `*` matches exactly one key segment (e.g. `ordermessage.*.monitor`)
//! - `#` matches any remainder, including several segments
//!   (e.g. `ordermessage.#`)
//!
//! A registration with no filters receives everything published under
//! its type.
//!
//! ## Custom Serialization
//!
//! Implement [`MessageSerializer`] for custom payload formats; the
//! `json` feature ships a [`JsonSerializer`] built on `serde_json`.

#![warn(missing_docs)]

// Core modules
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod message_serializer;
pub mod pattern;
pub mod registry;
pub mod routing_key;
pub mod supervisor;

// === Core Public API ===
// Broker port and delivery types
pub use broker::{
	AckMode, ActiveConsumer, BrokerEvent, BrokerPort, ConsumerTag, Delivery,
	DeliveryCallback, DeliveryTag, DeliveryVerdict, ExchangeSpec,
	MessageHeaders, QueueSpec,
};
// Configuration
pub use config::{BrokerSettings, CoreConfig, QueueDefaults, RecoveryPolicy};
// The assembled core
pub use dispatch::{
	DispatchConnection, DispatchCore, DispatchError, DispatchMessage,
	Dispatcher,
};
#[cfg(feature = "json")]
pub use message_serializer::JsonSerializer;
// Message serialization
pub use message_serializer::{BincodeSerializer, MessageSerializer};
// Filter pattern types (for manual pattern handling)
pub use pattern::{FilterPattern, PatternSet};
// Subscription registry
pub use registry::{
	FilterOptions, FilterValue, Handler, HandlerOutcome, HandlerTable,
	SubscriptionRegistry,
};
// Routing key codec
pub use routing_key::{
	normalize_type_name, sanitize, KeyParts, RouteOptions, RoutingKey,
};
// Connection supervision
pub use supervisor::{
	ConnectionSupervisor, ExhaustionCallback, SupervisorState,
};

/// Result type alias for operations that may fail with DispatchError
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Prelude module for convenient imports
///
/// Essential types for most dispatch applications. Use this when you
/// want to import everything you need with a single line:
///
/// ```rust
/// use topic_dispatch::prelude::*;
/// ```
pub mod prelude {
	#[cfg(feature = "json")]
	pub use crate::JsonSerializer;
	pub use crate::{
		BincodeSerializer, BrokerPort, CoreConfig, Delivery,
		DeliveryVerdict, DispatchConnection, DispatchCore, DispatchError,
		DispatchMessage, FilterOptions, Handler, MessageSerializer, Result,
		RouteOptions, RoutingKey,
	};
}

/// Error types used throughout the library
///
/// Re-exports all error types in one convenient location for error
/// handling.
///
/// ```rust
/// use topic_dispatch::errors::*;
/// ```
pub mod errors {
	pub use crate::broker::TransportError;
	pub use crate::dispatch::DispatchError;
	pub use crate::pattern::FilterPatternError;
	pub use crate::registry::{HandlerError, RegistryError};
	pub use crate::routing_key::RoutingKeyError;
}
