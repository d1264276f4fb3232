//! Boundary with the broker client.
//!
//! The dispatch core does not ship a broker implementation. Everything it
//! needs from one is captured by [`BrokerPort`]: connection and channel
//! lifecycle, exchange/queue declaration, binding, consuming, publishing
//! and acknowledgement. Implementations are expected to be cheaply
//! cloneable handles whose methods take `&self`, with any required
//! mutability handled internally.

use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::BrokerSettings;

/// Broker-assigned tag identifying one in-flight delivery.
pub type DeliveryTag = u64;

/// Identifier of a live consumer, returned by [`BrokerPort::consume`].
pub type ConsumerTag = ArcStr;

/// Errors surfaced by broker port implementations and the supervisor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
	/// A single connection attempt failed
	#[error("Connection attempt failed: {reason}")]
	ConnectFailed {
		/// Description of the failure
		reason: String,
	},

	/// The configured attempt budget was exhausted
	#[error("Connection attempts exhausted after {attempts} tries: {reason}")]
	AttemptsExhausted {
		/// Number of attempts made
		attempts: u32,
		/// Last failure observed
		reason: String,
	},

	/// A channel-level operation failed
	#[error("Channel operation failed: {reason}")]
	Channel {
		/// Description of the failure
		reason: String,
	},

	/// Operation requires a live connection
	#[error("Not connected to the broker")]
	NotConnected,

	/// Queue/binding/consumer setup failed
	#[error("Consumer setup for queue '{queue}' failed: {reason}")]
	ConsumerSetup {
		/// Queue being set up
		queue: String,
		/// Description of the failure
		reason: String,
	},

	/// An outbound publish failed
	#[error("Publish failed: {reason}")]
	PublishFailed {
		/// Description of the failure
		reason: String,
	},
}

impl TransportError {
	/// Creates a new ConnectFailed error
	pub fn connect_failed(reason: impl Into<String>) -> Self {
		Self::ConnectFailed {
			reason: reason.into(),
		}
	}

	/// Creates a new AttemptsExhausted error
	pub fn attempts_exhausted(
		attempts: u32,
		reason: impl Into<String>,
	) -> Self {
		Self::AttemptsExhausted {
			attempts,
			reason: reason.into(),
		}
	}

	/// Creates a new Channel error
	pub fn channel(reason: impl Into<String>) -> Self {
		Self::Channel {
			reason: reason.into(),
		}
	}

	/// Creates a new ConsumerSetup error
	pub fn consumer_setup(
		queue: impl Into<String>,
		reason: impl Into<String>,
	) -> Self {
		Self::ConsumerSetup {
			queue: queue.into(),
			reason: reason.into(),
		}
	}

	/// Creates a new PublishFailed error
	pub fn publish_failed(reason: impl Into<String>) -> Self {
		Self::PublishFailed {
			reason: reason.into(),
		}
	}
}

/// Parsed header map carried alongside every published payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeaders {
	/// Normalized message type name
	pub type_name: ArcStr,
	/// Recipient token
	pub to: ArcStr,
	/// Sender token
	pub from: ArcStr,
}

/// One inbound delivery handed to the dispatch core.
#[derive(Debug, Clone)]
pub struct Delivery {
	/// Opaque message payload
	pub payload: Bytes,
	/// Routing key the broker delivered under, when available
	pub routing_key: Option<ArcStr>,
	/// Parsed headers, when the publisher supplied them
	pub headers: Option<MessageHeaders>,
	/// Tag for ack/reject against the originating channel
	pub delivery_tag: DeliveryTag,
}

/// Acknowledgement discipline for a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
	/// Broker considers deliveries settled on send
	Auto,
	/// Deliveries are settled by explicit ack/reject from the verdict
	Manual,
}

/// Outcome of dispatching one delivery, driving ack/reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryVerdict {
	/// All matching handlers were attempted; settle the delivery
	Ack,
	/// The delivery never reached a handler
	Reject {
		/// Whether the broker should requeue it
		requeue: bool,
	},
}

/// Exchange declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
	/// Exchange name
	pub name: ArcStr,
	/// Exchange kind (`topic` for this core)
	pub kind: ArcStr,
	/// Survive broker restarts
	pub durable: bool,
}

impl ExchangeSpec {
	/// A durable topic exchange with the given name.
	pub fn topic(name: impl Into<ArcStr>) -> Self {
		Self {
			name: name.into(),
			kind: arcstr::literal!("topic"),
			durable: true,
		}
	}
}

/// Queue declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
	/// Queue name
	pub name: ArcStr,
	/// Survive broker restarts
	pub durable: bool,
	/// Delete once the last consumer goes away
	pub auto_delete: bool,
}

/// One live binding between a queue and a routing pattern.
///
/// Tracked by the supervisor; during a recovery cycle every active
/// consumer must be recreated with these exact parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConsumer {
	/// Queue backing this consumer
	pub queue: QueueSpec,
	/// Routing key or wildcard pattern the queue is bound with
	pub pattern: ArcStr,
	/// Message type this consumer serves
	pub type_name: ArcStr,
	/// Acknowledgement discipline
	pub ack_mode: AckMode,
	/// Prefetch window the implementation applies before consuming
	pub prefetch: u16,
}

/// Callback invoked by the broker client for each inbound delivery.
///
/// The returned verdict drives the implementation's ack/reject call.
pub type DeliveryCallback =
	Arc<dyn Fn(Delivery) -> DeliveryVerdict + Send + Sync>;

/// Connectivity notifications the supervisor subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEvent {
	/// The underlying connection was lost; a recovery cycle is required
	ConnectivityLost,
	/// The process is shutting down; disconnect and stop supervising
	Shutdown,
}

impl fmt::Display for BrokerEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| BrokerEvent::ConnectivityLost => write!(f, "connectivity-lost"),
			| BrokerEvent::Shutdown => write!(f, "shutdown"),
		}
	}
}

/// Capability set the dispatch core requires from a broker client.
#[async_trait]
pub trait BrokerPort: Send + Sync + 'static {
	/// Establishes the underlying connection.
	async fn connect(
		&self,
		settings: &BrokerSettings,
	) -> Result<(), TransportError>;

	/// Opens (or reopens) the channel all other operations run on.
	async fn open_channel(&self) -> Result<(), TransportError>;

	/// Closes the channel, leaving the connection up.
	async fn close_channel(&self) -> Result<(), TransportError>;

	/// Closes the connection.
	async fn close(&self) -> Result<(), TransportError>;

	/// Declares the exchange messages are published to.
	async fn declare_exchange(
		&self,
		exchange: &ExchangeSpec,
	) -> Result<(), TransportError>;

	/// Declares a queue.
	async fn declare_queue(
		&self,
		queue: &QueueSpec,
	) -> Result<(), TransportError>;

	/// Binds a queue to an exchange under a routing pattern.
	async fn bind_queue(
		&self,
		queue: &str,
		exchange: &str,
		pattern: &str,
	) -> Result<(), TransportError>;

	/// Starts a consumer on the queue described by `consumer`.
	///
	/// The implementation applies `consumer.prefetch` to the channel
	/// before consuming. Deliveries are handed to `on_delivery` from the
	/// client's own delivery workers; the implementation acks or rejects
	/// according to the returned verdict and the consumer's [`AckMode`].
	async fn consume(
		&self,
		consumer: &ActiveConsumer,
		on_delivery: DeliveryCallback,
	) -> Result<ConsumerTag, TransportError>;

	/// Cancels a running consumer.
	async fn cancel_consumer(
		&self,
		tag: &ConsumerTag,
	) -> Result<(), TransportError>;

	/// Publishes a payload under a routing key with its header map.
	async fn publish(
		&self,
		exchange: &str,
		routing_key: &str,
		payload: Bytes,
		headers: &MessageHeaders,
	) -> Result<(), TransportError>;

	/// Acknowledges a delivery.
	async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError>;

	/// Rejects a delivery, optionally requeueing it.
	async fn reject(
		&self,
		tag: DeliveryTag,
		requeue: bool,
	) -> Result<(), TransportError>;

	/// True while both connection and channel report healthy.
	fn is_healthy(&self) -> bool;
}

// A shared handle is as good as the implementation it wraps; this lets
// callers hand the same broker to the core and keep their own handle.
#[async_trait]
impl<B: BrokerPort> BrokerPort for Arc<B> {
	async fn connect(
		&self,
		settings: &BrokerSettings,
	) -> Result<(), TransportError> {
		self.as_ref().connect(settings).await
	}

	async fn open_channel(&self) -> Result<(), TransportError> {
		self.as_ref().open_channel().await
	}

	async fn close_channel(&self) -> Result<(), TransportError> {
		self.as_ref().close_channel().await
	}

	async fn close(&self) -> Result<(), TransportError> {
		self.as_ref().close().await
	}

	async fn declare_exchange(
		&self,
		exchange: &ExchangeSpec,
	) -> Result<(), TransportError> {
		self.as_ref().declare_exchange(exchange).await
	}

	async fn declare_queue(
		&self,
		queue: &QueueSpec,
	) -> Result<(), TransportError> {
		self.as_ref().declare_queue(queue).await
	}

	async fn bind_queue(
		&self,
		queue: &str,
		exchange: &str,
		pattern: &str,
	) -> Result<(), TransportError> {
		self.as_ref().bind_queue(queue, exchange, pattern).await
	}

	async fn consume(
		&self,
		consumer: &ActiveConsumer,
		on_delivery: DeliveryCallback,
	) -> Result<ConsumerTag, TransportError> {
		self.as_ref().consume(consumer, on_delivery).await
	}

	async fn cancel_consumer(
		&self,
		tag: &ConsumerTag,
	) -> Result<(), TransportError> {
		self.as_ref().cancel_consumer(tag).await
	}

	async fn publish(
		&self,
		exchange: &str,
		routing_key: &str,
		payload: Bytes,
		headers: &MessageHeaders,
	) -> Result<(), TransportError> {
		self.as_ref()
			.publish(exchange, routing_key, payload, headers)
			.await
	}

	async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError> {
		self.as_ref().ack(tag).await
	}

	async fn reject(
		&self,
		tag: DeliveryTag,
		requeue: bool,
	) -> Result<(), TransportError> {
		self.as_ref().reject(tag, requeue).await
	}

	fn is_healthy(&self) -> bool {
		self.as_ref().is_healthy()
	}
}
