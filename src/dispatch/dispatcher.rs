//! Outbound and inbound dispatch paths.

use std::sync::Arc;

use arcstr::ArcStr;
use tracing::{debug, warn};

use super::error::DispatchError;
use crate::broker::{
	BrokerPort, Delivery, DeliveryCallback, DeliveryVerdict, MessageHeaders,
};
use crate::config::CoreConfig;
use crate::message_serializer::MessageSerializer;
use crate::registry::{HandlerOutcome, SubscriptionRegistry};
use crate::routing_key::{RouteOptions, RoutingKey};

/// Minimal shape the dispatch core needs from a message type: a declared
/// type name to route under.
///
/// The default implementation uses the Rust type path, which the key
/// codec normalizes (`my_app::orders::OrderMessage` publishes under
/// `my_app.orders.ordermessage`). Override to pin a stable wire name.
pub trait DispatchMessage {
	/// Declared type name used as the leading routing key segment(s).
	fn type_name() -> &'static str
	where Self: Sized {
		std::any::type_name::<Self>()
	}
}

/// Routes outbound messages to the broker and inbound deliveries to the
/// subscription registry.
pub struct Dispatcher<B: BrokerPort> {
	broker: Arc<B>,
	registry: Arc<SubscriptionRegistry>,
	config: Arc<CoreConfig>,
}

impl<B: BrokerPort> Clone for Dispatcher<B> {
	fn clone(&self) -> Self {
		Self {
			broker: Arc::clone(&self.broker),
			registry: Arc::clone(&self.registry),
			config: Arc::clone(&self.config),
		}
	}
}

impl<B: BrokerPort> Dispatcher<B> {
	/// Creates a dispatcher over the given broker port and registry.
	pub fn new(
		broker: Arc<B>,
		registry: Arc<SubscriptionRegistry>,
		config: Arc<CoreConfig>,
	) -> Self {
		Self {
			broker,
			registry,
			config,
		}
	}

	/// Serializes and publishes a message under its canonical key.
	///
	/// Returns the key the message was published under.
	pub async fn publish<T, S>(
		&self,
		serializer: &S,
		message: &T,
		options: &RouteOptions,
	) -> Result<RoutingKey, DispatchError>
	where
		T: DispatchMessage,
		S: MessageSerializer<T>,
	{
		let key = RoutingKey::build(T::type_name(), options)?;
		let payload = serializer.serialize(message).map_err(|err| {
			DispatchError::Serialization(format!("{err:?}"))
		})?;
		let headers = MessageHeaders {
			type_name: key.type_name().clone(),
			to: key.to().clone(),
			from: key.from().clone(),
		};
		self.broker
			.publish(&self.config.exchange.name, key.as_str(), payload, &headers)
			.await?;
		debug!(routing_key = %key, "Published message");
		Ok(key)
	}

	/// Dispatches one inbound delivery, returning the verdict that
	/// drives the broker's ack/reject.
	pub fn dispatch(&self, delivery: &Delivery) -> DeliveryVerdict {
		self.dispatch_with_outcomes(delivery).0
	}

	/// Dispatch variant exposing the per-handler outcomes.
	///
	/// The verdict policy: a parse/validation failure before any handler
	/// runs rejects without requeue; once the matching handlers have been
	/// attempted the delivery is acknowledged, even when some of them
	/// failed (failures are logged and visible in the outcomes).
	pub fn dispatch_with_outcomes(
		&self,
		delivery: &Delivery,
	) -> (DeliveryVerdict, Vec<HandlerOutcome>) {
		if let (Some(headers), Some(key)) =
			(&delivery.headers, &delivery.routing_key)
		{
			if let Ok(parts) = RoutingKey::parse(key) {
				if parts.type_name != headers.type_name {
					warn!(
						header_type = %headers.type_name,
						key_type = %parts.type_name,
						routing_key = %key,
						"Message type mismatch between headers and routing \
						 key; rejecting without requeue"
					);
					return (
						DeliveryVerdict::Reject { requeue: false },
						Vec::new(),
					);
				}
			}
		}

		let Some(type_name) = resolve_type(delivery) else {
			warn!(
				delivery_tag = delivery.delivery_tag,
				"Could not resolve message type; rejecting without requeue"
			);
			return (DeliveryVerdict::Reject { requeue: false }, Vec::new());
		};

		let outcomes = self.registry.route(
			&type_name,
			delivery.routing_key.as_deref(),
			delivery,
		);
		debug!(
			message_type = %type_name,
			handlers = outcomes.len(),
			"Delivery dispatched"
		);
		(DeliveryVerdict::Ack, outcomes)
	}

	/// Wraps this dispatcher as the delivery callback handed to broker
	/// consumers.
	pub fn callback(&self) -> DeliveryCallback {
		let dispatcher = self.clone();
		Arc::new(move |delivery: Delivery| dispatcher.dispatch(&delivery))
	}
}

/// Resolves the message type from headers, falling back to the routing
/// key minus its trailing two segments.
///
/// The fallback assumes the trailing segments are always recipient and
/// sender; a type name that itself contains the delimiter is ambiguous
/// to reverse-parse (known limitation of the key format).
fn resolve_type(delivery: &Delivery) -> Option<ArcStr> {
	if let Some(headers) = &delivery.headers {
		return Some(headers.type_name.clone());
	}
	delivery
		.routing_key
		.as_deref()
		.and_then(|key| RoutingKey::parse(key).ok())
		.map(|parts| parts.type_name)
}
