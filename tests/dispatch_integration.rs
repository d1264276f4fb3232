//! End-to-end tests over an in-memory topic-exchange broker.
//!
//! The broker double below behaves like a real topic exchange: published
//! messages are delivered to every consumer whose queue binding pattern
//! matches the routing key, and the delivery callback's verdict is
//! recorded as an ack or reject.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bincode::{Decode, Encode};
use bytes::Bytes;
use topic_dispatch::{
	ActiveConsumer, BincodeSerializer, BrokerEvent, BrokerPort,
	BrokerSettings, ConsumerTag, CoreConfig, Delivery, DeliveryCallback,
	DeliveryTag, DeliveryVerdict, DispatchCore, DispatchMessage,
	ExchangeSpec, FilterOptions, FilterPattern, Handler, MessageHeaders,
	QueueSpec, RouteOptions,
};

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
struct OrderMessage {
	order_id: u64,
}

impl DispatchMessage for OrderMessage {
	fn type_name() -> &'static str {
		"OrderMessage"
	}
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
struct PaymentMessage {
	amount_cents: u64,
}

impl DispatchMessage for PaymentMessage {
	fn type_name() -> &'static str {
		"PaymentMessage"
	}
}

struct BoundConsumer {
	tag: String,
	queue: String,
	prefetch: u16,
	callback: DeliveryCallback,
}

#[derive(Default)]
struct ExchangeState {
	connected: bool,
	channel_open: bool,
	/// (queue, pattern) bindings live on the current channel
	bindings: Vec<(String, FilterPattern)>,
	consumers: Vec<BoundConsumer>,
	acked: Vec<DeliveryTag>,
	rejected: Vec<(DeliveryTag, bool)>,
	next_delivery_tag: DeliveryTag,
	next_consumer_tag: usize,
}

/// In-memory topic exchange. Bindings and consumers die with the
/// channel, like they would on a real client.
#[derive(Default)]
struct InMemoryBroker {
	state: Mutex<ExchangeState>,
}

impl InMemoryBroker {
	fn with_state<R>(&self, f: impl FnOnce(&mut ExchangeState) -> R) -> R {
		f(&mut self.state.lock().unwrap())
	}

	fn consumer_count(&self) -> usize {
		self.with_state(|state| state.consumers.len())
	}

	fn ack_count(&self) -> usize {
		self.with_state(|state| state.acked.len())
	}

	/// Total `consume` calls ever made, across channel recreations.
	fn consume_calls(&self) -> usize {
		self.with_state(|state| state.next_consumer_tag)
	}
}

#[async_trait]
impl BrokerPort for InMemoryBroker {
	async fn connect(
		&self,
		_settings: &BrokerSettings,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		self.with_state(|state| {
			state.connected = true;
			Ok(())
		})
	}

	async fn open_channel(
		&self,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		self.with_state(|state| {
			state.channel_open = true;
			state.bindings.clear();
			state.consumers.clear();
			Ok(())
		})
	}

	async fn close_channel(
		&self,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		self.with_state(|state| {
			state.channel_open = false;
			state.bindings.clear();
			state.consumers.clear();
			Ok(())
		})
	}

	async fn close(
		&self,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		self.with_state(|state| {
			state.connected = false;
			state.channel_open = false;
			Ok(())
		})
	}

	async fn declare_exchange(
		&self,
		_exchange: &ExchangeSpec,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		Ok(())
	}

	async fn declare_queue(
		&self,
		_queue: &QueueSpec,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		Ok(())
	}

	async fn bind_queue(
		&self,
		queue: &str,
		_exchange: &str,
		pattern: &str,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		let compiled = FilterPattern::compile(pattern)
			.expect("binding patterns produced by the core always compile");
		self.with_state(|state| {
			state.bindings.push((queue.to_string(), compiled));
			Ok(())
		})
	}

	async fn consume(
		&self,
		consumer: &ActiveConsumer,
		on_delivery: DeliveryCallback,
	) -> Result<ConsumerTag, topic_dispatch::errors::TransportError> {
		self.with_state(|state| {
			state.next_consumer_tag += 1;
			let tag = format!("ctag-{}", state.next_consumer_tag);
			state.consumers.push(BoundConsumer {
				tag: tag.clone(),
				queue: consumer.queue.name.to_string(),
				prefetch: consumer.prefetch,
				callback: on_delivery,
			});
			Ok(ConsumerTag::from(tag))
		})
	}

	async fn cancel_consumer(
		&self,
		tag: &ConsumerTag,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		self.with_state(|state| {
			state.consumers.retain(|c| c.tag != tag.as_str());
			Ok(())
		})
	}

	async fn publish(
		&self,
		_exchange: &str,
		routing_key: &str,
		payload: Bytes,
		headers: &MessageHeaders,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		// Snapshot the matching callbacks first; the callback re-enters
		// the dispatch core and must not run under the exchange lock.
		let matched: Vec<(DeliveryTag, DeliveryCallback)> =
			self.with_state(|state| {
				let queues: Vec<String> = state
					.bindings
					.iter()
					.filter(|(_, pattern)| pattern.matches_key(routing_key))
					.map(|(queue, _)| queue.clone())
					.collect();
				let callbacks: Vec<DeliveryCallback> = state
					.consumers
					.iter()
					.filter(|c| queues.contains(&c.queue))
					.map(|c| Arc::clone(&c.callback))
					.collect();
				callbacks
					.into_iter()
					.map(|callback| {
						state.next_delivery_tag += 1;
						(state.next_delivery_tag, callback)
					})
					.collect()
			});

		for (tag, callback) in matched {
			let verdict = callback(Delivery {
				payload: payload.clone(),
				routing_key: Some(routing_key.into()),
				headers: Some(headers.clone()),
				delivery_tag: tag,
			});
			self.with_state(|state| match verdict {
				DeliveryVerdict::Ack => state.acked.push(tag),
				DeliveryVerdict::Reject { requeue } => {
					state.rejected.push((tag, requeue));
				}
			});
		}
		Ok(())
	}

	async fn ack(
		&self,
		tag: DeliveryTag,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		self.with_state(|state| {
			state.acked.push(tag);
			Ok(())
		})
	}

	async fn reject(
		&self,
		tag: DeliveryTag,
		requeue: bool,
	) -> Result<(), topic_dispatch::errors::TransportError> {
		self.with_state(|state| {
			state.rejected.push((tag, requeue));
			Ok(())
		})
	}

	fn is_healthy(&self) -> bool {
		self.with_state(|state| state.connected && state.channel_open)
	}
}

struct TestCore {
	broker: Arc<InMemoryBroker>,
	core: DispatchCore<Arc<InMemoryBroker>>,
	connection: topic_dispatch::DispatchConnection,
	events: tokio::sync::mpsc::Sender<BrokerEvent>,
}

async fn start_core() -> TestCore {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let broker = Arc::new(InMemoryBroker::default());
	let (events_tx, events_rx) = tokio::sync::mpsc::channel(16);
	let mut config = CoreConfig::default();
	config.recovery.initial_backoff = Duration::from_millis(1);
	let (core, connection) =
		DispatchCore::connect(Arc::clone(&broker), config, events_rx)
			.await
			.expect("connect against the in-memory broker never fails");
	TestCore {
		broker,
		core,
		connection,
		events: events_tx,
	}
}

fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
	Handler::callable(move |_delivery| {
		counter.fetch_add(1, Ordering::SeqCst);
		Ok(())
	})
}

/// Waits until `predicate` holds or the deadline passes.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
	for _ in 0 .. 200 {
		if predicate() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition not reached within the deadline");
}

#[tokio::test]
async fn publish_reaches_matching_subscriber() {
	let fixture = start_core().await;
	let received = Arc::new(AtomicUsize::new(0));
	fixture
		.core
		.subscribe(
			"OrderMessage",
			counting_handler(received.clone()),
			FilterOptions::default(),
		)
		.await
		.unwrap();

	let serializer = BincodeSerializer::new();
	let key = fixture
		.core
		.publish(
			&serializer,
			&OrderMessage { order_id: 7 },
			&RouteOptions::default(),
		)
		.await
		.unwrap();

	assert_eq!(key.as_str(), "ordermessage.broadcast.anonymous");
	assert_eq!(received.load(Ordering::SeqCst), 1);
	assert_eq!(fixture.broker.ack_count(), 1);
	fixture.connection.shutdown().await;
}

#[tokio::test]
async fn subscribe_applies_the_configured_prefetch() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let broker = Arc::new(InMemoryBroker::default());
	let (_events_tx, events_rx) = tokio::sync::mpsc::channel(16);
	let mut config = CoreConfig::default();
	config.queues.prefetch = 32;
	let (core, connection) =
		DispatchCore::connect(Arc::clone(&broker), config, events_rx)
			.await
			.unwrap();

	core.subscribe(
		"OrderMessage",
		counting_handler(Arc::new(AtomicUsize::new(0))),
		FilterOptions::default(),
	)
	.await
	.unwrap();

	broker.with_state(|state| {
		assert_eq!(state.consumers.len(), 1);
		assert_eq!(state.consumers[0].queue, "dispatch.ordermessage");
		assert_eq!(state.consumers[0].prefetch, 32);
	});
	connection.shutdown().await;
}

#[tokio::test]
async fn sender_filter_narrows_delivery() {
	let fixture = start_core().await;
	let from_monitor = Arc::new(AtomicUsize::new(0));
	let from_anyone = Arc::new(AtomicUsize::new(0));
	fixture
		.core
		.subscribe(
			"OrderMessage",
			counting_handler(from_monitor.clone()),
			FilterOptions::from_sender("monitor"),
		)
		.await
		.unwrap();
	fixture
		.core
		.subscribe(
			"OrderMessage",
			counting_handler(from_anyone.clone()),
			FilterOptions::default(),
		)
		.await
		.unwrap();

	let serializer = BincodeSerializer::new();
	fixture
		.core
		.publish(
			&serializer,
			&OrderMessage { order_id: 1 },
			&RouteOptions::from_sender("billing"),
		)
		.await
		.unwrap();
	fixture
		.core
		.publish(
			&serializer,
			&OrderMessage { order_id: 2 },
			&RouteOptions::from_sender("monitor"),
		)
		.await
		.unwrap();

	assert_eq!(from_monitor.load(Ordering::SeqCst), 1);
	assert_eq!(from_anyone.load(Ordering::SeqCst), 2);
	fixture.connection.shutdown().await;
}

#[tokio::test]
async fn failing_handler_does_not_starve_the_rest() {
	let fixture = start_core().await;
	let survivor = Arc::new(AtomicUsize::new(0));
	fixture
		.core
		.subscribe(
			"OrderMessage",
			Handler::callable(|_| {
				Err(topic_dispatch::errors::HandlerError::failed(
					"simulated handler failure",
				))
			}),
			FilterOptions::default(),
		)
		.await
		.unwrap();
	fixture
		.core
		.subscribe(
			"OrderMessage",
			counting_handler(survivor.clone()),
			FilterOptions::default(),
		)
		.await
		.unwrap();

	let serializer = BincodeSerializer::new();
	fixture
		.core
		.publish(
			&serializer,
			&OrderMessage { order_id: 3 },
			&RouteOptions::default(),
		)
		.await
		.unwrap();

	assert_eq!(survivor.load(Ordering::SeqCst), 1);
	// Handler failures never turn into rejects.
	assert_eq!(fixture.broker.ack_count(), 1);
	fixture.connection.shutdown().await;
}

#[tokio::test]
async fn connectivity_loss_recovers_all_consumers() {
	let fixture = start_core().await;
	let orders = Arc::new(AtomicUsize::new(0));
	let payments = Arc::new(AtomicUsize::new(0));
	fixture
		.core
		.subscribe(
			"OrderMessage",
			counting_handler(orders.clone()),
			FilterOptions::default(),
		)
		.await
		.unwrap();
	fixture
		.core
		.subscribe(
			"PaymentMessage",
			counting_handler(payments.clone()),
			FilterOptions::default(),
		)
		.await
		.unwrap();
	assert_eq!(fixture.broker.consumer_count(), 2);

	fixture
		.events
		.send(BrokerEvent::ConnectivityLost)
		.await
		.unwrap();
	// Recovery recreates the channel and replays both consumers, so the
	// lifetime consume-call count reaches four.
	let broker = Arc::clone(&fixture.broker);
	wait_until(move || broker.consume_calls() == 4).await;
	assert_eq!(fixture.broker.consumer_count(), 2);
	assert!(fixture.core.is_connected().await);

	let serializer = BincodeSerializer::new();
	fixture
		.core
		.publish(
			&serializer,
			&OrderMessage { order_id: 9 },
			&RouteOptions::default(),
		)
		.await
		.unwrap();
	fixture
		.core
		.publish(
			&serializer,
			&PaymentMessage { amount_cents: 100 },
			&RouteOptions::default(),
		)
		.await
		.unwrap();

	// Exactly one delivery each: consumers were replayed, not duplicated.
	assert_eq!(orders.load(Ordering::SeqCst), 1);
	assert_eq!(payments.load(Ordering::SeqCst), 1);
	fixture.connection.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_all_stops_consumption() {
	let fixture = start_core().await;
	let received = Arc::new(AtomicUsize::new(0));
	fixture
		.core
		.subscribe(
			"OrderMessage",
			counting_handler(received.clone()),
			FilterOptions::default(),
		)
		.await
		.unwrap();

	fixture.core.unsubscribe_all("OrderMessage").await.unwrap();
	assert_eq!(fixture.broker.consumer_count(), 0);

	let serializer = BincodeSerializer::new();
	fixture
		.core
		.publish(
			&serializer,
			&OrderMessage { order_id: 4 },
			&RouteOptions::default(),
		)
		.await
		.unwrap();

	assert_eq!(received.load(Ordering::SeqCst), 0);
	fixture.connection.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_broker_connection() {
	let fixture = start_core().await;
	fixture
		.core
		.subscribe(
			"OrderMessage",
			counting_handler(Arc::new(AtomicUsize::new(0))),
			FilterOptions::default(),
		)
		.await
		.unwrap();

	fixture.connection.shutdown().await;

	assert!(!fixture.broker.is_healthy());
	assert_eq!(fixture.broker.consumer_count(), 0);
	assert!(!fixture.core.is_connected().await);
}
