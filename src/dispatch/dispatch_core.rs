//! The assembled dispatch core and its connection handle.
//!
//! [`DispatchCore::connect`] wires the pieces together: it builds the
//! registry and dispatcher, drives the supervisor through its initial
//! connect, then spawns the supervisor event loop. The returned
//! [`DispatchConnection`] owns that background task and must be shut
//! down explicitly.

use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::sync::{oneshot, Mutex};
use tracing::error;

use super::dispatcher::{DispatchMessage, Dispatcher};
use super::error::DispatchError;
use crate::broker::{
	AckMode, ActiveConsumer, BrokerEvent, BrokerPort, QueueSpec,
};
use crate::config::CoreConfig;
use crate::message_serializer::MessageSerializer;
use crate::registry::{
	FilterOptions, Handler, HandlerError, SubscriptionRegistry,
};
use crate::routing_key::{normalize_type_name, RouteOptions, RoutingKey};
use crate::supervisor::ConnectionSupervisor;

/// High-level entry point: typed publish and subscribe over a supervised
/// broker connection.
///
/// Cheap to clone; all clones share the same registry and supervisor.
pub struct DispatchCore<B: BrokerPort> {
	config: Arc<CoreConfig>,
	registry: Arc<SubscriptionRegistry>,
	dispatcher: Dispatcher<B>,
	supervisor: Arc<Mutex<ConnectionSupervisor<B>>>,
}

impl<B: BrokerPort> Clone for DispatchCore<B> {
	fn clone(&self) -> Self {
		Self {
			config: Arc::clone(&self.config),
			registry: Arc::clone(&self.registry),
			dispatcher: self.dispatcher.clone(),
			supervisor: Arc::clone(&self.supervisor),
		}
	}
}

impl<B: BrokerPort> DispatchCore<B> {
	/// Connects to the broker and starts the supervisor event loop.
	///
	/// `events` is the broker client's connectivity notification stream;
	/// the spawned loop answers `ConnectivityLost` with a recovery cycle
	/// and `Shutdown` (or channel close) with a disconnect.
	///
	/// Returns the core alongside the [`DispatchConnection`] handle that
	/// owns the background task.
	pub async fn connect(
		broker: B,
		config: CoreConfig,
		events: Receiver<BrokerEvent>,
	) -> Result<(Self, DispatchConnection), DispatchError> {
		let broker = Arc::new(broker);
		let config = Arc::new(config);
		let registry = Arc::new(SubscriptionRegistry::new());
		let dispatcher = Dispatcher::new(
			Arc::clone(&broker),
			Arc::clone(&registry),
			Arc::clone(&config),
		);

		let mut supervisor = ConnectionSupervisor::new(
			broker,
			Arc::clone(&config),
			dispatcher.callback(),
		);
		supervisor.connect().await?;
		let supervisor = Arc::new(Mutex::new(supervisor));

		let (shutdown_tx, shutdown_rx) = oneshot::channel();
		let handle = tokio::spawn(ConnectionSupervisor::run(
			Arc::clone(&supervisor),
			events,
			shutdown_rx,
		));

		let core = Self {
			config,
			registry,
			dispatcher,
			supervisor,
		};
		let connection = DispatchConnection {
			shutdown_tx: Some(shutdown_tx),
			event_loop_handle: Some(handle),
		};
		Ok((core, connection))
	}

	/// Subscribes a handler to a message type.
	///
	/// Ensures the per-type queue exists and is consumed from, then adds
	/// the registration. `filters` narrows delivery by recipient and
	/// sender; the default matches everything published under the type.
	pub async fn subscribe(
		&self,
		type_name: &str,
		handler: Handler,
		filters: FilterOptions,
	) -> Result<(), DispatchError> {
		let normalized = normalize_type_name(type_name)?;
		self.registry.add(&normalized, handler, filters)?;

		let consumer = ActiveConsumer {
			queue: QueueSpec {
				name: self.config.queue_name_for(&normalized),
				durable: self.config.queues.durable,
				auto_delete: self.config.queues.auto_delete,
			},
			pattern: arcstr::format!("{normalized}.#"),
			type_name: normalized.into(),
			ack_mode: AckMode::Manual,
			prefetch: self.config.queues.prefetch,
		};
		self.supervisor.lock().await.add_consumer(consumer).await?;
		Ok(())
	}

	/// Removes the one registration bound to `handler`, by identity.
	///
	/// Takes effect for future deliveries; a handler already selected for
	/// an in-flight delivery is allowed to complete. The per-type queue
	/// consumer stays up while other registrations for the type remain.
	pub fn unsubscribe(&self, type_name: &str, handler: &Handler) {
		self.registry.drop_handler(type_name, handler);
	}

	/// Removes every registration for `type_name` and stops consuming
	/// from its queue.
	pub async fn unsubscribe_all(
		&self,
		type_name: &str,
	) -> Result<(), DispatchError> {
		let normalized = normalize_type_name(type_name)?;
		self.registry.drop_all(&normalized);
		self.supervisor
			.lock()
			.await
			.remove_consumer(&self.config.queue_name_for(&normalized))
			.await?;
		Ok(())
	}

	/// Serializes and publishes a message, returning the routing key it
	/// went out under.
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
		self.dispatcher.publish(serializer, message, options).await
	}

	/// Registers the callable backing a `receiver.method` handler
	/// reference.
	pub fn register_named_handler<F>(
		&self,
		receiver: &str,
		method: &str,
		f: F,
	) where
		F: Fn(&crate::broker::Delivery) -> Result<(), HandlerError>
			+ Send
			+ Sync
			+ 'static,
	{
		self.registry.register_named_handler(receiver, method, f);
	}

	/// True when the supervised connection is up and healthy.
	pub async fn is_connected(&self) -> bool {
		self.supervisor.lock().await.is_connected()
	}

	/// The shared subscription registry.
	pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
		&self.registry
	}

	/// The dispatcher serving this core.
	pub fn dispatcher(&self) -> &Dispatcher<B> {
		&self.dispatcher
	}
}

/// Handle over the supervisor's background event loop.
///
/// Keep it alive for the session and call [`shutdown`] when done.
///
/// [`shutdown`]: Self::shutdown
pub struct DispatchConnection {
	shutdown_tx: Option<oneshot::Sender<()>>,
	event_loop_handle: Option<tokio::task::JoinHandle<()>>,
}

impl DispatchConnection {
	/// Gracefully shuts the connection down: signals the event loop,
	/// which cancels consumers and closes the connection, then waits for
	/// it to finish.
	pub async fn shutdown(mut self) {
		if let Some(tx) = self.shutdown_tx.take() {
			// A closed receiver means the loop already exited.
			let _ = tx.send(());
		}
		if let Some(handle) = self.event_loop_handle.take() {
			if let Err(err) = handle.await {
				error!(error = %err, "Supervisor event loop task failed");
			}
		}
	}
}

impl Drop for DispatchConnection {
	fn drop(&mut self) {
		if self.shutdown_tx.is_some() || self.event_loop_handle.is_some() {
			error!(
				"DispatchConnection dropped without calling shutdown(). \
				 Please call shutdown() and await its completion before \
				 dropping."
			);
		}
	}
}
