#![allow(clippy::missing_docs_in_private_items)]
//! The connection recovery state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::sync::{Mutex, oneshot};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::broker::{
	ActiveConsumer, BrokerEvent, BrokerPort, ConsumerTag, DeliveryCallback,
	TransportError,
};
use crate::config::{CoreConfig, RecoveryPolicy};

/// Callback invoked when the connect/recovery attempt budget runs out.
///
/// The default policy simply escalates: the error is logged and returned
/// to the caller. Installing a callback lets the application add its own
/// escalation (alerting, process exit) before the error propagates.
pub type ExhaustionCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Lifecycle states of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
	/// No connection; the initial and terminal state
	Disconnected,
	/// A connect attempt loop is in progress
	Connecting,
	/// Connection, channel and exchange are up
	Connected,
	/// Connectivity was lost; a recovery cycle is due or in progress
	Recovering,
	/// Disconnect in progress
	ShuttingDown,
}

/// One tracked consumer binding. `tag` is `None` while the binding is
/// recorded but not yet live (deferred during recovery, or lost with the
/// previous channel).
#[derive(Debug, Clone)]
struct TrackedConsumer {
	spec: ActiveConsumer,
	tag: Option<ConsumerTag>,
}

/// Owns the broker connection lifecycle and the set of active consumers.
pub struct ConnectionSupervisor<B: BrokerPort> {
	broker: Arc<B>,
	config: Arc<CoreConfig>,
	on_delivery: DeliveryCallback,
	state: SupervisorState,
	consumers: Vec<TrackedConsumer>,
	exhaustion_callback: Option<ExhaustionCallback>,
}

impl<B: BrokerPort> ConnectionSupervisor<B> {
	/// Creates a supervisor over `broker`.
	///
	/// `on_delivery` is handed to every consumer the supervisor binds;
	/// its verdict drives the broker client's ack/reject.
	pub fn new(
		broker: Arc<B>,
		config: Arc<CoreConfig>,
		on_delivery: DeliveryCallback,
	) -> Self {
		Self {
			broker,
			config,
			on_delivery,
			state: SupervisorState::Disconnected,
			consumers: Vec::new(),
			exhaustion_callback: None,
		}
	}

	/// Installs an attempt-exhaustion callback.
	pub fn with_exhaustion_callback(
		mut self,
		callback: ExhaustionCallback,
	) -> Self {
		self.exhaustion_callback = Some(callback);
		self
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SupervisorState {
		self.state
	}

	/// True only in `Connected` with the underlying transport healthy.
	pub fn is_connected(&self) -> bool {
		self.state == SupervisorState::Connected && self.broker.is_healthy()
	}

	/// Consumer specs currently tracked, in registration order.
	pub fn tracked_consumers(
		&self,
	) -> impl Iterator<Item = &ActiveConsumer> {
		self.consumers.iter().map(|tracked| &tracked.spec)
	}

	/// Number of consumers with a live binding.
	pub fn bound_consumer_count(&self) -> usize {
		self.consumers
			.iter()
			.filter(|tracked| tracked.tag.is_some())
			.count()
	}

	/// Establishes connection, channel and exchange, then binds any
	/// consumers recorded while disconnected.
	///
	/// A failed bind counts as a failed attempt: the state only becomes
	/// `Connected` once every recorded consumer is live, so a retried
	/// `connect()` can never report success over an unbound consumer.
	/// Attempts are bounded by the configured [`RecoveryPolicy`] with
	/// capped exponential backoff between them; exhaustion invokes the
	/// pluggable callback and surfaces `AttemptsExhausted`.
	pub async fn connect(&mut self) -> Result<(), TransportError> {
		if self.state == SupervisorState::Connected {
			return Ok(());
		}
		self.state = SupervisorState::Connecting;

		let policy = self.config.recovery.clone();
		let mut last_failure = String::new();
		for attempt in 1 ..= policy.max_attempts {
			match self.connect_pass().await {
				| Ok(()) => {
					info!(attempt, "Broker connection established");
					self.state = SupervisorState::Connected;
					return Ok(());
				}
				| Err(err) => {
					warn!(
						attempt,
						max_attempts = policy.max_attempts,
						error = %err,
						"Connection attempt failed"
					);
					last_failure = err.to_string();
					// Any binding made during the failed pass died with
					// its channel; the next pass replays them all.
					for tracked in &mut self.consumers {
						tracked.tag = None;
					}
					if attempt < policy.max_attempts {
						time::sleep(backoff_delay(&policy, attempt)).await;
					}
				}
			}
		}
		self.state = SupervisorState::Disconnected;
		Err(self.exhausted(policy.max_attempts, last_failure))
	}

	/// Records a consumer and binds it when possible.
	///
	/// While `Recovering` (or not yet connected) the consumer is recorded
	/// immediately — so it participates in the next successful recovery —
	/// and the actual bind is deferred until the state returns to
	/// `Connected`. Re-adding an identical binding is a no-op; duplicates
	/// are never created.
	pub async fn add_consumer(
		&mut self,
		spec: ActiveConsumer,
	) -> Result<(), TransportError> {
		if self
			.consumers
			.iter()
			.any(|tracked| tracked.spec == spec)
		{
			return Ok(());
		}
		self.consumers.push(TrackedConsumer { spec, tag: None });

		if self.state == SupervisorState::Connected {
			let index = self.consumers.len() - 1;
			let spec = self.consumers[index].spec.clone();
			let tag = self.establish_binding(&spec).await?;
			self.consumers[index].tag = Some(tag);
		} else {
			debug!(
				state = ?self.state,
				"Consumer recorded; bind deferred until connected"
			);
		}
		Ok(())
	}

	/// Cancels and forgets the consumer for `queue`. No-op when unknown.
	pub async fn remove_consumer(
		&mut self,
		queue: &str,
	) -> Result<(), TransportError> {
		let Some(index) = self
			.consumers
			.iter()
			.position(|tracked| tracked.spec.queue.name == queue)
		else {
			return Ok(());
		};
		let tracked = self.consumers.remove(index);
		if let Some(tag) = tracked.tag {
			self.broker.cancel_consumer(&tag).await?;
		}
		Ok(())
	}

	/// Marks the connection lost. Live bindings died with the channel,
	/// so their tags are cleared; the specs stay tracked for replay.
	pub fn note_connectivity_lost(&mut self) {
		if self.state != SupervisorState::Connected {
			return;
		}
		warn!("Broker connectivity lost; entering recovery");
		self.state = SupervisorState::Recovering;
		for tracked in &mut self.consumers {
			tracked.tag = None;
		}
	}

	/// Runs one recovery cycle: recreate the channel, redeclare the
	/// exchange, then replay every tracked consumer with identical
	/// parameters. Bounded and backed off like [`connect`].
	///
	/// [`connect`]: Self::connect
	pub async fn recover(&mut self) -> Result<(), TransportError> {
		if self.state != SupervisorState::Recovering {
			return Ok(());
		}

		let policy = self.config.recovery.clone();
		let mut last_failure = String::new();
		for attempt in 1 ..= policy.max_attempts {
			match self.recovery_pass().await {
				| Ok(()) => {
					info!(
						attempt,
						consumers = self.consumers.len(),
						"Recovery complete; all consumers rebound"
					);
					self.state = SupervisorState::Connected;
					return Ok(());
				}
				| Err(err) => {
					warn!(
						attempt,
						max_attempts = policy.max_attempts,
						error = %err,
						"Recovery attempt failed"
					);
					last_failure = err.to_string();
					if attempt < policy.max_attempts {
						time::sleep(backoff_delay(&policy, attempt)).await;
					}
				}
			}
		}
		self.state = SupervisorState::Disconnected;
		Err(self.exhausted(policy.max_attempts, last_failure))
	}

	/// Cancels consumers, closes channel then connection. Idempotent:
	/// calling it again after reaching `Disconnected` is a no-op.
	pub async fn disconnect(&mut self) -> Result<(), TransportError> {
		if self.state == SupervisorState::Disconnected {
			return Ok(());
		}
		self.state = SupervisorState::ShuttingDown;

		for tracked in &self.consumers {
			if let Some(tag) = &tracked.tag {
				if let Err(err) = self.broker.cancel_consumer(tag).await {
					warn!(
						queue = %tracked.spec.queue.name,
						error = %err,
						"Failed to cancel consumer during shutdown"
					);
				}
			}
		}
		if let Err(err) = self.broker.close_channel().await {
			warn!(error = %err, "Failed to close channel during shutdown");
		}
		if let Err(err) = self.broker.close().await {
			warn!(error = %err, "Failed to close connection during shutdown");
		}
		self.consumers.clear();
		self.state = SupervisorState::Disconnected;
		info!("Broker connection shut down");
		Ok(())
	}

	/// Event loop consuming connectivity notifications.
	///
	/// Runs until a `Shutdown` event arrives, the event channel closes,
	/// or the shutdown signal fires; each of those paths disconnects
	/// before returning.
	pub async fn run(
		supervisor: Arc<Mutex<Self>>,
		mut events: Receiver<BrokerEvent>,
		mut shutdown: oneshot::Receiver<()>,
	) {
		loop {
			tokio::select! {
				_ = &mut shutdown => {
					Self::shutdown_guarded(&supervisor).await;
					break;
				}
				event = events.recv() => match event {
					| Some(BrokerEvent::ConnectivityLost) => {
						let mut guard = supervisor.lock().await;
						guard.note_connectivity_lost();
						if let Err(err) = guard.recover().await {
							error!(error = %err, "Recovery failed");
						}
					}
					| Some(BrokerEvent::Shutdown) | None => {
						Self::shutdown_guarded(&supervisor).await;
						break;
					}
				}
			}
		}
		debug!("Supervisor event loop terminated");
	}

	async fn shutdown_guarded(supervisor: &Arc<Mutex<Self>>) {
		let mut guard = supervisor.lock().await;
		if let Err(err) = guard.disconnect().await {
			error!(error = %err, "Shutdown failed");
		}
	}

	/// One full connect attempt, pending binds included.
	async fn connect_pass(&mut self) -> Result<(), TransportError> {
		self.establish().await?;
		self.bind_pending().await
	}

	/// Brings up connection, channel and exchange.
	async fn establish(&self) -> Result<(), TransportError> {
		self.broker.connect(&self.config.broker).await?;
		self.broker.open_channel().await?;
		self.broker.declare_exchange(&self.config.exchange).await?;
		Ok(())
	}

	/// One recovery attempt. Step order is part of the contract:
	/// channel, exchange, then every consumer.
	async fn recovery_pass(&mut self) -> Result<(), TransportError> {
		self.broker.open_channel().await?;
		self.broker.declare_exchange(&self.config.exchange).await?;
		for index in 0 .. self.consumers.len() {
			let spec = self.consumers[index].spec.clone();
			let tag = self.establish_binding(&spec).await?;
			self.consumers[index].tag = Some(tag);
		}
		Ok(())
	}

	/// Binds any consumers recorded while not connected.
	async fn bind_pending(&mut self) -> Result<(), TransportError> {
		for index in 0 .. self.consumers.len() {
			if self.consumers[index].tag.is_some() {
				continue;
			}
			let spec = self.consumers[index].spec.clone();
			let tag = self.establish_binding(&spec).await?;
			self.consumers[index].tag = Some(tag);
		}
		Ok(())
	}

	/// Declares the queue, binds it and starts the consumer.
	async fn establish_binding(
		&self,
		spec: &ActiveConsumer,
	) -> Result<ConsumerTag, TransportError> {
		self.broker.declare_queue(&spec.queue).await?;
		self.broker
			.bind_queue(
				&spec.queue.name,
				&self.config.exchange.name,
				&spec.pattern,
			)
			.await?;
		self.broker
			.consume(spec, Arc::clone(&self.on_delivery))
			.await
	}

	fn exhausted(
		&self,
		attempts: u32,
		last_failure: String,
	) -> TransportError {
		let err = TransportError::attempts_exhausted(attempts, last_failure);
		match &self.exhaustion_callback {
			| Some(callback) => callback(&err),
			| None => {
				error!(error = %err, "Attempt budget exhausted");
			}
		}
		err
	}
}

/// Capped exponential backoff: `initial * 2^(attempt-1)`, at most `max`.
fn backoff_delay(policy: &RecoveryPolicy, attempt: u32) -> Duration {
	let factor = 2_u32.saturating_pow(attempt.saturating_sub(1).min(16));
	policy
		.initial_backoff
		.saturating_mul(factor)
		.min(policy.max_backoff)
}
