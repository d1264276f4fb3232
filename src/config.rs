//! Configuration for the dispatch core.
//!
//! The core never reads ambient state: everything it needs arrives in an
//! explicit [`CoreConfig`] passed to constructors. [`CoreConfig::from_env`]
//! is a thin adapter for the process boundary and is the only place that
//! touches environment variables.

use std::env;
use std::time::Duration;

use arcstr::ArcStr;

use crate::broker::ExchangeSpec;
use crate::routing_key::sanitize;

/// Connection parameters for the underlying broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
	/// Broker host
	pub host: String,
	/// Broker port
	pub port: u16,
	/// Login user
	pub username: String,
	/// Login password
	pub password: String,
	/// Virtual host
	pub vhost: String,
	/// Heartbeat interval
	pub heartbeat: Duration,
	/// Timeout for a single connection attempt
	pub connection_timeout: Duration,
}

impl Default for BrokerSettings {
	fn default() -> Self {
		Self {
			host: "localhost".to_string(),
			port: 5672,
			username: "guest".to_string(),
			password: "guest".to_string(),
			vhost: "/".to_string(),
			heartbeat: Duration::from_secs(30),
			connection_timeout: Duration::from_secs(10),
		}
	}
}

/// Defaults applied to queues the dispatch core declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefaults {
	/// Declare queues durable
	pub durable: bool,
	/// Delete queues once unused
	pub auto_delete: bool,
	/// Consumer prefetch count
	pub prefetch: u16,
}

impl Default for QueueDefaults {
	fn default() -> Self {
		Self {
			durable: true,
			auto_delete: false,
			prefetch: 10,
		}
	}
}

/// Bounds and pacing for connect/recovery attempt loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
	/// Maximum attempts before escalating
	pub max_attempts: u32,
	/// Delay before the second attempt; doubles per attempt
	pub initial_backoff: Duration,
	/// Ceiling on the backoff delay
	pub max_backoff: Duration,
}

impl Default for RecoveryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_secs(30),
		}
	}
}

/// Complete configuration for a dispatch core instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
	/// Broker connection parameters
	pub broker: BrokerSettings,
	/// Exchange to publish to and bind queues against
	pub exchange: ExchangeSpec,
	/// Queue declaration defaults
	pub queues: QueueDefaults,
	/// Connect/recovery attempt policy
	pub recovery: RecoveryPolicy,
	/// Prefix for derived queue names
	pub queue_prefix: String,
}

impl Default for CoreConfig {
	fn default() -> Self {
		Self {
			broker: BrokerSettings::default(),
			exchange: ExchangeSpec::topic("dispatch"),
			queues: QueueDefaults::default(),
			recovery: RecoveryPolicy::default(),
			queue_prefix: "dispatch".to_string(),
		}
	}
}

impl CoreConfig {
	/// Deterministic queue name for a message type.
	///
	/// Consumer identity must be stable across recovery cycles, so the
	/// name is derived from the sanitized type token, never generated.
	pub fn queue_name_for(&self, type_name: &str) -> ArcStr {
		ArcStr::from(format!(
			"{}.{}",
			self.queue_prefix,
			sanitize(type_name)
		))
	}

	/// Builds configuration from `DISPATCH_*` environment variables,
	/// falling back to defaults for anything unset or unparseable.
	///
	/// Recognized variables: `DISPATCH_BROKER_HOST`,
	/// `DISPATCH_BROKER_PORT`, `DISPATCH_BROKER_USER`,
	/// `DISPATCH_BROKER_PASSWORD`, `DISPATCH_BROKER_VHOST`,
	/// `DISPATCH_HEARTBEAT_SECS`, `DISPATCH_CONNECT_TIMEOUT_SECS`,
	/// `DISPATCH_EXCHANGE`, `DISPATCH_QUEUE_PREFIX`,
	/// `DISPATCH_PREFETCH`, `DISPATCH_RECOVERY_ATTEMPTS`.
	pub fn from_env() -> Self {
		let mut config = Self::default();

		if let Some(host) = read_env("DISPATCH_BROKER_HOST") {
			config.broker.host = host;
		}
		if let Some(port) = read_parsed("DISPATCH_BROKER_PORT") {
			config.broker.port = port;
		}
		if let Some(user) = read_env("DISPATCH_BROKER_USER") {
			config.broker.username = user;
		}
		if let Some(password) = read_env("DISPATCH_BROKER_PASSWORD") {
			config.broker.password = password;
		}
		if let Some(vhost) = read_env("DISPATCH_BROKER_VHOST") {
			config.broker.vhost = vhost;
		}
		if let Some(secs) = read_parsed("DISPATCH_HEARTBEAT_SECS") {
			config.broker.heartbeat = Duration::from_secs(secs);
		}
		if let Some(secs) = read_parsed("DISPATCH_CONNECT_TIMEOUT_SECS") {
			config.broker.connection_timeout = Duration::from_secs(secs);
		}
		if let Some(exchange) = read_env("DISPATCH_EXCHANGE") {
			config.exchange = ExchangeSpec::topic(exchange);
		}
		if let Some(prefix) = read_env("DISPATCH_QUEUE_PREFIX") {
			config.queue_prefix = prefix;
		}
		if let Some(prefetch) = read_parsed("DISPATCH_PREFETCH") {
			config.queues.prefetch = prefetch;
		}
		if let Some(attempts) = read_parsed("DISPATCH_RECOVERY_ATTEMPTS") {
			config.recovery.max_attempts = attempts;
		}

		config
	}
}

fn read_env(name: &str) -> Option<String> {
	env::var(name).ok().filter(|value| !value.is_empty())
}

fn read_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
	read_env(name).and_then(|value| value.parse().ok())
}
