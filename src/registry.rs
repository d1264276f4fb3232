//! Subscription registry: handlers bound to message types with optional
//! sender/recipient filters.
//!
//! The registry is the single source of truth for what should be
//! delivered where. It is safe for concurrent routing and mutation:
//! `route` snapshots matching registrations under a read lock and invokes
//! handlers after releasing it, so a subscribe/unsubscribe racing a
//! delivery never corrupts the registration list.

pub mod error;
pub mod handler;
pub mod subscription_registry;


pub use error::{HandlerError, RegistryError};
pub use handler::{Handler, HandlerFn, HandlerTable};
pub use subscription_registry::{
	FilterOptions, FilterValue, HandlerOutcome, Registration,
	SubscriptionRegistry, build_patterns,
};
