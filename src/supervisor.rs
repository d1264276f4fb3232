//! Connection lifecycle supervision.
//!
//! The supervisor owns the broker connection, channel and exchange as
//! singletons, tracks every active consumer, and guarantees that all of
//! them are recreated with identical parameters after a connectivity
//! loss. Subscriptions must never be silently dropped by a reconnect.

pub mod connection_supervisor;


pub use connection_supervisor::{
	ConnectionSupervisor, ExhaustionCallback, SupervisorState,
};
