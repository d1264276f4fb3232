//! Message dispatch: the composition of codec, registry and supervisor
//! at the boundary with the broker client.

pub mod dispatch_core;
pub mod dispatcher;
pub mod error;

pub use dispatch_core::{DispatchConnection, DispatchCore};
pub use dispatcher::{DispatchMessage, Dispatcher};
pub use error::DispatchError;
