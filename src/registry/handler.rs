//! Handler references and the injected lookup table for named handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;

use super::error::{HandlerError, RegistryError};
use crate::broker::Delivery;

/// A single-argument delivery handler.
pub type HandlerFn =
	Arc<dyn Fn(&Delivery) -> Result<(), HandlerError> + Send + Sync>;

/// A handler bound to a registration.
///
/// Either a direct callable, or a two-part `receiver.method` reference
/// resolved through an explicitly registered [`HandlerTable`] at dispatch
/// time. Nothing is ever looked up in ambient/global scope.
#[derive(Clone)]
pub enum Handler {
	/// Direct callable reference
	Callable(HandlerFn),
	/// Deferred `receiver.method` reference
	Named {
		/// Key of the receiving component in the handler table
		receiver: ArcStr,
		/// Method name on that receiver
		method: ArcStr,
	},
}

impl Handler {
	/// Wraps a closure as a callable handler.
	pub fn callable<F>(f: F) -> Self
	where F: Fn(&Delivery) -> Result<(), HandlerError> + Send + Sync + 'static
	{
		Handler::Callable(Arc::new(f))
	}

	/// A deferred reference to `receiver.method`.
	pub fn named(
		receiver: impl Into<ArcStr>,
		method: impl Into<ArcStr>,
	) -> Self {
		Handler::Named {
			receiver: receiver.into(),
			method: method.into(),
		}
	}

	/// Validates the reference shape at subscribe time.
	pub fn validate(&self) -> Result<(), RegistryError> {
		match self {
			| Handler::Callable(_) => Ok(()),
			| Handler::Named { receiver, method } => {
				if receiver.trim().is_empty() || method.trim().is_empty() {
					Err(RegistryError::InvalidHandlerReference)
				} else {
					Ok(())
				}
			}
		}
	}

	/// Identity comparison used by unsubscribe.
	///
	/// Callables compare by reference (the same `Arc` allocation), named
	/// handlers by their receiver/method pair. Deep equality of closures
	/// is deliberately not attempted.
	pub fn same_as(&self, other: &Handler) -> bool {
		match (self, other) {
			| (Handler::Callable(a), Handler::Callable(b)) => {
				// Compare the data pointers only; the vtable pointer is
				// not stable across codegen units.
				std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
			}
			| (
				Handler::Named { receiver, method },
				Handler::Named {
					receiver: other_receiver,
					method: other_method,
				},
			) => receiver == other_receiver && method == other_method,
			| _ => false,
		}
	}

	/// Short description for log output.
	pub fn describe(&self) -> String {
		match self {
			| Handler::Callable(f) => {
				format!("callable@{:p}", Arc::as_ptr(f))
			}
			| Handler::Named { receiver, method } => {
				format!("{receiver}.{method}")
			}
		}
	}
}

impl fmt::Debug for Handler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Handler({})", self.describe())
	}
}

/// Explicit lookup table resolving named handler references.
///
/// Populated by the application at startup; the registry consults it when
/// executing a [`Handler::Named`] registration.
#[derive(Clone, Default)]
pub struct HandlerTable {
	entries: HashMap<(ArcStr, ArcStr), HandlerFn>,
}

impl HandlerTable {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the callable backing `receiver.method`.
	///
	/// Re-registering the same pair replaces the previous entry.
	pub fn register<F>(
		&mut self,
		receiver: impl Into<ArcStr>,
		method: impl Into<ArcStr>,
		f: F,
	) where
		F: Fn(&Delivery) -> Result<(), HandlerError> + Send + Sync + 'static,
	{
		self.entries
			.insert((receiver.into(), method.into()), Arc::new(f));
	}

	/// Looks up the callable for a named reference.
	pub fn resolve(
		&self,
		receiver: &str,
		method: &str,
	) -> Option<&HandlerFn> {
		self.entries
			.get(&(ArcStr::from(receiver), ArcStr::from(method)))
	}

	/// Number of registered entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// True when no entries are registered.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl fmt::Debug for HandlerTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HandlerTable")
			.field("entries", &self.entries.len())
			.finish()
	}
}
