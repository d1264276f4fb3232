#![allow(clippy::missing_docs_in_private_items)]
//! The subscription registry proper: registrations, pattern derivation
//! and the concurrent route path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use arcstr::ArcStr;
use tracing::{debug, error};

use super::error::{HandlerError, RegistryError};
use super::handler::{Handler, HandlerTable};
use crate::broker::Delivery;
use crate::pattern::{FilterPattern, PatternSet};
use crate::routing_key::{normalize_type_name, sanitize};

/// A filter value: one identifier or a set of alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
	/// A single identifier
	One(String),
	/// Any of several identifiers
	AnyOf(Vec<String>),
}

impl FilterValue {
	/// Sanitized alternative tokens, in declaration order.
	fn tokens(
		&self,
		side: &'static str,
	) -> Result<Vec<String>, RegistryError> {
		let raw: Vec<&str> = match self {
			| FilterValue::One(value) => vec![value.as_str()],
			| FilterValue::AnyOf(values) => {
				values.iter().map(String::as_str).collect()
			}
		};
		if raw.is_empty() {
			return Err(RegistryError::empty_filter_value(side));
		}
		raw.iter()
			.map(|value| {
				let token = sanitize(value);
				if token.is_empty() {
					Err(RegistryError::empty_filter_value(side))
				} else {
					Ok(token)
				}
			})
			.collect()
	}
}

impl From<&str> for FilterValue {
	fn from(value: &str) -> Self {
		FilterValue::One(value.to_string())
	}
}

impl From<String> for FilterValue {
	fn from(value: String) -> Self {
		FilterValue::One(value)
	}
}

impl From<Vec<&str>> for FilterValue {
	fn from(values: Vec<&str>) -> Self {
		FilterValue::AnyOf(values.into_iter().map(String::from).collect())
	}
}

/// Sender/recipient filters attached to a registration.
///
/// An absent side defaults to the single-segment wildcard `*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
	/// Recipient filter
	pub to: Option<FilterValue>,
	/// Sender filter
	pub from: Option<FilterValue>,
}

impl FilterOptions {
	/// Filter on recipient only.
	pub fn to(value: impl Into<FilterValue>) -> Self {
		Self {
			to: Some(value.into()),
			from: None,
		}
	}

	/// Filter on sender only.
	pub fn from_sender(value: impl Into<FilterValue>) -> Self {
		Self {
			to: None,
			from: Some(value.into()),
		}
	}

	/// Filter on both sides.
	pub fn between(
		to: impl Into<FilterValue>,
		from: impl Into<FilterValue>,
	) -> Self {
		Self {
			to: Some(to.into()),
			from: Some(from.into()),
		}
	}
}

/// Derives the filter patterns for one registration.
///
/// Emits the cross product of `to`-alternatives × `from`-alternatives as
/// separate `type.to.from` patterns. The type name is used exactly as
/// given; callers wanting patterns that line up with built keys pass the
/// normalized type (as [`SubscriptionRegistry::add`] does).
pub fn build_patterns(
	type_name: &str,
	filters: &FilterOptions,
) -> Result<PatternSet, RegistryError> {
	let tos = match &filters.to {
		| Some(value) => value.tokens("to")?,
		| None => vec!["*".to_string()],
	};
	let froms = match &filters.from {
		| Some(value) => value.tokens("from")?,
		| None => vec!["*".to_string()],
	};

	let mut patterns = PatternSet::new();
	for to in &tos {
		for from in &froms {
			let pattern =
				FilterPattern::compile(format!("{type_name}.{to}.{from}"))
					.map_err(RegistryError::Pattern)?;
			patterns.push(pattern);
		}
	}
	Ok(patterns)
}

/// One handler bound to one message type.
#[derive(Debug, Clone)]
pub struct Registration {
	/// Normalized message type
	pub type_name: ArcStr,
	/// The bound handler
	pub handler: Handler,
	/// Filters the registration was created with
	pub filters: FilterOptions,
	/// Patterns derived from the filters, compiled once
	pub patterns: PatternSet,
}

/// Result of invoking one handler during a routing event.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
	/// The handler that was invoked
	pub handler: Handler,
	/// What it returned
	pub result: Result<(), HandlerError>,
}

type RegistrationList = Vec<Arc<Registration>>;

/// Maps message types to ordered registration lists.
///
/// Multiple registrations per type are kept in insertion order with no
/// deduplication. All methods take `&self`; interior locking provides the
/// reader-writer discipline required by the concurrent delivery path.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	entries: RwLock<HashMap<ArcStr, RegistrationList>>,
	handlers: RwLock<HandlerTable>,
}

impl SubscriptionRegistry {
	/// Creates a registry with an empty handler table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a registry resolving named handlers through `handlers`.
	pub fn with_handler_table(handlers: HandlerTable) -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
			handlers: RwLock::new(handlers),
		}
	}

	/// Registers the callable backing a `receiver.method` reference.
	pub fn register_named_handler<F>(
		&self,
		receiver: impl Into<ArcStr>,
		method: impl Into<ArcStr>,
		f: F,
	) where
		F: Fn(&Delivery) -> Result<(), HandlerError> + Send + Sync + 'static,
	{
		self.handlers
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.register(receiver, method, f);
	}

	/// Adds a registration for `type_name`.
	///
	/// The type is normalized the same way publish-side keys are, so the
	/// derived patterns always line up with keys produced by
	/// [`crate::RoutingKey::build`]. Fails synchronously on an empty type,
	/// an invalid handler reference or an uncompilable filter.
	pub fn add(
		&self,
		type_name: &str,
		handler: Handler,
		filters: FilterOptions,
	) -> Result<(), RegistryError> {
		let type_name = normalize_type_name(type_name)
			.map_err(|_| RegistryError::EmptyTypeName)?;
		handler.validate()?;
		let patterns = build_patterns(&type_name, &filters)?;

		let registration = Arc::new(Registration {
			type_name: ArcStr::from(type_name.clone()),
			handler,
			filters,
			patterns,
		});
		debug!(
			message_type = %type_name,
			handler = %registration.handler.describe(),
			patterns = %registration.patterns,
			"Registered handler"
		);

		self.write_entries()
			.entry(ArcStr::from(type_name))
			.or_default()
			.push(registration);
		Ok(())
	}

	/// Removes the single registration whose handler is identical to
	/// `handler` (reference identity for callables, name-pair equality
	/// for named references). No-op if nothing matches.
	pub fn drop_handler(&self, type_name: &str, handler: &Handler) {
		let Ok(type_name) = normalize_type_name(type_name) else {
			return;
		};
		let mut entries = self.write_entries();
		if let Some(list) = entries.get_mut(type_name.as_str()) {
			if let Some(index) = list
				.iter()
				.position(|reg| reg.handler.same_as(handler))
			{
				list.remove(index);
			}
			if list.is_empty() {
				entries.remove(type_name.as_str());
			}
		}
	}

	/// Removes every registration for `type_name`; other types are
	/// untouched.
	pub fn drop_all(&self, type_name: &str) {
		let Ok(type_name) = normalize_type_name(type_name) else {
			return;
		};
		self.write_entries().remove(type_name.as_str());
	}

	/// Number of registrations currently held for `type_name`.
	pub fn registration_count(&self, type_name: &str) -> usize {
		let Ok(type_name) = normalize_type_name(type_name) else {
			return 0;
		};
		self.read_entries()
			.get(type_name.as_str())
			.map_or(0, Vec::len)
	}

	/// Routes one delivery to every matching registration for the type.
	///
	/// Registrations whose pattern set matches `routing_key` (or all of
	/// them, when the key is absent) are invoked in registration order.
	/// A failing handler is logged and collected; it never prevents the
	/// remaining handlers from running, and no error escapes this method.
	pub fn route(
		&self,
		type_name: &str,
		routing_key: Option<&str>,
		delivery: &Delivery,
	) -> Vec<HandlerOutcome> {
		// Snapshot under the read lock, invoke outside it: a concurrent
		// drop takes effect for future deliveries, while a handler this
		// delivery already selected is allowed to complete.
		let Ok(type_name) = normalize_type_name(type_name) else {
			return Vec::new();
		};
		let selected: RegistrationList = {
			let entries = self.read_entries();
			match entries.get(type_name.as_str()) {
				| Some(list) => list
					.iter()
					.filter(|reg| reg.patterns.matches(routing_key))
					.cloned()
					.collect(),
				| None => Vec::new(),
			}
		};

		let mut outcomes = Vec::with_capacity(selected.len());
		for registration in selected {
			let result = self.execute(&registration.handler, delivery);
			if let Err(err) = &result {
				error!(
					message_type = %type_name,
					handler = %registration.handler.describe(),
					error = %err,
					"Handler execution failed; continuing with remaining handlers"
				);
			}
			outcomes.push(HandlerOutcome {
				handler: registration.handler.clone(),
				result,
			});
		}
		outcomes
	}

	/// Executes a single handler against a delivery.
	fn execute(
		&self,
		handler: &Handler,
		delivery: &Delivery,
	) -> Result<(), HandlerError> {
		match handler {
			| Handler::Callable(f) => f(delivery),
			| Handler::Named { receiver, method } => {
				// Clone the resolved callable out so the table lock is
				// not held while user code runs.
				let resolved = self
					.handlers
					.read()
					.unwrap_or_else(|poisoned| poisoned.into_inner())
					.resolve(receiver, method)
					.cloned();
				match resolved {
					| Some(f) => f(delivery),
					| None => Err(HandlerError::unresolved(
						receiver.as_str(),
						method.as_str(),
					)),
				}
			}
		}
	}

	fn read_entries(
		&self,
	) -> std::sync::RwLockReadGuard<'_, HashMap<ArcStr, RegistrationList>> {
		self.entries
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn write_entries(
		&self,
	) -> std::sync::RwLockWriteGuard<'_, HashMap<ArcStr, RegistrationList>>
	{
		self.entries
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}
