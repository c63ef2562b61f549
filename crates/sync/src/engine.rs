use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tavola_bus::{ChangeBus, Topic};
use tavola_query::{ChangeFeed, QueryDescriptor, QueryTransport};
use tokio::runtime::Handle;

use crate::binding::{BindingId, QueryHandle, Shared};
use crate::config::EngineConfig;
use crate::token::FetchClock;

pub(crate) struct EngineCore<T: Send> {
	pub(crate) transport: Arc<dyn QueryTransport<T>>,
	pub(crate) feed: Arc<dyn ChangeFeed>,
	pub(crate) bus: ChangeBus,
	pub(crate) config: EngineConfig,
	pub(crate) clock: FetchClock,
	/// Runtime all binding work is spawned on, whichever thread triggers it.
	pub(crate) runtime: Handle,
	next_binding: AtomicU64,
}

impl<T: Send> EngineCore<T> {
	fn next_binding_id(&self) -> BindingId {
		self.next_binding.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
	}
}

/// Creates and owns live query bindings.
///
/// An engine is built once with its collaborators: the query transport, the
/// remote change feed, and the process-wide [`ChangeBus`]. It is cheap to
/// clone; clones share everything.
pub struct Engine<T: Send + Sync + 'static> {
	core: Arc<EngineCore<T>>,
}

impl<T: Send + Sync + 'static> Clone for Engine<T> {
	fn clone(&self) -> Self {
		Self {
			core: Arc::clone(&self.core),
		}
	}
}

impl<T: Send + Sync + 'static> std::fmt::Debug for Engine<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine")
			.field("config", &self.core.config)
			.field("bus", &self.core.bus)
			.finish_non_exhaustive()
	}
}

impl<T: Send + Sync + 'static> Engine<T> {
	/// Creates an engine over the given collaborators.
	///
	/// Binding work runs on the Tokio runtime current at construction, so
	/// bindings may later be driven and invalidated from any thread.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime.
	pub fn new(transport: Arc<dyn QueryTransport<T>>, feed: Arc<dyn ChangeFeed>, bus: ChangeBus, config: EngineConfig) -> Self {
		Self {
			core: Arc::new(EngineCore {
				transport,
				feed,
				bus,
				config,
				clock: FetchClock::new(),
				runtime: Handle::current(),
				next_binding: AtomicU64::new(0),
			}),
		}
	}

	/// Binds `descriptor` and starts serving it.
	///
	/// Active descriptors get a visible fetch and are wired to the change
	/// feed and the bus. Inactive descriptors do nothing until rebound.
	/// Invalid descriptors fail the binding immediately.
	pub fn bind(&self, descriptor: QueryDescriptor) -> QueryHandle<T> {
		let id = self.core.next_binding_id();
		QueryHandle::new(Shared::bind(id, Arc::clone(&self.core), descriptor))
	}

	/// Publishes a local invalidation.
	///
	/// May be called from any thread. Every binding wired to a matching resource schedules a coalesced
	/// silent refetch. Returns the number of listeners notified.
	pub fn invalidate(&self, topic: impl Into<Topic>) -> usize {
		let topic = topic.into();
		tracing::debug!(%topic, "sync.invalidate");
		self.core.bus.publish(&topic)
	}

	/// The bus bindings listen on.
	pub fn bus(&self) -> &ChangeBus {
		&self.core.bus
	}

	/// Engine configuration.
	pub fn config(&self) -> &EngineConfig {
		&self.core.config
	}
}
