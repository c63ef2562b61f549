//! Process-wide invalidation bus.
//!
//! [`ChangeBus`] lets unrelated parts of a process tell live queries that a
//! resource changed, without either side knowing the other's query.
//!
//! * Delivery is synchronous: [`ChangeBus::publish`] returns only after every
//!   interested listener ran, in registration order.
//! * There is no buffering and no replay. Late subscribers see only later
//!   publishes.
//! * A panicking listener is caught and logged; the remaining listeners and
//!   the publisher are unaffected.
//! * Listeners may subscribe or unsubscribe (themselves or others) from inside
//!   a handler. The listener list is snapshotted before dispatch and the lock
//!   is released while handlers run.
//!
//! The bus is an explicit value: construct one at process start and hand
//! clones to whoever publishes or subscribes.

#![warn(missing_docs)]

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

mod topic;

pub use topic::{Topic, WILDCARD};

/// Identifier assigned to each registered listener.
pub type ListenerId = u64;

type Predicate = dyn Fn(&Topic) -> bool + Send + Sync;
type Handler = dyn Fn(&Topic) + Send + Sync;

struct Listener {
	id: ListenerId,
	active: AtomicBool,
	predicate: Box<Predicate>,
	handler: Box<Handler>,
}

#[derive(Default)]
struct BusInner {
	listeners: Mutex<Vec<Arc<Listener>>>,
	next_id: AtomicU64,
}

/// Cloneable handle to one invalidation bus.
#[derive(Clone, Default)]
pub struct ChangeBus {
	inner: Arc<BusInner>,
}

impl std::fmt::Debug for ChangeBus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChangeBus").field("listeners", &self.listener_count()).finish()
	}
}

impl ChangeBus {
	/// Creates an empty bus.
	pub fn new() -> Self {
		Self::default()
	}

	/// Delivers `topic` to every active listener whose predicate accepts it.
	///
	/// Returns the number of handlers that ran to completion.
	pub fn publish(&self, topic: &Topic) -> usize {
		let snapshot: Vec<Arc<Listener>> = self.inner.listeners.lock().clone();
		tracing::trace!(%topic, listeners = snapshot.len(), "bus.publish");

		let mut delivered = 0;
		for listener in snapshot {
			// Unsubscribed earlier in this same round.
			if !listener.active.load(Ordering::Acquire) {
				continue;
			}
			let outcome = catch_unwind(AssertUnwindSafe(|| {
				if (listener.predicate)(topic) {
					(listener.handler)(topic);
					true
				} else {
					false
				}
			}));
			match outcome {
				Ok(true) => delivered += 1,
				Ok(false) => {}
				Err(payload) => {
					tracing::error!(
						listener = listener.id,
						%topic,
						panic = %panic_message(payload.as_ref()),
						"bus.listener_panicked"
					);
				}
			}
		}
		delivered
	}

	/// Registers a listener.
	///
	/// `predicate` decides whether the listener cares about a topic; `handler`
	/// runs for accepted topics. The listener stays registered until the
	/// returned [`BusSubscription`] is unsubscribed or dropped.
	#[must_use = "dropping the subscription unsubscribes the listener"]
	pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> BusSubscription
	where
		P: Fn(&Topic) -> bool + Send + Sync + 'static,
		H: Fn(&Topic) + Send + Sync + 'static,
	{
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
		let listener = Arc::new(Listener {
			id,
			active: AtomicBool::new(true),
			predicate: Box::new(predicate),
			handler: Box::new(handler),
		});
		self.inner.listeners.lock().push(Arc::clone(&listener));
		tracing::trace!(listener = id, "bus.subscribe");
		BusSubscription {
			bus: Arc::downgrade(&self.inner),
			listener,
		}
	}

	/// Number of currently registered listeners.
	pub fn listener_count(&self) -> usize {
		self.inner.listeners.lock().len()
	}
}

/// Disposer returned by [`ChangeBus::subscribe`].
///
/// Unsubscribing is idempotent, and dropping the value unsubscribes.
pub struct BusSubscription {
	bus: Weak<BusInner>,
	listener: Arc<Listener>,
}

impl BusSubscription {
	/// Identifier of the underlying listener.
	pub fn id(&self) -> ListenerId {
		self.listener.id
	}

	/// Returns true until the first call to [`Self::unsubscribe`].
	pub fn is_active(&self) -> bool {
		self.listener.active.load(Ordering::Acquire)
	}

	/// Removes the listener. Later calls are no-ops.
	pub fn unsubscribe(&self) {
		if !self.listener.active.swap(false, Ordering::AcqRel) {
			return;
		}
		if let Some(bus) = self.bus.upgrade() {
			let id = self.listener.id;
			bus.listeners.lock().retain(|l| l.id != id);
		}
		tracing::trace!(listener = self.listener.id, "bus.unsubscribe");
	}
}

impl Drop for BusSubscription {
	fn drop(&mut self) {
		self.unsubscribe();
	}
}

impl std::fmt::Debug for BusSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BusSubscription")
			.field("id", &self.listener.id)
			.field("active", &self.is_active())
			.finish()
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
