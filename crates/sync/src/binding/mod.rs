//! Live bindings between a descriptor and its result.
//!
//! # State machine
//!
//! A binding is `Idle`, `Loading`, `Ready`, or `Failed` (see [`Phase`]).
//! Descriptor changes, manual refetches, and debounced invalidations move a
//! settled binding back into a fetch; silent fetches do so without touching
//! `loading`.
//!
//! # Fetch ordering
//!
//! A binding has at most one live fetch. Starting a fetch cancels the
//! previous token first, and a response is applied only if its token is
//! still the current one. A slow response from a superseded fetch therefore
//! never overwrites a newer result, even if the transport ignores
//! cancellation.
//!
//! # Locking
//!
//! All mutable state sits behind one `parking_lot` mutex that is never held
//! across an await. Transport calls, timers, and the feed pump run in
//! spawned tasks holding only a weak reference, and re-enter through the
//! mutex when they finish.

use std::sync::Arc;

use parking_lot::Mutex;
use tavola_query::{FetchRequest, QueryDescriptor, TransportError};
use tokio::sync::watch;

use crate::debounce::DebounceSlot;
use crate::engine::EngineCore;
use crate::error::QueryError;
use crate::state::{FetchMode, Phase, QueryState};
use crate::task::{self, TaskKind};
use crate::token::{FetchToken, PendingFetch};

mod wiring;

#[cfg(test)]
mod tests;

use wiring::Wiring;

/// Identifier of one binding, unique per engine.
pub type BindingId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
	Active,
	Inactive,
	Invalid,
	Disposed,
}

struct BindingInner {
	descriptor: QueryDescriptor,
	status: Status,
	pending: Option<PendingFetch>,
	timer: DebounceSlot,
	wiring: Option<Wiring>,
	/// A fetch has succeeded since the descriptor was last activated from
	/// the inactive or invalid state.
	has_result: bool,
}

pub(crate) struct Shared<T: Send + Sync + 'static> {
	id: BindingId,
	engine: Arc<EngineCore<T>>,
	inner: Mutex<BindingInner>,
	state: watch::Sender<QueryState<T>>,
}

impl<T: Send + Sync + 'static> Shared<T> {
	pub(crate) fn bind(id: BindingId, engine: Arc<EngineCore<T>>, descriptor: QueryDescriptor) -> Arc<Self> {
		tracing::debug!(binding = id, descriptor = %descriptor, "sync.bind");
		let shared = Arc::new(Self {
			id,
			engine,
			inner: Mutex::new(BindingInner {
				descriptor,
				status: Status::Inactive,
				pending: None,
				timer: DebounceSlot::default(),
				wiring: None,
				has_result: false,
			}),
			state: watch::Sender::new(QueryState::idle()),
		});
		{
			let mut inner = shared.inner.lock();
			shared.activate(&mut inner);
		}
		shared
	}

	/// Brings the binding in line with `inner.descriptor`.
	fn activate(self: &Arc<Self>, inner: &mut BindingInner) {
		if inner.descriptor.is_inactive() {
			inner.wiring = None;
			inner.status = Status::Inactive;
			inner.has_result = false;
			self.state.send_replace(QueryState::idle());
			tracing::debug!(binding = self.id, "sync.idle");
			return;
		}

		if let Err(error) = inner.descriptor.validate() {
			tracing::warn!(binding = self.id, %error, "sync.invalid_descriptor");
			inner.wiring = None;
			inner.status = Status::Invalid;
			inner.has_result = false;
			self.state.send_replace(QueryState::invalid(error.into()));
			return;
		}

		let resources = inner.descriptor.resources().to_vec();
		if inner.wiring.as_ref().is_some_and(|w| w.covers(&resources)) {
			tracing::trace!(binding = self.id, "sync.wiring.reused");
		} else {
			// Tear the old wiring down before opening the new one.
			inner.wiring = None;
			inner.wiring = Some(Wiring::connect(self, resources));
		}

		if inner.status == Status::Invalid {
			self.state.send_modify(|s| s.error = None);
		}
		inner.status = Status::Active;
		self.start_fetch(inner, FetchMode::Visible);
	}

	fn start_fetch(self: &Arc<Self>, inner: &mut BindingInner, mode: FetchMode) {
		if inner.status != Status::Active {
			return;
		}
		// The previous token dies before the next one exists.
		self.cancel_pending(inner);
		let token = FetchToken::new(self.engine.clock.next());
		let Some(request) = FetchRequest::from_descriptor(&inner.descriptor, token.transport_token()) else {
			return;
		};

		inner.pending = Some(PendingFetch::new(token.clone()));
		if !mode.is_silent() {
			self.state.send_modify(|s| {
				s.loading = true;
				s.phase = Phase::Loading;
			});
		}
		tracing::debug!(
			binding = self.id,
			generation = token.generation(),
			silent = mode.is_silent(),
			resource = %request.resource,
			"sync.fetch.start"
		);

		let transport = Arc::clone(&self.engine.transport);
		let binding = Arc::downgrade(self);
		task::spawn(&self.engine.runtime, TaskKind::Fetch, async move {
			let result = transport.fetch(request).await;
			if let Some(shared) = binding.upgrade() {
				shared.complete_fetch(&token, result);
			}
		});
	}

	fn complete_fetch(&self, token: &FetchToken, result: Result<Vec<T>, TransportError>) {
		let mut inner = self.inner.lock();
		let is_current = inner.pending.as_ref().is_some_and(|p| p.is_current(token));
		if !is_current || token.is_cancelled() {
			tracing::trace!(binding = self.id, generation = token.generation(), "sync.fetch.stale");
			return;
		}
		let Some(pending) = inner.pending.take() else {
			return;
		};
		let elapsed = pending.started_at.elapsed();

		match result {
			Ok(items) => {
				inner.has_result = true;
				tracing::debug!(
					binding = self.id,
					generation = token.generation(),
					rows = items.len(),
					?elapsed,
					"sync.fetch.applied"
				);
				self.state.send_modify(|s| {
					s.items = Arc::new(items);
					s.error = None;
					s.loading = false;
					s.phase = Phase::Ready;
				});
			}
			Err(TransportError::Aborted) => {
				tracing::debug!(binding = self.id, generation = token.generation(), "sync.fetch.aborted");
				let has_result = inner.has_result;
				self.state.send_modify(|s| s.settle(has_result));
			}
			Err(TransportError::Failed { message }) => {
				tracing::warn!(
					binding = self.id,
					generation = token.generation(),
					%message,
					?elapsed,
					"sync.fetch.failed"
				);
				self.state.send_modify(|s| {
					s.error = Some(QueryError::Transport(message));
					s.loading = false;
					s.phase = Phase::Failed;
				});
			}
		}
	}

	fn cancel_pending(&self, inner: &mut BindingInner) -> bool {
		match inner.pending.take() {
			Some(pending) => {
				pending.token.cancel();
				tracing::debug!(binding = self.id, generation = pending.token.generation(), "sync.fetch.cancel");
				true
			}
			None => false,
		}
	}

	fn rebind(self: &Arc<Self>, descriptor: QueryDescriptor) -> bool {
		let mut inner = self.inner.lock();
		if inner.status == Status::Disposed {
			tracing::warn!(binding = self.id, "sync.rebind_after_dispose");
			return false;
		}
		if inner.descriptor == descriptor {
			tracing::trace!(binding = self.id, "sync.rebind.unchanged");
			return false;
		}
		tracing::debug!(binding = self.id, from = %inner.descriptor, to = %descriptor, "sync.rebind");
		self.cancel_pending(&mut inner);
		inner.timer.clear();
		inner.descriptor = descriptor;
		self.activate(&mut inner);
		true
	}

	fn refetch(self: &Arc<Self>, mode: FetchMode) -> bool {
		let mut inner = self.inner.lock();
		if inner.status != Status::Active {
			tracing::debug!(binding = self.id, status = ?inner.status, "sync.refetch.skipped");
			return false;
		}
		// The manual fetch covers whatever the timer was waiting to fetch.
		inner.timer.clear();
		self.start_fetch(&mut inner, mode);
		true
	}

	pub(crate) fn schedule_coalesced_fetch(self: &Arc<Self>) {
		let mut inner = self.inner.lock();
		if inner.status != Status::Active {
			return;
		}
		let seq = inner.timer.next_seq();
		let window = self.engine.config.debounce();
		let binding = Arc::downgrade(self);
		let handle = task::spawn(&self.engine.runtime, TaskKind::Debounce, async move {
			tokio::time::sleep(window).await;
			if let Some(shared) = binding.upgrade() {
				shared.fire_debounce(seq);
			}
		});
		let replaced = inner.timer.arm(seq, handle);
		tracing::trace!(binding = self.id, seq, replaced, "sync.debounce.arm");
	}

	fn fire_debounce(self: &Arc<Self>, seq: u64) {
		let mut inner = self.inner.lock();
		if !inner.timer.claim(seq) {
			return;
		}
		tracing::debug!(binding = self.id, seq, "sync.debounce.fire");
		self.start_fetch(&mut inner, FetchMode::Silent);
	}

	fn dispose(&self) -> bool {
		let mut inner = self.inner.lock();
		if inner.status == Status::Disposed {
			return false;
		}
		self.cancel_pending(&mut inner);
		inner.timer.clear();
		inner.wiring = None;
		inner.status = Status::Disposed;
		let has_result = inner.has_result;
		self.state.send_if_modified(|s| {
			if s.loading {
				s.settle(has_result);
				true
			} else {
				false
			}
		});
		tracing::debug!(binding = self.id, "sync.dispose");
		true
	}
}

/// Consumer handle to one binding.
///
/// Exposes the current [`QueryState`] and the operations that drive the
/// binding. Dropping the handle disposes the binding.
pub struct QueryHandle<T: Send + Sync + 'static> {
	shared: Arc<Shared<T>>,
}

impl<T: Send + Sync + 'static> QueryHandle<T> {
	pub(crate) fn new(shared: Arc<Shared<T>>) -> Self {
		Self { shared }
	}

	/// Binding identifier.
	pub fn id(&self) -> BindingId {
		self.shared.id
	}

	/// Descriptor currently bound.
	pub fn descriptor(&self) -> QueryDescriptor {
		self.shared.inner.lock().descriptor.clone()
	}

	/// Snapshot of the current state.
	pub fn state(&self) -> QueryState<T> {
		self.shared.state.borrow().clone()
	}

	/// Receiver notified on every state change.
	pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
		self.shared.state.subscribe()
	}

	/// Replaces the descriptor.
	///
	/// A value-equal descriptor is a no-op. Otherwise the pending fetch is
	/// cancelled, the feed is rewired if the resource set changed, and a
	/// visible fetch starts. Returns true if the descriptor changed.
	pub fn rebind(&self, descriptor: QueryDescriptor) -> bool {
		self.shared.rebind(descriptor)
	}

	/// Fetches now, bypassing the debounce.
	///
	/// Returns false when the binding is inactive, invalid, or disposed.
	pub fn refetch(&self, mode: FetchMode) -> bool {
		self.shared.refetch(mode)
	}

	/// Schedules a silent fetch after the debounce window, restarting the
	/// window if one is already pending.
	pub fn schedule_coalesced_fetch(&self) {
		self.shared.schedule_coalesced_fetch();
	}

	/// Stops the binding: cancels the pending fetch and the timer, closes the
	/// feed channel, and leaves the bus. Returns false if already disposed.
	pub fn dispose(&self) -> bool {
		self.shared.dispose()
	}

	/// Returns true once disposed.
	pub fn is_disposed(&self) -> bool {
		self.shared.inner.lock().status == Status::Disposed
	}
}

impl<T: Send + Sync + 'static> Drop for QueryHandle<T> {
	fn drop(&mut self) {
		self.shared.dispose();
	}
}

impl<T: Send + Sync + 'static> std::fmt::Debug for QueryHandle<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.shared.inner.lock();
		f.debug_struct("QueryHandle")
			.field("id", &self.shared.id)
			.field("status", &inner.status)
			.field("descriptor", &inner.descriptor.canonical())
			.field("fetch_pending", &inner.pending.is_some())
			.field("debounce_armed", &inner.timer.is_armed())
			.finish()
	}
}
