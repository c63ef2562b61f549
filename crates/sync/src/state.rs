//! Consumer-visible binding state.

use std::sync::Arc;

use crate::error::QueryError;

/// Lifecycle phase of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
	/// Nothing fetched: inactive, disposed before a result, or fresh.
	#[default]
	Idle,
	/// A visible fetch is in flight.
	Loading,
	/// The last applied fetch succeeded.
	Ready,
	/// The last applied fetch failed, or the descriptor is invalid.
	Failed,
}

/// Whether a fetch flips `loading` while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
	/// Sets `loading` until the fetch settles.
	#[default]
	Visible,
	/// Refreshes in the background; `loading` is left untouched.
	Silent,
}

impl FetchMode {
	/// Returns true for [`FetchMode::Silent`].
	pub const fn is_silent(self) -> bool {
		matches!(self, Self::Silent)
	}
}

/// Snapshot of one binding's result.
///
/// Items are shared, so snapshots are cheap to clone and never copy rows.
#[derive(Debug)]
pub struct QueryState<T> {
	pub(crate) items: Arc<Vec<T>>,
	pub(crate) loading: bool,
	pub(crate) error: Option<QueryError>,
	pub(crate) phase: Phase,
}

impl<T> Clone for QueryState<T> {
	fn clone(&self) -> Self {
		Self {
			items: Arc::clone(&self.items),
			loading: self.loading,
			error: self.error.clone(),
			phase: self.phase,
		}
	}
}

impl<T> Default for QueryState<T> {
	fn default() -> Self {
		Self::idle()
	}
}

impl<T> QueryState<T> {
	/// Empty, not loading, no error.
	pub fn idle() -> Self {
		Self {
			items: Arc::new(Vec::new()),
			loading: false,
			error: None,
			phase: Phase::Idle,
		}
	}

	pub(crate) fn invalid(error: QueryError) -> Self {
		Self {
			items: Arc::new(Vec::new()),
			loading: false,
			error: Some(error),
			phase: Phase::Failed,
		}
	}

	/// Ends a fetch without applying a result.
	pub(crate) fn settle(&mut self, has_result: bool) {
		self.loading = false;
		self.phase = if self.error.is_some() {
			Phase::Failed
		} else if has_result {
			Phase::Ready
		} else {
			Phase::Idle
		};
	}

	/// Rows in server order.
	pub fn items(&self) -> &[T] {
		&self.items
	}

	/// Shared handle to the rows.
	pub fn items_arc(&self) -> Arc<Vec<T>> {
		Arc::clone(&self.items)
	}

	/// Number of rows.
	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Returns true when there are no rows.
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// True while a visible fetch is in flight.
	pub fn loading(&self) -> bool {
		self.loading
	}

	/// Error from the last applied fetch, or the descriptor error.
	pub fn error(&self) -> Option<&QueryError> {
		self.error.as_ref()
	}

	/// Lifecycle phase.
	pub fn phase(&self) -> Phase {
		self.phase
	}
}
