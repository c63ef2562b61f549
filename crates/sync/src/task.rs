use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Background work spawned by bindings, tagged for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TaskKind {
	/// One transport fetch.
	Fetch,
	/// A trailing debounce timer.
	Debounce,
	/// The change-feed pump of one binding.
	Feed,
}

impl TaskKind {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Fetch => "fetch",
			Self::Debounce => "debounce",
			Self::Feed => "feed",
		}
	}
}

/// Spawns binding work on the engine's runtime.
///
/// Callers may sit on any thread, including ones the runtime does not own.
pub(crate) fn spawn<F>(runtime: &Handle, kind: TaskKind, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task = kind.as_str(), "sync.spawn");
	runtime.spawn(fut)
}
