use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Monotonic generation clock for fetches issued by one engine.
#[derive(Debug, Default, Clone)]
pub(crate) struct FetchClock {
	next: Arc<AtomicU64>,
}

impl FetchClock {
	/// Creates a new clock starting at generation 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next generation ID.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}
}

/// Generation-tagged cancellation token for one fetch.
///
/// Identity is the generation: a response is applied only if the token that
/// issued it is still the binding's current one.
#[derive(Debug, Clone)]
pub(crate) struct FetchToken {
	generation: u64,
	cancel: CancellationToken,
}

impl FetchToken {
	pub fn new(generation: u64) -> Self {
		Self {
			generation,
			cancel: CancellationToken::new(),
		}
	}

	pub const fn generation(&self) -> u64 {
		self.generation
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Token handed to the transport.
	pub fn transport_token(&self) -> CancellationToken {
		self.cancel.clone()
	}
}

/// The one live fetch of a binding.
#[derive(Debug)]
pub(crate) struct PendingFetch {
	pub token: FetchToken,
	pub started_at: Instant,
}

impl PendingFetch {
	pub fn new(token: FetchToken) -> Self {
		Self {
			token,
			started_at: Instant::now(),
		}
	}

	pub fn is_current(&self, token: &FetchToken) -> bool {
		self.token.generation() == token.generation()
	}
}
