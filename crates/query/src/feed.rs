//! Remote change-feed contract.
//!
//! A [`ChangeFeed`] opens [`FeedChannel`]s that yield the name of a resource
//! whenever one of its records is created, updated, or deleted upstream.
//! Delivery is a hint only: events may be late, duplicated, or lost, and the
//! channel itself may end when the transport disconnects (`recv` returns
//! `None`). Consumers re-read authoritative state and never treat an event as
//! data.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::descriptor::ResourceName;
use crate::error::FeedError;

type CloseHook = Box<dyn FnOnce() + Send + Sync>;

/// Opens push channels for sets of resources.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
	/// Opens a channel reporting changes to any of `resources`.
	async fn open(&self, resources: &[ResourceName]) -> Result<FeedChannel, FeedError>;
}

/// An open change-feed channel.
///
/// Closing is explicit through [`FeedChannel::close`] or implicit on drop;
/// either way the close hook runs exactly once.
pub struct FeedChannel {
	resources: Vec<ResourceName>,
	events: mpsc::UnboundedReceiver<ResourceName>,
	on_close: Option<CloseHook>,
}

impl FeedChannel {
	/// Wraps a receiver of change events.
	pub fn new(resources: Vec<ResourceName>, events: mpsc::UnboundedReceiver<ResourceName>) -> Self {
		Self {
			resources,
			events,
			on_close: None,
		}
	}

	/// Registers a hook run when the channel closes.
	#[must_use]
	pub fn with_close_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
		self.on_close = Some(Box::new(hook));
		self
	}

	/// Resources this channel reports on.
	pub fn resources(&self) -> &[ResourceName] {
		&self.resources
	}

	/// Waits for the next change. `None` means the transport went away.
	pub async fn recv(&mut self) -> Option<ResourceName> {
		self.events.recv().await
	}

	/// Closes the channel.
	pub fn close(mut self) {
		self.run_close_hook();
	}

	fn run_close_hook(&mut self) {
		self.events.close();
		if let Some(hook) = self.on_close.take() {
			hook();
		}
	}
}

impl Drop for FeedChannel {
	fn drop(&mut self) {
		self.run_close_hook();
	}
}

impl std::fmt::Debug for FeedChannel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FeedChannel").field("resources", &self.resources).finish_non_exhaustive()
	}
}

/// Feed that never reports a change.
///
/// Channels stay open until closed, so bindings relying on it are driven
/// only by manual refetches and the local invalidation bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentFeed;

#[async_trait]
impl ChangeFeed for SilentFeed {
	async fn open(&self, resources: &[ResourceName]) -> Result<FeedChannel, FeedError> {
		let (tx, rx) = mpsc::unbounded_channel();
		Ok(FeedChannel::new(resources.to_vec(), rx).with_close_hook(move || drop(tx)))
	}
}
