//! Invalidation wiring of one active binding.
//!
//! Two independent paths lead to a coalesced refetch:
//! * the remote change feed, pumped by a task that reopens the channel with
//!   a fixed backoff when the transport drops it;
//! * the local [`ChangeBus`](tavola_bus::ChangeBus), for in-process writers
//!   that want consistency without waiting for the remote round-trip.
//!
//! Dropping a [`Wiring`] cancels the pump (which closes the channel) and
//! leaves the bus.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tavola_bus::BusSubscription;
use tavola_query::{ChangeFeed, ResourceName};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{BindingId, Shared};
use crate::task::{self, TaskKind};

pub(super) struct Wiring {
	resources: Vec<ResourceName>,
	_feed: DropGuard,
	_bus: BusSubscription,
}

impl Wiring {
	pub(super) fn connect<T: Send + Sync + 'static>(shared: &Arc<Shared<T>>, resources: Vec<ResourceName>) -> Self {
		let names = resources.clone();
		let binding = Arc::downgrade(shared);
		let bus = shared.engine.bus.subscribe(
			move |topic| names.iter().any(|name| topic.matches(name.as_str())),
			move |topic| {
				if let Some(shared) = binding.upgrade() {
					tracing::trace!(binding = shared.id, %topic, "sync.bus.invalidate");
					shared.schedule_coalesced_fetch();
				}
			},
		);

		let cancel = CancellationToken::new();
		let config = &shared.engine.config;
		let pump = FeedPump {
			binding: Arc::downgrade(shared),
			id: shared.id,
			feed: Arc::clone(&shared.engine.feed),
			resources: resources.clone(),
			cancel: cancel.clone(),
			backoff: config.feed_reopen_backoff(),
			max_attempts: config.feed_reopen_attempts,
		};
		task::spawn(&shared.engine.runtime, TaskKind::Feed, pump.run());

		Self {
			resources,
			_feed: cancel.drop_guard(),
			_bus: bus,
		}
	}

	/// Returns true when this wiring listens to exactly `resources`.
	pub(super) fn covers(&self, resources: &[ResourceName]) -> bool {
		self.resources.len() == resources.len() && resources.iter().all(|r| self.resources.contains(r))
	}
}

struct FeedPump<T: Send + Sync + 'static> {
	binding: Weak<Shared<T>>,
	id: BindingId,
	feed: Arc<dyn ChangeFeed>,
	resources: Vec<ResourceName>,
	cancel: CancellationToken,
	backoff: Duration,
	max_attempts: usize,
}

impl<T: Send + Sync + 'static> FeedPump<T> {
	async fn run(self) {
		let mut failures = 0usize;
		let mut reopening = false;

		loop {
			if reopening {
				if failures >= self.max_attempts {
					tracing::warn!(binding = self.id, failures, "feed.give_up");
					return;
				}
				tokio::select! {
					biased;
					_ = self.cancel.cancelled() => return,
					_ = tokio::time::sleep(self.backoff) => {}
				}
			}

			let opened = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return,
				opened = self.feed.open(&self.resources) => opened,
			};
			let mut channel = match opened {
				Ok(channel) => channel,
				Err(error) => {
					failures += 1;
					tracing::warn!(binding = self.id, %error, failures, "feed.open_failed");
					reopening = true;
					continue;
				}
			};

			if reopening {
				// Changes made while disconnected were never reported.
				tracing::debug!(binding = self.id, "feed.reopened");
				let Some(shared) = self.binding.upgrade() else {
					return;
				};
				shared.schedule_coalesced_fetch();
			} else {
				tracing::debug!(binding = self.id, resources = self.resources.len(), "feed.open");
			}
			failures = 0;
			reopening = true;

			loop {
				let event = tokio::select! {
					biased;
					_ = self.cancel.cancelled() => {
						channel.close();
						tracing::debug!(binding = self.id, "feed.close");
						return;
					}
					event = channel.recv() => event,
				};
				let Some(resource) = event else {
					tracing::warn!(binding = self.id, "feed.lost");
					break;
				};
				let Some(shared) = self.binding.upgrade() else {
					return;
				};
				if self.resources.contains(&resource) {
					tracing::trace!(binding = self.id, %resource, "feed.event");
					shared.schedule_coalesced_fetch();
				} else {
					tracing::trace!(binding = self.id, %resource, "feed.event.ignored");
				}
			}
		}
	}
}
