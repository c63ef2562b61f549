//! In-memory relational backend for live queries.
//!
//! [`MemStore`] keeps named tables of JSON object rows in insertion order and
//! implements both collaborator contracts of the sync engine:
//!
//! * [`QueryTransport<Row>`]: equality filters, one-field ordering, and
//!   projection, with an optional simulated latency during which the
//!   request's cancellation token is honoured;
//! * [`ChangeFeed`]: every write emits one event per affected row to every
//!   open channel covering the table, the same per-row bursts a real
//!   replication feed produces.
//!
//! Fault injection ([`MemStore::fail_next_fetch`],
//! [`MemStore::disconnect_feeds`]) and call counters make it suitable for
//! exercising engine behaviour end to end.

#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tavola_query::{
	ChangeFeed, DescriptorError, FeedChannel, FeedError, FetchRequest, QueryTransport, ResourceName, TransportError,
};
use thiserror::Error;
use tokio::sync::mpsc;

mod filter;

/// One stored row.
pub type Row = Map<String, Value>;

/// Field holding each row's unique text identifier.
pub const ID_FIELD: &str = "id";

/// Write-side failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	/// The table name is malformed.
	#[error(transparent)]
	Resource(#[from] DescriptorError),

	/// A row is not a JSON object.
	#[error("row is not a JSON object")]
	NotAnObject,

	/// A row has no text `id` field.
	#[error("row has no text \"id\" field")]
	MissingId,

	/// A row with the same id already exists.
	#[error("duplicate id {id} in {resource}")]
	DuplicateId {
		/// Table written to.
		resource: String,
		/// Conflicting id.
		id: String,
	},

	/// No row has the given id.
	#[error("no row {id} in {resource}")]
	NotFound {
		/// Table written to.
		resource: String,
		/// Missing id.
		id: String,
	},
}

struct FeedSink {
	id: u64,
	resources: Vec<ResourceName>,
	tx: mpsc::UnboundedSender<ResourceName>,
}

/// In-memory store.
pub struct MemStore {
	tables: Mutex<HashMap<ResourceName, Vec<Row>>>,
	feeds: Arc<Mutex<Vec<FeedSink>>>,
	next_channel: AtomicU64,
	latency: Duration,
	fail_next: Mutex<Option<String>>,
	fetches: AtomicUsize,
	opens: AtomicUsize,
}

impl Default for MemStore {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for MemStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemStore")
			.field("tables", &self.tables.lock().len())
			.field("open_channels", &self.open_channel_count())
			.field("latency", &self.latency)
			.finish()
	}
}

impl MemStore {
	/// Creates an empty store that answers fetches immediately.
	pub fn new() -> Self {
		Self {
			tables: Mutex::new(HashMap::new()),
			feeds: Arc::new(Mutex::new(Vec::new())),
			next_channel: AtomicU64::new(0),
			latency: Duration::ZERO,
			fail_next: Mutex::new(None),
			fetches: AtomicUsize::new(0),
			opens: AtomicUsize::new(0),
		}
	}

	/// Delays every fetch by `latency`.
	#[must_use]
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = latency;
		self
	}

	/// Creates an empty table so fetches against it succeed.
	pub fn create_table(&self, resource: impl Into<ResourceName>) -> Result<(), StoreError> {
		let resource = checked(resource)?;
		self.tables.lock().entry(resource).or_default();
		Ok(())
	}

	/// Inserts one row.
	pub fn insert(&self, resource: impl Into<ResourceName>, row: Value) -> Result<(), StoreError> {
		self.insert_many(resource, [row]).map(|_| ())
	}

	/// Inserts rows atomically, emitting one change event per row.
	///
	/// Returns the number of rows inserted.
	pub fn insert_many(&self, resource: impl Into<ResourceName>, rows: impl IntoIterator<Item = Value>) -> Result<usize, StoreError> {
		let resource = checked(resource)?;
		let rows = rows.into_iter().map(into_row).collect::<Result<Vec<_>, _>>()?;
		let count = {
			let mut tables = self.tables.lock();
			let stored = tables.get(&resource).map(Vec::as_slice).unwrap_or_default();
			for (i, row) in rows.iter().enumerate() {
				let id = row_id(row)?;
				let clashes_stored = stored.iter().any(|r| row_id(r).ok() == Some(id));
				let clashes_batch = rows[..i].iter().any(|r| row_id(r).ok() == Some(id));
				if clashes_stored || clashes_batch {
					return Err(StoreError::DuplicateId {
						resource: resource.to_string(),
						id: id.to_string(),
					});
				}
			}
			let count = rows.len();
			tables.entry(resource.clone()).or_default().extend(rows);
			count
		};
		tracing::debug!(%resource, rows = count, "memstore.insert");
		self.notify(&resource, count);
		Ok(count)
	}

	/// Merges the fields of `patch` into the row with `id`.
	pub fn update(&self, resource: impl Into<ResourceName>, id: &str, patch: Value) -> Result<(), StoreError> {
		let resource = checked(resource)?;
		let patch = into_row(patch)?;
		{
			let mut tables = self.tables.lock();
			let row = tables
				.get_mut(&resource)
				.and_then(|table| table.iter_mut().find(|r| row_id(r).ok() == Some(id)))
				.ok_or_else(|| StoreError::NotFound {
					resource: resource.to_string(),
					id: id.to_string(),
				})?;
			for (key, value) in patch {
				if key != ID_FIELD {
					row.insert(key, value);
				}
			}
		}
		tracing::debug!(%resource, id, "memstore.update");
		self.notify(&resource, 1);
		Ok(())
	}

	/// Removes and returns the row with `id`.
	pub fn delete(&self, resource: impl Into<ResourceName>, id: &str) -> Result<Row, StoreError> {
		let resource = checked(resource)?;
		let removed = {
			let mut tables = self.tables.lock();
			let not_found = || StoreError::NotFound {
				resource: resource.to_string(),
				id: id.to_string(),
			};
			let table = tables.get_mut(&resource).ok_or_else(not_found)?;
			let index = table.iter().position(|r| row_id(r).ok() == Some(id)).ok_or_else(not_found)?;
			table.remove(index)
		};
		tracing::debug!(%resource, id, "memstore.delete");
		self.notify(&resource, 1);
		Ok(removed)
	}

	/// All rows of a table, in insertion order.
	pub fn rows(&self, resource: &str) -> Vec<Row> {
		self.tables.lock().get(resource).cloned().unwrap_or_default()
	}

	/// Makes the next fetch fail with `message`.
	pub fn fail_next_fetch(&self, message: impl Into<String>) {
		*self.fail_next.lock() = Some(message.into());
	}

	/// Drops every open feed channel, as a transport disconnect would.
	///
	/// Returns the number of channels dropped.
	pub fn disconnect_feeds(&self) -> usize {
		let dropped = std::mem::take(&mut *self.feeds.lock());
		tracing::debug!(channels = dropped.len(), "memstore.disconnect");
		dropped.len()
	}

	/// Fetches served so far, including failed and aborted ones.
	pub fn fetch_count(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}

	/// Feed channels opened so far.
	pub fn channels_opened(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}

	/// Feed channels currently open.
	pub fn open_channel_count(&self) -> usize {
		self.feeds.lock().len()
	}

	fn notify(&self, resource: &ResourceName, events: usize) {
		let mut feeds = self.feeds.lock();
		feeds.retain(|sink| {
			if !sink.resources.contains(resource) {
				return true;
			}
			(0..events).all(|_| sink.tx.send(resource.clone()).is_ok())
		});
	}
}

#[async_trait]
impl QueryTransport<Row> for MemStore {
	async fn fetch(&self, request: FetchRequest) -> Result<Vec<Row>, TransportError> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		if !self.latency.is_zero() {
			tokio::select! {
				biased;
				_ = request.cancel.cancelled() => return Err(TransportError::Aborted),
				_ = tokio::time::sleep(self.latency) => {}
			}
		}
		if request.is_cancelled() {
			return Err(TransportError::Aborted);
		}
		if let Some(message) = self.fail_next.lock().take() {
			return Err(TransportError::failed(message));
		}

		let mut rows: Vec<Row> = {
			let tables = self.tables.lock();
			let Some(table) = tables.get(&request.resource) else {
				return Err(TransportError::failed(format!("relation \"{}\" does not exist", request.resource)));
			};
			table.iter().filter(|row| filter::matches(row, &request.filters)).cloned().collect()
		};
		if let Some(order) = &request.order {
			filter::sort(&mut rows, order);
		}
		Ok(filter::project(rows, &request.projection))
	}
}

#[async_trait]
impl ChangeFeed for MemStore {
	async fn open(&self, resources: &[ResourceName]) -> Result<FeedChannel, FeedError> {
		let id = self.next_channel.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
		let (tx, rx) = mpsc::unbounded_channel();
		self.feeds.lock().push(FeedSink {
			id,
			resources: resources.to_vec(),
			tx,
		});
		self.opens.fetch_add(1, Ordering::SeqCst);
		tracing::debug!(channel = id, resources = resources.len(), "memstore.feed.open");

		let feeds = Arc::downgrade(&self.feeds);
		Ok(FeedChannel::new(resources.to_vec(), rx).with_close_hook(move || {
			if let Some(feeds) = feeds.upgrade() {
				feeds.lock().retain(|sink| sink.id != id);
			}
		}))
	}
}

fn checked(resource: impl Into<ResourceName>) -> Result<ResourceName, StoreError> {
	let resource = resource.into();
	resource.check()?;
	Ok(resource)
}

fn into_row(value: Value) -> Result<Row, StoreError> {
	match value {
		Value::Object(row) => {
			row_id(&row)?;
			Ok(row)
		}
		_ => Err(StoreError::NotAnObject),
	}
}

fn row_id(row: &Row) -> Result<&str, StoreError> {
	row.get(ID_FIELD).and_then(Value::as_str).ok_or(StoreError::MissingId)
}
