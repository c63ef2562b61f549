use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tavola_bus::{ChangeBus, Topic};
use tavola_query::{
	ChangeFeed, FeedChannel, FeedError, FetchRequest, Order, QueryDescriptor, QueryTransport, ResourceName, Scalar,
	TransportError,
};
use tokio::sync::{mpsc, oneshot};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::QueryError;
use crate::state::{FetchMode, Phase};

type Reply = Result<Vec<String>, TransportError>;

/// Transport that records requests.
///
/// Ungated, it answers at once with `["<resource>#<call number>"]`. Gated,
/// every call parks until the test resolves it, ignoring cancellation the
/// way a slow server would.
#[derive(Default)]
struct ScriptedTransport {
	requests: Mutex<Vec<FetchRequest>>,
	/// Per call: whether every earlier request was already cancelled.
	predecessors_cancelled: Mutex<Vec<bool>>,
	gated: AtomicBool,
	gates: Mutex<Vec<Option<oneshot::Sender<Reply>>>>,
	fail_next: Mutex<Option<TransportError>>,
}

impl ScriptedTransport {
	fn calls(&self) -> usize {
		self.requests.lock().len()
	}

	fn request(&self, index: usize) -> FetchRequest {
		self.requests.lock()[index].clone()
	}

	fn resolve(&self, index: usize, reply: Reply) {
		let gate = self.gates.lock()[index].take().expect("gate already resolved");
		let _ = gate.send(reply);
	}

	fn fail_next(&self, error: TransportError) {
		*self.fail_next.lock() = Some(error);
	}
}

#[async_trait]
impl QueryTransport<String> for ScriptedTransport {
	async fn fetch(&self, request: FetchRequest) -> Reply {
		let resource = request.resource.clone();
		let call = {
			let mut requests = self.requests.lock();
			let settled = requests.iter().all(FetchRequest::is_cancelled);
			self.predecessors_cancelled.lock().push(settled);
			requests.push(request);
			requests.len()
		};
		if self.gated.load(Ordering::SeqCst) {
			let (tx, rx) = oneshot::channel();
			self.gates.lock().push(Some(tx));
			return rx.await.unwrap_or(Err(TransportError::Aborted));
		}
		if let Some(error) = self.fail_next.lock().take() {
			return Err(error);
		}
		Ok(vec![format!("{resource}#{call}")])
	}
}

/// Feed whose channels the test drives by hand.
#[derive(Default)]
struct ScriptedFeed {
	opens: AtomicUsize,
	closes: Arc<AtomicUsize>,
	refuse: AtomicBool,
	senders: Mutex<Vec<mpsc::UnboundedSender<ResourceName>>>,
}

impl ScriptedFeed {
	fn opens(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}

	fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}

	/// Sends `resource` on every live channel, covered or not.
	fn emit(&self, resource: &str) {
		for tx in self.senders.lock().iter() {
			let _ = tx.send(ResourceName::new(resource));
		}
	}

	/// Ends every channel as a transport disconnect would.
	fn drop_all(&self) {
		self.senders.lock().clear();
	}
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
	async fn open(&self, resources: &[ResourceName]) -> Result<FeedChannel, FeedError> {
		self.opens.fetch_add(1, Ordering::SeqCst);
		if self.refuse.load(Ordering::SeqCst) {
			return Err(FeedError::Unavailable("socket closed".into()));
		}
		let (tx, rx) = mpsc::unbounded_channel();
		self.senders.lock().push(tx);
		let closes = Arc::clone(&self.closes);
		Ok(FeedChannel::new(resources.to_vec(), rx).with_close_hook(move || {
			closes.fetch_add(1, Ordering::SeqCst);
		}))
	}
}

struct Harness {
	transport: Arc<ScriptedTransport>,
	feed: Arc<ScriptedFeed>,
	bus: ChangeBus,
	engine: Engine<String>,
}

impl Harness {
	fn new() -> Self {
		Self::with_config(EngineConfig::default())
	}

	fn gated() -> Self {
		let harness = Self::new();
		harness.transport.gated.store(true, Ordering::SeqCst);
		harness
	}

	fn with_config(config: EngineConfig) -> Self {
		let transport = Arc::new(ScriptedTransport::default());
		let feed = Arc::new(ScriptedFeed::default());
		let bus = ChangeBus::new();
		let engine = Engine::new(transport.clone(), feed.clone(), bus.clone(), config);
		Self {
			transport,
			feed,
			bus,
			engine,
		}
	}
}

fn reservations(date: &str) -> QueryDescriptor {
	QueryDescriptor::new("reservations")
		.filter("date", date)
		.order(Order::asc("time"))
}

fn items(handle: &super::QueryHandle<String>) -> Vec<String> {
	handle.state().items().to_vec()
}

/// Lets spawned fetch, timer, and feed tasks run to their next await.
async fn settle() {
	for _ in 0..16 {
		tokio::task::yield_now().await;
	}
}

const WINDOW: Duration = Duration::from_millis(40);

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn bind_runs_one_visible_fetch() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));

	let state = handle.state();
	assert!(state.loading());
	assert_eq!(state.phase(), Phase::Loading);

	settle().await;
	let state = handle.state();
	assert!(!state.loading());
	assert_eq!(state.phase(), Phase::Ready);
	assert_eq!(state.error(), None);
	assert_eq!(items(&handle), vec!["reservations#1"]);
	assert_eq!(h.transport.calls(), 1);
	assert_eq!(h.feed.opens(), 1);

	let request = h.transport.request(0);
	assert_eq!(request.resource.as_str(), "reservations");
	assert_eq!(request.filters.get("date"), Some(&Scalar::from("2026-01-19")));
	assert_eq!(request.order, Some(Order::asc("time")));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn inactive_bind_does_nothing() {
	let h = Harness::new();
	let handle = h.engine.bind(QueryDescriptor::disabled());
	settle().await;

	let state = handle.state();
	assert!(!state.loading());
	assert!(state.is_empty());
	assert_eq!(state.phase(), Phase::Idle);
	assert_eq!(h.transport.calls(), 0);
	assert_eq!(h.feed.opens(), 0);
	assert_eq!(h.bus.listener_count(), 0);
	assert!(!handle.refetch(FetchMode::Visible));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn value_equal_rebind_is_a_no_op() {
	let h = Harness::new();
	let handle = h.engine.bind(QueryDescriptor::new("reservations").filter("date", "2026-01-19").filter("guest", "Ana"));
	settle().await;

	let same = QueryDescriptor::new("reservations").filter("guest", "Ana").filter("date", "2026-01-19");
	assert!(!handle.rebind(same));
	settle().await;

	assert_eq!(h.transport.calls(), 1);
	assert!(!handle.state().loading());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn each_distinct_rebind_fetches_once() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;

	assert!(handle.rebind(reservations("2026-01-20")));
	settle().await;
	assert!(handle.rebind(reservations("2026-01-21")));
	settle().await;

	assert_eq!(h.transport.calls(), 3);
	assert_eq!(h.transport.request(2).filters.get("date"), Some(&Scalar::from("2026-01-21")));
	assert_eq!(items(&handle), vec!["reservations#3"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rebind_cancels_the_superseded_fetch() {
	let h = Harness::gated();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	handle.rebind(reservations("2026-01-20"));
	settle().await;

	assert_eq!(h.transport.calls(), 2);
	assert!(h.transport.request(0).is_cancelled());
	assert!(!h.transport.request(1).is_cancelled());

	// The abort of the superseded fetch must not settle the live one.
	h.transport.resolve(0, Err(TransportError::Aborted));
	settle().await;
	assert!(handle.state().loading());

	h.transport.resolve(1, Ok(vec!["t2".into()]));
	settle().await;
	assert!(!handle.state().loading());
	assert_eq!(items(&handle), vec!["t2"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn late_response_from_superseded_fetch_is_ignored() {
	let h = Harness::gated();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	handle.rebind(reservations("2026-01-20"));
	settle().await;

	h.transport.resolve(1, Ok(vec!["fresh".into()]));
	settle().await;
	h.transport.resolve(0, Ok(vec!["stale".into()]));
	settle().await;

	assert_eq!(items(&handle), vec!["fresh"]);
	assert_eq!(handle.state().phase(), Phase::Ready);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn bus_burst_coalesces_into_one_silent_fetch() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	assert_eq!(h.transport.calls(), 1);

	for _ in 0..5 {
		assert_eq!(h.engine.invalidate("reservations"), 1);
		settle().await;
		assert!(!handle.state().loading());
	}
	tokio::time::advance(WINDOW - Duration::from_millis(1)).await;
	settle().await;
	assert_eq!(h.transport.calls(), 1);

	tokio::time::advance(Duration::from_millis(1)).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);
	assert!(!handle.state().loading());
	assert_eq!(items(&handle), vec!["reservations#2"]);

	tokio::time::advance(WINDOW * 10).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn silent_fetch_never_raises_loading() {
	let h = Harness::gated();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	h.transport.resolve(0, Ok(vec!["a".into(), "b".into()]));
	settle().await;

	let mut rx = handle.watch();
	rx.borrow_and_update();
	let seen = Arc::new(Mutex::new(Vec::new()));
	let recorder = tokio::spawn({
		let seen = Arc::clone(&seen);
		async move {
			while rx.changed().await.is_ok() {
				let state = rx.borrow_and_update().clone();
				seen.lock().push((state.loading(), state.items().to_vec()));
			}
		}
	});

	h.bus.publish(&Topic::resource("reservations"));
	settle().await;
	tokio::time::advance(WINDOW).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);

	let state = handle.state();
	assert!(!state.loading());
	assert_eq!(state.items(), ["a".to_string(), "b".to_string()]);

	h.transport.resolve(1, Ok(vec!["c".into()]));
	settle().await;
	drop(handle);
	settle().await;
	recorder.abort();

	let seen = seen.lock().clone();
	assert!(!seen.is_empty());
	assert!(seen.iter().all(|(loading, _)| !loading), "{seen:?}");
	assert!(seen.iter().any(|(_, items)| items == &["c".to_string()]), "{seen:?}");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn previous_fetch_is_cancelled_before_the_next_is_issued() {
	let h = Harness::gated();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	assert!(handle.refetch(FetchMode::Visible));
	settle().await;
	handle.rebind(reservations("2026-01-20"));
	settle().await;

	assert_eq!(h.transport.calls(), 3);
	assert_eq!(*h.transport.predecessors_cancelled.lock(), vec![true, true, true]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn invalidation_from_a_plain_thread_is_delivered() {
	let h = Harness::new();
	let _handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	assert_eq!(h.transport.calls(), 1);

	let bus = h.bus.clone();
	let notified = std::thread::spawn(move || bus.publish(&Topic::resource("reservations")))
		.join()
		.expect("publisher thread");
	assert_eq!(notified, 1);

	settle().await;
	tokio::time::advance(WINDOW).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn debounce_restarts_on_every_event() {
	let h = Harness::new();
	let _handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;

	h.engine.invalidate("reservations");
	settle().await;
	tokio::time::advance(Duration::from_millis(30)).await;
	h.engine.invalidate("reservations");
	settle().await;
	tokio::time::advance(Duration::from_millis(30)).await;
	settle().await;
	assert_eq!(h.transport.calls(), 1);

	tokio::time::advance(Duration::from_millis(10)).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn feed_events_schedule_a_refetch() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;

	for _ in 0..3 {
		h.feed.emit("reservations");
	}
	settle().await;
	tokio::time::advance(WINDOW).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);
	assert_eq!(items(&handle), vec!["reservations#2"]);

	h.feed.emit("tables");
	settle().await;
	tokio::time::advance(WINDOW * 5).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn wildcard_invalidates_every_binding() {
	let h = Harness::new();
	let _reservations = h.engine.bind(reservations("2026-01-19"));
	let _tables = h.engine.bind(QueryDescriptor::new("tables"));
	settle().await;
	assert_eq!(h.transport.calls(), 2);

	assert_eq!(h.engine.invalidate(Topic::All), 2);
	settle().await;
	tokio::time::advance(WINDOW).await;
	settle().await;
	assert_eq!(h.transport.calls(), 4);

	assert_eq!(h.engine.invalidate("guests"), 0);
	settle().await;
	tokio::time::advance(WINDOW).await;
	settle().await;
	assert_eq!(h.transport.calls(), 4);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failure_keeps_previous_rows() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;

	h.transport.fail_next(TransportError::failed("connection reset"));
	assert!(handle.refetch(FetchMode::Visible));
	settle().await;

	let state = handle.state();
	assert!(!state.loading());
	assert_eq!(state.phase(), Phase::Failed);
	assert_eq!(state.error(), Some(&QueryError::Transport("connection reset".into())));
	assert_eq!(state.items(), ["reservations#1".to_string()]);

	assert!(handle.refetch(FetchMode::Visible));
	settle().await;
	let state = handle.state();
	assert_eq!(state.error(), None);
	assert_eq!(state.phase(), Phase::Ready);
	assert_eq!(state.items(), ["reservations#3".to_string()]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failure_before_any_result_leaves_rows_empty() {
	let h = Harness::new();
	h.transport.fail_next(TransportError::failed("timeout"));
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;

	let state = handle.state();
	assert!(state.is_empty());
	assert!(!state.loading());
	assert_eq!(state.error(), Some(&QueryError::Transport("timeout".into())));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn aborted_response_is_not_an_error() {
	let h = Harness::new();
	h.transport.fail_next(TransportError::Aborted);
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;

	let state = handle.state();
	assert!(!state.loading());
	assert_eq!(state.error(), None);
	assert_eq!(state.phase(), Phase::Idle);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_message_mentioning_abort_is_still_a_failure() {
	let h = Harness::new();
	h.transport.fail_next(TransportError::failed("AbortError: the operation was aborted"));
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;

	assert!(handle.state().error().is_some());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn invalid_descriptor_fails_without_fetching() {
	let h = Harness::new();
	let handle = h.engine.bind(QueryDescriptor::new("bad name"));
	settle().await;

	let state = handle.state();
	assert_eq!(state.phase(), Phase::Failed);
	assert!(state.error().is_some_and(QueryError::is_invalid_descriptor));
	assert!(!state.loading());
	assert_eq!(h.transport.calls(), 0);
	assert_eq!(h.feed.opens(), 0);
	assert!(!handle.refetch(FetchMode::Visible));

	assert!(handle.rebind(reservations("2026-01-19")));
	settle().await;
	let state = handle.state();
	assert_eq!(state.error(), None);
	assert_eq!(state.phase(), Phase::Ready);
	assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dispose_stops_everything() {
	let h = Harness::gated();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	assert_eq!(h.bus.listener_count(), 1);

	assert!(handle.dispose());
	assert!(!handle.dispose());
	assert!(handle.is_disposed());
	assert!(h.transport.request(0).is_cancelled());
	assert!(!handle.state().loading());
	settle().await;
	assert_eq!(h.feed.closes(), 1);
	assert_eq!(h.bus.listener_count(), 0);

	h.transport.resolve(0, Ok(vec!["late".into()]));
	h.engine.invalidate("reservations");
	h.feed.emit("reservations");
	settle().await;
	tokio::time::advance(WINDOW * 5).await;
	settle().await;

	assert!(handle.state().is_empty());
	assert_eq!(h.transport.calls(), 1);
	assert!(!handle.rebind(reservations("2026-01-20")));
	assert!(!handle.refetch(FetchMode::Visible));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dispose_cancels_pending_debounce() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	h.engine.invalidate("reservations");
	settle().await;

	handle.dispose();
	tokio::time::advance(WINDOW * 2).await;
	settle().await;
	assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dropping_the_handle_disposes() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	assert_eq!(h.bus.listener_count(), 1);

	drop(handle);
	settle().await;
	assert_eq!(h.bus.listener_count(), 0);
	assert_eq!(h.feed.closes(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rebind_to_inactive_clears_rows() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	assert_eq!(handle.state().len(), 1);

	assert!(handle.rebind(reservations("2026-01-19").inactive(true)));
	settle().await;

	let state = handle.state();
	assert!(state.is_empty());
	assert_eq!(state.phase(), Phase::Idle);
	assert_eq!(h.feed.closes(), 1);
	assert_eq!(h.engine.invalidate("reservations"), 0);
	assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn refetch_bypasses_the_debounce() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	h.engine.invalidate("reservations");
	settle().await;

	assert!(handle.refetch(FetchMode::Silent));
	assert!(!handle.state().loading());
	settle().await;
	assert_eq!(h.transport.calls(), 2);

	// The pending timer was absorbed by the manual fetch.
	tokio::time::advance(WINDOW * 5).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);

	assert!(handle.refetch(FetchMode::Visible));
	assert!(handle.state().loading());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn same_resources_keep_the_feed_channel() {
	let h = Harness::new();
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;

	handle.rebind(reservations("2026-01-20"));
	settle().await;
	assert_eq!(h.feed.opens(), 1);
	assert_eq!(h.feed.closes(), 0);

	handle.rebind(reservations("2026-01-20").with_resource("tables"));
	settle().await;
	assert_eq!(h.feed.opens(), 2);
	assert_eq!(h.feed.closes(), 1);
	assert_eq!(h.bus.listener_count(), 1);

	// The new wiring listens to both resources.
	assert_eq!(h.engine.invalidate("tables"), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lost_feed_is_reopened_and_refetched() {
	let backoff = Duration::from_millis(250);
	let h = Harness::with_config(EngineConfig::default().with_feed_reopen(backoff, 3));
	let _handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	assert_eq!(h.feed.opens(), 1);

	h.feed.drop_all();
	settle().await;
	assert_eq!(h.feed.opens(), 1);

	tokio::time::advance(backoff).await;
	settle().await;
	assert_eq!(h.feed.opens(), 2);

	tokio::time::advance(WINDOW).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);

	h.feed.emit("reservations");
	settle().await;
	tokio::time::advance(WINDOW).await;
	settle().await;
	assert_eq!(h.transport.calls(), 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn feed_gives_up_after_consecutive_failures() {
	let backoff = Duration::from_millis(10);
	let h = Harness::with_config(EngineConfig::default().with_feed_reopen(backoff, 2));
	h.feed.refuse.store(true, Ordering::SeqCst);
	let handle = h.engine.bind(reservations("2026-01-19"));
	settle().await;
	assert_eq!(h.feed.opens(), 1);

	tokio::time::advance(backoff).await;
	settle().await;
	assert_eq!(h.feed.opens(), 2);

	tokio::time::advance(backoff * 10).await;
	settle().await;
	assert_eq!(h.feed.opens(), 2);

	// The bus path still works.
	assert_eq!(items(&handle), vec!["reservations#1"]);
	h.engine.invalidate("reservations");
	settle().await;
	tokio::time::advance(WINDOW).await;
	settle().await;
	assert_eq!(h.transport.calls(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn watchers_see_loading_then_rows() {
	let h = Harness::gated();
	let handle = h.engine.bind(reservations("2026-01-19"));
	let mut rx = handle.watch();
	assert!(rx.borrow_and_update().loading());

	settle().await;
	h.transport.resolve(0, Ok(vec!["r1".into()]));
	rx.changed().await.expect("binding alive");

	let state = rx.borrow_and_update().clone();
	assert!(!state.loading());
	assert_eq!(state.items(), ["r1".to_string()]);
}

#[test]
fn debug_reports_binding_status() {
	let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().expect("runtime");
	let _guard = runtime.enter();
	let h = Harness::new();
	let handle = h.engine.bind(QueryDescriptor::disabled());
	let debug = format!("{handle:?}");
	assert!(debug.contains("Inactive"), "{debug}");
	assert!(debug.contains("fetch_pending: false"), "{debug}");
}
