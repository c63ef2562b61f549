use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use serde_json::{Value, json};
use tavola_memstore::{MemStore, Row};
use tavola_query::Order;
use tavola_sync::{ChangeBus, Engine, EngineConfig, QueryDescriptor, QueryState};
use tokio::sync::watch;

const RESERVATIONS: &str = "reservations";

/// Simulated round-trip of the in-memory store.
const LATENCY: Duration = Duration::from_millis(15);

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(config: EngineConfig, date: NaiveDate, burst: usize) -> anyhow::Result<()> {
	let next = next_day(date)?;
	let store = Arc::new(MemStore::new().with_latency(LATENCY));
	seed(&store, date, next)?;

	// Long enough for the debounce to fire and its fetch to land.
	let quiet = config.debounce() + LATENCY * 2 + Duration::from_millis(25);
	let engine: Engine<Row> = Engine::new(store.clone(), store.clone(), ChangeBus::new(), config);

	println!("binding {RESERVATIONS} for {date}");
	let handle = engine.bind(view(date));
	let mut updates = handle.watch();
	print_state("bound", &updates.borrow_and_update());
	wait_settled(&mut updates).await?;
	print_state("ready", &handle.state());

	let before = store.fetch_count();
	let rows = (0..burst).map(|i| {
		json!({
			"id": format!("walk-in-{i}"),
			"date": date.to_string(),
			"time": format!("{:02}:{:02}", 17 + i / 60, i % 60),
			"guest": format!("walk-in {i}"),
		})
	});
	let written = store.insert_many(RESERVATIONS, rows)?;
	tokio::time::sleep(quiet).await;
	print_state(&format!("after burst of {written}"), &handle.state());
	println!("  fetches for the burst: {}", store.fetch_count() - before);

	let before = store.fetch_count();
	let notified = engine.invalidate(RESERVATIONS);
	tokio::time::sleep(quiet).await;
	println!(
		"local invalidation reached {notified} binding(s), fetches: {}",
		store.fetch_count() - before
	);

	println!("rebinding to {next}");
	handle.rebind(view(next));
	wait_settled(&mut updates).await?;
	print_state("ready", &handle.state());

	handle.dispose();
	println!(
		"disposed; fetches served: {}, feed channels opened: {}, still open: {}",
		store.fetch_count(),
		store.channels_opened(),
		store.open_channel_count()
	);
	Ok(())
}

fn view(date: NaiveDate) -> QueryDescriptor {
	QueryDescriptor::new(RESERVATIONS)
		.select("guest,time,party_size")
		.filter("date", date.to_string())
		.order(Order::asc("time"))
}

fn next_day(date: NaiveDate) -> anyhow::Result<NaiveDate> {
	date.succ_opt().with_context(|| format!("no day follows {date}"))
}

fn seed(store: &MemStore, date: NaiveDate, next: NaiveDate) -> anyhow::Result<()> {
	let rows = [
		(date, "20:00", "Ana Ortiz", 2),
		(date, "19:00", "Bruno Sala", 4),
		(date, "21:30", "Chiara Neri", 6),
		(next, "19:30", "Dario Fo", 3),
		(next, "20:15", "Elena Riva", 2),
	];
	let rows = rows.iter().enumerate().map(|(i, (day, time, guest, party))| {
		json!({
			"id": format!("r{}", i + 1),
			"date": day.to_string(),
			"time": time,
			"guest": guest,
			"party_size": party,
		})
	});
	store.insert_many(RESERVATIONS, rows).context("seeding reservations")?;
	Ok(())
}

async fn wait_settled(updates: &mut watch::Receiver<QueryState<Row>>) -> anyhow::Result<()> {
	tokio::time::timeout(SETTLE_TIMEOUT, updates.wait_for(|state| !state.loading()))
		.await
		.context("query did not settle")?
		.context("binding went away")?;
	Ok(())
}

fn print_state(label: &str, state: &QueryState<Row>) {
	println!(
		"[{label}] phase={:?} loading={} rows={}",
		state.phase(),
		state.loading(),
		state.len()
	);
	if let Some(error) = state.error() {
		println!("  error: {error}");
	}
	for row in state.items().iter().take(5) {
		println!("  {}", describe(row));
	}
	if state.len() > 5 {
		println!("  ... {} more", state.len() - 5);
	}
}

fn describe(row: &Row) -> String {
	let field = |name: &str| row.get(name).map(Value::to_string).unwrap_or_else(|| "-".to_string());
	format!("{} {} party of {}", field("time"), field("guest"), field("party_size"))
}
