//! Tavola command line.
//!
//! Drives the live query engine against the in-memory store so its
//! behaviour (coalescing, silent refreshes, rebinding) can be watched from a
//! terminal. Set `RUST_LOG` or pass `--verbose` to see the engine's events.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tavola_sync::EngineConfig;
use tracing::info;

mod demo;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tavola")]
#[command(about = "Live query engine for reservation views")]
struct Args {
	/// Engine configuration file (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Bind a reservations view over seeded data and exercise it
	Demo {
		/// Day to show
		#[arg(short, long, value_name = "YYYY-MM-DD", default_value = "2026-01-19")]
		date: NaiveDate,

		/// Rows written in one burst
		#[arg(short, long, default_value_t = 20)]
		burst: usize,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => {
			info!(path = %path.display(), "loading engine config");
			EngineConfig::load(path)?
		}
		None => EngineConfig::default(),
	};

	match args.command {
		Command::Demo { date, burst } => demo::run(config, date, burst).await,
	}
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("tavola_sync=debug,tavola_bus=debug,tavola_memstore=debug,info")
		} else {
			EnvFilter::new("warn")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();
}
