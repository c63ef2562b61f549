//! Live query engine.
//!
//! An [`Engine`] turns a [`QueryDescriptor`] into a [`QueryHandle`] whose
//! [`QueryState`] stays fresh on its own:
//!
//! * the first fetch is visible (`loading` flips to true);
//! * change-feed events and local bus invalidations schedule a trailing
//!   debounced *silent* fetch, so a burst of events costs one fetch and the
//!   previous rows stay visible meanwhile;
//! * descriptor changes cancel the in-flight fetch and start a new one, and a
//!   value-equal descriptor changes nothing;
//! * responses are applied last-issued-wins, never in arrival order;
//! * transport failures keep the last good rows and surface an error;
//!   cancellations are silent.
//!
//! ```ignore
//! let engine = Engine::new(transport, feed, bus.clone(), EngineConfig::default());
//! let handle = engine.bind(QueryDescriptor::new("reservations").filter("date", "2026-01-19"));
//! let mut updates = handle.watch();
//! updates.changed().await?;
//! println!("{} reservations", updates.borrow().len());
//!
//! // Elsewhere, after a local write:
//! bus.publish(&Topic::resource("reservations"));
//! ```
//!
//! Bindings spawn their work on the Tokio runtime the engine was created in;
//! invalidations may be published from any thread.

#![warn(missing_docs)]

mod binding;
pub mod config;
mod debounce;
mod engine;
pub mod error;
mod state;
mod task;
mod token;

pub use binding::{BindingId, QueryHandle};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{ConfigError, QueryError};
pub use state::{FetchMode, Phase, QueryState};
pub use tavola_bus::{ChangeBus, Topic};
pub use tavola_query::{ChangeFeed, QueryDescriptor, QueryTransport};
