//! Error types surfaced by the engine.

use std::path::PathBuf;

use tavola_query::DescriptorError;
use thiserror::Error;

/// Error visible to the consumer of a binding.
///
/// Cancellation never appears here: superseded and disposed fetches are
/// discarded silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
	/// The transport failed. Items from the last success are kept.
	#[error("{0}")]
	Transport(String),

	/// The descriptor cannot be executed. Fatal for the binding until it is
	/// rebound to a valid descriptor.
	#[error("invalid query: {0}")]
	InvalidDescriptor(#[from] DescriptorError),
}

impl QueryError {
	/// Returns true for [`QueryError::InvalidDescriptor`].
	pub fn is_invalid_descriptor(&self) -> bool {
		matches!(self, Self::InvalidDescriptor(_))
	}
}

/// Errors that can occur when loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {}: {error}", path.display())]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value is out of range.
	#[error("invalid engine configuration: {0}")]
	Invalid(String),
}
