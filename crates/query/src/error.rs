//! Error types for descriptors and transports.

use thiserror::Error;

/// A descriptor that cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
	/// No resource was named.
	#[error("query names no resource")]
	NoResource,

	/// A resource name is empty, the wildcard, or contains invalid characters.
	#[error("invalid resource name: {0:?}")]
	InvalidResource(String),

	/// The same resource appears twice.
	#[error("duplicate resource: {0}")]
	DuplicateResource(String),

	/// The projection is blank.
	#[error("projection is empty")]
	EmptyProjection,

	/// A filter has a blank field name.
	#[error("filter field name is empty")]
	EmptyFilterField,

	/// The order clause has a blank field name.
	#[error("order field name is empty")]
	EmptyOrderField,
}

/// Failure reported by a [`QueryTransport`](crate::QueryTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
	/// The request observed its cancellation token and stopped.
	#[error("request aborted")]
	Aborted,

	/// Network or remote failure.
	#[error("{message}")]
	Failed {
		/// Human-readable failure description.
		message: String,
	},
}

impl TransportError {
	/// Builds a [`TransportError::Failed`].
	pub fn failed(message: impl Into<String>) -> Self {
		Self::Failed { message: message.into() }
	}

	/// Returns true when the failure is a cancellation.
	///
	/// This is the only cancellation classifier. A `Failed` message that
	/// merely mentions an abort is still a genuine failure.
	pub const fn is_aborted(&self) -> bool {
		matches!(self, Self::Aborted)
	}
}

/// Failure opening a change-feed channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
	/// The feed transport is not reachable right now.
	#[error("change feed unavailable: {0}")]
	Unavailable(String),

	/// The feed refused the resource set.
	#[error("change feed rejected resources: {0}")]
	Rejected(String),
}
