use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::descriptor::{Order, QueryDescriptor, ResourceName};
use crate::error::TransportError;
use crate::scalar::Scalar;

/// One fetch issued against a [`QueryTransport`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
	/// Resource rows are read from.
	pub resource: ResourceName,
	/// Field selection.
	pub projection: String,
	/// Equality filters.
	pub filters: BTreeMap<String, Scalar>,
	/// Sort clause.
	pub order: Option<Order>,
	/// Cancelled when the request is superseded or its binding is disposed.
	pub cancel: CancellationToken,
}

impl FetchRequest {
	/// Builds a request for the primary resource of `descriptor`.
	///
	/// Returns `None` when the descriptor names no resource.
	pub fn from_descriptor(descriptor: &QueryDescriptor, cancel: CancellationToken) -> Option<Self> {
		Some(Self {
			resource: descriptor.primary_resource()?.clone(),
			projection: descriptor.projection().to_string(),
			filters: descriptor.filters().clone(),
			order: descriptor.order_by().cloned(),
			cancel,
		})
	}

	/// Returns true once the request has been cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}
}

/// Executes fetches against the remote store.
///
/// Implementations should observe [`FetchRequest::cancel`] and return
/// [`TransportError::Aborted`] promptly once it fires. Callers still discard
/// late responses from superseded requests, so a transport that finishes
/// anyway is slower but not incorrect.
#[async_trait]
pub trait QueryTransport<T: Send>: Send + Sync {
	/// Fetches the rows matching `request`, in server order.
	async fn fetch(&self, request: FetchRequest) -> Result<Vec<T>, TransportError>;
}
