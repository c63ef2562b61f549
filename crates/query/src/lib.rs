//! Query descriptors and the transport contracts live queries run against.
//!
//! * [`QueryDescriptor`]: immutable, structurally compared description of a
//!   query (resources, projection, equality filters, order, inactive flag).
//! * [`QueryTransport`]: executes one cancellable fetch.
//! * [`ChangeFeed`]: opens push channels that report which resources changed.

#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod feed;
pub mod scalar;
pub mod transport;

pub use descriptor::{Order, QueryDescriptor, ResourceName, SELECT_ALL};
pub use error::{DescriptorError, FeedError, TransportError};
pub use feed::{ChangeFeed, FeedChannel, SilentFeed};
pub use scalar::Scalar;
pub use transport::{FetchRequest, QueryTransport};
/// Re-export so transports and callers share one token type.
pub use tokio_util::sync::CancellationToken;
