use std::fmt;
use std::sync::Arc;

/// Wildcard spelling accepted by [`Topic::parse`].
pub const WILDCARD: &str = "*";

/// Invalidation topic carried by the [`ChangeBus`](crate::ChangeBus).
///
/// Topics carry no payload. Listeners react by re-reading authoritative
/// state rather than patching what they already hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
	/// Every record of one resource may have changed.
	Resource(Arc<str>),
	/// Everything may have changed.
	All,
}

impl Topic {
	/// Topic for a single resource.
	pub fn resource(name: impl AsRef<str>) -> Self {
		Self::Resource(Arc::from(name.as_ref()))
	}

	/// Parses a topic, mapping `"*"` to [`Topic::All`].
	pub fn parse(raw: &str) -> Self {
		if raw == WILDCARD { Self::All } else { Self::resource(raw) }
	}

	/// Returns true for the wildcard topic.
	pub fn is_all(&self) -> bool {
		matches!(self, Self::All)
	}

	/// Returns true when this topic invalidates `resource`.
	pub fn matches(&self, resource: &str) -> bool {
		match self {
			Self::All => true,
			Self::Resource(name) => name.as_ref() == resource,
		}
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::All => f.write_str(WILDCARD),
			Self::Resource(name) => f.write_str(name),
		}
	}
}

impl From<&str> for Topic {
	fn from(raw: &str) -> Self {
		Self::parse(raw)
	}
}
