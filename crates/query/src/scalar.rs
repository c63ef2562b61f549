use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Value compared by an equality filter.
///
/// Equality is structural. Floats compare by bit pattern so the type can be
/// `Eq` and `Hash`, which is what descriptor change detection needs.
#[derive(Debug, Clone)]
pub enum Scalar {
	/// Boolean.
	Bool(bool),
	/// Signed integer.
	Int(i64),
	/// Floating point number.
	Float(f64),
	/// Text, including dates and times in their textual form.
	Text(Arc<str>),
}

impl Scalar {
	/// Returns the text value, if any.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Text(s) => Some(s),
			_ => None,
		}
	}
}

impl PartialEq for Scalar {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Bool(a), Self::Bool(b)) => a == b,
			(Self::Int(a), Self::Int(b)) => a == b,
			(Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
			(Self::Text(a), Self::Text(b)) => a == b,
			_ => false,
		}
	}
}

impl Eq for Scalar {}

impl Hash for Scalar {
	fn hash<H: Hasher>(&self, state: &mut H) {
		std::mem::discriminant(self).hash(state);
		match self {
			Self::Bool(v) => v.hash(state),
			Self::Int(v) => v.hash(state),
			Self::Float(v) => v.to_bits().hash(state),
			Self::Text(v) => v.hash(state),
		}
	}
}

impl fmt::Display for Scalar {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bool(v) => write!(f, "{v}"),
			Self::Int(v) => write!(f, "{v}"),
			Self::Float(v) => write!(f, "{v}"),
			Self::Text(v) => write!(f, "{v:?}"),
		}
	}
}

impl From<bool> for Scalar {
	fn from(v: bool) -> Self {
		Self::Bool(v)
	}
}

impl From<i64> for Scalar {
	fn from(v: i64) -> Self {
		Self::Int(v)
	}
}

impl From<i32> for Scalar {
	fn from(v: i32) -> Self {
		Self::Int(i64::from(v))
	}
}

impl From<u32> for Scalar {
	fn from(v: u32) -> Self {
		Self::Int(i64::from(v))
	}
}

impl From<f64> for Scalar {
	fn from(v: f64) -> Self {
		Self::Float(v)
	}
}

impl From<&str> for Scalar {
	fn from(v: &str) -> Self {
		Self::Text(Arc::from(v))
	}
}

impl From<String> for Scalar {
	fn from(v: String) -> Self {
		Self::Text(Arc::from(v))
	}
}
