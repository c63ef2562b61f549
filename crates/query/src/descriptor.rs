//! Query descriptors.
//!
//! A [`QueryDescriptor`] says what a consumer wants to read: which resources,
//! which fields, which equality filters, in what order, and whether the query
//! is currently switched off. Descriptors are immutable values; changing a
//! query means building a new descriptor.
//!
//! Equality is structural. Filters live in a sorted map, so two descriptors
//! built with the same filters in a different order compare equal. This is
//! what lets a binding ignore descriptor churn that does not change the
//! query.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::DescriptorError;
use crate::scalar::Scalar;

/// Projection selecting every field.
pub const SELECT_ALL: &str = "*";

/// Name of a remote resource (a table or view).
///
/// Construction never fails; [`QueryDescriptor::validate`] rejects malformed
/// names so the error surfaces on the binding that uses them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName(Arc<str>);

impl ResourceName {
	/// Wraps a resource name.
	pub fn new(name: impl AsRef<str>) -> Self {
		Self(Arc::from(name.as_ref()))
	}

	/// The name as text.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Checks the name is a plain identifier (`[A-Za-z0-9_.-]+`).
	pub fn check(&self) -> Result<(), DescriptorError> {
		let valid = !self.0.is_empty()
			&& self
				.0
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
		if valid { Ok(()) } else { Err(DescriptorError::InvalidResource(self.0.to_string())) }
	}
}

impl fmt::Display for ResourceName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Borrow<str> for ResourceName {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ResourceName {
	fn from(name: &str) -> Self {
		Self::new(name)
	}
}

impl From<String> for ResourceName {
	fn from(name: String) -> Self {
		Self::new(name)
	}
}

/// Sort clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Order {
	/// Field to sort by.
	pub field: String,
	/// Ascending when true.
	pub ascending: bool,
}

impl Order {
	/// Ascending order on `field`.
	pub fn asc(field: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			ascending: true,
		}
	}

	/// Descending order on `field`.
	pub fn desc(field: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			ascending: false,
		}
	}
}

/// Immutable description of the records a consumer wants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryDescriptor {
	resources: Vec<ResourceName>,
	projection: String,
	filters: BTreeMap<String, Scalar>,
	order: Option<Order>,
	inactive: bool,
}

impl QueryDescriptor {
	/// Selects every field of `resource`, unfiltered and unordered.
	pub fn new(resource: impl Into<ResourceName>) -> Self {
		Self {
			resources: vec![resource.into()],
			projection: SELECT_ALL.to_string(),
			filters: BTreeMap::new(),
			order: None,
			inactive: false,
		}
	}

	/// An inactive descriptor naming no resource.
	///
	/// Binding it performs no work; useful while a consumer is not ready to
	/// query yet.
	pub fn disabled() -> Self {
		Self {
			resources: Vec::new(),
			projection: SELECT_ALL.to_string(),
			filters: BTreeMap::new(),
			order: None,
			inactive: true,
		}
	}

	/// Adds a secondary resource whose changes also invalidate the query.
	#[must_use]
	pub fn with_resource(mut self, resource: impl Into<ResourceName>) -> Self {
		self.resources.push(resource.into());
		self
	}

	/// Sets the projection (`"*"` or a comma-separated field list).
	#[must_use]
	pub fn select(mut self, projection: impl Into<String>) -> Self {
		self.projection = projection.into();
		self
	}

	/// Adds an equality filter, replacing any filter on the same field.
	#[must_use]
	pub fn filter(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
		self.filters.insert(field.into(), value.into());
		self
	}

	/// Adds an equality filter when `value` is present.
	///
	/// Absent values are excluded from the descriptor entirely rather than
	/// matching nulls.
	#[must_use]
	pub fn filter_opt<V: Into<Scalar>>(self, field: impl Into<String>, value: Option<V>) -> Self {
		match value {
			Some(value) => self.filter(field, value),
			None => self,
		}
	}

	/// Sets the sort clause.
	#[must_use]
	pub fn order(mut self, order: Order) -> Self {
		self.order = Some(order);
		self
	}

	/// Switches the query off (or back on).
	#[must_use]
	pub fn inactive(mut self, inactive: bool) -> Self {
		self.inactive = inactive;
		self
	}

	/// All resources, primary first.
	pub fn resources(&self) -> &[ResourceName] {
		&self.resources
	}

	/// The resource records are read from.
	pub fn primary_resource(&self) -> Option<&ResourceName> {
		self.resources.first()
	}

	/// Field selection.
	pub fn projection(&self) -> &str {
		&self.projection
	}

	/// Equality filters, sorted by field name.
	pub fn filters(&self) -> &BTreeMap<String, Scalar> {
		&self.filters
	}

	/// Sort clause, if any.
	pub fn order_by(&self) -> Option<&Order> {
		self.order.as_ref()
	}

	/// Whether the query is switched off.
	pub fn is_inactive(&self) -> bool {
		self.inactive
	}

	/// Checks the descriptor can be executed.
	///
	/// Inactive descriptors are never executed and always pass.
	pub fn validate(&self) -> Result<(), DescriptorError> {
		if self.inactive {
			return Ok(());
		}
		if self.resources.is_empty() {
			return Err(DescriptorError::NoResource);
		}
		let mut seen = HashSet::with_capacity(self.resources.len());
		for resource in &self.resources {
			resource.check()?;
			if !seen.insert(resource.as_str()) {
				return Err(DescriptorError::DuplicateResource(resource.to_string()));
			}
		}
		if self.projection.trim().is_empty() {
			return Err(DescriptorError::EmptyProjection);
		}
		if self.filters.keys().any(|field| field.trim().is_empty()) {
			return Err(DescriptorError::EmptyFilterField);
		}
		if self.order.as_ref().is_some_and(|o| o.field.trim().is_empty()) {
			return Err(DescriptorError::EmptyOrderField);
		}
		Ok(())
	}

	/// Stable textual form, used in logs.
	pub fn canonical(&self) -> String {
		self.to_string()
	}
}

impl fmt::Display for QueryDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let resources: Vec<&str> = self.resources.iter().map(ResourceName::as_str).collect();
		write!(f, "{} select={}", resources.join("+"), self.projection)?;
		for (field, value) in &self.filters {
			write!(f, " {field}={value}")?;
		}
		if let Some(order) = &self.order {
			write!(f, " order={}:{}", order.field, if order.ascending { "asc" } else { "desc" })?;
		}
		if self.inactive {
			f.write_str(" inactive")?;
		}
		Ok(())
	}
}
