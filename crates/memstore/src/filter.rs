//! Row matching, ordering, and projection.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;
use tavola_query::{Order, SELECT_ALL, Scalar};

use crate::{ID_FIELD, Row};

/// Returns true when `row` satisfies every equality filter.
///
/// A missing field or a null never matches.
pub(crate) fn matches(row: &Row, filters: &BTreeMap<String, Scalar>) -> bool {
	filters
		.iter()
		.all(|(field, expected)| row.get(field).is_some_and(|value| scalar_eq(expected, value)))
}

fn scalar_eq(expected: &Scalar, value: &Value) -> bool {
	match (expected, value) {
		(Scalar::Bool(a), Value::Bool(b)) => a == b,
		(Scalar::Int(a), Value::Number(n)) => n.as_i64() == Some(*a),
		(Scalar::Float(a), Value::Number(n)) => n.as_f64() == Some(*a),
		(Scalar::Text(a), Value::String(b)) => a.as_ref() == b.as_str(),
		_ => false,
	}
}

/// Stable sort by one field. Missing and null values sort last in both
/// directions.
pub(crate) fn sort(rows: &mut [Row], order: &Order) {
	rows.sort_by(|a, b| {
		let a = a.get(&order.field).filter(|v| !v.is_null());
		let b = b.get(&order.field).filter(|v| !v.is_null());
		match (a, b) {
			(None, None) => Ordering::Equal,
			(None, Some(_)) => Ordering::Greater,
			(Some(_), None) => Ordering::Less,
			(Some(a), Some(b)) => {
				let ord = compare_values(a, b);
				if order.ascending { ord } else { ord.reverse() }
			}
		}
	});
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => x
			.as_f64()
			.zip(y.as_f64())
			.and_then(|(x, y)| x.partial_cmp(&y))
			.unwrap_or(Ordering::Equal),
		(Value::String(x), Value::String(y)) => x.cmp(y),
		(Value::Bool(x), Value::Bool(y)) => x.cmp(y),
		_ => type_rank(a).cmp(&type_rank(b)),
	}
}

fn type_rank(value: &Value) -> u8 {
	match value {
		Value::Null => 0,
		Value::Bool(_) => 1,
		Value::Number(_) => 2,
		Value::String(_) => 3,
		Value::Array(_) => 4,
		Value::Object(_) => 5,
	}
}

/// Keeps the projected fields of each row. The id field always survives.
pub(crate) fn project(rows: Vec<Row>, projection: &str) -> Vec<Row> {
	let projection = projection.trim();
	if projection == SELECT_ALL {
		return rows;
	}
	let fields: Vec<&str> = projection.split(',').map(str::trim).filter(|f| !f.is_empty()).collect();
	rows.into_iter()
		.map(|row| {
			row.into_iter()
				.filter(|(key, _)| key == ID_FIELD || fields.contains(&key.as_str()))
				.collect()
		})
		.collect()
}
