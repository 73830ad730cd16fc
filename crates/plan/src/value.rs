// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Declared type of a column or bind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
	Bool,
	Int,
	Float,
	Text,
	Bytes,
	/// Array-typed bind parameter payload; elements share one scalar type.
	Array,
}

impl Display for ValueType {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			ValueType::Bool => f.write_str("bool"),
			ValueType::Int => f.write_str("int"),
			ValueType::Float => f.write_str("float"),
			ValueType::Text => f.write_str("text"),
			ValueType::Bytes => f.write_str("bytes"),
			ValueType::Array => f.write_str("array"),
		}
	}
}

/// Runtime value of a constant or a bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Text(String),
	Bytes(Vec<u8>),
	Array(Vec<Value>),
}

impl Value {
	pub fn ty(&self) -> Option<ValueType> {
		match self {
			Value::Null => None,
			Value::Bool(_) => Some(ValueType::Bool),
			Value::Int(_) => Some(ValueType::Int),
			Value::Float(_) => Some(ValueType::Float),
			Value::Text(_) => Some(ValueType::Text),
			Value::Bytes(_) => Some(ValueType::Bytes),
			Value::Array(_) => Some(ValueType::Array),
		}
	}

	/// Whether this value is assignable to a slot of the given declared type.
	///
	/// `Null` is assignable everywhere; nullability is the mapping layer's
	/// concern, not the parameter binder's. Ints widen to float slots.
	pub fn matches(&self, ty: ValueType) -> bool {
		match (self, ty) {
			(Value::Null, _) => true,
			(Value::Int(_), ValueType::Float) => true,
			(Value::Array(items), ValueType::Array) => {
				items.iter().all(|item| !matches!(item, Value::Array(_)))
			}
			_ => self.ty() == Some(ty),
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Value::Null => f.write_str("null"),
			Value::Bool(v) => write!(f, "{v}"),
			Value::Int(v) => write!(f, "{v}"),
			Value::Float(v) => {
				let s = v.to_string();
				if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
					f.write_str(&s)
				} else {
					write!(f, "{s}.0")
				}
			}
			Value::Text(v) => write!(f, "'{v}'"),
			Value::Bytes(v) => write!(f, "0x{}", v.iter().map(|b| format!("{b:02x}")).collect::<String>()),
			Value::Array(items) => {
				f.write_str("[")?;
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str("]")
			}
		}
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Float(v)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Text(v.to_string())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Text(v)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_float_display_keeps_fraction() {
		assert_eq!(Value::Float(3.0).to_string(), "3.0");
		assert_eq!(Value::Float(2.5).to_string(), "2.5");
	}

	#[test]
	fn test_matches_widens_int_to_float() {
		assert!(Value::Int(1).matches(ValueType::Float));
		assert!(!Value::Float(1.0).matches(ValueType::Int));
		assert!(Value::Null.matches(ValueType::Text));
	}

	#[test]
	fn test_matches_rejects_nested_arrays() {
		let flat = Value::Array(vec![Value::Int(1), Value::Int(2)]);
		assert!(flat.matches(ValueType::Array));

		let nested = Value::Array(vec![Value::Array(vec![Value::Int(1)])]);
		assert!(!nested.matches(ValueType::Array));
	}
}
