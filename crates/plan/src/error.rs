// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use crate::value::ValueType;

/// The requested mutation cannot be expressed over the given query shape.
///
/// Shape failures are deterministic, pre-execution and never degraded into a
/// partial statement.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
	#[error("{operation} requires the plan to scan the target table directly, without a prior projection")]
	NotRootEntity {
		operation: &'static str,
	},

	#[error("no column mapping for member '{member}' on table '{table}'")]
	UnknownMember {
		table: String,
		member: String,
	},

	#[error("projection produces {actual} columns but target '{table}' maps {expected}")]
	ProjectionArity {
		table: String,
		expected: usize,
		actual: usize,
	},

	#[error("{operation} source must not carry LIMIT, OFFSET or ORDER BY")]
	RowLimit {
		operation: &'static str,
	},

	#[error("{operation} requires a flat column-to-expression projection")]
	NonSimpleProjection {
		operation: &'static str,
	},
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Shape(#[from] ShapeError),

	#[error("no primary or alternate key of '{table}' is covered by the insert columns")]
	NoConflictKey {
		table: String,
	},

	#[error("ambiguous {operation} shape: {reason}")]
	AmbiguousShape {
		operation: &'static str,
		reason: String,
	},

	#[error("{dialect} does not support {feature}")]
	ProviderUnsupported {
		dialect: &'static str,
		feature: String,
	},

	#[error("merge key {key} matched multiple rows on both sides")]
	Cardinality {
		key: String,
	},

	#[error("parameter '{parameter}' carries {actual}, expected {expected}")]
	ParameterBinding {
		parameter: String,
		expected: ValueType,
		actual: String,
	},

	#[error("column '{column}' does not resolve to a table in scope")]
	DanglingColumn {
		column: String,
	},

	#[error("expression is not evaluable in memory: {reason}")]
	NotEvaluable {
		reason: String,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_shape_error_display() {
		let err = Error::Shape(ShapeError::RowLimit {
			operation: "DELETE",
		});
		assert_eq!(err.to_string(), "DELETE source must not carry LIMIT, OFFSET or ORDER BY");
	}

	#[test]
	fn test_provider_unsupported_display() {
		let err = Error::ProviderUnsupported {
			dialect: "sqlite",
			feature: "MERGE".into(),
		};
		assert_eq!(err.to_string(), "sqlite does not support MERGE");
	}

	#[test]
	fn test_parameter_binding_display() {
		let err = Error::ParameterBinding {
			parameter: "rows_0_1".into(),
			expected: ValueType::Int,
			actual: "text".into(),
		};
		assert_eq!(err.to_string(), "parameter 'rows_0_1' carries text, expected int");
	}
}
