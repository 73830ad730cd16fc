// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use serde::{Deserialize, Serialize};

use crate::{
	expression::{Expr, Parameter},
	table::SourceId,
	value::ValueType,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuesColumn {
	pub name: String,
	pub ty: ValueType,
}

impl ValuesColumn {
	pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
		Self {
			name: name.into(),
			ty,
		}
	}
}

/// How the row batch is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValuesRows {
	/// Rows carried as expressions, one per cell. Constant cells may be
	/// inlined by the emitter; parameter cells become placeholders.
	Literal(Vec<Vec<Expr>>),
	/// The whole batch behind a single row-major array parameter. A
	/// dialect-driven expansion pass may rewrite this into cell-level
	/// parameters without touching the surrounding plan.
	Parameterized {
		parameter: Parameter,
		row_count: usize,
	},
}

/// An in-memory row batch used as a join or insert source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesNode {
	pub id: SourceId,
	pub alias: Option<String>,
	pub columns: Vec<ValuesColumn>,
	pub rows: ValuesRows,
}

impl ValuesNode {
	pub fn literal(id: SourceId, columns: Vec<ValuesColumn>, rows: Vec<Vec<Expr>>) -> Self {
		Self {
			id,
			alias: None,
			columns,
			rows: ValuesRows::Literal(rows),
		}
	}

	pub fn parameterized(id: SourceId, columns: Vec<ValuesColumn>, parameter: Parameter, row_count: usize) -> Self {
		Self {
			id,
			alias: None,
			columns,
			rows: ValuesRows::Parameterized {
				parameter,
				row_count,
			},
		}
	}

	pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
		self.alias = Some(alias.into());
		self
	}

	pub fn row_count(&self) -> usize {
		match &self.rows {
			ValuesRows::Literal(rows) => rows.len(),
			ValuesRows::Parameterized {
				row_count,
				..
			} => *row_count,
		}
	}

	/// Statically known to produce no rows.
	pub fn is_empty(&self) -> bool {
		self.row_count() == 0
	}

	pub fn column_index(&self, name: &str) -> Option<usize> {
		self.columns.iter().position(|column| column.name == name)
	}
}
