// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use serde::{Deserialize, Serialize};

use crate::{
	expression::Expr,
	table::{SourceId, TableRef},
	values::ValuesNode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
	Inner,
	Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOpKind {
	/// UNION ALL.
	Union,
	/// UNION with duplicate elimination.
	UnionDistinct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
	pub expr: Expr,
	pub descending: bool,
}

/// What a FROM-list slot scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceExpr {
	Table(TableRef),
	Query {
		id: SourceId,
		alias: Option<String>,
		query: Box<SelectQuery>,
	},
	Values(ValuesNode),
}

impl SourceExpr {
	pub fn id(&self) -> SourceId {
		match self {
			SourceExpr::Table(table) => table.id,
			SourceExpr::Query {
				id,
				..
			} => *id,
			SourceExpr::Values(values) => values.id,
		}
	}
}

/// One FROM-list entry together with the joins hanging off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSource {
	pub source: SourceExpr,
	pub joins: Vec<Join>,
}

impl TableSource {
	pub fn table(table: TableRef) -> Self {
		Self {
			source: SourceExpr::Table(table),
			joins: Vec::new(),
		}
	}

	pub fn values(values: ValuesNode) -> Self {
		Self {
			source: SourceExpr::Values(values),
			joins: Vec::new(),
		}
	}

	pub fn query(id: SourceId, alias: Option<String>, query: SelectQuery) -> Self {
		Self {
			source: SourceExpr::Query {
				id,
				alias,
				query: Box::new(query),
			},
			joins: Vec::new(),
		}
	}

	pub fn join(mut self, kind: JoinKind, table: TableSource, condition: Expr) -> Self {
		self.joins.push(Join {
			kind,
			table,
			condition,
		});
		self
	}

	pub fn id(&self) -> SourceId {
		self.source.id()
	}

	/// All occurrence ids reachable from this slot, joins included.
	pub fn source_ids(&self, into: &mut Vec<SourceId>) {
		into.push(self.id());
		for join in &self.joins {
			join.table.source_ids(into);
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
	pub kind: JoinKind,
	pub table: TableSource,
	pub condition: Expr,
}

/// The row-shaped plan produced by the baseline query compiler.
///
/// The FROM list is flat: every entry is a scan with its own join chain,
/// which is the shape the self-join pass walks left to right.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectQuery {
	pub from: Vec<TableSource>,
	/// Ordered (alias, expression) projection. Empty means "all columns of
	/// the root scan", the identity projection.
	pub projection: Vec<(String, Expr)>,
	pub predicate: Option<Expr>,
	pub group_by: Vec<Expr>,
	pub having: Option<Expr>,
	pub order_by: Vec<OrderKey>,
	pub limit: Option<u64>,
	pub offset: Option<u64>,
	pub distinct: bool,
	pub set_op: Option<(SetOpKind, Box<SelectQuery>)>,
	/// One-shot tag: the self-join pass skips this query once, then clears
	/// the tag.
	#[serde(default)]
	pub skip_selfjoin: bool,
}

impl SelectQuery {
	pub fn scan(table: TableRef) -> Self {
		Self {
			from: vec![TableSource::table(table)],
			..Default::default()
		}
	}

	pub fn with_predicate(mut self, predicate: Expr) -> Self {
		self.predicate = Some(predicate);
		self
	}

	pub fn with_projection(mut self, projection: Vec<(String, Expr)>) -> Self {
		self.projection = projection;
		self
	}

	/// The root scan, when the plan starts with a direct table occurrence.
	pub fn root_table(&self) -> Option<&TableRef> {
		match self.from.first().map(|slot| &slot.source) {
			Some(SourceExpr::Table(table)) => Some(table),
			_ => None,
		}
	}

	pub fn has_row_limit(&self) -> bool {
		self.limit.is_some() || self.offset.is_some() || !self.order_by.is_empty()
	}

	/// Identity projection: result rows are the root scan's rows.
	pub fn is_identity_projection(&self) -> bool {
		self.projection.is_empty()
	}

	pub fn source_ids(&self) -> Vec<SourceId> {
		let mut ids = Vec::new();
		for slot in &self.from {
			slot.source_ids(&mut ids);
		}
		ids
	}
}
