// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Converts a row-shaped plan into one mutation node per operation kind,
//! validating shape preconditions before anything is emitted. A query that
//! cannot carry the requested mutation fails here with a [`ShapeError`];
//! nothing is ever silently dropped or partially translated.

mod delete;
mod insert;
mod merge;
mod update;
mod upsert;

use relbatch_plan::{Error, Result, SelectQuery, ShapeError, TableMeta};

/// Associated-function namespace for the per-operation wrappers.
pub struct Synthesizer;

/// Shared precondition: the plan must scan the target table directly, with
/// nothing between the scan and the statement root that would change which
/// rows the mutation sees.
pub(crate) fn require_root_entity(
	query: &SelectQuery,
	target: &TableMeta,
	operation: &'static str,
) -> Result<()> {
	let not_root = || {
		Error::Shape(ShapeError::NotRootEntity {
			operation,
		})
	};

	if query.from.len() != 1
		|| query.distinct
		|| !query.group_by.is_empty()
		|| query.having.is_some()
		|| query.set_op.is_some()
	{
		return Err(not_root());
	}
	let root = query.root_table().ok_or_else(not_root)?;
	if root.name != target.name || root.schema != target.schema {
		return Err(not_root());
	}
	Ok(())
}

/// Row-limiting clauses on a delete/update source are rejected outright: no
/// dialect here supports scoped mutation, and dropping the clause would
/// change which rows are affected.
pub(crate) fn reject_row_limit(query: &SelectQuery, operation: &'static str) -> Result<()> {
	if query.has_row_limit() {
		return Err(Error::Shape(ShapeError::RowLimit {
			operation,
		}));
	}
	Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
	use relbatch_plan::{ColumnMeta, ColumnRef, Expr, SourceIdGen, TableMeta, TableRef, ValueType};

	pub fn item_meta() -> TableMeta {
		TableMeta::new(
			"Item",
			vec![
				ColumnMeta::new("ItemId", ValueType::Int).primary_key(),
				ColumnMeta::new("Name", ValueType::Text).nullable(),
				ColumnMeta::new("Price", ValueType::Float),
			],
		)
	}

	pub fn rank_cache_meta() -> TableMeta {
		TableMeta::new(
			"RankCache",
			vec![
				ColumnMeta::new("ContestId", ValueType::Int).primary_key(),
				ColumnMeta::new("TeamId", ValueType::Int).primary_key(),
				ColumnMeta::new("PointsPublic", ValueType::Int),
			],
		)
	}

	pub fn scan(generator: &mut SourceIdGen, meta: &TableMeta, alias: &str) -> (TableRef, relbatch_plan::SelectQuery) {
		let table = meta.table_ref(generator.next()).with_alias(alias);
		let query = relbatch_plan::SelectQuery::scan(table.clone());
		(table, query)
	}

	pub fn col(table: &TableRef, meta: &TableMeta, name: &str) -> Expr {
		let column = meta.column(name).expect("column");
		let mut reference = ColumnRef::new(table.id, name, column.ty);
		if column.nullable {
			reference = reference.nullable();
		}
		Expr::Column(reference)
	}
}
