// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Fallback executor for backing stores that speak no SQL: rows are fully
//! materialized and the five batch operations run as key-indexed equi-joins
//! over in-memory tables.

pub mod eval;
pub mod merge;

use std::sync::Arc;

use relbatch_plan::{Error, Expr, Result, SourceId, TableMeta, Value};
use tracing::trace;

use crate::eval::{RowEnv, eval_predicate};

/// A fully materialized table: the mapping metadata plus its rows, one
/// `Vec<Value>` per row in column order.
#[derive(Debug, Clone)]
pub struct MemTable {
	pub meta: Arc<TableMeta>,
	pub rows: Vec<Vec<Value>>,
}

impl MemTable {
	pub fn new(meta: Arc<TableMeta>) -> Self {
		Self {
			meta,
			rows: Vec::new(),
		}
	}

	pub fn column_index(&self, name: &str) -> Option<usize> {
		self.meta.columns.iter().position(|column| column.name == name)
	}

	pub fn insert_row(&mut self, row: Vec<Value>) -> Result<()> {
		if row.len() != self.meta.columns.len() {
			return Err(Error::Shape(relbatch_plan::ShapeError::ProjectionArity {
				table: self.meta.name.clone(),
				expected: self.meta.columns.len(),
				actual: row.len(),
			}));
		}
		self.rows.push(row);
		Ok(())
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}
}

/// Delete every row matching the predicate; returns the affected count.
pub fn delete_where(table: &mut MemTable, target: SourceId, predicate: Option<&Expr>) -> Result<u64> {
	let columns: Vec<String> = table.meta.columns.iter().map(|column| column.name.clone()).collect();
	let mut kept = Vec::with_capacity(table.rows.len());
	let mut affected = 0u64;
	for row in table.rows.drain(..) {
		let matched = match predicate {
			Some(predicate) => {
				let env = RowEnv::new().bind(target, &columns, &row);
				eval_predicate(predicate, &env)?
			}
			None => true,
		};
		if matched {
			affected += 1;
		} else {
			kept.push(row);
		}
	}
	table.rows = kept;
	trace!(table = %table.meta.name, affected, "in-memory delete");
	Ok(affected)
}

/// Apply the set expressions to every row matching the predicate.
pub fn update_where(
	table: &mut MemTable,
	target: SourceId,
	set: &[(String, Expr)],
	predicate: Option<&Expr>,
) -> Result<u64> {
	let columns: Vec<String> = table.meta.columns.iter().map(|column| column.name.clone()).collect();
	let indices: Vec<usize> = set
		.iter()
		.map(|(member, _)| {
			table.meta.columns.iter().position(|column| &column.name == member).ok_or_else(|| {
				Error::Shape(relbatch_plan::ShapeError::UnknownMember {
					table: table.meta.name.clone(),
					member: member.clone(),
				})
			})
		})
		.collect::<Result<_>>()?;

	let mut affected = 0u64;
	for row in &mut table.rows {
		let matched = match predicate {
			Some(predicate) => {
				let env = RowEnv::new().bind(target, &columns, row);
				eval_predicate(predicate, &env)?
			}
			None => true,
		};
		if !matched {
			continue;
		}
		// evaluate against the pre-update row, then assign
		let updates: Vec<Value> = set
			.iter()
			.map(|(_, expr)| {
				let env = RowEnv::new().bind(target, &columns, row);
				eval::eval(expr, &env)
			})
			.collect::<Result<_>>()?;
		for (&index, value) in indices.iter().zip(updates) {
			row[index] = value;
		}
		affected += 1;
	}
	trace!(table = %table.meta.name, affected, "in-memory update");
	Ok(affected)
}

/// Append rows wholesale; the count is the number of rows.
pub fn insert_rows(table: &mut MemTable, rows: Vec<Vec<Value>>) -> Result<u64> {
	let affected = rows.len() as u64;
	for row in rows {
		table.insert_row(row)?;
	}
	trace!(table = %table.meta.name, affected, "in-memory insert");
	Ok(affected)
}

#[cfg(test)]
mod tests {
	use relbatch_plan::{ColumnMeta, ColumnRef, SourceIdGen, ValueType};

	use super::*;

	fn item_table() -> MemTable {
		let meta = Arc::new(TableMeta::new(
			"Item",
			vec![
				ColumnMeta::new("ItemId", ValueType::Int).primary_key(),
				ColumnMeta::new("Price", ValueType::Float),
			],
		));
		let mut table = MemTable::new(meta);
		for (id, price) in [(498, 3.0), (510, 3.0), (522, 3.0), (530, 4.0)] {
			table.insert_row(vec![Value::Int(id), Value::Float(price)]).unwrap();
		}
		table
	}

	fn col(id: SourceId, name: &str, ty: ValueType) -> Expr {
		Expr::Column(ColumnRef::new(id, name, ty))
	}

	#[test]
	fn test_delete_where_counts_exactly() {
		let mut table = item_table();
		let mut generator = SourceIdGen::new();
		let target = generator.next();
		let predicate = Expr::and(
			Expr::gt(col(target, "ItemId", ValueType::Int), Expr::constant(500)),
			Expr::eq(col(target, "Price", ValueType::Float), Expr::constant(3.0)),
		);

		let affected = delete_where(&mut table, target, Some(&predicate)).unwrap();
		assert_eq!(affected, 2);
		assert_eq!(table.len(), 2);
		assert!(table.rows.iter().all(|row| row[0] == Value::Int(498) || row[0] == Value::Int(530)));
	}

	#[test]
	fn test_update_where_reads_pre_update_row() {
		let mut table = item_table();
		let mut generator = SourceIdGen::new();
		let target = generator.next();
		let set = vec![(
			"Price".to_string(),
			Expr::add(col(target, "Price", ValueType::Float), Expr::constant(1.0)),
		)];

		let affected = update_where(&mut table, target, &set, None).unwrap();
		assert_eq!(affected, 4);
		assert_eq!(table.rows[0][1], Value::Float(4.0));
		assert_eq!(table.rows[3][1], Value::Float(5.0));
	}

	#[test]
	fn test_insert_rejects_arity_mismatch() {
		let mut table = item_table();
		assert!(insert_rows(&mut table, vec![vec![Value::Int(1)]]).is_err());
	}
}
