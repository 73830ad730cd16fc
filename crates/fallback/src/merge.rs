// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Keyed merge-join over materialized rows: the upsert/merge counterpart of
//! the SQL emitters. Both sides are indexed by the join key; a key that
//! matches more than one row on *both* sides is a cardinality violation and
//! aborts before any row is touched.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use relbatch_plan::{Error, Expr, Result, SourceId, Value};
use tracing::trace;

use crate::{
	MemTable,
	eval::{RowEnv, eval},
};

/// One merge run over a target table and an incoming row set.
pub struct MergeSpec<'a> {
	pub target_id: SourceId,
	pub source_id: SourceId,
	pub key: &'a [String],
	/// Applied to matched target rows; sees (existing row, incoming row).
	pub update: Option<&'a [(String, Expr)]>,
	/// Applied to unmatched source rows; sees the incoming row. Unassigned
	/// target columns become NULL.
	pub insert: Option<&'a [(String, Expr)]>,
	/// Remove target rows with no incoming counterpart.
	pub delete_unmatched: bool,
}

/// Run the merge; returns the affected-row count (updated + inserted +
/// deleted).
pub fn merge_rows(
	target: &mut MemTable,
	source_columns: &[String],
	source_rows: &[Vec<Value>],
	spec: &MergeSpec<'_>,
) -> Result<u64> {
	let target_columns: Vec<String> = target.meta.columns.iter().map(|column| column.name.clone()).collect();
	let target_key: Vec<usize> = key_indices(&target_columns, spec.key)?;
	let source_key: Vec<usize> = key_indices(source_columns, spec.key)?;

	let mut target_index: HashMap<Key, Vec<usize>> = HashMap::new();
	for (position, row) in target.rows.iter().enumerate() {
		target_index.entry(key_of(row, &target_key)).or_default().push(position);
	}
	let mut source_index: HashMap<Key, Vec<usize>> = HashMap::new();
	for (position, row) in source_rows.iter().enumerate() {
		source_index.entry(key_of(row, &source_key)).or_default().push(position);
	}

	// Cardinality is checked for the whole run before anything mutates.
	for (key, sources) in &source_index {
		if sources.len() > 1
			&& target_index.get(key).is_some_and(|targets| targets.len() > 1)
		{
			return Err(Error::Cardinality {
				key: key.0.iter().map(Value::to_string).collect::<Vec<_>>().join(", "),
			});
		}
	}

	let mut affected = 0u64;

	// matched: update existing rows in place
	if let Some(update) = spec.update {
		let update_indices: Vec<usize> = update
			.iter()
			.map(|(member, _)| {
				target_columns.iter().position(|name| name == member).ok_or_else(|| {
					Error::Shape(relbatch_plan::ShapeError::UnknownMember {
						table: target.meta.name.clone(),
						member: member.clone(),
					})
				})
			})
			.collect::<Result<_>>()?;
		for (key, positions) in &target_index {
			let Some(sources) = source_index.get(key) else {
				continue;
			};
			for &target_position in positions {
				let mut updated = false;
				for &source_position in sources {
					let source_row = &source_rows[source_position];
					let new_values: Vec<Value> = update
						.iter()
						.map(|(_, expr)| {
							let env = RowEnv::new()
								.bind(spec.target_id, &target_columns, &target.rows[target_position])
								.bind(spec.source_id, source_columns, source_row);
							eval(expr, &env)
						})
						.collect::<Result<_>>()?;
					for (&column_index, value) in update_indices.iter().zip(new_values) {
						target.rows[target_position][column_index] = value;
					}
					updated = true;
				}
				if updated {
					affected += 1;
				}
			}
		}
	}

	// unmatched source rows: insert
	if let Some(insert) = spec.insert {
		for (key, positions) in &source_index {
			if target_index.contains_key(key) {
				continue;
			}
			for &source_position in positions {
				let source_row = &source_rows[source_position];
				let env = RowEnv::new().bind(spec.source_id, source_columns, source_row);
				let mut row = vec![Value::Null; target_columns.len()];
				for (member, expr) in insert {
					let column_index =
						target_columns.iter().position(|name| name == member).ok_or_else(|| {
							Error::Shape(relbatch_plan::ShapeError::UnknownMember {
								table: target.meta.name.clone(),
								member: member.clone(),
							})
						})?;
					row[column_index] = eval(expr, &env)?;
				}
				target.rows.push(row);
				affected += 1;
			}
		}
	}

	// unmatched target rows: delete. Freshly inserted rows carry source
	// keys, so they survive this sweep by construction.
	if spec.delete_unmatched {
		let mut kept = Vec::with_capacity(target.rows.len());
		for row in target.rows.drain(..) {
			if source_index.contains_key(&key_of(&row, &target_key)) {
				kept.push(row);
			} else {
				affected += 1;
			}
		}
		target.rows = kept;
	}

	trace!(table = %target.meta.name, affected, "in-memory merge");
	Ok(affected)
}

fn key_indices(columns: &[String], key: &[String]) -> Result<Vec<usize>> {
	key.iter()
		.map(|name| {
			columns.iter().position(|column| column == name).ok_or_else(|| Error::AmbiguousShape {
				operation: "MERGE",
				reason: format!("key column '{name}' is missing"),
			})
		})
		.collect()
}

/// Hashable join key. Floats hash by bit pattern (with -0.0 normalized), so
/// NaN keys never match anything, themselves included.
#[derive(Debug, Clone, PartialEq)]
struct Key(Vec<Value>);

impl Eq for Key {}

impl Hash for Key {
	fn hash<H: Hasher>(&self, state: &mut H) {
		for value in &self.0 {
			match value {
				Value::Null => 0u8.hash(state),
				Value::Bool(b) => (1u8, b).hash(state),
				Value::Int(i) => (2u8, i).hash(state),
				Value::Float(f) => {
					let bits = if *f == 0.0 {
						0f64.to_bits()
					} else {
						f.to_bits()
					};
					(3u8, bits).hash(state);
				}
				Value::Text(s) => (4u8, s).hash(state),
				Value::Bytes(b) => (5u8, b).hash(state),
				Value::Array(_) => 6u8.hash(state),
			}
		}
	}
}

fn key_of(row: &[Value], indices: &[usize]) -> Key {
	Key(indices.iter().map(|&index| row[index].clone()).collect())
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use relbatch_plan::{ColumnMeta, ColumnRef, SourceIdGen, TableMeta, ValueType};

	use super::*;

	fn rank_cache() -> MemTable {
		let meta = Arc::new(TableMeta::new(
			"RankCache",
			vec![
				ColumnMeta::new("ContestId", ValueType::Int).primary_key(),
				ColumnMeta::new("TeamId", ValueType::Int).primary_key(),
				ColumnMeta::new("PointsPublic", ValueType::Int),
			],
		));
		let mut table = MemTable::new(meta);
		table.insert_row(vec![Value::Int(1), Value::Int(101), Value::Int(10)]).unwrap();
		table.insert_row(vec![Value::Int(1), Value::Int(102), Value::Int(20)]).unwrap();
		table
	}

	fn source_columns() -> Vec<String> {
		vec!["ContestId".into(), "TeamId".into(), "PointsPublic".into()]
	}

	fn col(id: SourceId, name: &str) -> Expr {
		Expr::Column(ColumnRef::new(id, name, ValueType::Int))
	}

	#[test]
	fn test_upsert_one_insert_one_update() {
		let mut table = rank_cache();
		let mut generator = SourceIdGen::new();
		let target_id = generator.next();
		let source_id = generator.next();

		// one existing key (1, 101), one new key (1, 999)
		let source_rows = vec![
			vec![Value::Int(1), Value::Int(101), Value::Int(5)],
			vec![Value::Int(1), Value::Int(999), Value::Int(7)],
		];
		let key = ["ContestId".to_string(), "TeamId".to_string()];
		let update = [(
			"PointsPublic".to_string(),
			Expr::add(col(target_id, "PointsPublic"), col(source_id, "PointsPublic")),
		)];
		let insert = [
			("ContestId".to_string(), col(source_id, "ContestId")),
			("TeamId".to_string(), col(source_id, "TeamId")),
			("PointsPublic".to_string(), col(source_id, "PointsPublic")),
		];

		let affected = merge_rows(
			&mut table,
			&source_columns(),
			&source_rows,
			&MergeSpec {
				target_id,
				source_id,
				key: &key,
				update: Some(&update),
				insert: Some(&insert),
				delete_unmatched: false,
			},
		)
		.unwrap();

		assert_eq!(affected, 2);
		assert_eq!(table.len(), 3);
		// the pre-existing row was updated in place
		assert_eq!(table.rows[0], vec![Value::Int(1), Value::Int(101), Value::Int(15)]);
		// the untouched row kept its points
		assert_eq!(table.rows[1], vec![Value::Int(1), Value::Int(102), Value::Int(20)]);
		// the new key was inserted
		assert_eq!(table.rows[2], vec![Value::Int(1), Value::Int(999), Value::Int(7)]);
	}

	#[test]
	fn test_cardinality_violation_aborts_before_output() {
		let mut table = rank_cache();
		// duplicate the first key on the target side
		table.insert_row(vec![Value::Int(1), Value::Int(101), Value::Int(30)]).unwrap();
		let before = table.rows.clone();

		let mut generator = SourceIdGen::new();
		let target_id = generator.next();
		let source_id = generator.next();

		// the same key twice on the source side: 2 × 2
		let source_rows = vec![
			vec![Value::Int(1), Value::Int(101), Value::Int(1)],
			vec![Value::Int(1), Value::Int(101), Value::Int(2)],
		];
		let key = ["ContestId".to_string(), "TeamId".to_string()];
		let update = [("PointsPublic".to_string(), col(source_id, "PointsPublic"))];

		let err = merge_rows(
			&mut table,
			&source_columns(),
			&source_rows,
			&MergeSpec {
				target_id,
				source_id,
				key: &key,
				update: Some(&update),
				insert: None,
				delete_unmatched: false,
			},
		)
		.unwrap_err();

		assert!(matches!(err, Error::Cardinality { .. }));
		assert_eq!(table.rows, before);
	}

	#[test]
	fn test_delete_unmatched_by_source() {
		let mut table = rank_cache();
		let mut generator = SourceIdGen::new();
		let target_id = generator.next();
		let source_id = generator.next();

		let source_rows = vec![vec![Value::Int(1), Value::Int(101), Value::Int(99)]];
		let key = ["ContestId".to_string(), "TeamId".to_string()];
		let update = [("PointsPublic".to_string(), col(source_id, "PointsPublic"))];

		let affected = merge_rows(
			&mut table,
			&source_columns(),
			&source_rows,
			&MergeSpec {
				target_id,
				source_id,
				key: &key,
				update: Some(&update),
				insert: None,
				delete_unmatched: true,
			},
		)
		.unwrap();

		// one update + one delete
		assert_eq!(affected, 2);
		assert_eq!(table.len(), 1);
		assert_eq!(table.rows[0], vec![Value::Int(1), Value::Int(101), Value::Int(99)]);
	}

	#[test]
	fn test_one_to_many_is_not_a_violation() {
		let mut table = rank_cache();
		let mut generator = SourceIdGen::new();
		let target_id = generator.next();
		let source_id = generator.next();

		// same key twice on the source side only: 1 × 2, allowed
		let source_rows = vec![
			vec![Value::Int(1), Value::Int(101), Value::Int(1)],
			vec![Value::Int(1), Value::Int(101), Value::Int(2)],
		];
		let key = ["ContestId".to_string(), "TeamId".to_string()];
		let update = [(
			"PointsPublic".to_string(),
			Expr::add(col(target_id, "PointsPublic"), col(source_id, "PointsPublic")),
		)];

		let affected = merge_rows(
			&mut table,
			&source_columns(),
			&source_rows,
			&MergeSpec {
				target_id,
				source_id,
				key: &key,
				update: Some(&update),
				insert: None,
				delete_unmatched: false,
			},
		)
		.unwrap();

		assert_eq!(affected, 1);
		// both source rows applied in order: 10 + 1 + 2
		assert_eq!(table.rows[0][2], Value::Int(13));
	}
}
