// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use relbatch_plan::{
	ColumnRef, Error, Expr, MergeNode, MutationSource, Result, ShapeError, TableMeta, TableRef,
};
use tracing::trace;

use crate::synthesize::{Synthesizer, update::validate_assignments, upsert::validate_shape_sources};

impl Synthesizer {
	/// Build a MERGE of `source` into `target`, joined on `keys`.
	///
	/// At least one action must be requested; a merge with neither update,
	/// insert nor delete-unmatched would compile to a statement that can do
	/// nothing.
	pub fn merge(
		target_ref: TableRef,
		target: &TableMeta,
		source: MutationSource,
		keys: &[String],
		insert: Option<Vec<(String, Expr)>>,
		update: Option<Vec<(String, Expr)>>,
		delete_unmatched_by_source: bool,
	) -> Result<MergeNode> {
		if insert.is_none() && update.is_none() && !delete_unmatched_by_source {
			return Err(Error::AmbiguousShape {
				operation: "MERGE",
				reason: "no matched, not-matched or delete action requested".into(),
			});
		}
		if keys.is_empty() {
			return Err(Error::AmbiguousShape {
				operation: "MERGE",
				reason: "empty join key".into(),
			});
		}

		let source_columns = source.column_names();
		let mut on: Option<Expr> = None;
		for key in keys {
			let column = target.column(key).ok_or_else(|| {
				Error::Shape(ShapeError::UnknownMember {
					table: target.name.clone(),
					member: key.clone(),
				})
			})?;
			if !source_columns.iter().any(|name| name == key) {
				return Err(Error::AmbiguousShape {
					operation: "MERGE",
					reason: format!("join key '{key}' is missing from the source columns"),
				});
			}
			let term = Expr::eq(
				Expr::Column(ColumnRef::new(target_ref.id, key, column.ty)),
				Expr::Column(ColumnRef::new(source.id(), key, column.ty)),
			);
			on = Some(Expr::conjoin(on.take(), term));
		}

		if let Some(insert) = &insert {
			validate_assignments(insert, target, "MERGE")?;
		}
		if let Some(update) = &update {
			validate_assignments(update, target, "MERGE")?;
			validate_shape_sources(update, &target_ref, &source)?;
		}

		trace!(table = %target.name, keys = keys.len(), "synthesized merge");
		Ok(MergeNode {
			target: target_ref,
			source,
			on: on.expect("at least one key"),
			matched_update: update,
			not_matched_insert: insert,
			delete_unmatched_by_source,
		})
	}
}

#[cfg(test)]
mod tests {
	use relbatch_plan::{SourceIdGen, Value, ValueType, ValuesColumn, ValuesNode};

	use super::*;
	use crate::synthesize::testutil::rank_cache_meta;

	fn batch(generator: &mut SourceIdGen) -> ValuesNode {
		ValuesNode::literal(
			generator.next(),
			vec![
				ValuesColumn::new("ContestId", ValueType::Int),
				ValuesColumn::new("TeamId", ValueType::Int),
				ValuesColumn::new("PointsPublic", ValueType::Int),
			],
			vec![vec![
				Expr::Constant(Value::Int(1)),
				Expr::Constant(Value::Int(2)),
				Expr::Constant(Value::Int(3)),
			]],
		)
	}

	#[test]
	fn test_merge_builds_key_conjunction() {
		let meta = rank_cache_meta();
		let mut generator = SourceIdGen::new();
		let target = meta.table_ref(generator.next());
		let values = batch(&mut generator);
		let insert = vec![(
			"PointsPublic".to_string(),
			Expr::Column(ColumnRef::new(values.id, "PointsPublic", ValueType::Int)),
		)];

		let node = Synthesizer::merge(
			target,
			&meta,
			MutationSource::Values(values),
			&["ContestId".into(), "TeamId".into()],
			Some(insert),
			None,
			false,
		)
		.unwrap();
		assert_eq!(node.on.conjuncts().len(), 2);
	}

	#[test]
	fn test_merge_requires_an_action() {
		let meta = rank_cache_meta();
		let mut generator = SourceIdGen::new();
		let target = meta.table_ref(generator.next());
		let values = batch(&mut generator);

		assert!(matches!(
			Synthesizer::merge(
				target,
				&meta,
				MutationSource::Values(values),
				&["ContestId".into()],
				None,
				None,
				false
			),
			Err(Error::AmbiguousShape { .. })
		));
	}

	#[test]
	fn test_merge_rejects_unknown_key() {
		let meta = rank_cache_meta();
		let mut generator = SourceIdGen::new();
		let target = meta.table_ref(generator.next());
		let values = batch(&mut generator);

		assert!(matches!(
			Synthesizer::merge(
				target,
				&meta,
				MutationSource::Values(values),
				&["Nope".into()],
				None,
				None,
				true
			),
			Err(Error::Shape(ShapeError::UnknownMember { .. }))
		));
	}

	#[test]
	fn test_merge_rejects_key_missing_from_source() {
		let meta = rank_cache_meta();
		let mut generator = SourceIdGen::new();
		let target = meta.table_ref(generator.next());
		let mut values = batch(&mut generator);
		values.columns.retain(|column| column.name != "TeamId");

		assert!(matches!(
			Synthesizer::merge(
				target,
				&meta,
				MutationSource::Values(values),
				&["ContestId".into(), "TeamId".into()],
				None,
				None,
				true
			),
			Err(Error::AmbiguousShape { .. })
		));
	}
}
