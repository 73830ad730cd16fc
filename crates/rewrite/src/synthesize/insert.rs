// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use relbatch_plan::{Error, InsertSelectNode, Result, SelectQuery, ShapeError, SourceIdGen, TableMeta};
use tracing::trace;

use crate::synthesize::Synthesizer;

impl Synthesizer {
	/// Wrap a row-shaped plan into INSERT INTO `target` ... SELECT.
	///
	/// The source projection is remapped positionally onto the target's
	/// ordered column list; the destination column names replace the
	/// source-side aliases. A count mismatch is a translation failure, never
	/// a best-effort partial insert.
	pub fn insert_select(
		query: SelectQuery,
		target: &TableMeta,
		generator: &mut SourceIdGen,
	) -> Result<InsertSelectNode> {
		if query.projection.is_empty() {
			return Err(Error::Shape(ShapeError::NonSimpleProjection {
				operation: "INSERT",
			}));
		}
		if query.projection.len() != target.columns.len() {
			return Err(Error::Shape(ShapeError::ProjectionArity {
				table: target.name.clone(),
				expected: target.columns.len(),
				actual: query.projection.len(),
			}));
		}

		let mut source = query;
		for (slot, column) in source.projection.iter_mut().zip(&target.columns) {
			slot.0 = column.name.clone();
		}
		let columns = target.columns.iter().map(|column| column.name.clone()).collect();

		trace!(table = %target.name, "synthesized insert-from-select");
		Ok(InsertSelectNode {
			target: target.table_ref(generator.next()),
			columns,
			source,
		})
	}
}

#[cfg(test)]
mod tests {
	use relbatch_plan::Expr;

	use super::*;
	use crate::synthesize::testutil::{col, item_meta, scan};

	#[test]
	fn test_insert_remaps_aliases_positionally() {
		let meta = item_meta();
		let mut generator = SourceIdGen::new();
		let (item, query) = scan(&mut generator, &meta, "i");
		let query = query.with_projection(vec![
			("a".into(), col(&item, &meta, "ItemId")),
			("b".into(), col(&item, &meta, "Name")),
			("c".into(), Expr::constant(0.0)),
		]);

		let node = Synthesizer::insert_select(query, &meta, &mut generator).unwrap();
		let aliases: Vec<&str> = node.source.projection.iter().map(|(alias, _)| alias.as_str()).collect();
		assert_eq!(aliases, ["ItemId", "Name", "Price"]);
		assert_eq!(node.columns, ["ItemId", "Name", "Price"]);
	}

	#[test]
	fn test_insert_rejects_arity_mismatch() {
		let meta = item_meta();
		let mut generator = SourceIdGen::new();
		let (item, query) = scan(&mut generator, &meta, "i");
		let query = query.with_projection(vec![("a".into(), col(&item, &meta, "ItemId"))]);

		let err = Synthesizer::insert_select(query, &meta, &mut generator).unwrap_err();
		assert_eq!(
			err,
			Error::Shape(ShapeError::ProjectionArity {
				table: "Item".into(),
				expected: 3,
				actual: 1
			})
		);
	}

	#[test]
	fn test_insert_rejects_identity_projection() {
		let meta = item_meta();
		let mut generator = SourceIdGen::new();
		let (_, query) = scan(&mut generator, &meta, "i");

		assert!(matches!(
			Synthesizer::insert_select(query, &meta, &mut generator),
			Err(Error::Shape(ShapeError::NonSimpleProjection { .. }))
		));
	}
}
