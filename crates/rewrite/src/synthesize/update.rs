// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use relbatch_plan::{Error, Expr, Result, SelectQuery, ShapeError, TableMeta, UpdateNode};
use tracing::trace;

use crate::synthesize::{Synthesizer, reject_row_limit, require_root_entity};

impl Synthesizer {
	/// Wrap a row-shaped plan into a bulk UPDATE against `target`.
	///
	/// `set` is the record-construction shape: a flat member → expression
	/// map over the target row. Expressions are preserved verbatim from the
	/// source plan; constants stay constants and parameters stay parameters.
	pub fn update(query: SelectQuery, target: &TableMeta, set: Vec<(String, Expr)>) -> Result<UpdateNode> {
		reject_row_limit(&query, "UPDATE")?;
		require_root_entity(&query, target, "UPDATE")?;
		validate_assignments(&set, target, "UPDATE")?;

		let mut from = query.from;
		let root = from.remove(0);
		let target_ref = match root.source {
			relbatch_plan::SourceExpr::Table(table) => table,
			_ => unreachable!("require_root_entity checked the root scan"),
		};

		trace!(table = %target_ref.name, columns = set.len(), "synthesized update");
		Ok(UpdateNode {
			target: target_ref,
			set,
			joined: root.joins,
			predicate: query.predicate,
		})
	}
}

/// A record-construction shape maps members to flat expressions. Tuples are
/// nested constructors and rejected; unknown members fail rather than being
/// skipped.
pub(crate) fn validate_assignments(
	set: &[(String, Expr)],
	target: &TableMeta,
	operation: &'static str,
) -> Result<()> {
	if set.is_empty() {
		return Err(Error::Shape(ShapeError::NonSimpleProjection {
			operation,
		}));
	}
	for (member, expr) in set {
		if target.column(member).is_none() {
			return Err(Error::Shape(ShapeError::UnknownMember {
				table: target.name.clone(),
				member: member.clone(),
			}));
		}
		if matches!(expr, Expr::Tuple(_)) {
			return Err(Error::Shape(ShapeError::NonSimpleProjection {
				operation,
			}));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use relbatch_plan::SourceIdGen;

	use super::*;
	use crate::synthesize::testutil::{col, item_meta, scan};

	#[test]
	fn test_update_set_preserved_verbatim() {
		let meta = item_meta();
		let mut generator = SourceIdGen::new();
		let (item, query) = scan(&mut generator, &meta, "i");
		let set = vec![("Price".to_string(), Expr::add(col(&item, &meta, "Price"), Expr::constant(1.0)))];

		let node = Synthesizer::update(query, &meta, set.clone()).unwrap();
		assert_eq!(node.set, set);
		assert!(node.predicate.is_none());
	}

	#[test]
	fn test_update_rejects_unknown_member() {
		let meta = item_meta();
		let mut generator = SourceIdGen::new();
		let (_, query) = scan(&mut generator, &meta, "i");
		let set = vec![("Missing".to_string(), Expr::constant(1))];

		let err = Synthesizer::update(query, &meta, set).unwrap_err();
		assert_eq!(
			err,
			Error::Shape(ShapeError::UnknownMember {
				table: "Item".into(),
				member: "Missing".into()
			})
		);
	}

	#[test]
	fn test_update_rejects_nested_constructor() {
		let meta = item_meta();
		let mut generator = SourceIdGen::new();
		let (_, query) = scan(&mut generator, &meta, "i");
		let set = vec![("Price".to_string(), Expr::Tuple(vec![Expr::constant(1)]))];

		assert!(matches!(
			Synthesizer::update(query, &meta, set),
			Err(Error::Shape(ShapeError::NonSimpleProjection { .. }))
		));
	}

	#[test]
	fn test_update_rejects_order_by() {
		let meta = item_meta();
		let mut generator = SourceIdGen::new();
		let (item, mut query) = scan(&mut generator, &meta, "i");
		query.order_by.push(relbatch_plan::OrderKey {
			expr: col(&item, &meta, "ItemId"),
			descending: false,
		});
		let set = vec![("Price".to_string(), Expr::constant(1.0))];

		assert!(matches!(
			Synthesizer::update(query, &meta, set),
			Err(Error::Shape(ShapeError::RowLimit { .. }))
		));
	}

	#[test]
	fn test_update_rejects_empty_set() {
		let meta = item_meta();
		let mut generator = SourceIdGen::new();
		let (_, query) = scan(&mut generator, &meta, "i");

		assert!(matches!(
			Synthesizer::update(query, &meta, vec![]),
			Err(Error::Shape(ShapeError::NonSimpleProjection { .. }))
		));
	}
}
