// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use relbatch_plan::{DeleteNode, Error, Result, SelectQuery, ShapeError, TableMeta};
use tracing::trace;

use crate::synthesize::{Synthesizer, reject_row_limit, require_root_entity};

impl Synthesizer {
	/// Wrap a row-shaped plan into a bulk DELETE against `target`.
	///
	/// The plan's root scan must be the target itself with no projection in
	/// between; remaining joins and the filter carry over onto the node.
	pub fn delete(query: SelectQuery, target: &TableMeta) -> Result<DeleteNode> {
		reject_row_limit(&query, "DELETE")?;
		if !query.is_identity_projection() {
			return Err(Error::Shape(ShapeError::NotRootEntity {
				operation: "DELETE",
			}));
		}
		require_root_entity(&query, target, "DELETE")?;

		let mut from = query.from;
		let root = from.remove(0);
		let target_ref = match root.source {
			relbatch_plan::SourceExpr::Table(table) => table,
			_ => unreachable!("require_root_entity checked the root scan"),
		};

		trace!(table = %target_ref.name, joins = root.joins.len(), "synthesized delete");
		Ok(DeleteNode {
			target: target_ref,
			joined: root.joins,
			predicate: query.predicate,
		})
	}
}
