// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use relbatch_plan::{
	Error, Expr, MutationSource, Result, TableMeta, TableRef, UpsertNode,
};
use tracing::trace;

use crate::synthesize::{Synthesizer, update::validate_assignments};

impl Synthesizer {
	/// Build an upsert of `source` into `target`.
	///
	/// `insert` maps destination members to expressions over the incoming
	/// row; `update`, when present, may additionally reference the existing
	/// row through the target occurrence. The conflict key is resolved from
	/// the insert columns: the primary key if covered, else the first
	/// covered alternate key.
	pub fn upsert(
		target_ref: TableRef,
		target: &TableMeta,
		source: MutationSource,
		insert: Vec<(String, Expr)>,
		update: Option<Vec<(String, Expr)>>,
	) -> Result<UpsertNode> {
		validate_assignments(&insert, target, "UPSERT")?;
		if let Some(update) = &update {
			validate_assignments(update, target, "UPSERT")?;
			validate_shape_sources(update, &target_ref, &source)?;
		}

		let insert_names: Vec<String> = insert.iter().map(|(member, _)| member.clone()).collect();
		let conflict_key = target.conflict_key_covered_by(&insert_names).ok_or_else(|| Error::NoConflictKey {
			table: target.name.clone(),
		})?;

		trace!(table = %target.name, rows = ?source_rows(&source), "synthesized upsert");
		Ok(UpsertNode {
			target: target_ref,
			source,
			insert_columns: insert,
			conflict_key,
			on_conflict_update: update,
		})
	}
}

/// Update expressions over (existing-row, incoming-row) may only reference
/// the target occurrence and the source occurrence; anything else means the
/// caller handed us a shape we cannot attribute.
pub(crate) fn validate_shape_sources(
	assignments: &[(String, Expr)],
	target: &TableRef,
	source: &MutationSource,
) -> Result<()> {
	for (member, expr) in assignments {
		for referenced in expr.referenced_sources() {
			if referenced != target.id && referenced != source.id() {
				return Err(Error::AmbiguousShape {
					operation: "UPSERT",
					reason: format!("assignment of '{member}' references foreign source {referenced}"),
				});
			}
		}
	}
	Ok(())
}

fn source_rows(source: &MutationSource) -> Option<usize> {
	match source {
		MutationSource::Values(values) => Some(values.row_count()),
		MutationSource::Query {
			..
		} => None,
	}
}
