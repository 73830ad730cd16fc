// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! PostgreSQL statement forms. DELETE drives joins through USING; UPDATE
//! uses the expanded FROM form (see `render::update_expanded`); upsert is
//! native `ON CONFLICT`; MERGE is native but has no NOT MATCHED BY SOURCE.

use relbatch_plan::{DeleteNode, Error, JoinKind, Result, SourceExpr};

use crate::render::Renderer;

/// `DELETE FROM "T" AS "a" USING "S" AS "s" WHERE join_cond AND pred`
pub(crate) fn delete(r: &mut Renderer, node: &DeleteNode) -> Result<()> {
	r.push("DELETE FROM ");
	r.table_with_alias(&node.target);

	// USING has plain comma semantics, so the join conditions move into
	// WHERE. A LEFT join has no equivalent there.
	let mut predicate = node.predicate.clone();
	let mut using = Vec::new();
	let mut queue: std::collections::VecDeque<_> = node.joined.iter().cloned().collect();
	while let Some(mut join) = queue.pop_front() {
		if join.kind == JoinKind::Left {
			return Err(Error::ProviderUnsupported {
				dialect: r.dialect.name(),
				feature: "LEFT JOIN in DELETE".into(),
			});
		}
		for nested in std::mem::take(&mut join.table.joins) {
			queue.push_back(nested);
		}
		predicate = Some(relbatch_plan::Expr::conjoin(predicate.take(), join.condition));
		using.push(join.table.source);
	}
	if !using.is_empty() {
		r.push(" USING ");
		for (index, source) in using.iter().enumerate() {
			if index > 0 {
				r.push(", ");
			}
			match source {
				SourceExpr::Table(table) => r.table_with_alias(table),
				SourceExpr::Query {
					id,
					query,
					..
				} => {
					r.push("(");
					r.select(query)?;
					r.push(") AS ");
					let label = r.label(*id)?;
					r.ident(&label);
				}
				SourceExpr::Values(values) => r.values_table(values)?,
			}
		}
	}
	r.where_clause(&predicate)
}
