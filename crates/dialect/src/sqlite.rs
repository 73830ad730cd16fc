// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! SQLite statement forms. There is no joined DELETE; inner-joined sources
//! fold into a correlated EXISTS. UPDATE uses the expanded FROM form and
//! upsert the native `ON CONFLICT` clause (see `render`).

use relbatch_plan::{DeleteNode, Error, Expr, JoinKind, Result, SourceExpr};

use crate::render::Renderer;

/// `DELETE FROM "T" AS "t" WHERE EXISTS (SELECT 1 FROM "S" AS "s" WHERE
/// join_cond AND pred)`. The whole predicate moves inside the EXISTS so
/// references to the joined sources stay resolvable.
pub(crate) fn delete(r: &mut Renderer, node: &DeleteNode) -> Result<()> {
	r.push("DELETE FROM ");
	r.table_with_alias(&node.target);

	if node.joined.is_empty() {
		return r.where_clause(&node.predicate);
	}

	let mut condition = node.predicate.clone();
	let mut sources = Vec::new();
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
		condition = Some(Expr::conjoin(condition.take(), join.condition));
		sources.push(join.table.source);
	}

	r.push(" WHERE EXISTS (SELECT 1 FROM ");
	for (index, source) in sources.iter().enumerate() {
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
	if let Some(condition) = &condition {
		r.push(" WHERE ");
		r.expr(condition, 0)?;
	}
	r.push(")");
	Ok(())
}
