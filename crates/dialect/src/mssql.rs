// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! T-SQL statement forms. Joined DELETE and UPDATE keep their join chains
//! in the FROM clause; upserts render as MERGE (see `render`).

use relbatch_plan::{DeleteNode, Result, UpdateNode};

use crate::render::Renderer;

/// `DELETE [a] FROM [T] AS [a] JOIN ... ON ... WHERE ...`
pub(crate) fn delete(r: &mut Renderer, node: &DeleteNode) -> Result<()> {
	r.push("DELETE ");
	let label = r.label(node.target.id)?;
	r.ident(&label);
	r.push(" FROM ");
	r.table_with_alias(&node.target);
	for join in &node.joined {
		r.join(join)?;
	}
	r.where_clause(&node.predicate)
}

/// `UPDATE [a] SET ... FROM [T] AS [a] JOIN ... WHERE ...`, or the short
/// single-table form when nothing is joined and no alias is in play.
pub(crate) fn update(r: &mut Renderer, node: &UpdateNode) -> Result<()> {
	r.push("UPDATE ");
	if node.joined.is_empty() && node.target.alias.is_none() {
		r.table_name(&node.target);
		r.push(" SET ");
		r.assignments(&node.set)?;
		return r.where_clause(&node.predicate);
	}
	let label = r.label(node.target.id)?;
	r.ident(&label);
	r.push(" SET ");
	r.assignments(&node.set)?;
	r.push(" FROM ");
	r.table_with_alias(&node.target);
	for join in &node.joined {
		r.join(join)?;
	}
	r.where_clause(&node.predicate)
}
