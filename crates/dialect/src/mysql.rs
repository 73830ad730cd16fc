// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! MySQL statement forms. Multi-table DELETE and UPDATE keep the join
//! syntax; upsert is `ON DUPLICATE KEY UPDATE`, where the incoming row is
//! addressed through `VALUES(col)` and the existing row unqualified.

use relbatch_plan::{DeleteNode, Result, UpdateNode, UpsertNode};

use crate::render::{Incoming, Renderer};

/// `DELETE `a` FROM `T` AS `a` JOIN ... ON ... WHERE ...`
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

/// `UPDATE `T` AS `a` JOIN `S` AS `s` ON ... SET ... WHERE ...`
pub(crate) fn update(r: &mut Renderer, node: &UpdateNode) -> Result<()> {
	r.push("UPDATE ");
	r.table_with_alias(&node.target);
	for join in &node.joined {
		r.join(join)?;
	}
	r.push(" SET ");
	r.assignments(&node.set)?;
	r.where_clause(&node.predicate)
}

/// `INSERT INTO t (...) VALUES (...) ON DUPLICATE KEY UPDATE col = ...`
///
/// The duplicate-key clause fires on whatever unique key collides; the
/// engine only routes upserts here when the resolved conflict key is the
/// primary key, so the two coincide.
pub(crate) fn upsert(r: &mut Renderer, node: &UpsertNode) -> Result<()> {
	r.push("INSERT INTO ");
	r.table_name(&node.target);
	r.push(" (");
	let members: Vec<String> = node.insert_columns.iter().map(|(member, _)| member.clone()).collect();
	r.comma_idents(&members);
	r.push(") ");
	r.upsert_source(node)?;
	match &node.on_conflict_update {
		Some(update) => {
			r.push(" ON DUPLICATE KEY UPDATE ");
			r.set_incoming(node.source.id(), Incoming::ValuesFn);
			r.set_unqualified(node.target.id);
			r.assignments(update)?;
			r.clear_incoming();
			r.clear_unqualified();
		}
		None => {
			// MySQL has no DO NOTHING; assigning a key column to itself is
			// the conventional no-op arm.
			let first_key = &node.conflict_key[0];
			r.push(" ON DUPLICATE KEY UPDATE ");
			r.ident(first_key);
			r.push(" = ");
			r.ident(first_key);
		}
	}
	Ok(())
}
