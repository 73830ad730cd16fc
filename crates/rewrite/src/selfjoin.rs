// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Self-join elimination.
//!
//! Mapping several logical sub-objects onto one physical table makes the
//! baseline compiler join that table against itself once per sub-object.
//! This pass removes a join when the join predicate equates exactly the
//! table's primary-key columns between the two occurrences, which makes the
//! join an identity join. The test is precise and conservative: any
//! non-equality operator, OR, non-column operand, extra or missing key
//! column, or occurrence we cannot attribute keeps the join in place.

use std::collections::{BTreeSet, HashMap};

use relbatch_plan::{
	BinaryOp, ColumnRef, ColumnRewriter, Expr, Join, JoinKind, MergeNode, MetaRegistry, MutationSource,
	SelectQuery, SetOpKind, SourceExpr, SourceId, Statement, TableRef, TableSource, UpsertNode,
};
use tracing::{debug, instrument};

/// Run the pass over a whole statement, select sources included.
#[instrument(level = "trace", skip(statement, metas))]
pub fn optimize_statement(statement: Statement, metas: &MetaRegistry) -> Statement {
	match statement {
		Statement::Select(query) => Statement::Select(optimize_query(query, metas)),
		Statement::Delete(node) => {
			let scope = SelectQuery {
				from: vec![TableSource {
					source: SourceExpr::Table(node.target.clone()),
					joins: node.joined,
				}],
				predicate: node.predicate,
				..Default::default()
			};
			let mut scope = optimize_query(scope, metas);
			let root = scope.from.remove(0);
			Statement::Delete(relbatch_plan::DeleteNode {
				target: node.target,
				joined: root.joins,
				predicate: scope.predicate,
			})
		}
		Statement::Update(node) => {
			let scope = SelectQuery {
				from: vec![TableSource {
					source: SourceExpr::Table(node.target.clone()),
					joins: node.joined,
				}],
				projection: node.set,
				predicate: node.predicate,
				..Default::default()
			};
			let mut scope = optimize_query(scope, metas);
			let root = scope.from.remove(0);
			Statement::Update(relbatch_plan::UpdateNode {
				target: node.target,
				set: scope.projection,
				joined: root.joins,
				predicate: scope.predicate,
			})
		}
		Statement::InsertSelect(node) => Statement::InsertSelect(relbatch_plan::InsertSelectNode {
			target: node.target,
			columns: node.columns,
			source: optimize_query(node.source, metas),
		}),
		Statement::Upsert(node) => {
			let source = optimize_source(node.source, metas);
			Statement::Upsert(UpsertNode {
				source,
				target: node.target,
				insert_columns: node.insert_columns,
				conflict_key: node.conflict_key,
				on_conflict_update: node.on_conflict_update,
			})
		}
		Statement::Merge(node) => {
			let source = optimize_source(node.source, metas);
			Statement::Merge(MergeNode {
				source,
				target: node.target,
				on: node.on,
				matched_update: node.matched_update,
				not_matched_insert: node.not_matched_insert,
				delete_unmatched_by_source: node.delete_unmatched_by_source,
			})
		}
	}
}

fn optimize_source(source: MutationSource, metas: &MetaRegistry) -> MutationSource {
	match source {
		MutationSource::Query {
			id,
			alias,
			query,
		} => MutationSource::Query {
			id,
			alias,
			query: Box::new(optimize_query(*query, metas)),
		},
		values => values,
	}
}

/// Optimize one select scope, bottom-up.
pub fn optimize_query(mut query: SelectQuery, metas: &MetaRegistry) -> SelectQuery {
	// Plan-level suppression tag: skip this scope once, then clear.
	if query.skip_selfjoin {
		query.skip_selfjoin = false;
		return query;
	}

	// Children first, so a sub-select that reduces to a plain filtered scan
	// can still be merged by the scan below.
	query.from = query.from.into_iter().map(|slot| optimize_table_source(slot, metas)).collect();
	if let Some((kind, right)) = query.set_op.take() {
		query.set_op = Some((kind, Box::new(optimize_query(*right, metas))));
	}

	loop {
		let Some(action) = find_elimination(&query, metas) else {
			break;
		};
		query = apply_elimination(query, action);
	}

	collapse_union(query, metas)
}

fn optimize_table_source(mut slot: TableSource, metas: &MetaRegistry) -> TableSource {
	slot.source = match slot.source {
		SourceExpr::Query {
			id,
			alias,
			query,
		} => SourceExpr::Query {
			id,
			alias,
			query: Box::new(optimize_query(*query, metas)),
		},
		other => other,
	};
	slot.joins = slot
		.joins
		.into_iter()
		.map(|mut join| {
			join.table = optimize_table_source(join.table, metas);
			join
		})
		.collect();
	slot
}

// ── Union collapse ──────────────────────────────────────────────────────

/// A UNION (distinct) of two single-table scans of the same physical table
/// with identical projections collapses to one scan whose predicate is the
/// OR of the branch predicates. Exactness requires the projection to carry
/// the full primary key, otherwise the union's duplicate elimination could
/// observably differ and the branch is left alone.
fn collapse_union(query: SelectQuery, metas: &MetaRegistry) -> SelectQuery {
	let Some((SetOpKind::UnionDistinct, right)) = &query.set_op else {
		return query;
	};
	if !is_plain_scan(&query) || !is_plain_scan(right) || right.set_op.is_some() {
		return query;
	}
	let (Some(left_table), Some(right_table)) = (query.root_table(), right.root_table()) else {
		return query;
	};
	if !left_table.same_table(right_table) {
		return query;
	}
	let Some(meta) = metas.get_for(left_table) else {
		return query;
	};
	let key = meta.primary_key();
	if key.is_empty() {
		return query;
	}
	let covers_key = key.iter().all(|k| {
		query.projection.iter().any(
			|(_, expr)| matches!(expr, Expr::Column(c) if c.source == left_table.id && c.name == *k),
		)
	});
	if !covers_key {
		return query;
	}

	let rewriter = ColumnRewriter::redirect(right_table.id, left_table.id);
	let right_projection = rewriter.pairs(&right.projection).into_value(&right.projection);
	if right_projection != query.projection {
		return query;
	}

	let merged_predicate = match (&query.predicate, &right.predicate) {
		(Some(left_predicate), Some(right_predicate)) => {
			let right_predicate = rewriter.expr(right_predicate).into_value(right_predicate);
			Some(Expr::or(left_predicate.clone(), right_predicate))
		}
		// One branch selects every row, so the union does too.
		_ => None,
	};

	debug!(table = %left_table.name, "collapsed union of self-scans");
	let mut merged = query;
	merged.set_op = None;
	merged.predicate = merged_predicate;
	merged
}

fn is_plain_scan(query: &SelectQuery) -> bool {
	query.from.len() == 1
		&& query.from[0].joins.is_empty()
		&& matches!(query.from[0].source, SourceExpr::Table(_))
		&& !query.distinct
		&& query.group_by.is_empty()
		&& query.having.is_none()
		&& query.order_by.is_empty()
		&& query.limit.is_none()
		&& query.offset.is_none()
}

// ── Join elimination ────────────────────────────────────────────────────

enum Redirection {
	/// Joined occurrence was a direct table: redirect by column name.
	Occurrence {
		from: SourceId,
		to: SourceId,
	},
	/// Joined occurrence was a sub-select: replace its projected aliases
	/// with expressions over the anchor.
	Projection {
		from: SourceId,
		map: HashMap<String, Expr>,
	},
}

struct Elimination {
	slot: usize,
	path: Vec<usize>,
	redirection: Redirection,
	/// Sub-select predicate to conjoin into the outer scope (inner joins).
	extra_predicate: Option<Expr>,
}

fn find_elimination(query: &SelectQuery, metas: &MetaRegistry) -> Option<Elimination> {
	for (slot_index, slot) in query.from.iter().enumerate() {
		let mut anchors: Vec<TableRef> = Vec::new();
		// Occurrences from earlier slots are anchors for this one too.
		for earlier in &query.from[..slot_index] {
			collect_tables(earlier, &mut anchors);
		}
		if let SourceExpr::Table(table) = &slot.source {
			anchors.push(table.clone());
		}
		if let Some(found) = scan_joins(&slot.joins, slot_index, &mut Vec::new(), &mut anchors, metas) {
			return Some(found);
		}
	}
	None
}

fn collect_tables(slot: &TableSource, into: &mut Vec<TableRef>) {
	if let SourceExpr::Table(table) = &slot.source {
		into.push(table.clone());
	}
	for join in &slot.joins {
		collect_tables(&join.table, into);
	}
}

fn scan_joins(
	joins: &[Join],
	slot: usize,
	path: &mut Vec<usize>,
	anchors: &mut Vec<TableRef>,
	metas: &MetaRegistry,
) -> Option<Elimination> {
	for (index, join) in joins.iter().enumerate() {
		path.push(index);
		for anchor in anchors.iter() {
			if let Some(found) = try_eliminate(join, anchor, slot, path, metas) {
				path.pop();
				return Some(found);
			}
		}
		// Survivors become anchors for the joins to their right.
		if let SourceExpr::Table(table) = &join.table.source {
			anchors.push(table.clone());
		}
		if let Some(found) = scan_joins(&join.table.joins, slot, path, anchors, metas) {
			path.pop();
			return Some(found);
		}
		path.pop();
	}
	None
}

fn try_eliminate(
	join: &Join,
	anchor: &TableRef,
	slot: usize,
	path: &[usize],
	metas: &MetaRegistry,
) -> Option<Elimination> {
	let meta = metas.get_for(anchor)?;
	let key: BTreeSet<String> = meta.primary_key().into_iter().map(str::to_string).collect();
	if key.is_empty() {
		return None;
	}

	match &join.table.source {
		SourceExpr::Table(joined) => {
			// A joined table with its own join chain is not an identity
			// occurrence of the anchor.
			if !join.table.joins.is_empty() || !joined.same_table(anchor) {
				return None;
			}
			let equated =
				key_equalities(&join.condition, anchor.id, joined.id, |column| Some(column.name.clone()))?;
			if equated != key {
				return None;
			}
			debug!(table = %anchor.name, removed = %joined.id, kept = %anchor.id, "eliminated self-join");
			Some(Elimination {
				slot,
				path: path.to_vec(),
				redirection: Redirection::Occurrence {
					from: joined.id,
					to: anchor.id,
				},
				extra_predicate: None,
			})
		}
		SourceExpr::Query {
			id,
			query: sub,
			..
		} => {
			let inner = single_table_subselect(sub)?;
			if !inner.same_table(anchor) {
				return None;
			}
			// A filtered left-joined sub-scope is not an identity join for
			// rows the filter drops; skip rather than guess.
			if join.kind == JoinKind::Left && sub.predicate.is_some() {
				return None;
			}

			// Resolve projected aliases back to real column names.
			let resolve = |column: &ColumnRef| -> Option<String> {
				if sub.projection.is_empty() {
					return Some(column.name.clone());
				}
				match sub.projection.iter().find(|(alias, _)| *alias == column.name)? {
					(_, Expr::Column(underlying)) if underlying.source == inner.id => {
						Some(underlying.name.clone())
					}
					_ => None,
				}
			};
			let equated = key_equalities(&join.condition, anchor.id, *id, resolve)?;
			if equated != key {
				return None;
			}

			let to_anchor = ColumnRewriter::redirect(inner.id, anchor.id);
			let redirection = if sub.projection.is_empty() {
				Redirection::Occurrence {
					from: *id,
					to: anchor.id,
				}
			} else {
				let mut map = HashMap::new();
				for (alias, expr) in &sub.projection {
					match expr {
						Expr::Column(column) if column.source == inner.id => {
							map.insert(
								alias.clone(),
								Expr::Column(column.redirected(anchor.id)),
							);
						}
						// Anything beyond a plain column pushdown is out of
						// this pass's precise test.
						_ => return None,
					}
				}
				Redirection::Projection {
					from: *id,
					map,
				}
			};
			let extra_predicate =
				sub.predicate.as_ref().map(|predicate| to_anchor.expr(predicate).into_value(predicate));

			debug!(table = %anchor.name, removed = %id, kept = %anchor.id, "eliminated self-join sub-select");
			Some(Elimination {
				slot,
				path: path.to_vec(),
				redirection,
				extra_predicate,
			})
		}
		SourceExpr::Values(_) => None,
	}
}

/// Extract the join condition as a conjunction of column-to-column
/// equalities between the anchor and the joined occurrence. Returns the set
/// of equated column names, or `None` when any term falls outside that
/// exact shape.
fn key_equalities(
	condition: &Expr,
	anchor: SourceId,
	joined: SourceId,
	resolve_joined: impl Fn(&ColumnRef) -> Option<String>,
) -> Option<BTreeSet<String>> {
	let mut names = BTreeSet::new();
	for term in condition.conjuncts() {
		let Expr::BinaryOp {
			left,
			op: BinaryOp::Eq,
			right,
		} = term
		else {
			return None;
		};
		let (Expr::Column(a), Expr::Column(b)) = (left.as_ref(), right.as_ref()) else {
			return None;
		};
		let (anchor_column, joined_column) = if a.source == anchor && b.source == joined {
			(a, b)
		} else if b.source == anchor && a.source == joined {
			(b, a)
		} else {
			return None;
		};
		let joined_name = resolve_joined(joined_column)?;
		if anchor_column.name != joined_name {
			return None;
		}
		names.insert(joined_name);
	}
	Some(names)
}

fn apply_elimination(mut query: SelectQuery, action: Elimination) -> SelectQuery {
	remove_join(&mut query.from[action.slot], &action.path);

	let rewriter = match action.redirection {
		Redirection::Occurrence {
			from,
			to,
		} => ColumnRewriter::redirect(from, to),
		Redirection::Projection {
			from,
			map,
		} => ColumnRewriter::substitute(from, map),
	};
	let mut query = rewriter.select(&query).into_value(&query);
	if let Some(extra) = action.extra_predicate {
		query.predicate = Some(Expr::conjoin(query.predicate.take(), extra));
	}
	query
}

fn remove_join(slot: &mut TableSource, path: &[usize]) {
	match path {
		[index] => {
			slot.joins.remove(*index);
		}
		[index, rest @ ..] => remove_join(&mut slot.joins[*index].table, rest),
		[] => unreachable!("elimination path is never empty"),
	}
}

/// The sub-select shapes this pass can see through: a single direct table
/// scan with an optional filter and an optional flat projection.
fn single_table_subselect(sub: &SelectQuery) -> Option<&TableRef> {
	if sub.from.len() != 1
		|| !sub.from[0].joins.is_empty()
		|| sub.distinct
		|| !sub.group_by.is_empty()
		|| sub.having.is_some()
		|| !sub.order_by.is_empty()
		|| sub.limit.is_some()
		|| sub.offset.is_some()
		|| sub.set_op.is_some()
	{
		return None;
	}
	match &sub.from[0].source {
		SourceExpr::Table(table) => Some(table),
		_ => None,
	}
}
