// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Indented tree rendering of plans and statements, for trace output and
//! test assertions.

use std::fmt::Write;

use crate::{
	mutation::{MutationSource, Statement},
	node::{JoinKind, SelectQuery, SourceExpr, TableSource},
	values::ValuesRows,
};

pub fn explain_statement(statement: &Statement) -> String {
	let mut out = String::new();
	match statement {
		Statement::Select(query) => explain_select(query, 0, &mut out),
		Statement::Delete(node) => {
			line(&mut out, 0, &format!("Delete target={}", node.target));
			for join in &node.joined {
				line(&mut out, 1, &format!("{} {} ON {}", join_kw(join.kind), source_label(&join.table), join.condition));
			}
			if let Some(predicate) = &node.predicate {
				line(&mut out, 1, &format!("Where {predicate}"));
			}
		}
		Statement::Update(node) => {
			line(&mut out, 0, &format!("Update target={}", node.target));
			for (column, expr) in &node.set {
				line(&mut out, 1, &format!("Set {column} = {expr}"));
			}
			for join in &node.joined {
				line(&mut out, 1, &format!("{} {} ON {}", join_kw(join.kind), source_label(&join.table), join.condition));
			}
			if let Some(predicate) = &node.predicate {
				line(&mut out, 1, &format!("Where {predicate}"));
			}
		}
		Statement::InsertSelect(node) => {
			line(&mut out, 0, &format!("InsertSelect target={} columns=[{}]", node.target, node.columns.join(", ")));
			explain_select(&node.source, 1, &mut out);
		}
		Statement::Upsert(node) => {
			line(&mut out, 0, &format!("Upsert target={} key=[{}]", node.target, node.conflict_key.join(", ")));
			explain_mutation_source(&node.source, 1, &mut out);
			for (column, expr) in &node.insert_columns {
				line(&mut out, 1, &format!("Insert {column} = {expr}"));
			}
			if let Some(update) = &node.on_conflict_update {
				for (column, expr) in update {
					line(&mut out, 1, &format!("OnConflict {column} = {expr}"));
				}
			}
		}
		Statement::Merge(node) => {
			line(&mut out, 0, &format!("Merge target={} on={}", node.target, node.on));
			explain_mutation_source(&node.source, 1, &mut out);
			if let Some(update) = &node.matched_update {
				for (column, expr) in update {
					line(&mut out, 1, &format!("Matched {column} = {expr}"));
				}
			}
			if let Some(insert) = &node.not_matched_insert {
				for (column, expr) in insert {
					line(&mut out, 1, &format!("NotMatched {column} = {expr}"));
				}
			}
			if node.delete_unmatched_by_source {
				line(&mut out, 1, "DeleteUnmatchedBySource");
			}
		}
	}
	out
}

pub fn explain_query(query: &SelectQuery) -> String {
	let mut out = String::new();
	explain_select(query, 0, &mut out);
	out
}

fn explain_select(query: &SelectQuery, depth: usize, out: &mut String) {
	line(out, depth, "Select");
	for slot in &query.from {
		explain_table_source(slot, depth + 1, out);
	}
	if !query.projection.is_empty() {
		let columns: Vec<String> =
			query.projection.iter().map(|(alias, expr)| format!("{alias}: {expr}")).collect();
		line(out, depth + 1, &format!("Map {{{}}}", columns.join(", ")));
	}
	if let Some(predicate) = &query.predicate {
		line(out, depth + 1, &format!("Filter {predicate}"));
	}
	if let Some(limit) = query.limit {
		line(out, depth + 1, &format!("Take {limit}"));
	}
	if let Some((kind, right)) = &query.set_op {
		let kw = match kind {
			crate::node::SetOpKind::Union => "UnionAll",
			crate::node::SetOpKind::UnionDistinct => "Union",
		};
		line(out, depth + 1, kw);
		explain_select(right, depth + 2, out);
	}
}

fn explain_table_source(slot: &TableSource, depth: usize, out: &mut String) {
	line(out, depth, &format!("From {}", source_label(slot)));
	if let SourceExpr::Query {
		query,
		..
	} = &slot.source
	{
		explain_select(query, depth + 1, out);
	}
	for join in &slot.joins {
		line(out, depth + 1, &format!("{} {} ON {}", join_kw(join.kind), source_label(&join.table), join.condition));
		if let SourceExpr::Query {
			query,
			..
		} = &join.table.source
		{
			explain_select(query, depth + 2, out);
		}
	}
}

fn explain_mutation_source(source: &MutationSource, depth: usize, out: &mut String) {
	match source {
		MutationSource::Values(values) => {
			let rows = match &values.rows {
				ValuesRows::Literal(rows) => format!("{} literal rows", rows.len()),
				ValuesRows::Parameterized {
					row_count,
					..
				} => format!("{row_count} parameterized rows"),
			};
			line(out, depth, &format!("Values {} ({rows})", values.id));
		}
		MutationSource::Query {
			query,
			..
		} => explain_select(query, depth, out),
	}
}

fn source_label(slot: &TableSource) -> String {
	match &slot.source {
		SourceExpr::Table(table) => table.to_string(),
		SourceExpr::Query {
			id,
			alias,
			..
		} => match alias {
			Some(alias) => format!("(subquery AS {alias}) {id}"),
			None => format!("(subquery) {id}"),
		},
		SourceExpr::Values(values) => format!("(values) {}", values.id),
	}
}

fn join_kw(kind: JoinKind) -> &'static str {
	match kind {
		JoinKind::Inner => "Join",
		JoinKind::Left => "LeftJoin",
	}
}

fn line(out: &mut String, depth: usize, text: &str) {
	for _ in 0..depth {
		out.push_str("  ");
	}
	writeln!(out, "{text}").unwrap();
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		column::ColumnRef,
		expression::Expr,
		table::{SourceIdGen, TableRef},
		value::ValueType,
	};

	#[test]
	fn test_explain_filtered_scan() {
		let mut generator = SourceIdGen::new();
		let item = TableRef::new(generator.next(), "Item").with_alias("i");
		let predicate = Expr::gt(
			Expr::Column(ColumnRef::new(item.id, "ItemId", ValueType::Int)),
			Expr::constant(500),
		);
		let query = SelectQuery::scan(item).with_predicate(predicate);

		assert_eq!(explain_query(&query), "Select\n  From Item AS i #0\n  Filter (#0.ItemId > 500)\n");
	}
}
