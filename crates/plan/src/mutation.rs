// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use serde::{Deserialize, Serialize};

use crate::{
	expression::Expr,
	node::{Join, SelectQuery, TableSource},
	table::TableRef,
	values::ValuesNode,
};

/// Bulk DELETE: the target scan plus whatever joins and filter the
/// row-shaped query carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNode {
	pub target: TableRef,
	pub joined: Vec<Join>,
	pub predicate: Option<Expr>,
}

/// Bulk UPDATE over the target, optionally driven by additional joined
/// sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNode {
	pub target: TableRef,
	pub set: Vec<(String, Expr)>,
	pub joined: Vec<Join>,
	pub predicate: Option<Expr>,
}

impl UpdateNode {
	/// The expanded form some dialects require: inner-join conditions are
	/// folded into the WHERE predicate and nested join chains flattened, so
	/// the joined tables render as a plain FROM list. Left joins keep their
	/// condition. Pure and idempotent.
	pub fn expand(&self) -> UpdateNode {
		let mut joined = Vec::new();
		let mut predicate = self.predicate.clone();
		let mut queue: std::collections::VecDeque<Join> = self.joined.iter().cloned().collect();
		while let Some(mut join) = queue.pop_front() {
			match join.kind {
				crate::node::JoinKind::Left => joined.push(join),
				crate::node::JoinKind::Inner => {
					for nested in std::mem::take(&mut join.table.joins) {
						queue.push_back(nested);
					}
					if !matches!(join.condition, Expr::Constant(crate::value::Value::Bool(true))) {
						let condition = std::mem::replace(
							&mut join.condition,
							Expr::Constant(crate::value::Value::Bool(true)),
						);
						predicate = Some(Expr::conjoin(predicate.take(), condition));
					}
					joined.push(join);
				}
			}
		}

		UpdateNode {
			target: self.target.clone(),
			set: self.set.clone(),
			joined,
			predicate,
		}
	}
}

/// INSERT INTO target from an arbitrary row-shaped query. `columns` are the
/// destination column names, positionally matching the source projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertSelectNode {
	pub target: TableRef,
	pub columns: Vec<String>,
	pub source: SelectQuery,
}

/// The row source feeding an upsert or merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationSource {
	Values(ValuesNode),
	Query {
		alias: Option<String>,
		query: Box<SelectQuery>,
		id: crate::table::SourceId,
	},
}

impl MutationSource {
	pub fn id(&self) -> crate::table::SourceId {
		match self {
			MutationSource::Values(values) => values.id,
			MutationSource::Query {
				id,
				..
			} => *id,
		}
	}

	/// Statically known to produce no rows.
	pub fn is_empty(&self) -> bool {
		match self {
			MutationSource::Values(values) => values.is_empty(),
			MutationSource::Query {
				..
			} => false,
		}
	}

	pub fn column_names(&self) -> Vec<String> {
		match self {
			MutationSource::Values(values) => values.columns.iter().map(|c| c.name.clone()).collect(),
			MutationSource::Query {
				query,
				..
			} => query.projection.iter().map(|(alias, _)| alias.clone()).collect(),
		}
	}
}

/// INSERT ... ON CONFLICT (or the dialect's equivalent). `on_conflict_update`
/// expressions may reference both the existing row (target occurrence) and
/// the incoming row (source occurrence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertNode {
	pub target: TableRef,
	pub source: MutationSource,
	pub insert_columns: Vec<(String, Expr)>,
	pub conflict_key: Vec<String>,
	pub on_conflict_update: Option<Vec<(String, Expr)>>,
}

/// MERGE INTO target USING source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeNode {
	pub target: TableRef,
	pub source: MutationSource,
	pub on: Expr,
	pub matched_update: Option<Vec<(String, Expr)>>,
	pub not_matched_insert: Option<Vec<(String, Expr)>>,
	pub delete_unmatched_by_source: bool,
}

/// A statement root: a row-shaped query or one of the five mutation
/// wrappers. Mutation nodes never nest inside plan nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
	Select(SelectQuery),
	Delete(DeleteNode),
	Update(UpdateNode),
	InsertSelect(InsertSelectNode),
	Upsert(UpsertNode),
	Merge(MergeNode),
}

impl Statement {
	/// Statically known to affect no rows; the engine short-circuits these
	/// to a zero count without rendering or executing anything destructive.
	pub fn affects_no_rows(&self) -> bool {
		match self {
			Statement::Upsert(node) => node.source.is_empty(),
			Statement::Merge(node) => node.source.is_empty(),
			Statement::InsertSelect(node) => {
				matches!(node.source.from.first(),
					Some(TableSource { source: crate::node::SourceExpr::Values(v), .. }) if v.is_empty())
			}
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		column::ColumnRef,
		node::JoinKind,
		table::{SourceId, SourceIdGen},
		value::ValueType,
	};

	fn joined_update() -> UpdateNode {
		let mut generator = SourceIdGen::new();
		let target = TableRef::new(generator.next(), "t");
		let other = TableRef::new(generator.next(), "s");
		let third = TableRef::new(generator.next(), "u");
		let condition = Expr::eq(
			Expr::Column(ColumnRef::new(target.id, "id", ValueType::Int)),
			Expr::Column(ColumnRef::new(other.id, "t_id", ValueType::Int)),
		);
		let nested_condition = Expr::eq(
			Expr::Column(ColumnRef::new(other.id, "u_id", ValueType::Int)),
			Expr::Column(ColumnRef::new(third.id, "id", ValueType::Int)),
		);
		UpdateNode {
			target: target.clone(),
			set: vec![("x".into(), Expr::constant(1))],
			joined: vec![Join {
				kind: JoinKind::Inner,
				table: TableSource::table(other).join(
					JoinKind::Inner,
					TableSource::table(third),
					nested_condition,
				),
				condition,
			}],
			predicate: None,
		}
	}

	#[test]
	fn test_expand_flattens_joins() {
		let update = joined_update();
		let expanded = update.expand();
		assert_eq!(expanded.joined.len(), 2);
		assert!(expanded.joined.iter().all(|join| join.table.joins.is_empty()));
		assert!(expanded
			.joined
			.iter()
			.all(|join| matches!(join.condition, Expr::Constant(crate::value::Value::Bool(true)))));
		// both join conditions folded into the predicate
		assert_eq!(expanded.predicate.unwrap().conjuncts().len(), 2);
	}

	#[test]
	fn test_expand_is_idempotent() {
		let expanded = joined_update().expand();
		assert_eq!(expanded.expand(), expanded);
	}

	#[test]
	fn test_empty_values_source_is_noop() {
		let values = ValuesNode::literal(
			SourceId(1),
			vec![crate::values::ValuesColumn::new("a", ValueType::Int)],
			vec![],
		);
		let statement = Statement::Upsert(UpsertNode {
			target: TableRef::new(SourceId(0), "t"),
			source: MutationSource::Values(values),
			insert_columns: vec![],
			conflict_key: vec!["a".into()],
			on_conflict_update: None,
		});
		assert!(statement.affects_no_rows());
	}

	#[test]
	fn test_select_never_noop() {
		let statement = Statement::Select(SelectQuery::scan(TableRef::new(SourceId(0), "t")));
		assert!(!statement.affects_no_rows());
	}
}
