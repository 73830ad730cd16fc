// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use std::collections::HashMap;

use crate::{
	column::ColumnRef,
	expression::Expr,
	node::{Join, OrderKey, SelectQuery, SourceExpr, TableSource},
	table::SourceId,
};

/// Result of visiting one subtree: either the input stands, or a freshly
/// allocated replacement. Ancestors reallocate only on `Replaced`, which is
/// how change propagates without pointer identity tricks.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewritten<T> {
	Unchanged,
	Replaced(T),
}

impl<T> Rewritten<T> {
	pub fn is_replaced(&self) -> bool {
		matches!(self, Rewritten::Replaced(_))
	}

	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Rewritten<U> {
		match self {
			Rewritten::Unchanged => Rewritten::Unchanged,
			Rewritten::Replaced(value) => Rewritten::Replaced(f(value)),
		}
	}
}

impl<T: Clone> Rewritten<T> {
	/// The effective value after the visit.
	pub fn into_value(self, original: &T) -> T {
		match self {
			Rewritten::Unchanged => original.clone(),
			Rewritten::Replaced(value) => value,
		}
	}
}

enum Mode {
	/// Redirect every column of `from` to the same-named column of `to`.
	Redirect {
		from: SourceId,
		to: SourceId,
	},
	/// Replace columns of `from` by name with arbitrary expressions.
	Substitute {
		from: SourceId,
		map: HashMap<String, Expr>,
	},
}

/// Redirects every reference to one table occurrence, either to another
/// occurrence (by column name) or through a replacement expression map.
/// Every rewrite pass funnels its column redirection through this type.
pub struct ColumnRewriter {
	mode: Mode,
}

impl ColumnRewriter {
	pub fn redirect(from: SourceId, to: SourceId) -> Self {
		Self {
			mode: Mode::Redirect {
				from,
				to,
			},
		}
	}

	pub fn substitute(from: SourceId, map: HashMap<String, Expr>) -> Self {
		Self {
			mode: Mode::Substitute {
				from,
				map,
			},
		}
	}

	fn column(&self, column: &ColumnRef) -> Rewritten<Expr> {
		match &self.mode {
			Mode::Redirect {
				from,
				to,
			} => {
				if column.source == *from {
					Rewritten::Replaced(Expr::Column(column.redirected(*to)))
				} else {
					Rewritten::Unchanged
				}
			}
			Mode::Substitute {
				from,
				map,
			} => {
				if column.source == *from {
					match map.get(&column.name) {
						Some(replacement) => Rewritten::Replaced(replacement.clone()),
						None => Rewritten::Unchanged,
					}
				} else {
					Rewritten::Unchanged
				}
			}
		}
	}

	pub fn expr(&self, expr: &Expr) -> Rewritten<Expr> {
		match expr {
			Expr::Column(column) => self.column(column),
			Expr::Constant(_) | Expr::Parameter(_) => Rewritten::Unchanged,
			Expr::BinaryOp {
				left,
				op,
				right,
			} => {
				let new_left = self.expr(left);
				let new_right = self.expr(right);
				if !new_left.is_replaced() && !new_right.is_replaced() {
					return Rewritten::Unchanged;
				}
				Rewritten::Replaced(Expr::BinaryOp {
					left: Box::new(new_left.into_value(left)),
					op: *op,
					right: Box::new(new_right.into_value(right)),
				})
			}
			Expr::UnaryOp {
				op,
				expr: inner,
			} => self.expr(inner).map(|rewritten| Expr::UnaryOp {
				op: *op,
				expr: Box::new(rewritten),
			}),
			Expr::FunctionCall {
				name,
				args,
			} => self.exprs(args).map(|rewritten| Expr::FunctionCall {
				name: name.clone(),
				args: rewritten,
			}),
			Expr::Case {
				operand,
				when_clauses,
				else_clause,
			} => {
				let new_operand = match operand {
					Some(operand) => self.expr(operand),
					None => Rewritten::Unchanged,
				};
				let new_else = match else_clause {
					Some(else_clause) => self.expr(else_clause),
					None => Rewritten::Unchanged,
				};
				let mut clauses_changed = false;
				let new_clauses: Vec<(Expr, Expr)> = when_clauses
					.iter()
					.map(|(when, then)| {
						let new_when = self.expr(when);
						let new_then = self.expr(then);
						clauses_changed |= new_when.is_replaced() || new_then.is_replaced();
						(new_when.into_value(when), new_then.into_value(then))
					})
					.collect();
				if !new_operand.is_replaced() && !new_else.is_replaced() && !clauses_changed {
					return Rewritten::Unchanged;
				}
				Rewritten::Replaced(Expr::Case {
					operand: operand
						.as_ref()
						.map(|original| Box::new(new_operand.into_value(original))),
					when_clauses: new_clauses,
					else_clause: else_clause
						.as_ref()
						.map(|original| Box::new(new_else.into_value(original))),
				})
			}
			Expr::IsNull {
				expr: inner,
				negated,
			} => self.expr(inner).map(|rewritten| Expr::IsNull {
				expr: Box::new(rewritten),
				negated: *negated,
			}),
			Expr::InList {
				expr: inner,
				list,
				negated,
			} => {
				let new_inner = self.expr(inner);
				let new_list = self.exprs(list);
				if !new_inner.is_replaced() && !new_list.is_replaced() {
					return Rewritten::Unchanged;
				}
				Rewritten::Replaced(Expr::InList {
					expr: Box::new(new_inner.into_value(inner)),
					list: new_list.into_value(list),
					negated: *negated,
				})
			}
			Expr::Tuple(items) => self.exprs(items).map(Expr::Tuple),
		}
	}

	pub fn exprs(&self, exprs: &[Expr]) -> Rewritten<Vec<Expr>> {
		let mut changed = false;
		let rewritten: Vec<Expr> = exprs
			.iter()
			.map(|expr| {
				let result = self.expr(expr);
				changed |= result.is_replaced();
				result.into_value(expr)
			})
			.collect();
		if changed {
			Rewritten::Replaced(rewritten)
		} else {
			Rewritten::Unchanged
		}
	}

	pub fn opt_expr(&self, expr: &Option<Expr>) -> Rewritten<Option<Expr>> {
		match expr {
			None => Rewritten::Unchanged,
			Some(inner) => self.expr(inner).map(Some),
		}
	}

	pub fn pairs(&self, pairs: &[(String, Expr)]) -> Rewritten<Vec<(String, Expr)>> {
		let mut changed = false;
		let rewritten: Vec<(String, Expr)> = pairs
			.iter()
			.map(|(alias, expr)| {
				let result = self.expr(expr);
				changed |= result.is_replaced();
				(alias.clone(), result.into_value(expr))
			})
			.collect();
		if changed {
			Rewritten::Replaced(rewritten)
		} else {
			Rewritten::Unchanged
		}
	}

	pub fn join(&self, join: &Join) -> Rewritten<Join> {
		let new_table = self.table_source(&join.table);
		let new_condition = self.expr(&join.condition);
		if !new_table.is_replaced() && !new_condition.is_replaced() {
			return Rewritten::Unchanged;
		}
		Rewritten::Replaced(Join {
			kind: join.kind,
			table: new_table.into_value(&join.table),
			condition: new_condition.into_value(&join.condition),
		})
	}

	pub fn table_source(&self, slot: &TableSource) -> Rewritten<TableSource> {
		let new_source = match &slot.source {
			// Sub-queries may be correlated with the occurrence being
			// rewritten, so the walk descends into them.
			SourceExpr::Query {
				id,
				alias,
				query,
			} => self.select(query).map(|rewritten| SourceExpr::Query {
				id: *id,
				alias: alias.clone(),
				query: Box::new(rewritten),
			}),
			SourceExpr::Table(_) | SourceExpr::Values(_) => Rewritten::Unchanged,
		};
		let mut joins_changed = false;
		let new_joins: Vec<Join> = slot
			.joins
			.iter()
			.map(|join| {
				let result = self.join(join);
				joins_changed |= result.is_replaced();
				result.into_value(join)
			})
			.collect();
		if !new_source.is_replaced() && !joins_changed {
			return Rewritten::Unchanged;
		}
		Rewritten::Replaced(TableSource {
			source: new_source.into_value(&slot.source),
			joins: new_joins,
		})
	}

	pub fn select(&self, query: &SelectQuery) -> Rewritten<SelectQuery> {
		let mut from_changed = false;
		let new_from: Vec<TableSource> = query
			.from
			.iter()
			.map(|slot| {
				let result = self.table_source(slot);
				from_changed |= result.is_replaced();
				result.into_value(slot)
			})
			.collect();

		let new_projection = self.pairs(&query.projection);
		let new_predicate = self.opt_expr(&query.predicate);
		let new_group_by = self.exprs(&query.group_by);
		let new_having = self.opt_expr(&query.having);

		let mut order_changed = false;
		let new_order: Vec<OrderKey> = query
			.order_by
			.iter()
			.map(|key| {
				let result = self.expr(&key.expr);
				order_changed |= result.is_replaced();
				OrderKey {
					expr: result.into_value(&key.expr),
					descending: key.descending,
				}
			})
			.collect();

		let new_set_op = match &query.set_op {
			None => Rewritten::Unchanged,
			Some((kind, right)) => self.select(right).map(|rewritten| Some((*kind, Box::new(rewritten)))),
		};

		if !from_changed
			&& !new_projection.is_replaced()
			&& !new_predicate.is_replaced()
			&& !new_group_by.is_replaced()
			&& !new_having.is_replaced()
			&& !order_changed
			&& !new_set_op.is_replaced()
		{
			return Rewritten::Unchanged;
		}

		Rewritten::Replaced(SelectQuery {
			from: new_from,
			projection: new_projection.into_value(&query.projection),
			predicate: new_predicate.into_value(&query.predicate),
			group_by: new_group_by.into_value(&query.group_by),
			having: new_having.into_value(&query.having),
			order_by: new_order,
			limit: query.limit,
			offset: query.offset,
			distinct: query.distinct,
			set_op: new_set_op.into_value(&query.set_op),
			skip_selfjoin: query.skip_selfjoin,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{column::ColumnRef, table::TableRef, value::ValueType};

	fn col(source: u32, name: &str) -> Expr {
		Expr::Column(ColumnRef::new(SourceId(source), name, ValueType::Int))
	}

	#[test]
	fn test_redirect_rewrites_matching_source_only() {
		let rewriter = ColumnRewriter::redirect(SourceId(2), SourceId(0));
		let expr = Expr::and(Expr::eq(col(2, "Id"), col(0, "Id")), Expr::gt(col(1, "X"), Expr::constant(5)));
		let rewritten = rewriter.expr(&expr).into_value(&expr);
		assert_eq!(rewritten.to_string(), "((#0.Id = #0.Id) AND (#1.X > 5))");
	}

	#[test]
	fn test_unchanged_when_source_absent() {
		let rewriter = ColumnRewriter::redirect(SourceId(9), SourceId(0));
		let expr = Expr::eq(col(1, "a"), col(2, "b"));
		assert!(!rewriter.expr(&expr).is_replaced());
	}

	#[test]
	fn test_substitute_by_name() {
		let mut map = HashMap::new();
		map.insert("Total".to_string(), Expr::add(col(0, "Price"), Expr::constant(1)));
		let rewriter = ColumnRewriter::substitute(SourceId(3), map);

		let expr = Expr::gt(col(3, "Total"), Expr::constant(10));
		let rewritten = rewriter.expr(&expr).into_value(&expr);
		assert_eq!(rewritten.to_string(), "((#0.Price + 1) > 10)");

		// unmapped columns of the same source stay put
		let expr = Expr::gt(col(3, "Other"), Expr::constant(10));
		assert!(!rewriter.expr(&expr).is_replaced());
	}

	#[test]
	fn test_select_rewrite_descends_into_joins() {
		let rewriter = ColumnRewriter::redirect(SourceId(2), SourceId(0));
		let target = TableRef::new(SourceId(0), "t");
		let other = TableRef::new(SourceId(1), "s");
		let query = SelectQuery {
			from: vec![TableSource::table(target).join(
				crate::node::JoinKind::Inner,
				TableSource::table(other),
				Expr::eq(col(1, "k"), col(2, "k")),
			)],
			projection: vec![("v".into(), col(2, "v"))],
			..Default::default()
		};
		let rewritten = rewriter.select(&query).into_value(&query);
		assert_eq!(rewritten.from[0].joins[0].condition.to_string(), "(#1.k = #0.k)");
		assert_eq!(rewritten.projection[0].1.to_string(), "#0.v");
	}
}
