// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{column::ColumnRef, value::Value, value::ValueType};

/// A bind parameter with its compile-time bound value.
///
/// Batch operations bind parameters while the statement is compiled; the
/// emitted parameter list pairs each placeholder with this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
	pub name: String,
	pub ty: ValueType,
	pub value: Value,
}

impl Parameter {
	pub fn new(name: impl Into<String>, ty: ValueType, value: Value) -> Self {
		Self {
			name: name.into(),
			ty,
			value,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
	Eq,
	NotEq,
	Lt,
	Gt,
	LtEq,
	GtEq,
	And,
	Or,
	Add,
	Sub,
	Mul,
	Div,
	Mod,
	Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
	Not,
	Neg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
	Column(ColumnRef),
	Constant(Value),
	Parameter(Parameter),
	BinaryOp {
		left: Box<Expr>,
		op: BinaryOp,
		right: Box<Expr>,
	},
	UnaryOp {
		op: UnaryOp,
		expr: Box<Expr>,
	},
	FunctionCall {
		name: String,
		args: Vec<Expr>,
	},
	Case {
		operand: Option<Box<Expr>>,
		when_clauses: Vec<(Expr, Expr)>,
		else_clause: Option<Box<Expr>>,
	},
	IsNull {
		expr: Box<Expr>,
		negated: bool,
	},
	InList {
		expr: Box<Expr>,
		list: Vec<Expr>,
		negated: bool,
	},
	Tuple(Vec<Expr>),
}

impl Expr {
	pub fn column(column: ColumnRef) -> Self {
		Expr::Column(column)
	}

	pub fn constant(value: impl Into<Value>) -> Self {
		Expr::Constant(value.into())
	}

	pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
		Expr::BinaryOp {
			left: Box::new(left),
			op,
			right: Box::new(right),
		}
	}

	pub fn eq(left: Expr, right: Expr) -> Self {
		Self::binary(left, BinaryOp::Eq, right)
	}

	pub fn gt(left: Expr, right: Expr) -> Self {
		Self::binary(left, BinaryOp::Gt, right)
	}

	pub fn add(left: Expr, right: Expr) -> Self {
		Self::binary(left, BinaryOp::Add, right)
	}

	pub fn and(left: Expr, right: Expr) -> Self {
		Self::binary(left, BinaryOp::And, right)
	}

	pub fn or(left: Expr, right: Expr) -> Self {
		Self::binary(left, BinaryOp::Or, right)
	}

	/// Conjoin an optional predicate with a new term.
	pub fn conjoin(existing: Option<Expr>, term: Expr) -> Expr {
		match existing {
			Some(predicate) => Expr::and(predicate, term),
			None => term,
		}
	}

	/// Flatten a conjunction into its terms. Non-AND expressions yield
	/// themselves as the single term.
	pub fn conjuncts(&self) -> Vec<&Expr> {
		let mut terms = Vec::new();
		fn walk<'a>(expr: &'a Expr, into: &mut Vec<&'a Expr>) {
			match expr {
				Expr::BinaryOp {
					left,
					op: BinaryOp::And,
					right,
				} => {
					walk(left, into);
					walk(right, into);
				}
				other => into.push(other),
			}
		}
		walk(self, &mut terms);
		terms
	}

	/// Occurrence ids of every column referenced by this expression.
	pub fn referenced_sources(&self) -> Vec<crate::table::SourceId> {
		fn walk(expr: &Expr, into: &mut Vec<crate::table::SourceId>) {
			match expr {
				Expr::Column(column) => {
					if !into.contains(&column.source) {
						into.push(column.source);
					}
				}
				Expr::Constant(_) | Expr::Parameter(_) => {}
				Expr::BinaryOp {
					left,
					right,
					..
				} => {
					walk(left, into);
					walk(right, into);
				}
				Expr::UnaryOp {
					expr,
					..
				} => walk(expr, into),
				Expr::FunctionCall {
					args,
					..
				} => args.iter().for_each(|arg| walk(arg, into)),
				Expr::Case {
					operand,
					when_clauses,
					else_clause,
				} => {
					if let Some(operand) = operand {
						walk(operand, into);
					}
					for (when, then) in when_clauses {
						walk(when, into);
						walk(then, into);
					}
					if let Some(else_clause) = else_clause {
						walk(else_clause, into);
					}
				}
				Expr::IsNull {
					expr,
					..
				} => walk(expr, into),
				Expr::InList {
					expr,
					list,
					..
				} => {
					walk(expr, into);
					list.iter().for_each(|item| walk(item, into));
				}
				Expr::Tuple(items) => items.iter().for_each(|item| walk(item, into)),
			}
		}
		let mut sources = Vec::new();
		walk(self, &mut sources);
		sources
	}

	/// Whether the expression contains no column or parameter references.
	pub fn is_constant(&self) -> bool {
		match self {
			Expr::Constant(_) => true,
			Expr::Column(_) | Expr::Parameter(_) => false,
			Expr::BinaryOp {
				left,
				right,
				..
			} => left.is_constant() && right.is_constant(),
			Expr::UnaryOp {
				expr,
				..
			} => expr.is_constant(),
			Expr::FunctionCall {
				args,
				..
			} => args.iter().all(Expr::is_constant),
			Expr::Case {
				operand,
				when_clauses,
				else_clause,
			} => {
				operand.as_deref().is_none_or(Expr::is_constant)
					&& when_clauses.iter().all(|(c, r)| c.is_constant() && r.is_constant())
					&& else_clause.as_deref().is_none_or(Expr::is_constant)
			}
			Expr::IsNull {
				expr,
				..
			} => expr.is_constant(),
			Expr::InList {
				expr,
				list,
				..
			} => expr.is_constant() && list.iter().all(Expr::is_constant),
			Expr::Tuple(items) => items.iter().all(Expr::is_constant),
		}
	}
}

impl Display for BinaryOp {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let s = match self {
			BinaryOp::Eq => "=",
			BinaryOp::NotEq => "<>",
			BinaryOp::Lt => "<",
			BinaryOp::Gt => ">",
			BinaryOp::LtEq => "<=",
			BinaryOp::GtEq => ">=",
			BinaryOp::And => "AND",
			BinaryOp::Or => "OR",
			BinaryOp::Add => "+",
			BinaryOp::Sub => "-",
			BinaryOp::Mul => "*",
			BinaryOp::Div => "/",
			BinaryOp::Mod => "%",
			BinaryOp::Concat => "||",
		};
		f.write_str(s)
	}
}

impl Display for Expr {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Expr::Column(column) => write!(f, "{column}"),
			Expr::Constant(value) => write!(f, "{value}"),
			Expr::Parameter(parameter) => write!(f, "@{}", parameter.name),
			Expr::BinaryOp {
				left,
				op,
				right,
			} => write!(f, "({left} {op} {right})"),
			Expr::UnaryOp {
				op: UnaryOp::Not,
				expr,
			} => write!(f, "NOT {expr}"),
			Expr::UnaryOp {
				op: UnaryOp::Neg,
				expr,
			} => write!(f, "-{expr}"),
			Expr::FunctionCall {
				name,
				args,
			} => {
				write!(f, "{name}(")?;
				for (i, arg) in args.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{arg}")?;
				}
				f.write_str(")")
			}
			Expr::Case {
				operand,
				when_clauses,
				else_clause,
			} => {
				f.write_str("CASE")?;
				if let Some(operand) = operand {
					write!(f, " {operand}")?;
				}
				for (when, then) in when_clauses {
					write!(f, " WHEN {when} THEN {then}")?;
				}
				if let Some(else_clause) = else_clause {
					write!(f, " ELSE {else_clause}")?;
				}
				f.write_str(" END")
			}
			Expr::IsNull {
				expr,
				negated: false,
			} => write!(f, "{expr} IS NULL"),
			Expr::IsNull {
				expr,
				negated: true,
			} => write!(f, "{expr} IS NOT NULL"),
			Expr::InList {
				expr,
				list,
				negated,
			} => {
				if *negated {
					write!(f, "{expr} NOT IN (")?;
				} else {
					write!(f, "{expr} IN (")?;
				}
				for (i, item) in list.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str(")")
			}
			Expr::Tuple(items) => {
				f.write_str("(")?;
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str(")")
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::table::SourceId;

	fn col(name: &str) -> Expr {
		Expr::Column(ColumnRef::new(SourceId(0), name, ValueType::Int))
	}

	#[test]
	fn test_conjuncts_flattens_nested_and() {
		let expr = Expr::and(Expr::and(col("a"), col("b")), col("c"));
		let terms: Vec<String> = expr.conjuncts().iter().map(|t| t.to_string()).collect();
		assert_eq!(terms, vec!["#0.a", "#0.b", "#0.c"]);
	}

	#[test]
	fn test_conjuncts_keeps_or_whole() {
		let expr = Expr::or(col("a"), col("b"));
		assert_eq!(expr.conjuncts().len(), 1);
	}

	#[test]
	fn test_is_constant() {
		assert!(Expr::add(Expr::constant(1), Expr::constant(2)).is_constant());
		assert!(!Expr::add(Expr::constant(1), col("a")).is_constant());
	}
}
