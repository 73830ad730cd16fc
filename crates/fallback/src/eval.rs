// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! A small expression interpreter over materialized rows. Comparisons
//! follow SQL's treatment of NULL: any comparison against NULL is not
//! satisfied, and only IS NULL observes it directly.

use std::cmp::Ordering;

use relbatch_plan::{BinaryOp, ColumnRef, Error, Expr, Result, SourceId, UnaryOp, Value};

/// Row bindings for one evaluation: occurrence id → (column names, row).
#[derive(Default)]
pub struct RowEnv<'a> {
	bindings: Vec<(SourceId, &'a [String], &'a [Value])>,
}

impl<'a> RowEnv<'a> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bind(mut self, id: SourceId, columns: &'a [String], row: &'a [Value]) -> Self {
		self.bindings.push((id, columns, row));
		self
	}

	fn lookup(&self, column: &ColumnRef) -> Result<&Value> {
		for (id, columns, row) in &self.bindings {
			if *id == column.source {
				let index = columns.iter().position(|name| name == &column.name).ok_or_else(|| {
					Error::DanglingColumn {
						column: format!("{}.{}", column.source, column.name),
					}
				})?;
				return Ok(&row[index]);
			}
		}
		Err(Error::DanglingColumn {
			column: format!("{}.{}", column.source, column.name),
		})
	}
}

pub fn eval(expr: &Expr, env: &RowEnv<'_>) -> Result<Value> {
	match expr {
		Expr::Column(column) => Ok(env.lookup(column)?.clone()),
		Expr::Constant(value) => Ok(value.clone()),
		Expr::Parameter(parameter) => Ok(parameter.value.clone()),
		Expr::BinaryOp {
			left,
			op,
			right,
		} => binary(left, *op, right, env),
		Expr::UnaryOp {
			op: UnaryOp::Not,
			expr: inner,
		} => match eval(inner, env)? {
			Value::Bool(b) => Ok(Value::Bool(!b)),
			Value::Null => Ok(Value::Null),
			other => Err(not_evaluable(format!("NOT over {other}"))),
		},
		Expr::UnaryOp {
			op: UnaryOp::Neg,
			expr: inner,
		} => match eval(inner, env)? {
			Value::Int(v) => Ok(Value::Int(-v)),
			Value::Float(v) => Ok(Value::Float(-v)),
			Value::Null => Ok(Value::Null),
			other => Err(not_evaluable(format!("negation of {other}"))),
		},
		Expr::FunctionCall {
			name,
			args,
		} => match name.to_ascii_uppercase().as_str() {
			"COALESCE" => {
				for arg in args {
					let value = eval(arg, env)?;
					if value != Value::Null {
						return Ok(value);
					}
				}
				Ok(Value::Null)
			}
			other => Err(not_evaluable(format!("function {other}"))),
		},
		Expr::Case {
			operand,
			when_clauses,
			else_clause,
		} => {
			for (when, then) in when_clauses {
				let matched = match operand {
					Some(operand) => {
						let lhs = eval(operand, env)?;
						let rhs = eval(when, env)?;
						values_equal(&lhs, &rhs)
					}
					None => matches!(eval(when, env)?, Value::Bool(true)),
				};
				if matched {
					return eval(then, env);
				}
			}
			match else_clause {
				Some(else_clause) => eval(else_clause, env),
				None => Ok(Value::Null),
			}
		}
		Expr::IsNull {
			expr: inner,
			negated,
		} => {
			let is_null = eval(inner, env)? == Value::Null;
			Ok(Value::Bool(is_null != *negated))
		}
		Expr::InList {
			expr: inner,
			list,
			negated,
		} => {
			let needle = eval(inner, env)?;
			if needle == Value::Null {
				return Ok(Value::Bool(false));
			}
			let mut found = false;
			for item in list {
				if values_equal(&needle, &eval(item, env)?) {
					found = true;
					break;
				}
			}
			Ok(Value::Bool(found != *negated))
		}
		Expr::Tuple(_) => Err(not_evaluable("tuple outside IN".into())),
	}
}

/// Evaluate a filter: NULL (unknown) does not satisfy the predicate.
pub fn eval_predicate(expr: &Expr, env: &RowEnv<'_>) -> Result<bool> {
	match eval(expr, env)? {
		Value::Bool(b) => Ok(b),
		Value::Null => Ok(false),
		other => Err(not_evaluable(format!("predicate evaluated to {other}"))),
	}
}

fn binary(left: &Expr, op: BinaryOp, right: &Expr, env: &RowEnv<'_>) -> Result<Value> {
	// short-circuit logic first; AND/OR follow Kleene semantics
	match op {
		BinaryOp::And => {
			return match eval(left, env)? {
				Value::Bool(false) => Ok(Value::Bool(false)),
				Value::Bool(true) => eval(right, env),
				Value::Null => match eval(right, env)? {
					Value::Bool(false) => Ok(Value::Bool(false)),
					_ => Ok(Value::Null),
				},
				other => Err(not_evaluable(format!("AND over {other}"))),
			};
		}
		BinaryOp::Or => {
			return match eval(left, env)? {
				Value::Bool(true) => Ok(Value::Bool(true)),
				Value::Bool(false) => eval(right, env),
				Value::Null => match eval(right, env)? {
					Value::Bool(true) => Ok(Value::Bool(true)),
					_ => Ok(Value::Null),
				},
				other => Err(not_evaluable(format!("OR over {other}"))),
			};
		}
		_ => {}
	}

	let lhs = eval(left, env)?;
	let rhs = eval(right, env)?;
	if lhs == Value::Null || rhs == Value::Null {
		return Ok(Value::Null);
	}

	match op {
		BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
		BinaryOp::NotEq => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
		BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
			let ordering = compare(&lhs, &rhs)?;
			Ok(Value::Bool(match op {
				BinaryOp::Lt => ordering == Ordering::Less,
				BinaryOp::Gt => ordering == Ordering::Greater,
				BinaryOp::LtEq => ordering != Ordering::Greater,
				BinaryOp::GtEq => ordering != Ordering::Less,
				_ => unreachable!(),
			}))
		}
		BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
			arithmetic(op, &lhs, &rhs)
		}
		BinaryOp::Concat => match (&lhs, &rhs) {
			(Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
			_ => Err(not_evaluable(format!("concat of {lhs} and {rhs}"))),
		},
		BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
	}
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
		_ => a == b,
	}
}

fn compare(a: &Value, b: &Value) -> Result<Ordering> {
	let ordering = match (a, b) {
		(Value::Int(a), Value::Int(b)) => a.cmp(b),
		(Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or_else(|| not_evaluable("NaN comparison".into()))?,
		(Value::Int(a), Value::Float(b)) => (*a as f64)
			.partial_cmp(b)
			.ok_or_else(|| not_evaluable("NaN comparison".into()))?,
		(Value::Float(a), Value::Int(b)) => a
			.partial_cmp(&(*b as f64))
			.ok_or_else(|| not_evaluable("NaN comparison".into()))?,
		(Value::Text(a), Value::Text(b)) => a.cmp(b),
		(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
		(Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
		_ => return Err(not_evaluable(format!("comparison of {a} and {b}"))),
	};
	Ok(ordering)
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
	match (lhs, rhs) {
		(Value::Int(a), Value::Int(b)) => {
			let result = match op {
				BinaryOp::Add => a.checked_add(*b),
				BinaryOp::Sub => a.checked_sub(*b),
				BinaryOp::Mul => a.checked_mul(*b),
				BinaryOp::Div => a.checked_div(*b),
				BinaryOp::Mod => a.checked_rem(*b),
				_ => unreachable!(),
			};
			result.map(Value::Int).ok_or_else(|| not_evaluable("integer overflow or division by zero".into()))
		}
		_ => {
			let a = as_float(lhs)?;
			let b = as_float(rhs)?;
			Ok(Value::Float(match op {
				BinaryOp::Add => a + b,
				BinaryOp::Sub => a - b,
				BinaryOp::Mul => a * b,
				BinaryOp::Div => a / b,
				BinaryOp::Mod => a % b,
				_ => unreachable!(),
			}))
		}
	}
}

fn as_float(value: &Value) -> Result<f64> {
	match value {
		Value::Int(v) => Ok(*v as f64),
		Value::Float(v) => Ok(*v),
		other => Err(not_evaluable(format!("arithmetic over {other}"))),
	}
}

fn not_evaluable(reason: String) -> Error {
	Error::NotEvaluable {
		reason,
	}
}
