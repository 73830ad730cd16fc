// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Materialization of in-memory row batches.
//!
//! A batch arrives as a single row-major array parameter. Depending on what
//! the target dialect can bind, the batch either stays that way, expands
//! into one scalar parameter per cell, or is inlined as literal tuples.
//! Cell parameters are named `{prefix}_{row}_{col}` so repeated
//! compilations of the same query shape produce byte-identical SQL, which
//! statement caches on the server side rely on.

use relbatch_plan::{
	Error, Expr, MutationSource, Parameter, Result, SelectQuery, SourceExpr, Statement, TableSource, Value,
	ValuesNode, ValuesRows,
};
use tracing::{instrument, trace};

/// How the dialect wants a row batch bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuesStrategy {
	/// Keep the single array parameter; the emitter expands it positionally
	/// at render time.
	ArrayParameter,
	/// One scalar parameter per cell.
	CellParameters,
	/// Inline every cell as a literal. Only valid when the values are
	/// compile-time constants, which a bound batch always is.
	InlineLiterals,
}

/// Rewrite every values source in the statement according to `strategy`.
/// The surrounding plan is never altered; only the `ValuesNode` rows change.
#[instrument(level = "trace", skip(statement))]
pub fn expand_statement(statement: Statement, strategy: ValuesStrategy, prefix: &str) -> Result<Statement> {
	Ok(match statement {
		Statement::Select(query) => Statement::Select(expand_query(query, strategy, prefix)?),
		Statement::Delete(mut node) => {
			for join in &mut node.joined {
				expand_table_source(&mut join.table, strategy, prefix)?;
			}
			Statement::Delete(node)
		}
		Statement::Update(mut node) => {
			for join in &mut node.joined {
				expand_table_source(&mut join.table, strategy, prefix)?;
			}
			Statement::Update(node)
		}
		Statement::InsertSelect(mut node) => {
			node.source = expand_query(node.source, strategy, prefix)?;
			Statement::InsertSelect(node)
		}
		Statement::Upsert(mut node) => {
			node.source = expand_mutation_source(node.source, strategy, prefix)?;
			Statement::Upsert(node)
		}
		Statement::Merge(mut node) => {
			node.source = expand_mutation_source(node.source, strategy, prefix)?;
			Statement::Merge(node)
		}
	})
}

fn expand_query(mut query: SelectQuery, strategy: ValuesStrategy, prefix: &str) -> Result<SelectQuery> {
	for slot in &mut query.from {
		expand_table_source(slot, strategy, prefix)?;
	}
	if let Some((kind, right)) = query.set_op.take() {
		query.set_op = Some((kind, Box::new(expand_query(*right, strategy, prefix)?)));
	}
	Ok(query)
}

fn expand_table_source(slot: &mut TableSource, strategy: ValuesStrategy, prefix: &str) -> Result<()> {
	match &mut slot.source {
		SourceExpr::Values(values) => expand_values(values, strategy, prefix)?,
		SourceExpr::Query {
			query,
			..
		} => {
			let taken = std::mem::take(query.as_mut());
			**query = expand_query(taken, strategy, prefix)?;
		}
		SourceExpr::Table(_) => {}
	}
	for join in &mut slot.joins {
		expand_table_source(&mut join.table, strategy, prefix)?;
	}
	Ok(())
}

fn expand_mutation_source(
	source: MutationSource,
	strategy: ValuesStrategy,
	prefix: &str,
) -> Result<MutationSource> {
	Ok(match source {
		MutationSource::Values(mut values) => {
			expand_values(&mut values, strategy, prefix)?;
			MutationSource::Values(values)
		}
		MutationSource::Query {
			id,
			alias,
			query,
		} => MutationSource::Query {
			id,
			alias,
			query: Box::new(expand_query(*query, strategy, prefix)?),
		},
	})
}

/// Rewrite one values node in place.
pub fn expand_values(values: &mut ValuesNode, strategy: ValuesStrategy, prefix: &str) -> Result<()> {
	if strategy == ValuesStrategy::ArrayParameter {
		return Ok(());
	}
	if values.columns.is_empty() {
		if matches!(values.rows, ValuesRows::Parameterized { .. }) {
			values.rows = ValuesRows::Literal(Vec::new());
		}
		return Ok(());
	}
	let ValuesRows::Parameterized {
		parameter,
		row_count,
	} = &values.rows
	else {
		return Ok(());
	};

	let cells = decode_batch(parameter, *row_count, values)?;
	let columns = values.columns.len();
	let rows: Vec<Vec<Expr>> = cells
		.chunks(columns)
		.enumerate()
		.map(|(row, chunk)| {
			chunk.iter()
				.enumerate()
				.map(|(col, value)| match strategy {
					ValuesStrategy::CellParameters => Expr::Parameter(Parameter::new(
						format!("{prefix}_{row}_{col}"),
						values.columns[col].ty,
						value.clone(),
					)),
					ValuesStrategy::InlineLiterals => Expr::Constant(value.clone()),
					ValuesStrategy::ArrayParameter => unreachable!(),
				})
				.collect()
		})
		.collect();

	trace!(rows = rows.len(), columns, ?strategy, "expanded values batch");
	values.rows = ValuesRows::Literal(rows);
	Ok(())
}

/// Pull the row-major cells out of the array parameter, checking shape and
/// per-cell type against the declared columns.
fn decode_batch(parameter: &Parameter, row_count: usize, values: &ValuesNode) -> Result<Vec<Value>> {
	let Value::Array(cells) = &parameter.value else {
		return Err(Error::ParameterBinding {
			parameter: parameter.name.clone(),
			expected: relbatch_plan::ValueType::Array,
			actual: parameter.value.ty().map(|t| t.to_string()).unwrap_or_else(|| "null".into()),
		});
	};
	let expected = row_count * values.columns.len();
	if cells.len() != expected {
		return Err(Error::ParameterBinding {
			parameter: parameter.name.clone(),
			expected: relbatch_plan::ValueType::Array,
			actual: format!("array of {} cells, expected {expected}", cells.len()),
		});
	}
	for (index, cell) in cells.iter().enumerate() {
		let column = &values.columns[index % values.columns.len()];
		if !cell.matches(column.ty) {
			return Err(Error::ParameterBinding {
				parameter: format!("{}[{index}]", parameter.name),
				expected: column.ty,
				actual: cell.ty().map(|t| t.to_string()).unwrap_or_else(|| "null".into()),
			});
		}
	}
	Ok(cells.clone())
}
