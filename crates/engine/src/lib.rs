// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! The batch operation surface: each operation wraps a row-shaped plan into
//! a mutation statement, runs the rewrite passes, renders for the
//! configured dialect and hands text plus parameters to the caller's
//! executor. Everything up to execution is pure, synchronous and
//! CPU-bound; cancellation is a pass-through consulted only downstream.

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use relbatch_dialect::{BoundParam, CompiledStatement, Dialect, render};
use relbatch_plan::{
	ColumnRef, Error, Expr, Join, JoinKind, MetaRegistry, MutationSource, Parameter, Result, SelectQuery,
	SourceId, Statement, TableMeta, TableRef, TableSource, Value, ValueType, ValuesColumn, ValuesNode,
};
use relbatch_rewrite::{Synthesizer, ValuesStrategy, selfjoin, values};
use tracing::{debug, instrument, trace};

/// Cooperative cancellation handle, threaded through to the executor. The
/// compile pipeline itself never suspends and never consults it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

/// The execution collaborator: takes finished SQL plus bound parameters and
/// reports the affected-row count. Retries, transactions and cancellation
/// behavior all live behind this seam.
pub trait StatementExecutor {
	fn execute(&mut self, sql: &str, params: &[BoundParam], cancel: &CancelToken) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
	pub dialect: Dialect,
	/// Prefix for cell-level parameter names (`{prefix}_{row}_{col}`).
	pub parameter_prefix: String,
}

impl EngineOptions {
	pub fn new(dialect: Dialect) -> Self {
		Self {
			dialect,
			parameter_prefix: "p".to_string(),
		}
	}
}

/// An in-memory row batch as handed over by the caller, bound behind a
/// single row-major array parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
	pub columns: Vec<ValuesColumn>,
	pub rows: Vec<Vec<Value>>,
}

impl RowBatch {
	pub fn new(columns: Vec<ValuesColumn>) -> Self {
		Self {
			columns,
			rows: Vec::new(),
		}
	}

	pub fn push(&mut self, row: Vec<Value>) -> Result<()> {
		if row.len() != self.columns.len() {
			return Err(Error::AmbiguousShape {
				operation: "BATCH",
				reason: format!("row of {} cells against {} columns", row.len(), self.columns.len()),
			});
		}
		self.rows.push(row);
		Ok(())
	}

	/// Bind the batch as a values source with the given occurrence id.
	pub fn into_values(self, id: SourceId, parameter_name: &str) -> ValuesNode {
		let row_count = self.rows.len();
		let cells: Vec<Value> = self.rows.into_iter().flatten().collect();
		ValuesNode::parameterized(
			id,
			self.columns,
			Parameter::new(parameter_name, ValueType::Array, Value::Array(cells)),
			row_count,
		)
	}
}

pub struct Engine {
	options: EngineOptions,
	metas: MetaRegistry,
}

impl Engine {
	pub fn new(options: EngineOptions) -> Self {
		Self {
			options,
			metas: MetaRegistry::new(),
		}
	}

	/// Make a table's mapping visible to the rewrite passes (the self-join
	/// pass resolves primary keys through this registry).
	pub fn register(&mut self, meta: Arc<TableMeta>) {
		self.metas.register(meta);
	}

	pub fn dialect(&self) -> Dialect {
		self.options.dialect
	}

	// ── Compile-only surface ────────────────────────────────────────

	pub fn compile_delete(&self, query: SelectQuery, target: &TableMeta) -> Result<CompiledStatement> {
		self.finish(Statement::Delete(Synthesizer::delete(query, target)?))
	}

	pub fn compile_update(
		&self,
		query: SelectQuery,
		target: &TableMeta,
		set: Vec<(String, Expr)>,
	) -> Result<CompiledStatement> {
		self.finish(Statement::Update(Synthesizer::update(query, target, set)?))
	}

	pub fn compile_update_join(
		&self,
		outer: SelectQuery,
		inner: TableSource,
		keys: &[String],
		target: &TableMeta,
		set: Vec<(String, Expr)>,
	) -> Result<CompiledStatement> {
		let joined = join_on_keys(outer, inner, keys, target)?;
		self.compile_update(joined, target, set)
	}

	pub fn compile_insert_into(
		&self,
		query: SelectQuery,
		target: &TableMeta,
		generator: &mut relbatch_plan::SourceIdGen,
	) -> Result<CompiledStatement> {
		self.finish(Statement::InsertSelect(Synthesizer::insert_select(query, target, generator)?))
	}

	pub fn compile_upsert(
		&self,
		target_ref: TableRef,
		target: &TableMeta,
		source: MutationSource,
		insert: Vec<(String, Expr)>,
		update: Option<Vec<(String, Expr)>>,
	) -> Result<CompiledStatement> {
		let node = Synthesizer::upsert(target_ref, target, source, insert, update)?;
		self.check_upsert_key(&node.conflict_key, target)?;
		self.finish(Statement::Upsert(node))
	}

	#[allow(clippy::too_many_arguments)]
	pub fn compile_merge(
		&self,
		target_ref: TableRef,
		target: &TableMeta,
		source: MutationSource,
		keys: &[String],
		insert: Option<Vec<(String, Expr)>>,
		update: Option<Vec<(String, Expr)>>,
		delete_unmatched: bool,
	) -> Result<CompiledStatement> {
		let node =
			Synthesizer::merge(target_ref, target, source, keys, insert, update, delete_unmatched)?;
		self.finish(Statement::Merge(node))
	}

	// ── Executing surface ───────────────────────────────────────────

	pub fn batch_delete(
		&self,
		query: SelectQuery,
		target: &TableMeta,
		executor: &mut dyn StatementExecutor,
		cancel: &CancelToken,
	) -> Result<u64> {
		self.run(Statement::Delete(Synthesizer::delete(query, target)?), executor, cancel)
	}

	pub fn batch_update(
		&self,
		query: SelectQuery,
		target: &TableMeta,
		set: Vec<(String, Expr)>,
		executor: &mut dyn StatementExecutor,
		cancel: &CancelToken,
	) -> Result<u64> {
		self.run(Statement::Update(Synthesizer::update(query, target, set)?), executor, cancel)
	}

	#[allow(clippy::too_many_arguments)]
	pub fn batch_update_join(
		&self,
		outer: SelectQuery,
		inner: TableSource,
		keys: &[String],
		target: &TableMeta,
		set: Vec<(String, Expr)>,
		executor: &mut dyn StatementExecutor,
		cancel: &CancelToken,
	) -> Result<u64> {
		let joined = join_on_keys(outer, inner, keys, target)?;
		self.run(Statement::Update(Synthesizer::update(joined, target, set)?), executor, cancel)
	}

	pub fn batch_insert_into(
		&self,
		query: SelectQuery,
		target: &TableMeta,
		generator: &mut relbatch_plan::SourceIdGen,
		executor: &mut dyn StatementExecutor,
		cancel: &CancelToken,
	) -> Result<u64> {
		self.run(
			Statement::InsertSelect(Synthesizer::insert_select(query, target, generator)?),
			executor,
			cancel,
		)
	}

	#[allow(clippy::too_many_arguments)]
	pub fn upsert(
		&self,
		target_ref: TableRef,
		target: &TableMeta,
		source: MutationSource,
		insert: Vec<(String, Expr)>,
		update: Option<Vec<(String, Expr)>>,
		executor: &mut dyn StatementExecutor,
		cancel: &CancelToken,
	) -> Result<u64> {
		let node = Synthesizer::upsert(target_ref, target, source, insert, update)?;
		self.check_upsert_key(&node.conflict_key, target)?;
		self.run(Statement::Upsert(node), executor, cancel)
	}

	#[allow(clippy::too_many_arguments)]
	pub fn merge(
		&self,
		target_ref: TableRef,
		target: &TableMeta,
		source: MutationSource,
		keys: &[String],
		insert: Option<Vec<(String, Expr)>>,
		update: Option<Vec<(String, Expr)>>,
		delete_unmatched: bool,
		executor: &mut dyn StatementExecutor,
		cancel: &CancelToken,
	) -> Result<u64> {
		let node =
			Synthesizer::merge(target_ref, target, source, keys, insert, update, delete_unmatched)?;
		self.run(Statement::Merge(node), executor, cancel)
	}

	// ── Pipeline ────────────────────────────────────────────────────

	#[instrument(level = "debug", skip(self, statement, executor, cancel))]
	fn run(
		&self,
		statement: Statement,
		executor: &mut dyn StatementExecutor,
		cancel: &CancelToken,
	) -> Result<u64> {
		// A statically empty source can affect nothing; no SQL is issued.
		if statement.affects_no_rows() {
			debug!("statically empty source, skipping execution");
			return Ok(0);
		}
		trace!(plan = %relbatch_plan::explain::explain_statement(&statement), "compiling batch statement");
		let compiled = self.finish(statement)?;
		executor.execute(&compiled.sql, &compiled.params, cancel)
	}

	fn finish(&self, statement: Statement) -> Result<CompiledStatement> {
		let statement = selfjoin::optimize_statement(statement, &self.metas);
		let statement =
			values::expand_statement(statement, self.values_strategy(), &self.options.parameter_prefix)?;
		render(&statement, self.options.dialect)
	}

	fn values_strategy(&self) -> ValuesStrategy {
		if self.options.dialect.supports_array_parameters() {
			ValuesStrategy::ArrayParameter
		} else {
			ValuesStrategy::CellParameters
		}
	}

	/// `ON DUPLICATE KEY UPDATE` fires on whichever unique key collides;
	/// routing an alternate-key upsert there would change which rows are
	/// touched, so it is rejected instead.
	fn check_upsert_key(&self, conflict_key: &[String], target: &TableMeta) -> Result<()> {
		if self.options.dialect != Dialect::MySql {
			return Ok(());
		}
		let primary: Vec<&str> = target.primary_key().into_iter().collect();
		if conflict_key.len() == primary.len()
			&& conflict_key.iter().zip(&primary).all(|(a, b)| a == b)
		{
			return Ok(());
		}
		Err(Error::ProviderUnsupported {
			dialect: self.options.dialect.name(),
			feature: format!("upsert over alternate key ({})", conflict_key.join(", ")),
		})
	}
}

/// `outer JOIN inner ON outer.k = inner.k for k in keys`, the shape behind
/// `batch_update_join`.
fn join_on_keys(
	mut outer: SelectQuery,
	inner: TableSource,
	keys: &[String],
	target: &TableMeta,
) -> Result<SelectQuery> {
	let root = outer
		.root_table()
		.ok_or(Error::Shape(relbatch_plan::ShapeError::NotRootEntity {
			operation: "UPDATE",
		}))?
		.clone();
	let mut condition: Option<Expr> = None;
	for key in keys {
		let column = target.column(key).ok_or_else(|| {
			Error::Shape(relbatch_plan::ShapeError::UnknownMember {
				table: target.name.clone(),
				member: key.clone(),
			})
		})?;
		let term = Expr::eq(
			Expr::Column(ColumnRef::new(root.id, key, column.ty)),
			Expr::Column(ColumnRef::new(inner.id(), key, column.ty)),
		);
		condition = Some(Expr::conjoin(condition.take(), term));
	}
	let condition = condition.ok_or(Error::AmbiguousShape {
		operation: "UPDATE",
		reason: "empty join key".into(),
	})?;
	outer.from[0].joins.push(Join {
		kind: JoinKind::Inner,
		table: inner,
		condition,
	});
	Ok(outer)
}
