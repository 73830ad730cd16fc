// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use std::collections::HashMap;

use relbatch_plan::{
	BinaryOp, ColumnRef, Error, Expr, InsertSelectNode, Join, MergeNode, MutationSource, Parameter, Result,
	SelectQuery, SourceExpr, SourceId, Statement, TableRef, TableSource, UnaryOp, UpsertNode, Value, ValueType,
	ValuesNode, ValuesRows,
};
use tracing::{debug, instrument};

use crate::{BoundParam, CompiledStatement, Dialect, UpsertFlavor, mssql, mysql, postgres, sqlite};

/// Render a finished statement to SQL text plus its ordered parameter list.
#[instrument(level = "trace", skip(statement))]
pub fn render(statement: &Statement, dialect: Dialect) -> Result<CompiledStatement> {
	let mut renderer = Renderer::new(dialect);
	renderer.register_statement(statement);
	match statement {
		Statement::Select(query) => renderer.select(query)?,
		Statement::Delete(node) => match dialect {
			Dialect::SqlServer => mssql::delete(&mut renderer, node)?,
			Dialect::Postgres => postgres::delete(&mut renderer, node)?,
			Dialect::MySql => mysql::delete(&mut renderer, node)?,
			Dialect::Sqlite => sqlite::delete(&mut renderer, node)?,
		},
		Statement::Update(node) => match dialect {
			Dialect::SqlServer => mssql::update(&mut renderer, node)?,
			Dialect::MySql => mysql::update(&mut renderer, node)?,
			Dialect::Postgres | Dialect::Sqlite => renderer.update_expanded(node)?,
		},
		Statement::InsertSelect(node) => renderer.insert_select(node)?,
		Statement::Upsert(node) => match dialect.upsert_flavor() {
			UpsertFlavor::OnConflict => renderer.upsert_on_conflict(node)?,
			UpsertFlavor::OnDuplicateKey => mysql::upsert(&mut renderer, node)?,
			UpsertFlavor::Merge => {
				let merge = upsert_as_merge(node)?;
				renderer.merge(&merge)?;
			}
		},
		Statement::Merge(node) => {
			if !dialect.supports_merge() {
				return Err(Error::ProviderUnsupported {
					dialect: dialect.name(),
					feature: "MERGE".into(),
				});
			}
			if node.delete_unmatched_by_source && !dialect.supports_merge_delete_by_source() {
				return Err(Error::ProviderUnsupported {
					dialect: dialect.name(),
					feature: "MERGE ... WHEN NOT MATCHED BY SOURCE".into(),
				});
			}
			renderer.merge(node)?;
		}
	}
	debug!(sql = %renderer.sql, params = renderer.params.len(), "rendered statement");
	Ok(CompiledStatement {
		sql: renderer.sql,
		params: renderer.params,
	})
}

/// Dialects without a native upsert express it as a MERGE on the conflict
/// key.
fn upsert_as_merge(node: &UpsertNode) -> Result<MergeNode> {
	let mut on: Option<Expr> = None;
	for key in &node.conflict_key {
		let source_expr = node
			.insert_columns
			.iter()
			.find(|(member, _)| member == key)
			.map(|(_, expr)| expr.clone())
			.ok_or_else(|| Error::AmbiguousShape {
				operation: "UPSERT",
				reason: format!("conflict key '{key}' has no insert expression"),
			})?;
		let ty = match &source_expr {
			Expr::Column(column) => column.ty,
			_ => ValueType::Int,
		};
		let term = Expr::eq(Expr::Column(ColumnRef::new(node.target.id, key, ty)), source_expr);
		on = Some(Expr::conjoin(on.take(), term));
	}
	Ok(MergeNode {
		target: node.target.clone(),
		source: node.source.clone(),
		on: on.expect("conflict key is never empty"),
		matched_update: node.on_conflict_update.clone(),
		not_matched_insert: Some(node.insert_columns.clone()),
		delete_unmatched_by_source: false,
	})
}

/// How column references to the incoming row render inside a conflict
/// update clause.
pub(crate) enum Incoming {
	/// `excluded.<column>`
	Excluded,
	/// `VALUES(<column>)`
	ValuesFn,
}

pub(crate) struct Renderer {
	pub(crate) dialect: Dialect,
	pub(crate) sql: String,
	pub(crate) params: Vec<BoundParam>,
	scope: HashMap<SourceId, String>,
	incoming: Option<(SourceId, Incoming)>,
	unqualified: Option<SourceId>,
}

impl Renderer {
	fn new(dialect: Dialect) -> Self {
		Self {
			dialect,
			sql: String::new(),
			params: Vec::new(),
			scope: HashMap::new(),
			incoming: None,
			unqualified: None,
		}
	}

	// ── Scope ───────────────────────────────────────────────────────

	fn register_statement(&mut self, statement: &Statement) {
		match statement {
			Statement::Select(query) => self.register_query(query),
			Statement::Delete(node) => {
				self.register_table(&node.target);
				for join in &node.joined {
					self.register_table_source(&join.table);
				}
			}
			Statement::Update(node) => {
				self.register_table(&node.target);
				for join in &node.joined {
					self.register_table_source(&join.table);
				}
			}
			Statement::InsertSelect(node) => {
				self.register_table(&node.target);
				self.register_query(&node.source);
			}
			Statement::Upsert(node) => {
				self.register_table(&node.target);
				self.register_mutation_source(&node.source);
			}
			Statement::Merge(node) => {
				self.register_table(&node.target);
				self.register_mutation_source(&node.source);
			}
		}
	}

	fn register_query(&mut self, query: &SelectQuery) {
		for slot in &query.from {
			self.register_table_source(slot);
		}
		if let Some((_, right)) = &query.set_op {
			self.register_query(right);
		}
	}

	fn register_table_source(&mut self, slot: &TableSource) {
		match &slot.source {
			SourceExpr::Table(table) => self.register_table(table),
			SourceExpr::Query {
				id,
				alias,
				query,
			} => {
				let label = alias.clone().unwrap_or_else(|| format!("s{}", id.0));
				self.scope.insert(*id, label);
				self.register_query(query);
			}
			SourceExpr::Values(values) => self.register_values(values),
		}
		for join in &slot.joins {
			self.register_table_source(&join.table);
		}
	}

	fn register_table(&mut self, table: &TableRef) {
		let label = table.alias.clone().unwrap_or_else(|| table.name.clone());
		self.scope.insert(table.id, label);
	}

	fn register_values(&mut self, values: &ValuesNode) {
		let label = values.alias.clone().unwrap_or_else(|| format!("s{}", values.id.0));
		self.scope.insert(values.id, label);
	}

	fn register_mutation_source(&mut self, source: &MutationSource) {
		match source {
			MutationSource::Values(values) => self.register_values(values),
			MutationSource::Query {
				id,
				alias,
				query,
			} => {
				let label = alias.clone().unwrap_or_else(|| format!("s{}", id.0));
				self.scope.insert(*id, label);
				self.register_query(query);
			}
		}
	}

	pub(crate) fn label(&self, id: SourceId) -> Result<String> {
		self.scope.get(&id).cloned().ok_or_else(|| Error::DanglingColumn {
			column: format!("{id}"),
		})
	}

	pub(crate) fn set_incoming(&mut self, id: SourceId, style: Incoming) {
		self.incoming = Some((id, style));
	}

	pub(crate) fn clear_incoming(&mut self) {
		self.incoming = None;
	}

	pub(crate) fn set_unqualified(&mut self, id: SourceId) {
		self.unqualified = Some(id);
	}

	pub(crate) fn clear_unqualified(&mut self) {
		self.unqualified = None;
	}

	// ── Text building ───────────────────────────────────────────────

	pub(crate) fn push(&mut self, text: &str) {
		self.sql.push_str(text);
	}

	pub(crate) fn ident(&mut self, name: &str) {
		let dialect = self.dialect;
		dialect.quote_into(&mut self.sql, name);
	}

	/// `schema.name`, both quoted.
	pub(crate) fn table_name(&mut self, table: &TableRef) {
		if let Some(schema) = &table.schema {
			self.ident(schema);
			self.push(".");
		}
		self.ident(&table.name);
	}

	/// `schema.name AS alias` (alias only when present).
	pub(crate) fn table_with_alias(&mut self, table: &TableRef) {
		self.table_name(table);
		if let Some(alias) = &table.alias {
			self.push(" AS ");
			self.ident(alias);
		}
	}

	pub(crate) fn comma_idents(&mut self, names: &[String]) {
		for (index, name) in names.iter().enumerate() {
			if index > 0 {
				self.push(", ");
			}
			self.ident(name);
		}
	}

	// ── Expressions ─────────────────────────────────────────────────

	pub(crate) fn column(&mut self, column: &ColumnRef) -> Result<()> {
		if let Some((source, style)) = &self.incoming {
			if *source == column.source {
				match style {
					Incoming::Excluded => {
						self.push("excluded.");
						self.ident(&column.name);
					}
					Incoming::ValuesFn => {
						self.push("VALUES(");
						self.ident(&column.name);
						self.push(")");
					}
				}
				return Ok(());
			}
		}
		if self.unqualified == Some(column.source) {
			self.ident(&column.name);
			return Ok(());
		}
		let label = self.label(column.source).map_err(|_| Error::DanglingColumn {
			column: format!("{}.{}", column.source, column.name),
		})?;
		self.ident(&label);
		self.push(".");
		self.ident(&column.name);
		Ok(())
	}

	pub(crate) fn literal(&mut self, value: &Value) -> Result<()> {
		match value {
			Value::Null => self.push("NULL"),
			Value::Bool(b) => match self.dialect {
				Dialect::SqlServer | Dialect::Sqlite => self.push(if *b {
					"1"
				} else {
					"0"
				}),
				Dialect::Postgres | Dialect::MySql => self.push(if *b {
					"TRUE"
				} else {
					"FALSE"
				}),
			},
			Value::Int(v) => self.push(&v.to_string()),
			Value::Float(v) => self.push(&Value::Float(*v).to_string()),
			Value::Text(text) => {
				let mut escaped = text.replace('\'', "''");
				if self.dialect == Dialect::MySql {
					escaped = escaped.replace('\\', "\\\\");
				}
				self.push("'");
				self.push(&escaped);
				self.push("'");
			}
			Value::Bytes(bytes) => {
				let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
				match self.dialect {
					Dialect::SqlServer => {
						self.push("0x");
						self.push(&hex);
					}
					Dialect::Postgres => {
						self.push("'\\x");
						self.push(&hex);
						self.push("'");
					}
					Dialect::MySql | Dialect::Sqlite => {
						self.push("X'");
						self.push(&hex);
						self.push("'");
					}
				}
			}
			Value::Array(_) => {
				return Err(Error::NotEvaluable {
					reason: "array value outside a bind parameter".into(),
				});
			}
		}
		Ok(())
	}

	pub(crate) fn parameter(&mut self, parameter: &Parameter) -> Result<()> {
		if !parameter.value.matches(parameter.ty) {
			return Err(Error::ParameterBinding {
				parameter: parameter.name.clone(),
				expected: parameter.ty,
				actual: parameter.value.ty().map(|t| t.to_string()).unwrap_or_else(|| "null".into()),
			});
		}
		let placeholder = self.dialect.placeholder(self.params.len());
		self.push(&placeholder);
		self.params.push(BoundParam {
			name: parameter.name.clone(),
			value: parameter.value.clone(),
		});
		Ok(())
	}

	pub(crate) fn expr(&mut self, expr: &Expr, parent: u8) -> Result<()> {
		match expr {
			Expr::Column(column) => self.column(column),
			Expr::Constant(value) => self.literal(value),
			Expr::Parameter(parameter) => self.parameter(parameter),
			Expr::BinaryOp {
				left,
				op: BinaryOp::Concat,
				right,
			} if self.dialect == Dialect::MySql => {
				// MySQL's || is logical OR; string concatenation is CONCAT.
				self.push("CONCAT(");
				self.expr(left, 0)?;
				self.push(", ");
				self.expr(right, 0)?;
				self.push(")");
				Ok(())
			}
			Expr::BinaryOp {
				left,
				op,
				right,
			} => {
				let precedence = binary_precedence(*op);
				let parens = precedence < parent;
				if parens {
					self.push("(");
				}
				self.expr(left, precedence)?;
				self.push(" ");
				self.push(self.binary_op_text(*op));
				self.push(" ");
				self.expr(right, precedence + 1)?;
				if parens {
					self.push(")");
				}
				Ok(())
			}
			Expr::UnaryOp {
				op: UnaryOp::Not,
				expr: inner,
			} => {
				let parens = 3 < parent;
				if parens {
					self.push("(");
				}
				self.push("NOT ");
				self.expr(inner, 4)?;
				if parens {
					self.push(")");
				}
				Ok(())
			}
			Expr::UnaryOp {
				op: UnaryOp::Neg,
				expr: inner,
			} => {
				self.push("-");
				self.expr(inner, 7)?;
				Ok(())
			}
			Expr::FunctionCall {
				name,
				args,
			} => {
				self.push(name);
				self.push("(");
				for (index, arg) in args.iter().enumerate() {
					if index > 0 {
						self.push(", ");
					}
					self.expr(arg, 0)?;
				}
				self.push(")");
				Ok(())
			}
			Expr::Case {
				operand,
				when_clauses,
				else_clause,
			} => {
				self.push("CASE");
				if let Some(operand) = operand {
					self.push(" ");
					self.expr(operand, 0)?;
				}
				for (when, then) in when_clauses {
					self.push(" WHEN ");
					self.expr(when, 0)?;
					self.push(" THEN ");
					self.expr(then, 0)?;
				}
				if let Some(else_clause) = else_clause {
					self.push(" ELSE ");
					self.expr(else_clause, 0)?;
				}
				self.push(" END");
				Ok(())
			}
			Expr::IsNull {
				expr: inner,
				negated,
			} => {
				self.expr(inner, 7)?;
				self.push(if *negated {
					" IS NOT NULL"
				} else {
					" IS NULL"
				});
				Ok(())
			}
			Expr::InList {
				expr: inner,
				list,
				negated,
			} => {
				self.expr(inner, 7)?;
				self.push(if *negated {
					" NOT IN ("
				} else {
					" IN ("
				});
				for (index, item) in list.iter().enumerate() {
					if index > 0 {
						self.push(", ");
					}
					self.expr(item, 0)?;
				}
				self.push(")");
				Ok(())
			}
			Expr::Tuple(items) => {
				self.push("(");
				for (index, item) in items.iter().enumerate() {
					if index > 0 {
						self.push(", ");
					}
					self.expr(item, 0)?;
				}
				self.push(")");
				Ok(())
			}
		}
	}

	fn binary_op_text(&self, op: BinaryOp) -> &'static str {
		match op {
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
			BinaryOp::Concat => match self.dialect {
				Dialect::SqlServer => "+",
				_ => "||",
			},
		}
	}

	pub(crate) fn where_clause(&mut self, predicate: &Option<Expr>) -> Result<()> {
		if let Some(predicate) = predicate {
			self.push(" WHERE ");
			self.expr(predicate, 0)?;
		}
		Ok(())
	}

	/// `col = expr, col = expr, ...`
	pub(crate) fn assignments(&mut self, set: &[(String, Expr)]) -> Result<()> {
		for (index, (column, expr)) in set.iter().enumerate() {
			if index > 0 {
				self.push(", ");
			}
			self.ident(column);
			self.push(" = ");
			self.expr(expr, 0)?;
		}
		Ok(())
	}

	// ── SELECT ──────────────────────────────────────────────────────

	pub(crate) fn select(&mut self, query: &SelectQuery) -> Result<()> {
		self.push("SELECT ");
		if query.distinct {
			self.push("DISTINCT ");
		}
		if let (Dialect::SqlServer, Some(limit), true) =
			(self.dialect, query.limit, query.order_by.is_empty())
		{
			self.push(&format!("TOP ({limit}) "));
		}
		if query.projection.is_empty() {
			self.push("*");
		} else {
			for (index, (alias, expr)) in query.projection.iter().enumerate() {
				if index > 0 {
					self.push(", ");
				}
				self.expr(expr, 0)?;
				let natural = matches!(expr, Expr::Column(column) if column.name == *alias);
				if !natural && !alias.is_empty() {
					self.push(" AS ");
					self.ident(alias);
				}
			}
		}
		if !query.from.is_empty() {
			self.push(" FROM ");
			for (index, slot) in query.from.iter().enumerate() {
				if index > 0 {
					self.push(", ");
				}
				self.table_source(slot)?;
			}
		}
		self.where_clause(&query.predicate)?;
		if !query.group_by.is_empty() {
			self.push(" GROUP BY ");
			for (index, expr) in query.group_by.iter().enumerate() {
				if index > 0 {
					self.push(", ");
				}
				self.expr(expr, 0)?;
			}
		}
		if let Some(having) = &query.having {
			self.push(" HAVING ");
			self.expr(having, 0)?;
		}
		if !query.order_by.is_empty() {
			self.push(" ORDER BY ");
			for (index, key) in query.order_by.iter().enumerate() {
				if index > 0 {
					self.push(", ");
				}
				self.expr(&key.expr, 0)?;
				if key.descending {
					self.push(" DESC");
				}
			}
		}
		self.limit_clause(query)?;
		if let Some((kind, right)) = &query.set_op {
			self.push(match kind {
				relbatch_plan::SetOpKind::Union => " UNION ALL ",
				relbatch_plan::SetOpKind::UnionDistinct => " UNION ",
			});
			self.select(right)?;
		}
		Ok(())
	}

	fn limit_clause(&mut self, query: &SelectQuery) -> Result<()> {
		match self.dialect {
			Dialect::SqlServer => {
				if query.offset.is_some() || (query.limit.is_some() && !query.order_by.is_empty()) {
					if query.order_by.is_empty() {
						return Err(Error::ProviderUnsupported {
							dialect: self.dialect.name(),
							feature: "OFFSET without ORDER BY".into(),
						});
					}
					let offset = query.offset.unwrap_or(0);
					self.push(&format!(" OFFSET {offset} ROWS"));
					if let Some(limit) = query.limit {
						self.push(&format!(" FETCH NEXT {limit} ROWS ONLY"));
					}
				}
			}
			Dialect::Postgres | Dialect::Sqlite => {
				if let Some(limit) = query.limit {
					self.push(&format!(" LIMIT {limit}"));
				}
				if let Some(offset) = query.offset {
					self.push(&format!(" OFFSET {offset}"));
				}
			}
			Dialect::MySql => {
				if query.offset.is_some() && query.limit.is_none() {
					return Err(Error::ProviderUnsupported {
						dialect: self.dialect.name(),
						feature: "OFFSET without LIMIT".into(),
					});
				}
				if let Some(limit) = query.limit {
					self.push(&format!(" LIMIT {limit}"));
					if let Some(offset) = query.offset {
						self.push(&format!(" OFFSET {offset}"));
					}
				}
			}
		}
		Ok(())
	}

	pub(crate) fn table_source(&mut self, slot: &TableSource) -> Result<()> {
		match &slot.source {
			SourceExpr::Table(table) => self.table_with_alias(table),
			SourceExpr::Query {
				id,
				query,
				..
			} => {
				self.push("(");
				self.select(query)?;
				self.push(") AS ");
				let label = self.label(*id)?;
				self.ident(&label);
			}
			SourceExpr::Values(values) => self.values_table(values)?,
		}
		for join in &slot.joins {
			self.join(join)?;
		}
		Ok(())
	}

	pub(crate) fn join(&mut self, join: &Join) -> Result<()> {
		self.push(match join.kind {
			relbatch_plan::JoinKind::Inner => " JOIN ",
			relbatch_plan::JoinKind::Left => " LEFT JOIN ",
		});
		self.table_source(&join.table)?;
		self.push(" ON ");
		self.expr(&join.condition, 0)?;
		Ok(())
	}

	// ── Values sources ──────────────────────────────────────────────

	/// A values batch in table position.
	pub(crate) fn values_table(&mut self, values: &ValuesNode) -> Result<()> {
		let label = self.label(values.id)?;
		if values.is_empty() {
			self.empty_source_select(values)?;
			self.push(" AS ");
			self.ident(&label);
			return Ok(());
		}
		match &values.rows {
			ValuesRows::Literal(rows) => {
				if self.dialect.supports_values_table() {
					self.push("(VALUES ");
					self.literal_rows(rows)?;
					self.push(") AS ");
					self.ident(&label);
					self.push(" (");
					let names: Vec<String> =
						values.columns.iter().map(|column| column.name.clone()).collect();
					self.comma_idents(&names);
					self.push(")");
				} else {
					// UNION ALL of single-row selects; the first one names
					// the columns.
					self.push("(");
					for (row_index, row) in rows.iter().enumerate() {
						if row_index > 0 {
							self.push(" UNION ALL SELECT ");
						} else {
							self.push("SELECT ");
						}
						for (col_index, cell) in row.iter().enumerate() {
							if col_index > 0 {
								self.push(", ");
							}
							self.expr(cell, 0)?;
							if row_index == 0 {
								self.push(" AS ");
								self.ident(&values.columns[col_index].name);
							}
						}
					}
					self.push(") AS ");
					self.ident(&label);
				}
			}
			ValuesRows::Parameterized {
				parameter,
				row_count,
			} => {
				if !self.dialect.supports_array_parameters() {
					return Err(Error::ProviderUnsupported {
						dialect: self.dialect.name(),
						feature: "array-typed bind parameters".into(),
					});
				}
				self.unnest(values, parameter, *row_count)?;
				self.push(" AS ");
				self.ident(&label);
				self.push(" (");
				let names: Vec<String> = values.columns.iter().map(|column| column.name.clone()).collect();
				self.comma_idents(&names);
				self.push(")");
			}
		}
		Ok(())
	}

	/// `UNNEST($1, $2)` with one array parameter per column, split
	/// column-major out of the row-major batch parameter.
	fn unnest(&mut self, values: &ValuesNode, parameter: &Parameter, row_count: usize) -> Result<()> {
		let Value::Array(cells) = &parameter.value else {
			return Err(Error::ParameterBinding {
				parameter: parameter.name.clone(),
				expected: ValueType::Array,
				actual: parameter.value.ty().map(|t| t.to_string()).unwrap_or_else(|| "null".into()),
			});
		};
		let columns = values.columns.len();
		if cells.len() != row_count * columns {
			return Err(Error::ParameterBinding {
				parameter: parameter.name.clone(),
				expected: ValueType::Array,
				actual: format!("array of {} cells, expected {}", cells.len(), row_count * columns),
			});
		}
		self.push("UNNEST(");
		for (col_index, column) in values.columns.iter().enumerate() {
			if col_index > 0 {
				self.push(", ");
			}
			let column_cells: Vec<Value> =
				cells.iter().skip(col_index).step_by(columns).cloned().collect();
			self.parameter(&Parameter::new(
				format!("{}_{}", parameter.name, column.name),
				ValueType::Array,
				Value::Array(column_cells),
			))?;
		}
		self.push(")");
		Ok(())
	}

	pub(crate) fn literal_rows(&mut self, rows: &[Vec<Expr>]) -> Result<()> {
		for (row_index, row) in rows.iter().enumerate() {
			if row_index > 0 {
				self.push(", ");
			}
			self.push("(");
			for (col_index, cell) in row.iter().enumerate() {
				if col_index > 0 {
					self.push(", ");
				}
				self.expr(cell, 0)?;
			}
			self.push(")");
		}
		Ok(())
	}

	/// The no-op source shape: a projection of NULLs that matches the
	/// column list and can never produce a row.
	pub(crate) fn empty_source_select(&mut self, values: &ValuesNode) -> Result<()> {
		self.push("(SELECT ");
		for (index, column) in values.columns.iter().enumerate() {
			if index > 0 {
				self.push(", ");
			}
			self.push("NULL AS ");
			self.ident(&column.name);
		}
		if self.dialect == Dialect::MySql {
			self.push(" FROM DUAL");
		}
		self.push(" WHERE 1 = 0)");
		Ok(())
	}

	// ── INSERT ... SELECT ───────────────────────────────────────────

	pub(crate) fn insert_select(&mut self, node: &InsertSelectNode) -> Result<()> {
		self.push("INSERT INTO ");
		self.table_name(&node.target);
		self.push(" (");
		self.comma_idents(&node.columns);
		self.push(") ");
		self.select(&node.source)
	}

	// ── UPDATE, expanded form ───────────────────────────────────────

	/// `UPDATE t AS a SET ... FROM s, u WHERE ...`, joins folded into the
	/// predicate first; dialects using this form cannot drive an update
	/// from a LEFT-joined source.
	pub(crate) fn update_expanded(&mut self, node: &relbatch_plan::UpdateNode) -> Result<()> {
		let expanded = node.expand();
		if expanded.joined.iter().any(|join| join.kind == relbatch_plan::JoinKind::Left) {
			return Err(Error::ProviderUnsupported {
				dialect: self.dialect.name(),
				feature: "LEFT JOIN in UPDATE".into(),
			});
		}
		self.push("UPDATE ");
		self.table_with_alias(&expanded.target);
		self.push(" SET ");
		self.assignments(&expanded.set)?;
		if !expanded.joined.is_empty() {
			self.push(" FROM ");
			for (index, join) in expanded.joined.iter().enumerate() {
				if index > 0 {
					self.push(", ");
				}
				match &join.table.source {
					SourceExpr::Table(table) => self.table_with_alias(table),
					SourceExpr::Query {
						id,
						query,
						..
					} => {
						self.push("(");
						self.select(query)?;
						self.push(") AS ");
						let label = self.label(*id)?;
						self.ident(&label);
					}
					SourceExpr::Values(values) => self.values_table(values)?,
				}
			}
		}
		self.where_clause(&expanded.predicate)
	}

	// ── UPSERT (ON CONFLICT) ────────────────────────────────────────

	pub(crate) fn upsert_on_conflict(&mut self, node: &UpsertNode) -> Result<()> {
		self.push("INSERT INTO ");
		self.table_with_alias(&node.target);
		self.push(" (");
		let members: Vec<String> = node.insert_columns.iter().map(|(member, _)| member.clone()).collect();
		self.comma_idents(&members);
		self.push(") ");
		let trailing_where = self.upsert_source(node)?;
		if trailing_where && self.dialect == Dialect::Sqlite {
			// disambiguates the upsert clause after a SELECT source
			self.push(" WHERE true");
		}
		self.push(" ON CONFLICT (");
		self.comma_idents(&node.conflict_key);
		self.push(")");
		match &node.on_conflict_update {
			Some(update) => {
				self.push(" DO UPDATE SET ");
				self.set_incoming(node.source.id(), Incoming::Excluded);
				self.assignments(update)?;
				self.clear_incoming();
			}
			None => self.push(" DO NOTHING"),
		}
		Ok(())
	}

	/// The insert source. Returns whether a bare SELECT without WHERE was
	/// emitted (the sqlite upsert-parsing corner).
	pub(crate) fn upsert_source(&mut self, node: &UpsertNode) -> Result<bool> {
		match &node.source {
			MutationSource::Values(values) if values.is_empty() => {
				self.push("SELECT ");
				for (index, _) in node.insert_columns.iter().enumerate() {
					if index > 0 {
						self.push(", ");
					}
					self.push("NULL");
				}
				if self.dialect == Dialect::MySql {
					self.push(" FROM DUAL");
				}
				self.push(" WHERE 1 = 0");
				Ok(false)
			}
			MutationSource::Values(values) => {
				if let Some(order) = plain_column_order(node, values) {
					let ValuesRows::Literal(rows) = &values.rows else {
						return self.upsert_select_source(node);
					};
					self.push("VALUES ");
					let reordered: Vec<Vec<Expr>> = rows
						.iter()
						.map(|row| order.iter().map(|&index| row[index].clone()).collect())
						.collect();
					self.literal_rows(&reordered)?;
					Ok(false)
				} else {
					self.upsert_select_source(node)
				}
			}
			MutationSource::Query {
				query,
				..
			} => {
				let plain = query.predicate.is_none();
				self.select(query)?;
				Ok(plain)
			}
		}
	}

	/// `SELECT <insert exprs> FROM <values table>` for shapes where the
	/// insert expressions are more than plain column pass-throughs.
	fn upsert_select_source(&mut self, node: &UpsertNode) -> Result<bool> {
		let MutationSource::Values(values) = &node.source else {
			unreachable!("only called for values sources");
		};
		self.push("SELECT ");
		for (index, (_, expr)) in node.insert_columns.iter().enumerate() {
			if index > 0 {
				self.push(", ");
			}
			self.expr(expr, 0)?;
		}
		self.push(" FROM ");
		self.values_table(values)?;
		Ok(true)
	}

	// ── MERGE ───────────────────────────────────────────────────────

	pub(crate) fn merge(&mut self, node: &MergeNode) -> Result<()> {
		self.push("MERGE INTO ");
		self.table_with_alias(&node.target);
		self.push(" USING ");
		match &node.source {
			MutationSource::Values(values) => self.values_table(values)?,
			MutationSource::Query {
				id,
				query,
				..
			} => {
				self.push("(");
				self.select(query)?;
				self.push(") AS ");
				let label = self.label(*id)?;
				self.ident(&label);
			}
		}
		self.push(" ON ");
		self.expr(&node.on, 0)?;
		if let Some(update) = &node.matched_update {
			self.push(" WHEN MATCHED THEN UPDATE SET ");
			self.assignments(update)?;
		}
		if let Some(insert) = &node.not_matched_insert {
			self.push(" WHEN NOT MATCHED THEN INSERT (");
			let members: Vec<String> = insert.iter().map(|(member, _)| member.clone()).collect();
			self.comma_idents(&members);
			self.push(") VALUES (");
			for (index, (_, expr)) in insert.iter().enumerate() {
				if index > 0 {
					self.push(", ");
				}
				self.expr(expr, 0)?;
			}
			self.push(")");
		}
		if node.delete_unmatched_by_source {
			self.push(" WHEN NOT MATCHED BY SOURCE THEN DELETE");
		}
		if self.dialect == Dialect::SqlServer {
			self.push(";");
		}
		Ok(())
	}
}

/// When every insert expression is a plain pass-through of a source column,
/// the upsert can use the simple `VALUES` form; returns the values-column
/// index for each insert member in order.
fn plain_column_order(node: &UpsertNode, values: &ValuesNode) -> Option<Vec<usize>> {
	node.insert_columns
		.iter()
		.map(|(_, expr)| match expr {
			Expr::Column(column) if column.source == values.id => values.column_index(&column.name),
			_ => None,
		})
		.collect()
}

fn binary_precedence(op: BinaryOp) -> u8 {
	match op {
		BinaryOp::Or => 1,
		BinaryOp::And => 2,
		BinaryOp::Eq
		| BinaryOp::NotEq
		| BinaryOp::Lt
		| BinaryOp::Gt
		| BinaryOp::LtEq
		| BinaryOp::GtEq => 4,
		BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat => 5,
		BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
	}
}
