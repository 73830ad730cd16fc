// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! End-to-end scenarios: the compile pipeline against the wire-level SQL it
//! must produce, and the fallback executor against the row counts the same
//! operations must report.

use std::sync::Arc;

use relbatch_dialect::{BoundParam, Dialect};
use relbatch_engine::{CancelToken, Engine, EngineOptions, RowBatch, StatementExecutor};
use relbatch_fallback::{
	MemTable, delete_where,
	eval::{RowEnv, eval, eval_predicate},
	merge::{MergeSpec, merge_rows},
};
use relbatch_plan::{
	ColumnMeta, ColumnRef, Error, Expr, MutationSource, Result, SelectQuery, ShapeError, SourceIdGen,
	Statement, TableMeta, TableSource, Value, ValueType, ValuesColumn,
};
use relbatch_rewrite::selfjoin;

fn item_meta() -> Arc<TableMeta> {
	Arc::new(TableMeta::new(
		"Item",
		vec![
			ColumnMeta::new("ItemId", ValueType::Int).primary_key(),
			ColumnMeta::new("Price", ValueType::Float),
		],
	))
}

fn rank_cache_meta() -> Arc<TableMeta> {
	Arc::new(TableMeta::new(
		"RankCache",
		vec![
			ColumnMeta::new("ContestId", ValueType::Int).primary_key(),
			ColumnMeta::new("TeamId", ValueType::Int).primary_key(),
			ColumnMeta::new("PointsPublic", ValueType::Int),
		],
	))
}

fn col(id: relbatch_plan::SourceId, name: &str, ty: ValueType) -> Expr {
	Expr::Column(ColumnRef::new(id, name, ty))
}

#[derive(Default)]
struct RecordingExecutor {
	calls: Vec<(String, usize)>,
	affected: u64,
	saw_cancelled: bool,
}

impl StatementExecutor for RecordingExecutor {
	fn execute(&mut self, sql: &str, params: &[BoundParam], cancel: &CancelToken) -> Result<u64> {
		self.calls.push((sql.to_string(), params.len()));
		self.saw_cancelled = cancel.is_cancelled();
		Ok(self.affected)
	}
}

// ── Scenario: Item delete ───────────────────────────────────────────────

fn item_delete_query() -> (Arc<TableMeta>, relbatch_plan::SourceId, SelectQuery) {
	let meta = item_meta();
	let mut generator = SourceIdGen::new();
	let table = meta.table_ref(generator.next()).with_alias("i");
	let id = table.id;
	let predicate = Expr::and(
		Expr::gt(col(id, "ItemId", ValueType::Int), Expr::constant(500)),
		Expr::eq(col(id, "Price", ValueType::Float), Expr::constant(3.0)),
	);
	(meta, id, SelectQuery::scan(table).with_predicate(predicate))
}

#[test]
fn test_item_delete_emits_expected_tsql() {
	let (meta, _, query) = item_delete_query();
	let engine = Engine::new(EngineOptions::new(Dialect::SqlServer));
	let compiled = engine.compile_delete(query, &meta).unwrap();
	assert_eq!(
		compiled.sql,
		"DELETE [i] FROM [Item] AS [i] WHERE [i].[ItemId] > 500 AND [i].[Price] = 3.0"
	);
	assert!(compiled.params.is_empty());
}

#[test]
fn test_item_delete_affects_exactly_two_rows_in_memory() {
	let (meta, id, query) = item_delete_query();
	let mut table = MemTable::new(meta);
	for (item_id, price) in [(499, 3.0), (510, 3.0), (522, 3.0), (600, 2.5)] {
		table.insert_row(vec![Value::Int(item_id), Value::Float(price)]).unwrap();
	}

	let affected = delete_where(&mut table, id, query.predicate.as_ref()).unwrap();
	assert_eq!(affected, 2);
	assert_eq!(table.len(), 2);
}

#[test]
fn test_delete_with_limit_is_rejected() {
	let (meta, _, mut query) = item_delete_query();
	query.limit = Some(1);
	let engine = Engine::new(EngineOptions::new(Dialect::SqlServer));
	let err = engine.compile_delete(query, &meta).unwrap_err();
	assert_eq!(
		err,
		Error::Shape(ShapeError::RowLimit {
			operation: "DELETE"
		})
	);
}

// ── Scenario: RankCache upsert ──────────────────────────────────────────

struct UpsertParts {
	meta: Arc<TableMeta>,
	target: relbatch_plan::TableRef,
	source: MutationSource,
	insert: Vec<(String, Expr)>,
	update: Vec<(String, Expr)>,
}

fn rank_cache_upsert(rows: Vec<Vec<Value>>) -> UpsertParts {
	let meta = rank_cache_meta();
	let mut generator = SourceIdGen::new();
	let target = meta.table_ref(generator.next());
	let mut batch = RowBatch::new(vec![
		ValuesColumn::new("ContestId", ValueType::Int),
		ValuesColumn::new("TeamId", ValueType::Int),
		ValuesColumn::new("PointsPublic", ValueType::Int),
	]);
	for row in rows {
		batch.push(row).unwrap();
	}
	let values = batch.into_values(generator.next(), "rows");
	let insert: Vec<(String, Expr)> = values
		.columns
		.iter()
		.map(|column| (column.name.clone(), col(values.id, &column.name, column.ty)))
		.collect();
	let update = vec![(
		"PointsPublic".to_string(),
		Expr::add(
			col(target.id, "PointsPublic", ValueType::Int),
			col(values.id, "PointsPublic", ValueType::Int),
		),
	)];
	UpsertParts {
		meta,
		target,
		source: MutationSource::Values(values),
		insert,
		update,
	}
}

#[test]
fn test_rank_cache_upsert_compiles_on_conflict() {
	let parts = rank_cache_upsert(vec![
		vec![Value::Int(1), Value::Int(101), Value::Int(5)],
		vec![Value::Int(1), Value::Int(999), Value::Int(7)],
	]);
	let engine = Engine::new(EngineOptions::new(Dialect::Sqlite));
	let compiled = engine
		.compile_upsert(parts.target, &parts.meta, parts.source, parts.insert, Some(parts.update))
		.unwrap();

	// cell expansion: 2 rows × 3 columns
	assert_eq!(compiled.params.len(), 6);
	assert!(compiled.sql.starts_with("INSERT INTO \"RankCache\""));
	assert!(compiled.sql.contains("ON CONFLICT (\"ContestId\", \"TeamId\") DO UPDATE SET"));
	assert!(compiled.sql.contains("excluded.\"PointsPublic\""));
	let names: Vec<&str> = compiled.params.iter().map(|p| p.name.as_str()).collect();
	assert_eq!(names, ["p_0_0", "p_0_1", "p_0_2", "p_1_0", "p_1_1", "p_1_2"]);
}

#[test]
fn test_rank_cache_upsert_one_insert_one_update_in_memory() {
	let meta = rank_cache_meta();
	let mut table = MemTable::new(Arc::clone(&meta));
	table.insert_row(vec![Value::Int(1), Value::Int(101), Value::Int(10)]).unwrap();

	let mut generator = SourceIdGen::new();
	let target_id = generator.next();
	let source_id = generator.next();
	let source_columns: Vec<String> =
		["ContestId", "TeamId", "PointsPublic"].iter().map(|s| s.to_string()).collect();
	// one existing key, one new key
	let source_rows = vec![
		vec![Value::Int(1), Value::Int(101), Value::Int(5)],
		vec![Value::Int(1), Value::Int(999), Value::Int(7)],
	];
	let key = ["ContestId".to_string(), "TeamId".to_string()];
	let update = [(
		"PointsPublic".to_string(),
		Expr::add(col(target_id, "PointsPublic", ValueType::Int), col(source_id, "PointsPublic", ValueType::Int)),
	)];
	let insert = [
		("ContestId".to_string(), col(source_id, "ContestId", ValueType::Int)),
		("TeamId".to_string(), col(source_id, "TeamId", ValueType::Int)),
		("PointsPublic".to_string(), col(source_id, "PointsPublic", ValueType::Int)),
	];

	let affected = merge_rows(
		&mut table,
		&source_columns,
		&source_rows,
		&MergeSpec {
			target_id,
			source_id,
			key: &key,
			update: Some(&update),
			insert: Some(&insert),
			delete_unmatched: false,
		},
	)
	.unwrap();

	assert_eq!(affected, 2);
	assert_eq!(table.len(), 2);
	// the update applied only to the pre-existing row
	assert_eq!(table.rows[0], vec![Value::Int(1), Value::Int(101), Value::Int(15)]);
	assert_eq!(table.rows[1], vec![Value::Int(1), Value::Int(999), Value::Int(7)]);
}

#[test]
fn test_empty_batch_upsert_is_a_noop() {
	let parts = rank_cache_upsert(vec![]);
	let engine = Engine::new(EngineOptions::new(Dialect::Postgres));
	let mut executor = RecordingExecutor {
		affected: 99,
		..Default::default()
	};

	let affected = engine
		.upsert(
			parts.target,
			&parts.meta,
			parts.source,
			parts.insert,
			Some(parts.update),
			&mut executor,
			&CancelToken::new(),
		)
		.unwrap();

	assert_eq!(affected, 0);
	assert!(executor.calls.is_empty());
}

#[test]
fn test_mysql_rejects_alternate_key_upsert() {
	let meta = Arc::new(
		TableMeta::new(
			"User",
			vec![
				ColumnMeta::new("Id", ValueType::Int).primary_key(),
				ColumnMeta::new("Email", ValueType::Text),
				ColumnMeta::new("Name", ValueType::Text),
			],
		)
		.with_alternate_key(vec!["Email".into()]),
	);
	let mut generator = SourceIdGen::new();
	let target = meta.table_ref(generator.next());
	let mut batch = RowBatch::new(vec![
		ValuesColumn::new("Email", ValueType::Text),
		ValuesColumn::new("Name", ValueType::Text),
	]);
	batch.push(vec![Value::Text("a@b".into()), Value::Text("A".into())]).unwrap();
	let values = batch.into_values(generator.next(), "rows");
	let insert: Vec<(String, Expr)> = values
		.columns
		.iter()
		.map(|column| (column.name.clone(), col(values.id, &column.name, column.ty)))
		.collect();

	let engine = Engine::new(EngineOptions::new(Dialect::MySql));
	let err = engine
		.compile_upsert(target, &meta, MutationSource::Values(values), insert, None)
		.unwrap_err();
	assert!(matches!(err, Error::ProviderUnsupported { .. }));
}

// ── batch_update_join ───────────────────────────────────────────────────

#[test]
fn test_update_join_compiles_tsql() {
	let item = item_meta();
	let discount = Arc::new(TableMeta::new(
		"Discount",
		vec![
			ColumnMeta::new("ItemId", ValueType::Int).primary_key(),
			ColumnMeta::new("Amount", ValueType::Float),
		],
	));
	let mut generator = SourceIdGen::new();
	let outer_table = item.table_ref(generator.next()).with_alias("i");
	let outer_id = outer_table.id;
	let inner_table = discount.table_ref(generator.next()).with_alias("d");
	let inner_id = inner_table.id;
	let outer = SelectQuery::scan(outer_table);

	let mut engine = Engine::new(EngineOptions::new(Dialect::SqlServer));
	engine.register(Arc::clone(&item));
	engine.register(Arc::clone(&discount));

	let set = vec![(
		"Price".to_string(),
		Expr::binary(
			col(outer_id, "Price", ValueType::Float),
			relbatch_plan::BinaryOp::Sub,
			col(inner_id, "Amount", ValueType::Float),
		),
	)];
	let compiled = engine
		.compile_update_join(outer, TableSource::table(inner_table), &["ItemId".into()], &item, set)
		.unwrap();

	assert_eq!(
		compiled.sql,
		"UPDATE [i] SET [Price] = [i].[Price] - [d].[Amount] FROM [Item] AS [i] \
		 JOIN [Discount] AS [d] ON [i].[ItemId] = [d].[ItemId]"
	);
}

// ── Cancellation pass-through ───────────────────────────────────────────

#[test]
fn test_cancel_token_reaches_executor() {
	let (meta, _, query) = item_delete_query();
	let engine = Engine::new(EngineOptions::new(Dialect::SqlServer));
	let mut executor = RecordingExecutor::default();
	let cancel = CancelToken::new();
	cancel.cancel();

	engine.batch_delete(query, &meta, &mut executor, &cancel).unwrap();
	assert!(executor.saw_cancelled);
	assert_eq!(executor.calls.len(), 1);
}

// ── Self-join soundness ─────────────────────────────────────────────────

/// Nested-loop reference execution of a query over a single table with a
/// chain of inner self-joins; enough to compare optimized and unoptimized
/// plans row for row.
fn execute_reference(query: &SelectQuery, table: &MemTable) -> Vec<Vec<Value>> {
	let columns: Vec<String> = table.meta.columns.iter().map(|column| column.name.clone()).collect();
	let root = query.from[0].id();
	let joins = &query.from[0].joins;

	let mut results = Vec::new();
	for left in &table.rows {
		// candidate bindings for the join chain, built left to right
		let mut bindings: Vec<Vec<&Vec<Value>>> = vec![vec![left]];
		for _ in joins {
			let mut extended = Vec::new();
			for binding in &bindings {
				for right in &table.rows {
					let mut next = binding.clone();
					next.push(right);
					extended.push(next);
				}
			}
			bindings = extended;
		}

		for binding in bindings {
			let mut env = RowEnv::new().bind(root, &columns, binding[0]);
			for (join, row) in joins.iter().zip(binding[1..].iter()) {
				env = env.bind(join.table.id(), &columns, row);
			}
			let join_ok = joins
				.iter()
				.map(|join| eval_predicate(&join.condition, &env))
				.collect::<Result<Vec<bool>>>()
				.unwrap()
				.into_iter()
				.all(|ok| ok);
			if !join_ok {
				continue;
			}
			if let Some(predicate) = &query.predicate {
				if !eval_predicate(predicate, &env).unwrap() {
					continue;
				}
			}
			results.push(
				query.projection
					.iter()
					.map(|(_, expr)| eval(expr, &env).unwrap())
					.collect::<Vec<Value>>(),
			);
		}
	}
	results.sort_by_key(|row| format!("{row:?}"));
	results
}

#[test]
fn test_selfjoin_elimination_preserves_results() {
	let meta = item_meta();
	let mut table = MemTable::new(Arc::clone(&meta));
	for (item_id, price) in [(1, 1.0), (2, 3.0), (3, 3.0), (4, 9.5)] {
		table.insert_row(vec![Value::Int(item_id), Value::Float(price)]).unwrap();
	}

	let mut generator = SourceIdGen::new();
	let a = meta.table_ref(generator.next());
	let b = meta.table_ref(generator.next());
	let query = SelectQuery {
		from: vec![TableSource::table(a.clone()).join(
			relbatch_plan::JoinKind::Inner,
			TableSource::table(b.clone()),
			Expr::eq(col(a.id, "ItemId", ValueType::Int), col(b.id, "ItemId", ValueType::Int)),
		)],
		projection: vec![
			("ItemId".into(), col(a.id, "ItemId", ValueType::Int)),
			("Price".into(), col(b.id, "Price", ValueType::Float)),
		],
		predicate: Some(Expr::eq(col(b.id, "Price", ValueType::Float), Expr::constant(3.0))),
		..Default::default()
	};

	let mut metas = relbatch_plan::MetaRegistry::new();
	metas.register(Arc::clone(&meta));
	let optimized = selfjoin::optimize_query(query.clone(), &metas);
	assert!(optimized.from[0].joins.is_empty());

	let expected = execute_reference(&query, &table);
	let actual = execute_reference(&optimized, &table);
	assert_eq!(expected, actual);
	assert_eq!(actual.len(), 2);
}

#[test]
fn test_optimizer_is_idempotent_at_statement_level() {
	let meta = item_meta();
	let mut generator = SourceIdGen::new();
	let a = meta.table_ref(generator.next());
	let b = meta.table_ref(generator.next());
	let query = SelectQuery {
		from: vec![TableSource::table(a.clone()).join(
			relbatch_plan::JoinKind::Inner,
			TableSource::table(b.clone()),
			Expr::eq(col(a.id, "ItemId", ValueType::Int), col(b.id, "ItemId", ValueType::Int)),
		)],
		projection: vec![("Price".into(), col(b.id, "Price", ValueType::Float))],
		..Default::default()
	};

	let mut metas = relbatch_plan::MetaRegistry::new();
	metas.register(Arc::clone(&meta));

	let once = selfjoin::optimize_statement(Statement::Select(query), &metas);
	let twice = selfjoin::optimize_statement(once.clone(), &metas);
	assert_eq!(once, twice);
}
