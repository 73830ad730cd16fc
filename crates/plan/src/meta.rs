// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use std::{any::TypeId, sync::Arc};

use dashmap::DashMap;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
	table::{SourceId, TableRef},
	value::ValueType,
};

/// Column mapping owned by the external mapping collaborator. Read-only
/// from this engine's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
	pub name: String,
	pub ty: ValueType,
	pub nullable: bool,
	pub in_primary_key: bool,
}

impl ColumnMeta {
	pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
		Self {
			name: name.into(),
			ty,
			nullable: false,
			in_primary_key: false,
		}
	}

	pub fn nullable(mut self) -> Self {
		self.nullable = true;
		self
	}

	pub fn primary_key(mut self) -> Self {
		self.in_primary_key = true;
		self
	}
}

/// Table mapping: ordered columns, primary key, declared alternate keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
	pub schema: Option<String>,
	pub name: String,
	pub columns: Vec<ColumnMeta>,
	pub alternate_keys: Vec<Vec<String>>,
}

impl TableMeta {
	pub fn new(name: impl Into<String>, columns: Vec<ColumnMeta>) -> Self {
		Self {
			schema: None,
			name: name.into(),
			columns,
			alternate_keys: Vec::new(),
		}
	}

	pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
		self.schema = Some(schema.into());
		self
	}

	pub fn with_alternate_key(mut self, key: Vec<String>) -> Self {
		self.alternate_keys.push(key);
		self
	}

	pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
		self.columns.iter().find(|column| column.name == name)
	}

	pub fn primary_key(&self) -> SmallVec<[&str; 4]> {
		self.columns.iter().filter(|column| column.in_primary_key).map(|column| column.name.as_str()).collect()
	}

	/// The key an upsert uses to detect an existing row: the primary key if
	/// the given columns cover it, else the first covered alternate key.
	pub fn conflict_key_covered_by(&self, columns: &[String]) -> Option<Vec<String>> {
		let covered = |key: &[&str]| key.iter().all(|k| columns.iter().any(|c| c == k));

		let primary: Vec<&str> = self.primary_key().into_iter().collect();
		if !primary.is_empty() && covered(&primary) {
			return Some(primary.iter().map(|k| k.to_string()).collect());
		}
		for key in &self.alternate_keys {
			let key_refs: Vec<&str> = key.iter().map(String::as_str).collect();
			if !key_refs.is_empty() && covered(&key_refs) {
				return Some(key.clone());
			}
		}
		None
	}

	/// A fresh occurrence of this table.
	pub fn table_ref(&self, id: SourceId) -> TableRef {
		TableRef {
			id,
			schema: self.schema.clone(),
			name: self.name.clone(),
			alias: None,
		}
	}
}

/// A row type whose mapping the collaborator can describe.
pub trait RowType: 'static {
	fn table_meta() -> TableMeta;
}

fn cache() -> &'static DashMap<TypeId, Arc<TableMeta>> {
	static CACHE: OnceCell<DashMap<TypeId, Arc<TableMeta>>> = OnceCell::new();
	CACHE.get_or_init(DashMap::new)
}

/// Process-wide get-or-create of a row type's table metadata.
///
/// Concurrent callers may construct the value more than once; exactly one
/// construction wins and every caller observes the winner. Entries are never
/// invalidated within a process lifetime.
pub fn table_meta_of<T: RowType>() -> Arc<TableMeta> {
	let key = TypeId::of::<T>();
	if let Some(existing) = cache().get(&key) {
		return Arc::clone(existing.value());
	}
	let constructed = Arc::new(T::table_meta());
	cache().entry(key).or_insert(constructed).value().clone()
}

/// Name-keyed metadata lookup for passes that only see table names in the
/// plan (the self-join pass resolves primary keys through this). Iteration
/// follows registration order.
#[derive(Debug, Default, Clone)]
pub struct MetaRegistry {
	tables: IndexMap<(Option<String>, String), Arc<TableMeta>>,
}

impl MetaRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, meta: Arc<TableMeta>) {
		self.tables.insert((meta.schema.clone(), meta.name.clone()), meta);
	}

	pub fn get(&self, schema: Option<&str>, name: &str) -> Option<&Arc<TableMeta>> {
		self.tables.get(&(schema.map(str::to_string), name.to_string()))
	}

	pub fn get_for(&self, table: &TableRef) -> Option<&Arc<TableMeta>> {
		self.get(table.schema.as_deref(), &table.name)
	}
}

#[cfg(test)]
mod tests {
	use std::thread;

	use super::*;

	fn rank_cache_meta() -> TableMeta {
		TableMeta::new(
			"RankCache",
			vec![
				ColumnMeta::new("ContestId", ValueType::Int).primary_key(),
				ColumnMeta::new("TeamId", ValueType::Int).primary_key(),
				ColumnMeta::new("PointsPublic", ValueType::Int),
			],
		)
	}

	struct RankCache;

	impl RowType for RankCache {
		fn table_meta() -> TableMeta {
			rank_cache_meta()
		}
	}

	#[test]
	fn test_primary_key_order() {
		let meta = rank_cache_meta();
		assert_eq!(meta.primary_key().as_slice(), ["ContestId", "TeamId"]);
	}

	#[test]
	fn test_conflict_key_prefers_primary() {
		let meta = rank_cache_meta();
		let columns: Vec<String> =
			["ContestId", "TeamId", "PointsPublic"].iter().map(|s| s.to_string()).collect();
		assert_eq!(meta.conflict_key_covered_by(&columns), Some(vec!["ContestId".into(), "TeamId".into()]));
	}

	#[test]
	fn test_conflict_key_falls_back_to_alternate() {
		let meta = TableMeta::new(
			"User",
			vec![ColumnMeta::new("Id", ValueType::Int).primary_key(), ColumnMeta::new("Email", ValueType::Text)],
		)
		.with_alternate_key(vec!["Email".into()]);
		let columns = vec!["Email".to_string(), "Name".to_string()];
		assert_eq!(meta.conflict_key_covered_by(&columns), Some(vec!["Email".into()]));
	}

	#[test]
	fn test_conflict_key_none_when_uncovered() {
		let meta = rank_cache_meta();
		let columns = vec!["TeamId".to_string()];
		assert_eq!(meta.conflict_key_covered_by(&columns), None);
	}

	#[test]
	fn test_meta_serde_round_trip() {
		let meta = rank_cache_meta().with_alternate_key(vec!["TeamId".into()]);
		let json = serde_json::to_string(&meta).unwrap();
		let back: TableMeta = serde_json::from_str(&json).unwrap();
		assert_eq!(meta, back);
	}

	#[test]
	fn test_cache_single_winner() {
		let handles: Vec<_> = (0..8).map(|_| thread::spawn(table_meta_of::<RankCache>)).collect();
		let metas: Vec<Arc<TableMeta>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
		for meta in &metas {
			assert!(Arc::ptr_eq(meta, &metas[0]));
		}
	}
}
