// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Dialect emitters.
//!
//! Each backend renders the finished statement IR to SQL text plus an
//! ordered parameter list. The parameter list order is definitionally the
//! placeholder emission order. A dialect that lacks a requested feature
//! fails at render time with [`Error::ProviderUnsupported`]; nothing is
//! ever emulated behind the caller's back.

mod mssql;
mod mysql;
mod postgres;
mod render;
mod sqlite;

use serde::{Deserialize, Serialize};

pub use render::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
	SqlServer,
	Postgres,
	MySql,
	Sqlite,
}

/// How the dialect spells "insert or update on key collision".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertFlavor {
	/// `INSERT ... ON CONFLICT (key) DO UPDATE/NOTHING`.
	OnConflict,
	/// `INSERT ... ON DUPLICATE KEY UPDATE`; only honors the primary key.
	OnDuplicateKey,
	/// No native upsert; rendered as a MERGE statement.
	Merge,
}

impl Dialect {
	pub fn name(&self) -> &'static str {
		match self {
			Dialect::SqlServer => "sqlserver",
			Dialect::Postgres => "postgres",
			Dialect::MySql => "mysql",
			Dialect::Sqlite => "sqlite",
		}
	}

	pub fn supports_merge(&self) -> bool {
		matches!(self, Dialect::SqlServer | Dialect::Postgres)
	}

	/// `WHEN NOT MATCHED BY SOURCE THEN DELETE` support.
	pub fn supports_merge_delete_by_source(&self) -> bool {
		matches!(self, Dialect::SqlServer)
	}

	pub fn upsert_flavor(&self) -> UpsertFlavor {
		match self {
			Dialect::SqlServer => UpsertFlavor::Merge,
			Dialect::Postgres | Dialect::Sqlite => UpsertFlavor::OnConflict,
			Dialect::MySql => UpsertFlavor::OnDuplicateKey,
		}
	}

	pub fn supports_array_parameters(&self) -> bool {
		matches!(self, Dialect::Postgres)
	}

	/// Whether UPDATE must use the expanded form (joins folded into WHERE,
	/// joined tables as a plain FROM list).
	pub fn update_requires_expansion(&self) -> bool {
		matches!(self, Dialect::Postgres | Dialect::Sqlite)
	}

	/// Whether a values batch can stand in table position with its own
	/// column list, `(VALUES ...) AS s (c1, c2)`.
	pub fn supports_values_table(&self) -> bool {
		matches!(self, Dialect::SqlServer | Dialect::Postgres)
	}

	pub(crate) fn quote_into(&self, out: &mut String, ident: &str) {
		match self {
			Dialect::SqlServer => {
				out.push('[');
				out.push_str(&ident.replace(']', "]]"));
				out.push(']');
			}
			Dialect::Postgres | Dialect::Sqlite => {
				out.push('"');
				out.push_str(&ident.replace('"', "\"\""));
				out.push('"');
			}
			Dialect::MySql => {
				out.push('`');
				out.push_str(&ident.replace('`', "``"));
				out.push('`');
			}
		}
	}

	/// The placeholder text for the `index`-th parameter (zero-based).
	pub(crate) fn placeholder(&self, index: usize) -> String {
		match self {
			Dialect::SqlServer => format!("@p{}", index + 1),
			Dialect::Postgres => format!("${}", index + 1),
			Dialect::MySql => "?".to_string(),
			Dialect::Sqlite => format!("?{}", index + 1),
		}
	}
}

/// A parameter bound at its emission position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundParam {
	pub name: String,
	pub value: relbatch_plan::Value,
}

/// The render result: final SQL text plus parameters in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStatement {
	pub sql: String,
	pub params: Vec<BoundParam>,
}
