// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identity of one table occurrence inside a plan.
///
/// Two occurrences of the same physical table carry different ids; merging
/// them is an explicit rewrite, never a consequence of name equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u32);

impl Display for SourceId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Allocates occurrence ids for one plan.
///
/// Ids are only unique within the plan they were allocated for; callers keep
/// one generator per compilation.
#[derive(Debug, Default)]
pub struct SourceIdGen {
	next: u32,
}

impl SourceIdGen {
	pub fn new() -> Self {
		Self {
			next: 0,
		}
	}

	pub fn next(&mut self) -> SourceId {
		let id = SourceId(self.next);
		self.next += 1;
		id
	}
}

/// One physical table occurrence: name, optional schema and alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
	pub id: SourceId,
	pub schema: Option<String>,
	pub name: String,
	pub alias: Option<String>,
}

impl TableRef {
	pub fn new(id: SourceId, name: impl Into<String>) -> Self {
		Self {
			id,
			schema: None,
			name: name.into(),
			alias: None,
		}
	}

	pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
		self.schema = Some(schema.into());
		self
	}

	pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
		self.alias = Some(alias.into());
		self
	}

	/// Same physical table, regardless of occurrence identity or alias.
	pub fn same_table(&self, other: &TableRef) -> bool {
		self.schema == other.schema && self.name == other.name
	}
}

impl Display for TableRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if let Some(schema) = &self.schema {
			write!(f, "{}.{}", schema, self.name)?;
		} else {
			write!(f, "{}", self.name)?;
		}
		if let Some(alias) = &self.alias {
			write!(f, " AS {alias}")?;
		}
		write!(f, " {}", self.id)
	}
}
