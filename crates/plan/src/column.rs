// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{table::SourceId, value::ValueType};

/// A reference to one column of one table occurrence.
///
/// Every `ColumnRef` in a finished plan must resolve to a source that is
/// still present in the enclosing scan tree; a dangling reference after a
/// rewrite is a bug in the pass that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
	pub source: SourceId,
	pub name: String,
	pub ty: ValueType,
	pub nullable: bool,
}

impl ColumnRef {
	pub fn new(source: SourceId, name: impl Into<String>, ty: ValueType) -> Self {
		Self {
			source,
			name: name.into(),
			ty,
			nullable: false,
		}
	}

	pub fn nullable(mut self) -> Self {
		self.nullable = true;
		self
	}

	/// The same column read through a different table occurrence.
	pub fn redirected(&self, to: SourceId) -> Self {
		Self {
			source: to,
			name: self.name.clone(),
			ty: self.ty,
			nullable: self.nullable,
		}
	}
}

impl Display for ColumnRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.source, self.name)
	}
}
