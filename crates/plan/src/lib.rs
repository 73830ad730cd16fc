// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Relational intermediate representation for set-based data modification.
//!
//! The IR models row-shaped queries ([`SelectQuery`]) together with the five
//! mutation wrappers ([`Statement`]) that turn such a query into a bulk
//! DELETE, UPDATE, INSERT-FROM-SELECT, UPSERT or MERGE. Trees are immutable
//! value types; rewrite passes report change through [`rewrite::Rewritten`]
//! instead of mutating in place.

pub mod column;
pub mod error;
pub mod explain;
pub mod expression;
pub mod meta;
pub mod mutation;
pub mod node;
pub mod rewrite;
pub mod table;
pub mod value;
pub mod values;

pub use column::ColumnRef;
pub use error::{Error, ShapeError};
pub use expression::{BinaryOp, Expr, Parameter, UnaryOp};
pub use meta::{ColumnMeta, MetaRegistry, TableMeta};
pub use mutation::{
	DeleteNode, InsertSelectNode, MergeNode, MutationSource, Statement, UpdateNode, UpsertNode,
};
pub use node::{Join, JoinKind, OrderKey, SelectQuery, SetOpKind, SourceExpr, TableSource};
pub use rewrite::{ColumnRewriter, Rewritten};
pub use table::{SourceId, SourceIdGen, TableRef};
pub use value::{Value, ValueType};
pub use values::{ValuesColumn, ValuesNode, ValuesRows};

pub type Result<T> = std::result::Result<T, Error>;
