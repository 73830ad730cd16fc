// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 relbatch

//! Plan rewriting: wrapping row-shaped queries into mutation statements,
//! eliminating redundant self-joins, and materializing values batches the
//! way the target dialect can bind them.

pub mod selfjoin;
pub mod synthesize;
pub mod values;

pub use synthesize::Synthesizer;
pub use values::ValuesStrategy;
