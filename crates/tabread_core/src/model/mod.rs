//! Row-level data carried through the read pipeline.
//!
//! # Responsibility
//! - Define the entity key that identifies one row.
//! - Define the minimal typed value a column descriptor produces.
//!
//! # Invariants
//! - Entities are immutable once built and compare by `(type, identifier)`.

pub mod entity;
pub mod value;
