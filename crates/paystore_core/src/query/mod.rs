//! Generic filter-query compiler.
//!
//! # Responsibility
//! - Turn the filter DSL into a validated, parameterized SQL predicate.
//! - Enforce the per-resource allow-list of queryable fields.
//!
//! # Invariants
//! - Only `$match` is accepted, on every field of every resource.
//! - A key missing from the resource policy fails with `Validation` before
//!   any SQL is issued.

pub mod compiler;
pub mod filter;
pub mod policy;

pub use compiler::{compile, CompiledPredicate, Dialect, SqlParam, WhereClause};
pub use filter::{Filter, FilterClause, MATCH_OPERATOR};
pub use policy::{FieldPolicy, FieldPolicyBuilder, FieldRule, Normalizer, PolicyError, ValueKind};
