//! # kgreason-pattern
//!
//! The pattern model the reasoner operates on: variables and literals,
//! atoms, conjunctions (with negation blocks) and disjunctive patterns, the
//! schema with its type and role hierarchies, and inference rules.
//!
//! Everything here is an immutable value. Construction validates up front;
//! errors are [`PatternError`] and [`SchemaError`].

pub mod atom;
pub mod digest;
pub mod error;
pub mod pattern;
pub mod rule;
pub mod schema;
pub mod term;

pub use atom::{Atom, AtomKind, RolePlayer, TypeRef};
pub use error::{PatternError, SchemaError};
pub use pattern::{Conjunction, ConjunctionBuilder, Pattern};
pub use rule::Rule;
pub use schema::{Schema, SchemaBuilder, TypeContext, TypeDef, TypeKind};
pub use term::{Comparator, ConceptId, Label, Operand, Value, ValueConstraint, ValueType, Var};
