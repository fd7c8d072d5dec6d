//! Shared definitions consumed from semantic analysis
//!
//! Everything in this module is the boundary contract with the frontend:
//! a fully resolved type representation and the typed tree the code
//! generator walks. No "not yet inferred" placeholders survive to this
//! layer; struct definitions arrive fully monomorphized.

pub mod tast;
pub mod types;
