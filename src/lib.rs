//! Opal Compiler Backend
//!
//! This crate implements the backend of the Opal compiler: it lowers the
//! typed, monomorphized tree produced by semantic analysis into a custom
//! bytecode image and executes that image on a register-based virtual
//! machine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Typed Tree    │────▶│  Code Generator │────▶│  Bytecode Image │
//! │   (TProgram)    │     │ (alloc + layout)│     │    (4 segments) │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────▼────────┐
//!                                                 │ Virtual Machine │
//!                                                 │  (16 registers) │
//!                                                 └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - `common`: typed tree and type definitions (the contract consumed from
//!   semantic analysis)
//! - `backend`: code generation, register allocation, struct layout, and
//!   image building
//! - `vm`: the bytecode interpreter
//! - `pipeline`: end-to-end compile/run entry points

pub mod backend;
pub mod common;
pub mod pipeline;
pub mod vm;

pub use pipeline::{compile, compile_and_run, run, PipelineError};
