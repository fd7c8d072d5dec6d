//! Opal Compiler Backend
//!
//! This module lowers the typed tree from semantic analysis into a
//! bytecode image.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Typed Tree    │────▶│  Code Generator │────▶│  Image Builder  │
//! │   (TProgram)    │     │                 │     │                 │
//! └─────────────────┘     └───┬─────────┬───┘     └─────────────────┘
//!                             │         │
//!                    ┌────────▼──┐   ┌──▼────────┐
//!                    │ Allocator │   │  Layouts  │
//!                    └───────────┘   └───────────┘
//! ```
//!
//! # Modules
//!
//! - `isa`: register set, opcodes, operand packing
//! - `encode`: the raw byte buffer under every segment
//! - `regalloc`: store model and the scope-chained register allocator
//! - `layout`: struct flattening
//! - `codegen`: the typed-tree walk
//! - `image`: segments, labels, relocations, finalization

pub mod codegen;
pub mod encode;
pub mod error;
pub mod image;
pub mod isa;
pub mod layout;
pub mod regalloc;

pub use codegen::emit_program;
pub use error::CodegenError;
pub use image::{Image, ImageBuilder};
