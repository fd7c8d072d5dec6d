//! Opal Backend Pipeline
//!
//! End-to-end entry points from the typed tree to an exit value.
//!
//! # Pipeline Stages
//!
//! ```text
//! Typed Tree (TProgram + StructRegistry)
//!     │
//!     ▼ codegen
//! Symbolic operations against the image builder
//!     │
//!     ▼ finalize
//! Bytecode Image ([code][imports][ro-data][heap-init])
//!     │
//!     ▼ vm
//! Exit value (i64)
//! ```
//!
//! The driving CLI (parsing, flag handling, subscriber installation) lives
//! outside this crate; embedders call [`compile`] and [`run`] directly.

use crate::backend::error::CodegenError;
use crate::backend::image::{Image, ImageBuilder};
use crate::backend::emit_program;
use crate::common::tast::TProgram;
use crate::common::types::StructRegistry;
use crate::vm::foreign::FOREIGN_NAMES;
use crate::vm::{Vm, VmError};
use std::io::Write;
use thiserror::Error;

/// A failure anywhere between the typed tree and the exit value.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("code generation failed: {0}")]
    Compile(#[from] CodegenError),

    #[error("execution faulted: {0}")]
    Exec(#[from] VmError),
}

/// Compile a program whose entry function is `main`.
pub fn compile(program: &TProgram, registry: &StructRegistry) -> Result<Image, CodegenError> {
    compile_with_entry(program, registry, "main")
}

/// Compile a program with an explicit entry function. The entry is emitted
/// first so execution starts there; the foreign-function table is
/// registered before any code.
pub fn compile_with_entry(
    program: &TProgram,
    registry: &StructRegistry,
    entry: &str,
) -> Result<Image, CodegenError> {
    tracing::debug!(functions = program.functions.len(), entry, "compiling");
    let mut image = ImageBuilder::new();
    for name in FOREIGN_NAMES {
        image.register_foreign(name);
    }
    emit_program(&mut image, registry, program, entry)?;
    image.finalize()
}

/// Execute a finalized image, writing foreign-function output to `out`.
pub fn run<W: Write>(image: &Image, out: &mut W) -> Result<i64, VmError> {
    Vm::new(image).run(out)
}

/// Compile and immediately execute.
pub fn compile_and_run<W: Write>(
    program: &TProgram,
    registry: &StructRegistry,
    out: &mut W,
) -> Result<i64, PipelineError> {
    let image = compile(program, registry)?;
    Ok(run(&image, out)?)
}
