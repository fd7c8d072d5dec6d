//! Code generation error types
//!
//! These are the recoverable failures of the backend: conditions a caller
//! can report to the user (an over-complex function exhausting the register
//! file, an unknown callee). Compiler-internal invariant violations, such
//! as unbound variables or a variadic parameter reaching layout, are bugs
//! in an earlier phase and panic instead.

use thiserror::Error;

/// Backend result type.
pub type Result<T> = std::result::Result<T, CodegenError>;

/// Errors surfaced while generating or finalizing a bytecode image.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// All 16 registers are simultaneously live. There is no spill path;
    /// this is a documented language limit.
    #[error("register file exhausted: all {0} registers are live")]
    RegisterExhaustion(usize),

    /// A call or jump referenced a label that was never defined.
    #[error("unresolved label `{0}`")]
    UnresolvedLabel(String),

    /// The tree referenced a function the image knows nothing about.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    /// More arguments than parameter registers.
    #[error("call to `{callee}` passes {count} arguments; at most {max} are supported")]
    TooManyArguments {
        callee: String,
        count: usize,
        max: usize,
    },

    /// A segment outgrew its fixed boundary in the image layout.
    #[error("{segment} segment overflow: {len} bytes exceeds {limit}")]
    SegmentOverflow {
        segment: &'static str,
        len: usize,
        limit: usize,
    },
}
