//! Virtual machine fault types
//!
//! Execution faults are fatal: the interpreter is not sandboxed against
//! malformed images, and image correctness is the code generator's
//! responsibility. Faults carry the instruction pointer of the faulting
//! instruction for diagnostics.

use thiserror::Error;

/// VM result type.
pub type Result<T> = std::result::Result<T, VmError>;

/// Fatal execution faults.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("unrecognized opcode {opcode:#04x} at {ip:#x}")]
    UnknownOpcode { opcode: u8, ip: usize },

    #[error("memory access out of bounds: {addr:#x} (memory is {size:#x} bytes)")]
    OutOfBounds { addr: u64, size: usize },

    #[error("division by zero at {ip:#x}")]
    DivisionByZero { ip: usize },

    #[error("unknown foreign function index {index}")]
    UnknownForeign { index: u64 },

    #[error("write to output sink failed: {0}")]
    Io(#[from] std::io::Error),
}
