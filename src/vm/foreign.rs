//! Foreign-function dispatch
//!
//! Call targets below the import-vector-table boundary are indices into
//! this fixed table of host-provided functions. Output flows through the
//! caller-supplied sink so embedders and tests observe it without global
//! state.

use crate::vm::error::{Result, VmError};
use crate::vm::Vm;
use std::io::Write;

/// Process exit; the code is in r0.
pub const FOREIGN_EXIT: u64 = 0;
/// Print the string whose pointer is in r0.
pub const FOREIGN_PRINT_STR: u64 = 1;
/// Print the integer in r0.
pub const FOREIGN_PRINT_INT: u64 = 2;

/// Names the code generator registers, in index order.
pub const FOREIGN_NAMES: [&str; 3] = ["exit", "print_str", "print_int"];

/// Dispatch one foreign call. Returns `Some(code)` when the call
/// terminates execution.
pub fn dispatch<W: Write>(vm: &mut Vm, index: u64, out: &mut W) -> Result<Option<i64>> {
    match index {
        FOREIGN_EXIT => {
            let code = vm.reg_value(0);
            tracing::debug!(code, "foreign exit");
            Ok(Some(code))
        }
        FOREIGN_PRINT_STR => {
            let ptr = vm.reg_value(0) as u64;
            let len = vm.read_word(ptr)?;
            let bytes = vm.read_bytes(ptr + 8, len)?;
            out.write_all(bytes)?;
            out.write_all(b"\n")?;
            Ok(None)
        }
        FOREIGN_PRINT_INT => {
            let value = vm.reg_value(0);
            writeln!(out, "{}", value)?;
            Ok(None)
        }
        _ => Err(VmError::UnknownForeign { index }),
    }
}
