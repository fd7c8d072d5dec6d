//! Virtual Machine
//!
//! A fetch-decode-execute loop over the finalized bytecode image: 16
//! integer registers, one flat byte-addressable memory array holding all
//! four segments, a stack growing down from the top of memory, and a
//! foreign-function dispatch table for call targets below the
//! import-vector-table boundary.
//!
//! The machine is constructed once per run, loaded with the image, and
//! executed to completion: either the entry function returns to the
//! sentinel address `0`, or a foreign `exit` call terminates execution.
//! Faults (unknown opcode, out-of-bounds access, division by zero) are
//! fatal; there is no recovery.

pub mod error;
pub mod foreign;

pub use error::VmError;

use crate::backend::image::{Image, IMPORT_VECTOR_SIZE, MEMORY_SIZE};
use crate::backend::isa::{unpack_pair, Op, NUM_REGS};
use crate::vm::error::Result;
use std::io::Write;

/// Return-address sentinel: returning to it halts the machine.
const RETURN_SENTINEL: i64 = 0;

pub struct Vm {
    regs: [i64; NUM_REGS],
    mem: Vec<u8>,
    /// Instruction pointer (code offsets equal absolute addresses).
    ip: usize,
    /// Stack pointer; starts at the top of memory, grows downward.
    sp: u64,
    /// Outcome of the last comparison: `lhs - rhs` (wrapping).
    cmp: i64,
}

impl Vm {
    /// Load an image into a fresh machine: registers cleared, instruction
    /// pointer just past the import-vector-table region, stack pointer at
    /// the top of memory with the sentinel return address pushed first.
    pub fn new(image: &Image) -> Self {
        let mut mem = vec![0u8; MEMORY_SIZE];
        mem[..image.bytes().len()].copy_from_slice(image.bytes());
        let mut vm = Self {
            regs: [0; NUM_REGS],
            mem,
            ip: IMPORT_VECTOR_SIZE,
            sp: MEMORY_SIZE as u64,
            cmp: 0,
        };
        vm.push(RETURN_SENTINEL).expect("sentinel push cannot fault");
        vm
    }

    /// Run to completion, writing foreign-function output to `out`.
    /// Returns the exit value: r0 at the sentinel return, or the exit
    /// code passed to the foreign `exit`.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<i64> {
        loop {
            let at = self.ip;
            let opcode = self.fetch_u8()?;
            let op = Op::from_byte(opcode).ok_or(VmError::UnknownOpcode { opcode, ip: at })?;

            match op {
                // Arithmetic, register-register.
                Op::Add => self.binop(|a, b| Ok(a.wrapping_add(b)))?,
                Op::Sub => self.binop(|a, b| Ok(a.wrapping_sub(b)))?,
                Op::Mul => self.binop(|a, b| Ok(a.wrapping_mul(b)))?,
                Op::Div => self.binop(|a, b| checked_div(a, b, at))?,
                Op::Mod => self.binop(|a, b| checked_rem(a, b, at))?,

                // Arithmetic, register-immediate.
                Op::AddI => self.binop_imm(|a, b| Ok(a.wrapping_add(b)))?,
                Op::SubI => self.binop_imm(|a, b| Ok(a.wrapping_sub(b)))?,
                Op::MulI => self.binop_imm(|a, b| Ok(a.wrapping_mul(b)))?,
                Op::DivI => self.binop_imm(|a, b| checked_div(a, b, at))?,
                Op::ModI => self.binop_imm(|a, b| checked_rem(a, b, at))?,

                // Bitwise.
                Op::And => self.binop(|a, b| Ok(a & b))?,
                Op::Or => self.binop(|a, b| Ok(a | b))?,
                Op::Not => {
                    let reg = self.fetch_reg()?;
                    self.regs[reg] = (self.regs[reg] == 0) as i64;
                }

                // Data movement.
                Op::Mov => {
                    let (dst, src) = self.fetch_pair()?;
                    self.regs[dst] = self.regs[src];
                }
                Op::MovI => {
                    let reg = self.fetch_reg()?;
                    self.regs[reg] = self.fetch_i64()?;
                }
                Op::Load => {
                    let reg = self.fetch_reg()?;
                    let addr = self.fetch_u64()?;
                    self.regs[reg] = self.read_word(addr)? as i64;
                }
                Op::Store => {
                    let reg = self.fetch_reg()?;
                    let addr = self.fetch_u64()?;
                    self.write_word(addr, self.regs[reg])?;
                }
                Op::LoadR => {
                    let (dst, src) = self.fetch_pair()?;
                    self.regs[dst] = self.read_word(self.regs[src] as u64)? as i64;
                }
                Op::StoreR => {
                    let (dst, src) = self.fetch_pair()?;
                    self.write_word(self.regs[dst] as u64, self.regs[src])?;
                }

                // Comparison and conditional set.
                Op::Cmp => {
                    let (lhs, rhs) = self.fetch_pair()?;
                    self.cmp = self.regs[lhs].wrapping_sub(self.regs[rhs]);
                }
                Op::CmpI => {
                    let reg = self.fetch_reg()?;
                    let imm = self.fetch_i64()?;
                    self.cmp = self.regs[reg].wrapping_sub(imm);
                }
                Op::SetEq => self.set_cc(|cmp| cmp == 0)?,
                Op::SetNe => self.set_cc(|cmp| cmp != 0)?,
                Op::SetLt => self.set_cc(|cmp| cmp < 0)?,
                Op::SetLe => self.set_cc(|cmp| cmp <= 0)?,
                Op::SetGt => self.set_cc(|cmp| cmp > 0)?,
                Op::SetGe => self.set_cc(|cmp| cmp >= 0)?,

                // Stack.
                Op::Push => {
                    let reg = self.fetch_reg()?;
                    self.push(self.regs[reg])?;
                }
                Op::Pop => {
                    let reg = self.fetch_reg()?;
                    self.regs[reg] = self.pop()?;
                }
                Op::PushI => {
                    let imm = self.fetch_i64()?;
                    self.push(imm)?;
                }

                // Control flow.
                Op::Jmp => {
                    let target = self.fetch_u64()?;
                    self.ip = target as usize;
                }
                Op::Jz => {
                    let target = self.fetch_u64()?;
                    if self.cmp == 0 {
                        self.ip = target as usize;
                    }
                }
                Op::Jnz => {
                    let target = self.fetch_u64()?;
                    if self.cmp != 0 {
                        self.ip = target as usize;
                    }
                }
                Op::Call => {
                    let target = self.fetch_u64()?;
                    if target < IMPORT_VECTOR_SIZE as u64 {
                        // Foreign function: dispatch and fall through.
                        if let Some(code) = foreign::dispatch(self, target, out)? {
                            return Ok(code);
                        }
                    } else {
                        self.push(self.ip as i64)?;
                        self.ip = target as usize;
                    }
                }
                Op::Ret => {
                    let addr = self.pop()?;
                    if addr == RETURN_SENTINEL {
                        return Ok(self.regs[0]);
                    }
                    self.ip = addr as usize;
                }
            }
        }
    }

    // ========================================================================
    // Register and memory access
    // ========================================================================

    pub(crate) fn reg_value(&self, index: usize) -> i64 {
        self.regs[index]
    }

    pub(crate) fn read_word(&self, addr: u64) -> Result<u64> {
        let end = addr.checked_add(8).filter(|&end| end <= self.mem.len() as u64);
        let end = end.ok_or(VmError::OutOfBounds {
            addr,
            size: self.mem.len(),
        })? as usize;
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.mem[end - 8..end]);
        Ok(u64::from_le_bytes(word))
    }

    pub(crate) fn write_word(&mut self, addr: u64, value: i64) -> Result<()> {
        let end = addr.checked_add(8).filter(|&end| end <= self.mem.len() as u64);
        let end = end.ok_or(VmError::OutOfBounds {
            addr,
            size: self.mem.len(),
        })? as usize;
        self.mem[end - 8..end].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub(crate) fn read_bytes(&self, addr: u64, len: u64) -> Result<&[u8]> {
        let end = addr.checked_add(len).filter(|&end| end <= self.mem.len() as u64);
        let end = end.ok_or(VmError::OutOfBounds {
            addr,
            size: self.mem.len(),
        })? as usize;
        Ok(&self.mem[addr as usize..end])
    }

    // ========================================================================
    // Fetch helpers
    // ========================================================================

    fn fetch_u8(&mut self) -> Result<u8> {
        let byte = *self.mem.get(self.ip).ok_or(VmError::OutOfBounds {
            addr: self.ip as u64,
            size: self.mem.len(),
        })?;
        self.ip += 1;
        Ok(byte)
    }

    fn fetch_pair(&mut self) -> Result<(usize, usize)> {
        let byte = self.fetch_u8()?;
        let (hi, lo) = unpack_pair(byte);
        Ok((hi as usize, lo as usize))
    }

    fn fetch_reg(&mut self) -> Result<usize> {
        let byte = self.fetch_u8()?;
        Ok((byte >> 4) as usize)
    }

    fn fetch_u64(&mut self) -> Result<u64> {
        let word = self.read_word(self.ip as u64)?;
        self.ip += 8;
        Ok(word)
    }

    fn fetch_i64(&mut self) -> Result<i64> {
        self.fetch_u64().map(|word| word as i64)
    }

    // ========================================================================
    // Stack and ALU helpers
    // ========================================================================

    fn push(&mut self, value: i64) -> Result<()> {
        self.sp = self.sp.checked_sub(8).ok_or(VmError::OutOfBounds {
            addr: 0,
            size: self.mem.len(),
        })?;
        self.write_word(self.sp, value)
    }

    fn pop(&mut self) -> Result<i64> {
        let value = self.read_word(self.sp)? as i64;
        self.sp += 8;
        Ok(value)
    }

    fn binop(&mut self, f: impl FnOnce(i64, i64) -> Result<i64>) -> Result<()> {
        let (dst, src) = self.fetch_pair()?;
        self.regs[dst] = f(self.regs[dst], self.regs[src])?;
        Ok(())
    }

    fn binop_imm(&mut self, f: impl FnOnce(i64, i64) -> Result<i64>) -> Result<()> {
        let reg = self.fetch_reg()?;
        let imm = self.fetch_i64()?;
        self.regs[reg] = f(self.regs[reg], imm)?;
        Ok(())
    }

    fn set_cc(&mut self, f: impl FnOnce(i64) -> bool) -> Result<()> {
        let reg = self.fetch_reg()?;
        self.regs[reg] = f(self.cmp) as i64;
        Ok(())
    }
}

/// Truncating signed division; divisor zero is a fault, not a panic.
fn checked_div(a: i64, b: i64, ip: usize) -> Result<i64> {
    if b == 0 {
        return Err(VmError::DivisionByZero { ip });
    }
    Ok(a.wrapping_div(b))
}

fn checked_rem(a: i64, b: i64, ip: usize) -> Result<i64> {
    if b == 0 {
        return Err(VmError::DivisionByZero { ip });
    }
    Ok(a.wrapping_rem(b))
}
