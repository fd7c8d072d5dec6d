//! Bytecode Image Building
//!
//! This module turns symbolic operations into the final binary image the
//! virtual machine executes.
//!
//! # Image Layout
//!
//! ```text
//! ┌──────────────────────┐ 0x0_0000
//! │ code                 │   (first 64 bytes: import-vector-table region)
//! ├──────────────────────┤ 0x1_0000
//! │ imports              │   (interned foreign-function identifiers)
//! ├──────────────────────┤ 0x2_0000
//! │ read-only data       │   (interned string literals)
//! ├──────────────────────┤ 0x3_0000
//! │ heap-init data       │   (first word: runtime heap-pointer cell)
//! └──────────────────────┘
//! ```
//!
//! Call targets numerically below the import-vector-table boundary are
//! foreign-function indices, not code offsets. Forward references to
//! not-yet-emitted labels are written as sentinels and patched in a single
//! pass by [`ImageBuilder::finalize`].

use crate::backend::encode::ByteBuffer;
use crate::backend::error::{CodegenError, Result};
use crate::backend::isa::{pack_pair, pack_reg, Op, Reg};
use std::collections::HashMap;
use std::io::{self, Write};

/// Fixed byte span between segment bases.
pub const SEGMENT_SIZE: usize = 0x1_0000;

/// Segment base addresses.
pub const CODE_BASE: usize = 0;
pub const IMPORTS_BASE: usize = SEGMENT_SIZE;
pub const RODATA_BASE: usize = 2 * SEGMENT_SIZE;
pub const HEAP_BASE: usize = 3 * SEGMENT_SIZE;

/// Total addressable VM memory. The region above the initialized heap data
/// is shared by the runtime heap (growing up) and the stack (growing down).
pub const MEMORY_SIZE: usize = 0x8_0000;

/// The code segment's reserved low region. Call targets below this boundary
/// are foreign-function indices.
pub const IMPORT_VECTOR_SIZE: usize = 64;

/// Functions start on this alignment.
pub const FUNCTION_ALIGN: usize = 16;

/// Address of the runtime heap-pointer cell: the first word of the heap
/// segment. Generated code bumps it for dynamic allocation.
pub const HEAP_PTR_CELL: u64 = HEAP_BASE as u64;

/// Placeholder written at a forward-reference site until `finalize`.
const RELOC_SENTINEL: u64 = u64::MAX;

/// A deferred patch of a not-yet-known code offset.
#[derive(Clone, Debug)]
struct Relocation {
    /// Target label.
    id: String,
    /// Offset of the 8-byte operand to overwrite.
    patch_offset: usize,
}

/// Builder for the four-segment bytecode image.
pub struct ImageBuilder {
    code: ByteBuffer,
    imports: ByteBuffer,
    rodata: ByteBuffer,
    data: ByteBuffer,
    /// Symbolic name -> code offset.
    labels: HashMap<String, u64>,
    /// Forward references awaiting resolution.
    relocations: Vec<Relocation>,
    /// Interned string literal -> read-only data address.
    strings: HashMap<String, u64>,
    /// Foreign-function name -> import-vector index.
    foreign: HashMap<String, u64>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        let mut code = ByteBuffer::new();
        code.emit_zeroes(IMPORT_VECTOR_SIZE);
        let mut data = ByteBuffer::new();
        // Reserve the heap-pointer cell; finalize fills it in.
        data.emit_zeroes(8);
        Self {
            code,
            imports: ByteBuffer::new(),
            rodata: ByteBuffer::new(),
            data,
            labels: HashMap::new(),
            relocations: Vec::new(),
            strings: HashMap::new(),
            foreign: HashMap::new(),
        }
    }

    // ========================================================================
    // Foreign functions
    // ========================================================================

    /// Register a foreign function and return its import-vector index.
    ///
    /// Must happen before any code is emitted; call sites encode the index
    /// directly as their target.
    pub fn register_foreign(&mut self, name: &str) -> u64 {
        assert!(
            self.code.len() == IMPORT_VECTOR_SIZE,
            "foreign functions must be registered before code is emitted"
        );
        if let Some(&index) = self.foreign.get(name) {
            return index;
        }
        let index = self.foreign.len() as u64;
        self.imports.emit_str(name);
        self.foreign.insert(name.to_string(), index);
        index
    }

    pub fn is_foreign(&self, name: &str) -> bool {
        self.foreign.contains_key(name)
    }

    // ========================================================================
    // Labels
    // ========================================================================

    /// Pad to the function alignment boundary and record the function's
    /// mangled name at the current code offset.
    pub fn start_function(&mut self, name: &str) {
        self.code.pad_to(FUNCTION_ALIGN);
        self.define_label(name);
    }

    /// Record a label at the current code offset.
    pub fn define_label(&mut self, name: &str) {
        let previous = self.labels.insert(name.to_string(), self.code.len() as u64);
        assert!(previous.is_none(), "label `{}` defined twice", name);
    }

    /// Current end of the code segment.
    pub fn code_offset(&self) -> u64 {
        self.code.len() as u64
    }

    // ========================================================================
    // Data segments
    // ========================================================================

    /// Intern a string literal into read-only data, returning its address.
    /// Each distinct literal is written at most once.
    pub fn intern_string(&mut self, value: &str) -> u64 {
        if let Some(&addr) = self.strings.get(value) {
            return addr;
        }
        let addr = (RODATA_BASE + self.rodata.len()) as u64;
        self.rodata.emit_str(value);
        self.strings.insert(value.to_string(), addr);
        addr
    }

    /// Reserve a zero-filled block in the heap-init segment and return its
    /// address. Static header fields are filled with [`Self::data_write_u64`];
    /// dynamic contents are stored by generated code at run time.
    pub fn alloc_data(&mut self, size: u64) -> u64 {
        let addr = (HEAP_BASE + self.data.len()) as u64;
        self.data.emit_zeroes(size as usize);
        addr
    }

    /// Write a static word into a previously allocated heap-init block.
    pub fn data_write_u64(&mut self, addr: u64, value: u64) {
        self.data.patch_u64(addr as usize - HEAP_BASE, value);
    }

    // ========================================================================
    // Instruction emission
    // ========================================================================

    fn op(&mut self, op: Op) {
        self.code.emit_u8(op as u8);
    }

    /// Register-register form: `[op][dst:src]`.
    pub fn emit_rr(&mut self, op: Op, dst: Reg, src: Reg) {
        self.op(op);
        self.code.emit_u8(pack_pair(dst, src));
    }

    /// Register-immediate form: `[op][reg][imm64]`.
    pub fn emit_ri(&mut self, op: Op, reg: Reg, imm: i64) {
        self.op(op);
        self.code.emit_u8(pack_reg(reg));
        self.code.emit_i64(imm);
    }

    /// Single-register form: `[op][reg]`.
    pub fn emit_reg(&mut self, op: Op, reg: Reg) {
        self.op(op);
        self.code.emit_u8(pack_reg(reg));
    }

    /// Immediate-only form: `[op][imm64]`.
    pub fn emit_imm(&mut self, op: Op, imm: i64) {
        self.op(op);
        self.code.emit_i64(imm);
    }

    /// Register ← memory at a fixed address.
    pub fn load(&mut self, dst: Reg, addr: u64) {
        self.op(Op::Load);
        self.code.emit_u8(pack_reg(dst));
        self.code.emit_u64(addr);
    }

    /// Memory at a fixed address ← register.
    pub fn store(&mut self, src: Reg, addr: u64) {
        self.op(Op::Store);
        self.code.emit_u8(pack_reg(src));
        self.code.emit_u64(addr);
    }

    /// Call or jump to a symbolic target.
    ///
    /// Foreign names encode their import-vector index. Known labels encode
    /// their code offset immediately; unknown ones queue a relocation and
    /// write a sentinel for `finalize` to overwrite.
    pub fn jump(&mut self, op: Op, target: &str) {
        debug_assert!(matches!(op, Op::Jmp | Op::Jz | Op::Jnz | Op::Call));
        self.op(op);
        if let Some(&index) = self.foreign.get(target) {
            self.code.emit_u64(index);
            return;
        }
        match self.labels.get(target) {
            Some(&offset) => self.code.emit_u64(offset),
            None => {
                self.relocations.push(Relocation {
                    id: target.to_string(),
                    patch_offset: self.code.len(),
                });
                self.code.emit_u64(RELOC_SENTINEL);
            }
        }
    }

    pub fn ret(&mut self) {
        self.op(Op::Ret);
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// Pad the final function, resolve every queued relocation, and
    /// concatenate the four segments into one contiguous image.
    pub fn finalize(mut self) -> Result<Image> {
        self.code.pad_to(FUNCTION_ALIGN);

        for reloc in &self.relocations {
            let offset = *self
                .labels
                .get(&reloc.id)
                .ok_or_else(|| CodegenError::UnresolvedLabel(reloc.id.clone()))?;
            self.code.patch_u64(reloc.patch_offset, offset);
        }

        // The runtime heap starts just past the initialized data.
        let heap_top = (HEAP_BASE + self.data.len()) as u64;
        self.data.patch_u64(0, heap_top);

        check_segment("code", self.code.len(), SEGMENT_SIZE)?;
        check_segment("imports", self.imports.len(), SEGMENT_SIZE)?;
        check_segment("read-only data", self.rodata.len(), SEGMENT_SIZE)?;
        check_segment("heap-init data", self.data.len(), MEMORY_SIZE - HEAP_BASE)?;

        let mut bytes = vec![0u8; HEAP_BASE + self.data.len()];
        bytes[CODE_BASE..CODE_BASE + self.code.len()].copy_from_slice(self.code.as_slice());
        bytes[IMPORTS_BASE..IMPORTS_BASE + self.imports.len()]
            .copy_from_slice(self.imports.as_slice());
        bytes[RODATA_BASE..RODATA_BASE + self.rodata.len()].copy_from_slice(self.rodata.as_slice());
        bytes[HEAP_BASE..].copy_from_slice(self.data.as_slice());

        tracing::debug!(
            code = self.code.len(),
            rodata = self.rodata.len(),
            data = self.data.len(),
            relocations = self.relocations.len(),
            "image finalized"
        );

        Ok(Image {
            bytes,
            symbols: self.labels,
        })
    }
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_segment(segment: &'static str, len: usize, limit: usize) -> Result<()> {
    if len > limit {
        return Err(CodegenError::SegmentOverflow {
            segment,
            len,
            limit,
        });
    }
    Ok(())
}

/// A finalized bytecode image: the contiguous segment bytes plus the label
/// table retained for debugging and tests.
#[derive(Clone, Debug)]
pub struct Image {
    bytes: Vec<u8>,
    symbols: HashMap<String, u64>,
}

impl Image {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Code offset recorded for a function or branch label.
    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    /// Write the raw image to a sink (the CLI's dump flag).
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.bytes)
    }

    #[cfg(test)]
    pub(crate) fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }
}
