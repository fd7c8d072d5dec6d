//! Register and Store Allocation
//!
//! This module assigns each live variable either a physical register or a
//! memory-backed struct location. Allocation is a simple free-list over the
//! 16-register file: no liveness analysis, no spilling. A function that
//! needs more than 15 simultaneously live values (r0 is reserved for
//! call/return staging) is a documented language limit.

mod allocator;
mod store;

pub use allocator::Allocator;
pub use store::Store;
