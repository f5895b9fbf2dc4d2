//! Allocator for the reserved virtual address space that is used to map
//! device memory (MMIO) into the kernel.
//!
//! The address space is managed by a [buddy pool](mem::buddy::BuddyPool) that
//! keeps one free list per power-of-two block size, each guarded by its own lock.
//! Drivers talk to the [`mmio`] module, which rounds byte sizes to blocks and
//! hands out [`MmioSpace`](mmio::MmioSpace) guards.
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![allow(clippy::missing_safety_doc)]
#![cfg_attr(not(test), no_std)]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("the MMIO pool can only be used on 64 bit systems");

extern crate alloc;

pub mod addr;
pub mod console;
pub mod logger;
pub mod mem;
pub mod mmio;
pub mod unit;

pub use addr::{PhysAddr, VirtAddr};
pub use mem::{Error, PoolConfig, Result};
pub use mmio::{MmioFlags, MmioPool, MmioSpace};
