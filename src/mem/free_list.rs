//! The free list of a single size class.

use super::Region;
use crate::VirtAddr;
use alloc::vec::Vec;
use core::slice;

/// A list of free blocks that all have the same size.
///
/// Blocks are handed out in LIFO order, so the block that was freed
/// last will be reused first. Removing a block from the middle moves the
/// last block into its place.
#[derive(Debug, Default)]
pub struct FreeList {
    blocks: Vec<Region>,
    count: usize,
}

impl FreeList {
    /// Create a new, empty free list.
    pub const fn new() -> Self {
        Self {
            blocks: Vec::new(),
            count: 0,
        }
    }

    /// Reserve space for at least `additional` more blocks.
    pub fn reserve(&mut self, additional: usize) {
        self.blocks.reserve(additional);
    }

    /// Push a free block onto this list.
    pub fn push(&mut self, region: Region) {
        self.blocks.push(region);
        self.count += 1;
    }

    /// Take the block that was pushed last.
    pub fn pop(&mut self) -> Option<Region> {
        let region = self.blocks.pop()?;
        self.count -= 1;
        Some(region)
    }

    /// Remove the block that starts at `addr`, if it is part of this list.
    pub fn remove(&mut self, addr: VirtAddr) -> Option<Region> {
        let idx = self
            .blocks
            .iter()
            .rposition(|region| region.addr() == addr)?;

        self.count -= 1;
        Some(self.blocks.swap_remove(idx))
    }

    /// The number of blocks inside this list.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.count, self.blocks.len());
        self.count
    }

    /// Check if this list has no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return an iterator over all blocks of this list.
    pub fn iter(&self) -> slice::Iter<'_, Region> {
        self.blocks.iter()
    }
}
