//! The buddy pool that manages the MMIO address space, together with
//! its configuration, errors and statistics.

pub mod buddy;
mod free_list;
mod region;
mod tracker;

pub use buddy::BuddyPool;
pub use free_list::FreeList;
pub use region::Region;

use crate::{unit, VirtAddr};
use core::fmt;
use displaydoc_lite::displaydoc;

/// The start of the reserved MMIO address space.
pub const MMIO_BASE: usize = 0xffff_a100_0000_0000;

/// The size of the reserved MMIO address space.
pub const MMIO_SIZE: usize = unit::TIB;

/// The exponent of the smallest block (4 KiB).
pub const MIN_EXP: u32 = 12;

/// The exponent of the largest block (1 GiB).
pub const MAX_EXP: u32 = 30;

/// Result for every operation on the MMIO address space.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any error that can happen while allocating or releasing MMIO address space.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// the requested size is outside the block sizes of the pool.
        InvalidSize,
        /// there is no free block that is large enough.
        OutOfMemory,
        /// tried to release a block that was never handed out or was already released.
        InvalidRelease,
        /// the address range or block sizes of the pool are unusable.
        InvalidGeometry,
        /// invalid argument given to an operation on an MMIO space.
        InvalidArgument,
        /// the mapper failed to map or unmap a range.
        MappingFailed,
    }
}

/// Returns the number of bytes in a block of the given exponent.
#[inline]
pub const fn size_for_exp(exp: u32) -> usize {
    1 << exp
}

/// Calculates the smallest exponent whose block can hold `size` bytes.
///
/// Returns `None` if `size` is zero or no such block can exist.
pub fn exp_for_size(size: usize) -> Option<u32> {
    if size == 0 {
        return None;
    }

    size.checked_next_power_of_two().map(|size| size.trailing_zeros())
}

/// The geometry of a buddy pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// The first address of the managed range.
    pub base: VirtAddr,
    /// The number of bytes in the managed range.
    pub size: usize,
    /// The exponent of the smallest block.
    pub min_exp: u32,
    /// The exponent of the largest block.
    pub max_exp: u32,
    /// Remember every handed out block to reject invalid releases.
    pub track_allocations: bool,
}

impl PoolConfig {
    /// The geometry of the kernel's MMIO address space.
    pub const DEFAULT: PoolConfig =
        PoolConfig::new(VirtAddr::new(MMIO_BASE), MMIO_SIZE, MIN_EXP, MAX_EXP);

    /// Create a new configuration with allocation tracking enabled.
    pub const fn new(base: VirtAddr, size: usize, min_exp: u32, max_exp: u32) -> Self {
        Self {
            base,
            size,
            min_exp,
            max_exp,
            track_allocations: true,
        }
    }

    /// Disable the tracking of handed out blocks.
    ///
    /// Releasing a block twice, or a block that was never allocated, will then
    /// corrupt the pool instead of failing with [`Error::InvalidRelease`].
    pub const fn without_tracking(mut self) -> Self {
        self.track_allocations = false;
        self
    }

    /// The number of size classes in a pool with this configuration.
    pub const fn class_count(&self) -> usize {
        (self.max_exp - self.min_exp + 1) as usize
    }

    /// Check that a pool can be built from this configuration.
    pub fn validate(&self) -> Result<()> {
        if self.min_exp > self.max_exp || self.max_exp >= usize::BITS - 1 {
            return Err(Error::InvalidGeometry);
        }

        // every byte must be covered by some block, and the largest block
        // defines the alignment that makes `addr ^ size` land on the buddy.
        let min_size = size_for_exp(self.min_exp);
        if self.size == 0 || self.size % min_size != 0 {
            return Err(Error::InvalidGeometry);
        }

        if !self.base.is_aligned(size_for_exp(self.max_exp)) {
            return Err(Error::InvalidGeometry);
        }

        match self.base.data().checked_add(self.size) {
            Some(_) => Ok(()),
            None => Err(Error::InvalidGeometry),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Statistics for a buddy pool.
#[derive(Debug, Clone)]
pub struct AllocStats {
    /// The name of the pool that collected these stats.
    pub name: &'static str,
    /// The total number of bytes that this pool manages.
    pub total: usize,
    /// The number of bytes that are handed out right now.
    pub allocated: usize,
    /// The number of successful allocations.
    pub allocations: usize,
    /// The number of successful releases.
    pub releases: usize,
    /// The number of blocks that were split in half.
    pub splits: usize,
    /// The number of buddies that were merged.
    pub merges: usize,
    /// The number of allocations that failed because of missing space.
    pub failed: usize,
}

impl AllocStats {
    /// Create a new [`AllocStats`] instance for the given pool name.
    pub const fn with_name(name: &'static str) -> Self {
        Self {
            name,
            total: 0,
            allocated: 0,
            allocations: 0,
            releases: 0,
            splits: 0,
            merges: 0,
            failed: 0,
        }
    }

    /// The number of bytes that are available for allocation.
    pub fn free(&self) -> usize {
        self.total.saturating_sub(self.allocated)
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f, "\nAllocated: {}", unit::bytes(self.allocated))?;
        writeln!(f, "Free:      {}", unit::bytes(self.free()))?;
        writeln!(f, "Total:     {}", unit::bytes(self.total))?;
        writeln!(
            f,
            "Allocations: {}, releases: {}, failed: {}",
            self.allocations, self.releases, self.failed
        )?;
        writeln!(f, "Splits: {}, merges: {}", self.splits, self.merges)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;
        Ok(())
    }
}
