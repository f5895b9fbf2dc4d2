//! Implementation of the buddy pool that hands out blocks of the MMIO
//! address space.
//!
//! Every size class has its own free list behind its own lock. Splitting and
//! merging walk the size classes one at a time and never hold two locks at
//! once, so the pool can not deadlock and requests for unrelated sizes only
//! contend when they have to split or merge through the same class.

use super::{
    size_for_exp, tracker::Tracker, AllocStats, Error, FreeList, PoolConfig, Region, Result,
};
use crate::{unit, VirtAddr};
use alloc::{boxed::Box, vec::Vec};
use core::{
    cmp,
    sync::atomic::{AtomicUsize, Ordering},
};
use log::{debug, info, trace, warn};
use spin::Mutex;

/// Lock-free counters behind [`AllocStats`].
#[derive(Debug, Default)]
struct Counters {
    allocated: AtomicUsize,
    allocations: AtomicUsize,
    releases: AtomicUsize,
    splits: AtomicUsize,
    merges: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The central structure that is responsible for allocating
/// address space using the buddy algorithm.
pub struct BuddyPool {
    base: VirtAddr,
    size: usize,
    min_exp: u32,
    max_exp: u32,
    classes: Box<[Mutex<FreeList>]>,
    tracker: Option<Tracker>,
    counters: Counters,
}

impl BuddyPool {
    /// Create a new pool for the given geometry and make the whole
    /// range available for allocation.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let classes = (0..config.class_count())
            .map(|_| Mutex::new(FreeList::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let pool = Self {
            base: config.base,
            size: config.size,
            min_exp: config.min_exp,
            max_exp: config.max_exp,
            classes,
            tracker: if config.track_allocations {
                Some(Tracker::new())
            } else {
                None
            },
            counters: Counters::default(),
        };
        pool.tile();

        info!(
            "MMIO buddy pool at {}..{} ({}), blocks {}..={}",
            pool.base,
            pool.base.offset(pool.size),
            unit::bytes(pool.size),
            unit::bytes(size_for_exp(pool.min_exp)),
            unit::bytes(size_for_exp(pool.max_exp)),
        );
        Ok(pool)
    }

    /// Cover the whole range with free blocks.
    ///
    /// The range is filled with as many blocks of the largest size as possible,
    /// and the rest with the largest blocks that still fit, like a range of
    /// `2 GiB + 12 KiB` gets two `1 GiB`, one `8 KiB` and one `4 KiB` block.
    fn tile(&self) {
        let mut addr = self.base;
        let mut remaining = self.size;

        for exp in (self.min_exp..=self.max_exp).rev() {
            let block = size_for_exp(exp);
            let count = remaining / block;
            if count == 0 {
                continue;
            }

            let mut list = self.class(exp).lock();
            list.reserve(count);

            // push in reverse, so the lowest block is handed out first
            for idx in (0..count).rev() {
                list.push(Region::new(addr + idx * block));
            }

            debug!("Added {} blocks of {} at {}", count, unit::bytes(block), addr);
            addr = addr + count * block;
            remaining -= count * block;
        }

        debug_assert_eq!(remaining, 0);
    }

    /// Return the free list for the given exponent.
    fn class(&self, exp: u32) -> &Mutex<FreeList> {
        &self.classes[(exp - self.min_exp) as usize]
    }

    /// Check if `exp` is the exponent of one of the size classes.
    pub fn is_valid_exp(&self, exp: u32) -> bool {
        (self.min_exp..=self.max_exp).contains(&exp)
    }

    /// Check if the block at `addr` with size `2^exp` lies inside the pool.
    fn block_in_pool(&self, addr: VirtAddr, exp: u32) -> bool {
        self.contains(addr) && self.size - (addr - self.base) >= size_for_exp(exp)
    }

    /// Allocates a block of size `2^exp`.
    ///
    /// The returned address is always aligned to the size of the block.
    pub fn allocate(&self, exp: u32) -> Result<VirtAddr> {
        if !self.is_valid_exp(exp) {
            return Err(Error::InvalidSize);
        }

        // fast path: if there's a block with the given size, return it.
        //
        // the guard is a temporary, so the lock is released right away
        let block = self.class(exp).lock().pop();

        let addr = match block {
            Some(region) => region.addr(),
            None => match self.split_from_above(exp) {
                Ok(addr) => addr,
                Err(err) => {
                    Counters::bump(&self.counters.failed);
                    warn!("No free block of {} left", unit::bytes(size_for_exp(exp)));
                    return Err(err);
                }
            },
        };

        if let Some(tracker) = &self.tracker {
            tracker.insert(addr, exp);
        }

        Counters::bump(&self.counters.allocations);
        self.counters
            .allocated
            .fetch_add(size_for_exp(exp), Ordering::Relaxed);

        trace!("Allocated {} at {}", unit::bytes(size_for_exp(exp)), addr);
        Ok(addr)
    }

    /// Slow path of [`Self::allocate`]: take the smallest block above `exp`
    /// and split it down until it has the size `2^exp`.
    fn split_from_above(&self, exp: u32) -> Result<VirtAddr> {
        let (mut order, mut block) = (exp + 1..=self.max_exp)
            .find_map(|e| self.class(e).lock().pop().map(|block| (e, block)))
            .ok_or(Error::OutOfMemory)?;

        // keep the lower half and give the upper half to the next smaller class,
        // until the kept half has the requested size.
        while order > exp {
            let (lower, upper) = block.split(order);
            order -= 1;

            self.class(order).lock().push(upper);
            Counters::bump(&self.counters.splits);
            trace!(
                "Split block at {} into size {}",
                lower.addr(),
                unit::bytes(size_for_exp(order))
            );

            block = lower;
        }

        Ok(block.addr())
    }

    /// Releases the block at `addr` with size `2^exp`, which must have been
    /// returned by [`Self::allocate`] using the same exponent.
    ///
    /// If tracking is enabled, releasing a block that is not handed out right
    /// now fails with [`Error::InvalidRelease`] and leaves the pool untouched.
    pub fn release(&self, addr: VirtAddr, exp: u32) -> Result<()> {
        if !self.is_valid_exp(exp) {
            return Err(Error::InvalidSize);
        }

        if !self.block_in_pool(addr, exp) || !Region::new(addr).is_aligned(exp) {
            warn!(
                "Tried to release invalid block {} of {}",
                addr,
                unit::bytes(size_for_exp(exp))
            );
            return Err(Error::InvalidRelease);
        }

        if let Some(tracker) = &self.tracker {
            tracker.remove(addr, exp).map_err(|err| {
                warn!("Tried to release block {} that is not allocated", addr);
                err
            })?;
        }

        Counters::bump(&self.counters.releases);
        self.counters
            .allocated
            .fetch_sub(size_for_exp(exp), Ordering::Relaxed);

        self.merge(Region::new(addr), exp);
        trace!("Released {} at {}", unit::bytes(size_for_exp(exp)), addr);
        Ok(())
    }

    /// Insert `block` into the pool, merging it with its buddy for as long
    /// as the buddy is free.
    fn merge(&self, mut block: Region, mut exp: u32) {
        loop {
            let mut list = self.class(exp).lock();

            if exp < self.max_exp {
                let buddy = block.buddy(exp);

                // looking for the buddy and pushing the block happen under
                // the same lock, so a concurrent release of the buddy either
                // sees this block or is seen by it.
                if self.block_in_pool(buddy.addr(), exp) && list.remove(buddy.addr()).is_some() {
                    drop(list);

                    block = cmp::min(block, buddy);
                    exp += 1;
                    Counters::bump(&self.counters.merges);
                    continue;
                }
            }

            list.push(block);
            return;
        }
    }

    /// The first address of the managed range.
    pub fn base(&self) -> VirtAddr {
        self.base
    }

    /// The number of bytes in the managed range.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The exponent of the smallest block.
    pub fn min_exp(&self) -> u32 {
        self.min_exp
    }

    /// The exponent of the largest block.
    pub fn max_exp(&self) -> u32 {
        self.max_exp
    }

    /// Check if `addr` lies inside the managed range.
    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    /// The number of free blocks of size `2^exp`.
    ///
    /// Returns `None` if there's no size class for `exp`.
    pub fn free_blocks(&self, exp: u32) -> Option<usize> {
        if !self.is_valid_exp(exp) {
            return None;
        }
        Some(self.class(exp).lock().len())
    }

    /// The addresses of all free blocks of size `2^exp`, in the
    /// order they would be handed out.
    pub fn free_regions(&self, exp: u32) -> Option<Vec<VirtAddr>> {
        if !self.is_valid_exp(exp) {
            return None;
        }
        let list = self.class(exp).lock();
        Some(list.iter().rev().map(Region::addr).collect())
    }

    /// The number of free bytes, summed over all size classes.
    pub fn free_bytes(&self) -> usize {
        (self.min_exp..=self.max_exp)
            .map(|exp| self.class(exp).lock().len() * size_for_exp(exp))
            .sum()
    }

    /// The number of blocks that are handed out right now.
    ///
    /// Returns `None` if allocation tracking is disabled.
    pub fn allocated_blocks(&self) -> Option<usize> {
        self.tracker.as_ref().map(Tracker::len)
    }

    /// Return a snapshot of the statistics for this pool.
    pub fn stats(&self) -> AllocStats {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);

        AllocStats {
            total: self.size,
            allocated: load(&self.counters.allocated),
            allocations: load(&self.counters.allocations),
            releases: load(&self.counters.releases),
            splits: load(&self.counters.splits),
            merges: load(&self.counters.merges),
            failed: load(&self.counters.failed),
            ..AllocStats::with_name("MMIO Buddy Pool")
        }
    }
}
