//! The interface that drivers use to reserve address space for
//! memory-mapped device registers.
//!
//! [`MmioPool::create`] rounds the requested size up to the next block and
//! returns the address together with the granted size. The granted size,
//! not the requested one, has to be passed back to [`MmioPool::release`].
//!
//! Most drivers want an [`MmioSpace`] instead, which maps the device memory
//! through the kernel's [`Mapper`] and gives the range back when dropped.

use crate::{
    addr::align_up,
    mem::{exp_for_size, size_for_exp, AllocStats, BuddyPool, Error, PoolConfig, Result},
    unit, PhysAddr, VirtAddr,
};
use bitflags::bitflags;
use core::{
    cmp, fmt, mem,
    sync::atomic::{AtomicBool, Ordering},
};
use log::{error, info, warn};
use spin::Once;

bitflags! {
    /// Flags that describe how an MMIO range is used.
    ///
    /// The pool itself ignores them, they are handed to the [`Mapper`].
    pub struct MmioFlags: u32 {
        /// The range maps device registers.
        const IO = 1 << 0;
        /// The range must not be copied into child address spaces.
        const DONT_COPY = 1 << 1;
        /// Accesses must bypass the cache.
        const UNCACHED = 1 << 2;
        /// Writes may be combined by the CPU.
        const WRITE_COMBINE = 1 << 3;
    }
}

impl MmioFlags {
    /// The flags that are used for regular device registers.
    pub fn mmio() -> Self {
        Self::IO | Self::DONT_COPY | Self::UNCACHED
    }
}

/// The collaborator that installs and removes the page table entries
/// for MMIO ranges.
pub trait Mapper: Send + Sync {
    /// Map `len` bytes of device memory at `paddr` to `vaddr`.
    ///
    /// # Safety
    ///
    /// `paddr` must be the physical address of device memory. Mapping memory
    /// that belongs to the frame allocator would leak it, because releasing
    /// the MMIO range only removes the mapping.
    unsafe fn map(&self, vaddr: VirtAddr, paddr: PhysAddr, len: usize, flags: MmioFlags)
        -> Result<()>;

    /// Remove all mappings in `vaddr..vaddr + len`.
    fn unmap(&self, vaddr: VirtAddr, len: usize) -> Result<()>;
}

impl<M: Mapper + ?Sized> Mapper for &M {
    unsafe fn map(
        &self,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        len: usize,
        flags: MmioFlags,
    ) -> Result<()> {
        (**self).map(vaddr, paddr, len, flags)
    }

    fn unmap(&self, vaddr: VirtAddr, len: usize) -> Result<()> {
        (**self).unmap(vaddr, len)
    }
}

/// The MMIO address space together with the mapper that populates it.
pub struct MmioPool<M> {
    buddy: BuddyPool,
    mapper: M,
}

impl<M: Mapper> MmioPool<M> {
    /// Create a new pool that manages the range described by `config`.
    pub fn new(config: PoolConfig, mapper: M) -> Result<Self> {
        let buddy = BuddyPool::new(config)?;
        Ok(Self { buddy, mapper })
    }

    /// The buddy pool that backs this MMIO pool.
    pub fn buddy(&self) -> &BuddyPool {
        &self.buddy
    }

    /// The mapper of this pool.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// The size of a page, which is the smallest block of the pool.
    pub fn page_size(&self) -> usize {
        size_for_exp(self.buddy.min_exp())
    }

    /// Calculate the exponent of the block that will be used for `size` bytes.
    fn exp_for_request(&self, size: usize) -> Result<u32> {
        let exp = exp_for_size(size).ok_or(Error::InvalidSize)?;
        let exp = cmp::max(exp, self.buddy.min_exp());

        if exp > self.buddy.max_exp() {
            return Err(Error::InvalidSize);
        }
        Ok(exp)
    }

    /// Reserve a range of at least `size` bytes.
    ///
    /// Returns the start of the range and the granted size, which is the
    /// next power of two, but at least one page.
    /// `flags` are not used by the pool itself.
    pub fn create(&self, size: usize, flags: MmioFlags) -> Result<(VirtAddr, usize)> {
        let exp = self.exp_for_request(size)?;

        match self.buddy.allocate(exp) {
            Ok(addr) => Ok((addr, size_for_exp(exp))),
            Err(err) => {
                error!(
                    "Failed to create MMIO range of {} ({:?}): {}",
                    unit::bytes(size),
                    flags,
                    err
                );
                Err(err)
            }
        }
    }

    /// Give back a range that was reserved using [`Self::create`].
    ///
    /// `len` must be the granted size that `create` returned.
    pub fn release(&self, vaddr: VirtAddr, len: usize) -> Result<()> {
        if !len.is_power_of_two() {
            return Err(Error::InvalidRelease);
        }

        let exp = len.trailing_zeros();
        if !self.buddy.is_valid_exp(exp) {
            return Err(Error::InvalidRelease);
        }

        self.buddy.release(vaddr, exp)
    }

    /// Reserve a range of at least `size` bytes and wrap it in a guard,
    /// that will release it once dropped.
    pub fn create_space(&self, size: usize, flags: MmioFlags) -> Result<MmioSpace<'_, M>> {
        let (vaddr, size) = self.create(size, flags)?;
        Ok(MmioSpace {
            pool: self,
            vaddr,
            size,
            flags,
            mapped: AtomicBool::new(false),
        })
    }

    /// Return a snapshot of the statistics for this pool.
    pub fn stats(&self) -> AllocStats {
        self.buddy.stats()
    }
}

impl<M> fmt::Debug for MmioPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmioPool")
            .field("base", &self.buddy.base())
            .field("size", &self.buddy.size())
            .field("min_exp", &self.buddy.min_exp())
            .field("max_exp", &self.buddy.max_exp())
            .finish()
    }
}

/// A range of MMIO address space that is owned by a driver.
///
/// Dropping the guard removes the mapping, if there is one, and gives the
/// range back to the pool.
pub struct MmioSpace<'pool, M: Mapper> {
    pool: &'pool MmioPool<M>,
    vaddr: VirtAddr,
    size: usize,
    flags: MmioFlags,
    mapped: AtomicBool,
}

impl<'pool, M: Mapper> MmioSpace<'pool, M> {
    /// Wrap a range of `pool` that was reserved without a guard, for example
    /// using [`MmioPool::create`], or that was leaked before.
    ///
    /// `mapped` tells if device memory is already mapped into the range,
    /// which will then be unmapped once the guard is dropped.
    ///
    /// # Safety
    ///
    /// The range must be handed out by `pool` and must not be owned by
    /// anything else, because the guard releases it when dropped.
    ///
    /// # Panics
    ///
    /// Panics if the range can't be a block of `pool`.
    pub unsafe fn from_raw(
        pool: &'pool MmioPool<M>,
        vaddr: VirtAddr,
        size: usize,
        flags: MmioFlags,
        mapped: bool,
    ) -> Self {
        assert!(size.is_power_of_two(), "MMIO range size must be a power of two");
        assert!(
            pool.buddy.is_valid_exp(size.trailing_zeros()),
            "MMIO range size must be a block size of the pool"
        );
        assert!(vaddr.is_aligned(size), "MMIO range must be aligned to its size");
        assert!(
            pool.buddy.contains(vaddr) && pool.buddy.contains(vaddr + (size - 1)),
            "MMIO range must lie inside the pool"
        );

        Self {
            pool,
            vaddr,
            size,
            flags,
            mapped: AtomicBool::new(mapped),
        }
    }

    /// The first address of this range.
    pub fn vaddr(&self) -> VirtAddr {
        self.vaddr
    }

    /// The number of bytes in this range.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The flags this range was created with.
    pub fn flags(&self) -> MmioFlags {
        self.flags
    }

    /// Check if device memory was mapped into this range.
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    /// Map `len` bytes of device memory at `paddr` to the start of this range,
    /// using the flags this range was created with.
    ///
    /// A range can only be mapped once.
    ///
    /// # Safety
    ///
    /// `paddr` must be the physical address of device memory, see [`Mapper::map`].
    pub unsafe fn map_phys(&self, paddr: PhysAddr, len: usize) -> Result<()> {
        self.map_phys_with_flags(paddr, len, self.flags)
    }

    /// Same as [`Self::map_phys`], but hands `flags` to the mapper instead of
    /// the flags this range was created with.
    ///
    /// # Safety
    ///
    /// `paddr` must be the physical address of device memory, see [`Mapper::map`].
    pub unsafe fn map_phys_with_flags(
        &self,
        paddr: PhysAddr,
        len: usize,
        flags: MmioFlags,
    ) -> Result<()> {
        if len > self.size {
            return Err(Error::InvalidArgument);
        }

        if self
            .mapped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidArgument);
        }

        let res = self.pool.mapper.map(self.vaddr, paddr, len, flags);
        if res.is_err() {
            self.mapped.store(false, Ordering::Release);
        }
        res
    }

    /// Map the device memory at `paddr`, that does not have to be
    /// page aligned, into this range.
    ///
    /// Returns the virtual address that corresponds to `paddr`.
    ///
    /// # Safety
    ///
    /// `paddr` must be the physical address of device memory, see [`Mapper::map`].
    pub unsafe fn map_any_phys(&self, paddr: PhysAddr, len: usize) -> Result<VirtAddr> {
        let page_size = self.pool.page_size();
        let paddr_base = paddr.align_down(page_size);
        let offset = paddr - paddr_base;

        let len = len
            .checked_add(offset)
            .and_then(|len| align_up(len, page_size))
            .ok_or(Error::InvalidArgument)?;

        self.map_phys(paddr_base, len)?;
        Ok(self.vaddr + offset)
    }

    /// Forget this guard without releasing the range.
    ///
    /// The range stays reserved (and mapped) for the rest of the kernel's lifetime.
    pub fn leak(self) {
        mem::forget(self);
    }
}

impl<M: Mapper> fmt::Debug for MmioSpace<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmioSpace")
            .field("vaddr", &self.vaddr)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl<M: Mapper> Drop for MmioSpace<'_, M> {
    fn drop(&mut self) {
        if *self.mapped.get_mut() {
            if let Err(err) = self.pool.mapper.unmap(self.vaddr, self.size) {
                // the pages are still mapped, so the range can't be reused
                error!("Failed to unmap MMIO range at {}: {}", self.vaddr, err);
                return;
            }
        }

        if let Err(err) = self.pool.release(self.vaddr, self.size) {
            error!("Failed to release MMIO range at {}: {}", self.vaddr, err);
        }
    }
}

/// The type of the process-wide MMIO pool.
pub type GlobalMmioPool = MmioPool<&'static dyn Mapper>;

static MMIO_POOL: Once<GlobalMmioPool> = Once::new();
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Create the process-wide MMIO pool.
///
/// Must be called exactly once while the kernel boots, before any driver
/// requests address space.
///
/// # Panics
///
/// Panics if the pool was already initialized.
pub fn init(config: PoolConfig, mapper: &'static dyn Mapper) -> Result<&'static GlobalMmioPool> {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        panic!("the MMIO pool was already initialized");
    }

    let pool = match MmioPool::new(config, mapper) {
        Ok(pool) => pool,
        Err(err) => {
            warn!("Invalid MMIO pool configuration: {:?}", config);
            INITIALIZED.store(false, Ordering::Release);
            return Err(err);
        }
    };

    let pool = MMIO_POOL.call_once(|| pool);
    info!("MMIO buddy pool initialized");
    Ok(pool)
}

/// Return the process-wide MMIO pool.
///
/// # Panics
///
/// Panics if [`init`] was not called before.
pub fn pool() -> &'static GlobalMmioPool {
    match MMIO_POOL.get() {
        Some(pool) => pool,
        None => panic!("the MMIO pool was used before it was initialized"),
    }
}
