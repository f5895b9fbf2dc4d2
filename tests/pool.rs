use proptest::prelude::*;
use std::collections::BTreeMap;
use windy_mmio::{
    mem::BuddyPool,
    mmio::Mapper,
    unit::{GIB, KIB, MIB},
    Error, MmioFlags, MmioPool, PhysAddr, PoolConfig, Result, VirtAddr,
};

struct NoMapper;

impl Mapper for NoMapper {
    unsafe fn map(&self, _: VirtAddr, _: PhysAddr, _: usize, _: MmioFlags) -> Result<()> {
        Ok(())
    }

    fn unmap(&self, _: VirtAddr, _: usize) -> Result<()> {
        Ok(())
    }
}

const TOY_BASE: usize = 0x7f00_0000;

fn toy_pool() -> MmioPool<NoMapper> {
    let config = PoolConfig::new(VirtAddr::new(TOY_BASE), 64 * KIB, 12, 16);
    MmioPool::new(config, NoMapper).unwrap()
}

fn free_counts(pool: &BuddyPool) -> Vec<usize> {
    (pool.min_exp()..=pool.max_exp())
        .map(|exp| pool.free_blocks(exp).unwrap())
        .collect()
}

fn assert_initial_state(pool: &BuddyPool) {
    let top = pool.size() >> pool.max_exp();
    assert_eq!(pool.free_blocks(pool.max_exp()), Some(top));
    assert!((pool.min_exp()..pool.max_exp()).all(|exp| pool.free_blocks(exp) == Some(0)));
}

/// Allocates the largest block until the pool is exhausted.
fn exhaust(pool: &MmioPool<NoMapper>) -> Vec<VirtAddr> {
    let max = 1 << pool.buddy().max_exp();
    let mut blocks = Vec::new();
    loop {
        match pool.create(max, MmioFlags::IO) {
            Ok((addr, _)) => blocks.push(addr),
            Err(err) => {
                assert_eq!(err, Error::OutOfMemory);
                return blocks;
            }
        }
    }
}

#[test]
fn single_page_splits_and_merges_back() {
    let pool = toy_pool();
    assert_eq!(free_counts(pool.buddy()), [0, 0, 0, 0, 1]);

    let (a, len) = pool.create(4096, MmioFlags::IO).unwrap();
    assert_eq!(len, 4096);
    assert_eq!(free_counts(pool.buddy()), [1, 1, 1, 1, 0]);

    pool.release(a, len).unwrap();
    assert_eq!(free_counts(pool.buddy()), [0, 0, 0, 0, 1]);
}

#[test]
fn large_request_after_small_ones() {
    let pool = toy_pool();

    let pages = (0..3)
        .map(|_| pool.create(4096, MmioFlags::IO).unwrap())
        .collect::<Vec<_>>();

    for (i, &(a, len)) in pages.iter().enumerate() {
        assert_eq!(len, 4 * KIB);
        for &(b, _) in &pages[i + 1..] {
            assert_ne!(a, b);
            assert!(a + len <= b || b + len <= a);
        }
    }

    let (big, len) = pool.create(32 * KIB, MmioFlags::IO).unwrap();
    assert_eq!(len, 32 * KIB);
    assert!(big.is_aligned(32 * KIB));
    assert!(pages.iter().all(|&(a, _)| a < big || a >= big + len));
}

#[test]
fn split_searches_all_larger_classes() {
    let pool = toy_pool();
    let (a, _) = pool.create(32 * KIB, MmioFlags::IO).unwrap();
    let (b, _) = pool.create(16 * KIB, MmioFlags::IO).unwrap();

    assert_eq!(b, a + 32 * KIB);

    // the last 16 KiB are handed out page by page
    let pages = (0..4)
        .map(|_| pool.create(4 * KIB, MmioFlags::IO).unwrap().0)
        .collect::<Vec<_>>();
    assert_eq!(pool.create(4 * KIB, MmioFlags::IO), Err(Error::OutOfMemory));
    assert_eq!(pool.buddy().free_bytes(), 0);

    pool.release(a, 32 * KIB).unwrap();
    pool.release(b, 16 * KIB).unwrap();
    for addr in pages {
        pool.release(addr, 4 * KIB).unwrap();
    }
    assert_initial_state(pool.buddy());
}

#[test]
fn exhaustion_and_recovery() {
    let config = PoolConfig::new(VirtAddr::new(0x1000_0000_0000), 64 * GIB, 12, 30);
    let pool = MmioPool::new(config, NoMapper).unwrap();

    let blocks = exhaust(&pool);
    assert_eq!(blocks.len(), 64);

    pool.release(blocks[17], GIB).unwrap();
    let (addr, _) = pool.create(GIB, MmioFlags::IO).unwrap();
    assert_eq!(addr, blocks[17]);
    assert_eq!(pool.create(GIB, MmioFlags::IO), Err(Error::OutOfMemory));
}

#[test]
fn create_then_release_leaves_no_trace() {
    let pool = toy_pool();
    let (keep, _) = pool.create(8 * KIB, MmioFlags::IO).unwrap();
    let before = free_counts(pool.buddy());

    let (addr, len) = pool.create(5 * KIB, MmioFlags::IO).unwrap();
    pool.release(addr, len).unwrap();
    assert_eq!(free_counts(pool.buddy()), before);

    // the same blocks can still be handed out as before
    let (again, _) = pool.create(5 * KIB, MmioFlags::IO).unwrap();
    assert_eq!(again, addr);
    pool.release(again, len).unwrap();
    pool.release(keep, 8 * KIB).unwrap();
    assert_initial_state(pool.buddy());
}

#[test]
fn full_pool_coalesces_completely() {
    let pool = MmioPool::new(PoolConfig::DEFAULT, NoMapper).unwrap();
    assert_initial_state(pool.buddy());

    let sizes = [1, 4 * KIB, 12 * KIB, 300 * KIB, 2 * MIB, GIB, 3 * MIB, 64 * KIB];
    let mut granted = Vec::new();
    for _ in 0..16 {
        for &size in sizes.iter() {
            let (addr, len) = pool.create(size, MmioFlags::mmio()).unwrap();
            assert!(len >= size && len.is_power_of_two() && len >= 4 * KIB);
            assert!(addr.is_aligned(len));
            granted.push((addr, len));
        }
    }

    // release in a different order than allocated
    granted.reverse();
    let mid = granted.len() / 3;
    granted.rotate_left(mid);
    for (addr, len) in granted {
        pool.release(addr, len).unwrap();
    }

    assert_initial_state(pool.buddy());
    assert_eq!(pool.stats().allocated, 0);
    assert_eq!(pool.buddy().allocated_blocks(), Some(0));
}

#[test]
fn double_release_is_rejected() {
    let pool = toy_pool();
    let (a, len) = pool.create(4 * KIB, MmioFlags::IO).unwrap();
    let (b, _) = pool.create(4 * KIB, MmioFlags::IO).unwrap();

    pool.release(a, len).unwrap();
    let before = free_counts(pool.buddy());
    assert_eq!(pool.release(a, len), Err(Error::InvalidRelease));
    assert_eq!(free_counts(pool.buddy()), before);

    // forged address inside a free block
    let forged = VirtAddr::new(TOY_BASE + 32 * KIB);
    assert_eq!(pool.release(forged, len), Err(Error::InvalidRelease));
    assert_eq!(free_counts(pool.buddy()), before);

    pool.release(b, len).unwrap();
    assert_initial_state(pool.buddy());
}

/// Checks that no two granted ranges overlap, and that no granted range
/// overlaps a free block.
fn assert_disjoint(pool: &BuddyPool, granted: &BTreeMap<VirtAddr, usize>) {
    let mut ranges = granted
        .iter()
        .map(|(&addr, &len)| (addr.data(), len))
        .collect::<Vec<_>>();

    for exp in pool.min_exp()..=pool.max_exp() {
        for addr in pool.free_regions(exp).unwrap() {
            ranges.push((addr.data(), 1 << exp));
        }
    }

    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "{:x?} overlaps {:x?}", pair[0], pair[1]);
    }

    // nothing got lost either
    let covered: usize = ranges.iter().map(|&(_, len)| len).sum();
    assert_eq!(covered, pool.size());
}

proptest! {
    #[test]
    fn interleaved_requests_stay_disjoint(
        ops in prop::collection::vec(
            (any::<bool>(), 1usize..=256 * KIB, any::<prop::sample::Index>()),
            1..80,
        )
    ) {
        let config = PoolConfig::new(VirtAddr::new(0x40_0000_0000), MIB, 12, 18);
        let pool = MmioPool::new(config, NoMapper).unwrap();
        let mut granted = BTreeMap::new();

        for (create, size, idx) in ops {
            if create || granted.is_empty() {
                match pool.create(size, MmioFlags::IO) {
                    Ok((addr, len)) => {
                        prop_assert!(addr.is_aligned(len));
                        prop_assert!(len >= size);
                        prop_assert!(granted.insert(addr, len).is_none());
                    }
                    Err(err) => prop_assert_eq!(err, Error::OutOfMemory),
                }
            } else {
                let addr = *granted.keys().nth(idx.index(granted.len())).unwrap();
                let len = granted.remove(&addr).unwrap();
                prop_assert_eq!(pool.release(addr, len), Ok(()));
            }

            assert_disjoint(pool.buddy(), &granted);
        }

        for (addr, len) in granted {
            prop_assert_eq!(pool.release(addr, len), Ok(()));
        }
        assert_initial_state(pool.buddy());
    }
}
