//! Side table of the blocks that are currently handed out.

use super::{Error, Result};
use crate::VirtAddr;
use alloc::collections::BTreeMap;
use spin::Mutex;

/// Remembers the exponent of every block that was handed out, so a release
/// can be checked against it.
///
/// The lock of the tracker is never held together with the lock of a size class.
#[derive(Debug, Default)]
pub(super) struct Tracker {
    granted: Mutex<BTreeMap<VirtAddr, u32>>,
}

impl Tracker {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Record that the block at `addr` with size `2^exp` was handed out.
    pub(super) fn insert(&self, addr: VirtAddr, exp: u32) {
        let prev = self.granted.lock().insert(addr, exp);
        debug_assert!(prev.is_none(), "block {} was handed out twice", addr);
    }

    /// Forget the block at `addr`, if it was handed out with exactly size `2^exp`.
    pub(super) fn remove(&self, addr: VirtAddr, exp: u32) -> Result<()> {
        let mut granted = self.granted.lock();
        match granted.get(&addr) {
            Some(&granted_exp) if granted_exp == exp => {
                granted.remove(&addr);
                Ok(())
            }
            _ => Err(Error::InvalidRelease),
        }
    }

    /// The number of blocks that are handed out.
    pub(super) fn len(&self) -> usize {
        self.granted.lock().len()
    }
}
