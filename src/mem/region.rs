use super::size_for_exp;
use crate::VirtAddr;

/// Descriptor of a single free block.
///
/// The size of the block is not stored here, it is defined by the size
/// class whose free list holds the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Region {
    addr: VirtAddr,
}

impl Region {
    /// Create a descriptor for the block starting at `addr`.
    pub const fn new(addr: VirtAddr) -> Self {
        Self { addr }
    }

    /// The first address of this block.
    pub const fn addr(&self) -> VirtAddr {
        self.addr
    }

    /// Calculate the buddy of this block, if it has the size `2^exp`.
    ///
    /// The addresses of two buddies only differ in the bit that
    /// corresponds to their size.
    pub const fn buddy(&self, exp: u32) -> Region {
        Region::new(VirtAddr::new(self.addr.data() ^ size_for_exp(exp)))
    }

    /// Split this block of size `2^exp` into its lower and upper half.
    pub fn split(self, exp: u32) -> (Region, Region) {
        let half = exp - 1;
        (self, Region::new(self.addr + size_for_exp(half)))
    }

    /// Check if this block is aligned to its own size `2^exp`.
    pub const fn is_aligned(&self, exp: u32) -> bool {
        self.addr.is_aligned(size_for_exp(exp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buddies_differ_in_one_bit() {
        let lower = Region::new(VirtAddr::new(0x10_0000));
        let upper = lower.buddy(12);

        assert_eq!(upper.addr(), VirtAddr::new(0x10_1000));
        assert_eq!(upper.buddy(12), lower);
    }

    #[test]
    fn split_keeps_the_lower_half() {
        let block = Region::new(VirtAddr::new(0x40_0000));
        let (lower, upper) = block.split(16);

        assert_eq!(lower, block);
        assert_eq!(upper.addr(), VirtAddr::new(0x40_8000));
        assert_eq!(lower.buddy(15), upper);
        assert!(upper.is_aligned(15));
        assert!(!upper.is_aligned(16));
    }
}
