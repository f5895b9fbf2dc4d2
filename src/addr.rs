//! Strongly typed virtual and physical addresses.

use core::{fmt, ops};

macro_rules! addr_type {
    ($(#[$attr:meta])* $pub:vis struct $name:ident;) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        $pub struct $name(usize);

        impl $name {
            /// Create a new address from the raw value.
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            /// Return the raw value of this address.
            pub const fn data(self) -> usize {
                self.0
            }

            /// Check if this address is a multiple of `align`.
            ///
            /// `align` must be a power of two.
            pub const fn is_aligned(self, align: usize) -> bool {
                self.0 & (align - 1) == 0
            }

            /// Round this address down to the given power-of-two `align`.
            pub const fn align_down(self, align: usize) -> Self {
                Self(self.0 & !(align - 1))
            }

            /// Calculates the wrapping offset from this address.
            pub const fn offset(self, off: usize) -> Self {
                Self(self.0.wrapping_add(off))
            }
        }

        impl From<usize> for $name {
            fn from(addr: usize) -> Self {
                Self(addr)
            }
        }

        impl From<$name> for usize {
            fn from(x: $name) -> usize {
                x.0
            }
        }

        impl ops::Add<usize> for $name {
            type Output = $name;

            fn add(self, rhs: usize) -> $name {
                $name(self.0 + rhs)
            }
        }

        impl ops::Sub<$name> for $name {
            type Output = usize;

            fn sub(self, rhs: $name) -> usize {
                self.0 - rhs.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

addr_type! {
    /// A virtual address.
    pub struct VirtAddr;
}

addr_type! {
    /// A physical address.
    pub struct PhysAddr;
}

/// Aligns the given `addr` upwards to `align`.
///
/// Requires `align` to be a power of two.
/// Returns `None` if the aligned value does not fit into a `usize`.
pub const fn align_up(addr: usize, align: usize) -> Option<usize> {
    match addr.checked_add(align - 1) {
        Some(addr) => Some(addr & !(align - 1)),
        None => None,
    }
}
