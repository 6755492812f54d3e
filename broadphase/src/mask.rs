// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layer masks used to filter query results.

use bitflags::bitflags;

bitflags! {
    /// A 32-bit collision layer mask.
    ///
    /// Every bit is caller-defined; this type carries no reserved layers of
    /// its own, it just gives the raw `u32` `Debug`/set-algebra and a
    /// typed home instead of passing bare integers around.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct LayerMask: u32 {
        const NONE = 0;
        const ALL = u32::MAX;
    }
}

impl Default for LayerMask {
    /// The default mask for a newly added shape: all bits set.
    fn default() -> Self {
        Self::ALL
    }
}

impl LayerMask {
    /// A shape passes a query iff `(shape.mask & include) != 0 && (shape.mask & exclude) == 0`.
    #[inline]
    pub fn passes(self, include: Self, exclude: Self) -> bool {
        (self & include) != Self::NONE && (self & exclude) == Self::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_bits() {
        assert_eq!(LayerMask::default(), LayerMask::ALL);
    }

    #[test]
    fn passes_requires_include_and_forbids_exclude() {
        let a = LayerMask::from_bits_retain(0x01);
        let b = LayerMask::from_bits_retain(0x02);
        assert!(a.passes(LayerMask::from_bits_retain(0x01), LayerMask::NONE));
        assert!(!a.passes(LayerMask::from_bits_retain(0x02), LayerMask::NONE));
        assert!(!a.passes(LayerMask::ALL, LayerMask::from_bits_retain(0x01)));
        assert!(b.passes(LayerMask::ALL, LayerMask::from_bits_retain(0x01)));
    }
}
