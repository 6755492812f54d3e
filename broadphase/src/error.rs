// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for the registry and world configuration.

use thiserror::Error;

/// Errors raised by [`crate::registry::Registry`] accessors.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The handle's index was once valid but its generation no longer
    /// matches the slot's current generation — the shape it named has
    /// since been removed and the slot recycled.
    #[error("handle generation {handle_generation} is stale (slot is at generation {slot_generation})")]
    StaleHandle {
        /// Generation recorded in the handle.
        handle_generation: u32,
        /// Generation currently stored in the slot.
        slot_generation: u32,
    },

    /// The handle's index does not name a slot in the registry at all.
    #[error("handle index {index} is out of bounds (registry has {len} slots)")]
    IndexOutOfBounds {
        /// The out-of-range index.
        index: u32,
        /// Current number of slots in the registry.
        len: u32,
    },
}

/// Errors raised while constructing a [`crate::world::SpatialWorld`] from a
/// [`crate::world::Config`].
#[derive(Debug, Error, Copy, Clone, PartialEq)]
pub enum ConfigError {
    /// One or more configuration fields are not usable to build a world.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] InvalidConfiguration),
}

/// The specific reason a [`Config`](crate::world::Config) was rejected.
#[derive(Debug, Error, Copy, Clone, PartialEq)]
pub enum InvalidConfiguration {
    /// `cell_size` must be strictly positive.
    #[error("cell_size must be positive, got {0}")]
    NonPositiveCellSize(f32),

    /// `grid_size` (zone size) must be strictly positive.
    #[error("grid_size must be positive, got {0}")]
    NonPositiveGridSize(f32),

    /// `world_bounds` must have `min < max` on every axis.
    #[error("world_bounds is empty or degenerate")]
    DegenerateWorldBounds,

    /// `regions_x` / `regions_z` must both be strictly positive.
    #[error("regions_x and regions_z must be positive, got ({0}, {1})")]
    ZeroRegions(u32, u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_message_mentions_both_generations() {
        let e = RegistryError::StaleHandle {
            handle_generation: 1,
            slot_generation: 2,
        };
        assert!(e.to_string().contains('1'));
        assert!(e.to_string().contains('2'));
    }

    #[test]
    fn config_error_wraps_invalid_configuration() {
        let e: ConfigError = InvalidConfiguration::NonPositiveCellSize(-1.0).into();
        assert!(matches!(
            e,
            ConfigError::InvalidConfiguration(InvalidConfiguration::NonPositiveCellSize(_))
        ));
    }
}
