// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The query driver: turns a high-level query (ray, sphere, capsule sweep,
//! slash ribbon, point) into a bounding AABB, asks the active broad-phase
//! index for candidates, and performs the final AABB and mask filtering
//! before narrow-phase ever runs.

use glam::Vec3;

use crate::aabb::Aabb;
use crate::broadphase::{BroadPhase, Index};
use crate::mask::LayerMask;
use crate::registry::Registry;

/// Stack-allocated candidate buffer size fed by the active index before
/// the driver's own AABB/mask filtering narrows it down (§4.9: "typical
/// size 64-256").
const CANDIDATE_BUFFER_LEN: usize = 256;

/// A ray query: `origin + t*dir` for `t` in `[0, max_dist]`.
#[derive(Copy, Clone, Debug)]
pub struct RayQuery {
    /// Ray origin.
    pub origin: Vec3,
    /// Ray direction; callers are expected to pass a unit vector.
    pub dir: Vec3,
    /// Maximum distance along `dir` to consider.
    pub max_dist: f32,
    /// A shape passes iff `(shape.mask & include_mask) != 0`.
    pub include_mask: LayerMask,
    /// A shape is rejected iff `(shape.mask & exclude_mask) != 0`.
    pub exclude_mask: LayerMask,
}

impl RayQuery {
    /// AABB enclosing the full ray segment.
    pub fn bounding_aabb(&self) -> Aabb {
        let end = self.origin + self.dir * self.max_dist;
        Aabb::from_corners(self.origin, end)
    }
}

/// A stationary sphere overlap query.
#[derive(Copy, Clone, Debug)]
pub struct SphereOverlapQuery {
    /// Sphere center.
    pub center: Vec3,
    /// Sphere radius.
    pub radius: f32,
    /// Include-mask, as [`RayQuery::include_mask`].
    pub include_mask: LayerMask,
    /// Exclude-mask, as [`RayQuery::exclude_mask`].
    pub exclude_mask: LayerMask,
}

impl SphereOverlapQuery {
    /// AABB enclosing the query sphere.
    pub fn bounding_aabb(&self) -> Aabb {
        Aabb::from_center_half_extents(self.center, Vec3::splat(self.radius))
    }
}

/// A capsule swept from `start` to `end`, as used by scenario S5.
#[derive(Copy, Clone, Debug)]
pub struct CapsuleSweepQuery {
    /// Sweep start center.
    pub start: Vec3,
    /// Sweep end center.
    pub end: Vec3,
    /// Capsule radius.
    pub radius: f32,
    /// Include-mask, as [`RayQuery::include_mask`].
    pub include_mask: LayerMask,
    /// Exclude-mask, as [`RayQuery::exclude_mask`].
    pub exclude_mask: LayerMask,
}

impl CapsuleSweepQuery {
    /// AABB enclosing the swept capsule volume.
    pub fn bounding_aabb(&self) -> Aabb {
        Aabb::from_corners(self.start, self.end).expand(self.radius)
    }
}

/// A "slash" ribbon query: the quad swept by segment `a` moving to segment
/// `b` (e.g. a melee weapon's edge over one frame).
#[derive(Copy, Clone, Debug)]
pub struct SlashQuery {
    /// Start-of-frame segment, first endpoint.
    pub base_a: Vec3,
    /// Start-of-frame segment, second endpoint.
    pub tip_a: Vec3,
    /// End-of-frame segment, first endpoint.
    pub base_b: Vec3,
    /// End-of-frame segment, second endpoint.
    pub tip_b: Vec3,
    /// Include-mask, as [`RayQuery::include_mask`].
    pub include_mask: LayerMask,
    /// Exclude-mask, as [`RayQuery::exclude_mask`].
    pub exclude_mask: LayerMask,
}

impl SlashQuery {
    /// AABB enclosing all four ribbon corners.
    pub fn bounding_aabb(&self) -> Aabb {
        let mut b = Aabb::from_corners(self.base_a, self.tip_a);
        b.merge_with(&Aabb::from_corners(self.base_b, self.tip_b));
        b
    }
}

/// A single-point containment query.
#[derive(Copy, Clone, Debug)]
pub struct PointQuery {
    /// The point to test.
    pub point: Vec3,
    /// Include-mask, as [`RayQuery::include_mask`].
    pub include_mask: LayerMask,
    /// Exclude-mask, as [`RayQuery::exclude_mask`].
    pub exclude_mask: LayerMask,
}

impl PointQuery {
    /// Degenerate AABB at the point.
    pub fn bounding_aabb(&self) -> Aabb {
        Aabb::new(self.point, self.point)
    }
}

/// Drives a broad-phase query to completion: rotates the marker, collects
/// candidates from the active index, deduplicates, and applies the final
/// AABB and mask filters (§4.9).
#[derive(Default, Debug)]
pub struct QueryDriver {
    marker: Vec<u32>,
    current_query_id: u32,
}

impl QueryDriver {
    /// An empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called whenever a new shape index might exceed the marker
    /// array's length, mirroring [`crate::broadphase::Dedup::ensure_capacity`].
    pub fn ensure_capacity(&mut self, n: usize) {
        if self.marker.len() < n {
            self.marker.resize(n, 0);
        }
    }

    /// Run one query: `q_aabb` bounds the shapes of interest, `include`/
    /// `exclude` are applied after the AABB test and before narrow-phase.
    /// Writes up to `out.len()` matching shape indices and returns the
    /// count written.
    pub fn query(
        &mut self,
        broad_phase: &mut BroadPhase,
        registry: &Registry,
        q_aabb: Aabb,
        include: LayerMask,
        exclude: LayerMask,
        out: &mut [u32],
    ) -> usize {
        self.current_query_id = self.current_query_id.wrapping_add(1);
        if self.current_query_id == 0 {
            self.marker.iter_mut().for_each(|m| *m = 0);
            self.current_query_id = 1;
        }

        let mut candidates = [0u32; CANDIDATE_BUFFER_LEN];
        let all_aabbs = registry.aabb_slice();
        let all_masks = registry.mask_slice();
        let candidate_count = broad_phase.query(q_aabb, &mut candidates, all_aabbs);

        let mut n = 0;
        for &i in &candidates[..candidate_count] {
            if n >= out.len() {
                break;
            }
            let idx = i as usize;
            if idx >= self.marker.len() {
                self.marker.resize(idx + 1, 0);
            }
            if self.marker[idx] == self.current_query_id {
                continue;
            }
            self.marker[idx] = self.current_query_id;

            if !all_aabbs[idx].intersects(&q_aabb) {
                continue;
            }
            if !all_masks[idx].passes(include, exclude) {
                continue;
            }
            out[n] = i;
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadphase::spatial_hash::SpatialHash;
    use crate::mask::LayerMask;
    use crate::registry::Registry;
    use crate::shape::ShapeParams;

    #[test]
    fn query_driver_applies_mask_filter_after_aabb_test() {
        let mut registry = Registry::new();
        let mut bp = BroadPhase::SpatialHash(SpatialHash::new(1.0, 16));
        let h1 = registry.add(
            ShapeParams::Sphere {
                center: Vec3::ZERO,
                radius: 2.0,
            },
            LayerMask::from_bits_retain(0x01),
            0,
        );
        let h2 = registry.add(
            ShapeParams::Sphere {
                center: Vec3::ZERO,
                radius: 2.0,
            },
            LayerMask::from_bits_retain(0x02),
            0,
        );
        bp.add(h1.index(), registry.aabb(h1).unwrap());
        bp.add(h2.index(), registry.aabb(h2).unwrap());

        let mut driver = QueryDriver::new();
        driver.ensure_capacity(2);
        let q = PointQuery {
            point: Vec3::ZERO,
            include_mask: LayerMask::from_bits_retain(0x01),
            exclude_mask: LayerMask::NONE,
        };
        let mut out = [0u32; 8];
        let n = driver.query(&mut bp, &registry, q.bounding_aabb(), q.include_mask, q.exclude_mask, &mut out);
        assert_eq!(n, 1);
        assert_eq!(out[0], h1.index());
    }
}
