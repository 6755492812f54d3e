// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The broad-phase contract (§4.2) and the six interchangeable spatial
//! indices that implement it.
//!
//! Each concrete index is a monomorphic struct; [`BroadPhase`] dispatches to
//! one of them through a tagged enum rather than a trait object, so every
//! backend's inner loops stay free of virtual-call overhead while the
//! façade still sees one type.

pub mod bvh;
pub mod dbvt;
pub mod grid_sap;
pub mod mbp;
pub mod octree;
pub mod spatial_hash;

use crate::aabb::Aabb;

/// Default `brute_force_threshold` for every backend, per §4.2.
pub const DEFAULT_BRUTE_FORCE_THRESHOLD: usize = 32;

/// The operations every spatial index must implement.
pub trait Index {
    /// Register shape `i` with the given AABB.
    fn add(&mut self, i: u32, aabb: Aabb);

    /// Remove shape `i`. Returns `false` if it was not present.
    fn remove(&mut self, i: u32) -> bool;

    /// Notify the index that shape `i` moved from `old_aabb` to `new_aabb`.
    fn update(&mut self, i: u32, old_aabb: Aabb, new_aabb: Aabb);

    /// Write every shape index whose stored AABB overlaps `q` into `out`,
    /// filtering the final candidate set against `all_aabbs`. Returns the
    /// count written (at most `out.len()`).
    fn query(&mut self, q: Aabb, out: &mut [u32], all_aabbs: &[Aabb]) -> usize;

    /// Drop every registration.
    fn clear(&mut self);

    /// Number of shapes currently registered.
    fn shape_count(&self) -> usize;

    /// Below this population, `query` degrades to a brute-force scan.
    fn brute_force_threshold(&self) -> usize {
        DEFAULT_BRUTE_FORCE_THRESHOLD
    }
}

/// Scan `active` directly against `all_aabbs`, used both as the small-`N`
/// fallback path every backend takes and as the reference oracle in tests.
pub fn brute_force_query(
    active: impl Iterator<Item = u32>,
    q: Aabb,
    out: &mut [u32],
    all_aabbs: &[Aabb],
) -> usize {
    let mut n = 0;
    for i in active {
        if n >= out.len() {
            break;
        }
        if all_aabbs[i as usize].intersects(&q) {
            out[n] = i;
            n += 1;
        }
    }
    n
}

/// A plain set of currently-registered shape indices, used by every backend
/// purely for `shape_count` and as the brute-force fallback's iteration
/// source — it carries no spatial information of its own.
///
/// Backed by a sorted `Vec` rather than a hash set: `hashbrown`'s default
/// hasher is randomized per instance, so two freshly built worlds fed an
/// identical insert sequence would otherwise iterate in different orders,
/// breaking the brute-force fallback's determinism (the fallback is the
/// default path at small populations, exactly where most scenarios run).
#[derive(Debug, Default)]
pub(crate) struct ActiveSet {
    ids: Vec<u32>,
}

impl ActiveSet {
    pub(crate) fn insert(&mut self, i: u32) {
        if let Err(pos) = self.ids.binary_search(&i) {
            self.ids.insert(pos, i);
        }
    }

    pub(crate) fn remove(&mut self, i: u32) -> bool {
        match self.ids.binary_search(&i) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }
}

/// Rolling-marker deduplication (§4.2, §9 "Marker dedup"), reused by every
/// grid-family backend to collapse a shape hit via more than one cell down
/// to a single emission, without a per-query hash set.
///
/// `ensure_capacity` must be called whenever a new shape index might exceed
/// the marker array's length — callers do this from `add`, so `visit` never
/// needs to allocate on the query path (§7: no allocation in steady state).
#[derive(Debug, Default)]
pub(crate) struct Dedup {
    marker: Vec<u32>,
    current: u32,
}

impl Dedup {
    pub(crate) fn ensure_capacity(&mut self, n: usize) {
        if self.marker.len() < n {
            self.marker.resize(n, 0);
        }
    }

    pub(crate) fn begin(&mut self) {
        self.current = self.current.wrapping_add(1);
        if self.current == 0 {
            self.marker.iter_mut().for_each(|m| *m = 0);
            self.current = 1;
        }
    }

    /// Returns `true` the first time `i` is visited this query, `false`
    /// on every subsequent visit.
    pub(crate) fn visit(&mut self, i: u32) -> bool {
        let idx = i as usize;
        if idx >= self.marker.len() {
            // Only reachable if a caller forgot to `ensure_capacity`; stay
            // correct rather than panic.
            self.marker.resize(idx + 1, 0);
        }
        if self.marker[idx] == self.current {
            false
        } else {
            self.marker[idx] = self.current;
            true
        }
    }

    pub(crate) fn clear(&mut self) {
        self.marker.iter_mut().for_each(|m| *m = 0);
        self.current = 0;
    }
}

/// The six interchangeable broad-phase backends, dispatched by tag.
#[derive(Debug)]
pub enum BroadPhase {
    /// §4.3
    SpatialHash(spatial_hash::SpatialHash),
    /// §4.4
    GridSap(grid_sap::GridSap),
    /// §4.5
    Mbp(mbp::Mbp),
    /// §4.6
    Octree(octree::Octree),
    /// §4.7
    Bvh(bvh::Bvh),
    /// §4.8
    Dbvt(dbvt::Dbvt),
}

impl Index for BroadPhase {
    fn add(&mut self, i: u32, aabb: Aabb) {
        match self {
            Self::SpatialHash(b) => b.add(i, aabb),
            Self::GridSap(b) => b.add(i, aabb),
            Self::Mbp(b) => b.add(i, aabb),
            Self::Octree(b) => b.add(i, aabb),
            Self::Bvh(b) => b.add(i, aabb),
            Self::Dbvt(b) => b.add(i, aabb),
        }
    }

    fn remove(&mut self, i: u32) -> bool {
        match self {
            Self::SpatialHash(b) => b.remove(i),
            Self::GridSap(b) => b.remove(i),
            Self::Mbp(b) => b.remove(i),
            Self::Octree(b) => b.remove(i),
            Self::Bvh(b) => b.remove(i),
            Self::Dbvt(b) => b.remove(i),
        }
    }

    fn update(&mut self, i: u32, old_aabb: Aabb, new_aabb: Aabb) {
        match self {
            Self::SpatialHash(b) => b.update(i, old_aabb, new_aabb),
            Self::GridSap(b) => b.update(i, old_aabb, new_aabb),
            Self::Mbp(b) => b.update(i, old_aabb, new_aabb),
            Self::Octree(b) => b.update(i, old_aabb, new_aabb),
            Self::Bvh(b) => b.update(i, old_aabb, new_aabb),
            Self::Dbvt(b) => b.update(i, old_aabb, new_aabb),
        }
    }

    fn query(&mut self, q: Aabb, out: &mut [u32], all_aabbs: &[Aabb]) -> usize {
        match self {
            Self::SpatialHash(b) => b.query(q, out, all_aabbs),
            Self::GridSap(b) => b.query(q, out, all_aabbs),
            Self::Mbp(b) => b.query(q, out, all_aabbs),
            Self::Octree(b) => b.query(q, out, all_aabbs),
            Self::Bvh(b) => b.query(q, out, all_aabbs),
            Self::Dbvt(b) => b.query(q, out, all_aabbs),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::SpatialHash(b) => b.clear(),
            Self::GridSap(b) => b.clear(),
            Self::Mbp(b) => b.clear(),
            Self::Octree(b) => b.clear(),
            Self::Bvh(b) => b.clear(),
            Self::Dbvt(b) => b.clear(),
        }
    }

    fn shape_count(&self) -> usize {
        match self {
            Self::SpatialHash(b) => b.shape_count(),
            Self::GridSap(b) => b.shape_count(),
            Self::Mbp(b) => b.shape_count(),
            Self::Octree(b) => b.shape_count(),
            Self::Bvh(b) => b.shape_count(),
            Self::Dbvt(b) => b.shape_count(),
        }
    }

    fn brute_force_threshold(&self) -> usize {
        match self {
            Self::SpatialHash(b) => b.brute_force_threshold(),
            Self::GridSap(b) => b.brute_force_threshold(),
            Self::Mbp(b) => b.brute_force_threshold(),
            Self::Octree(b) => b.brute_force_threshold(),
            Self::Bvh(b) => b.brute_force_threshold(),
            Self::Dbvt(b) => b.brute_force_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn dedup_visits_each_index_once_per_query() {
        let mut d = Dedup::default();
        d.ensure_capacity(4);
        d.begin();
        assert!(d.visit(2));
        assert!(!d.visit(2));
        assert!(d.visit(3));
        d.begin();
        assert!(d.visit(2));
    }

    #[test]
    fn brute_force_query_respects_buffer_cap() {
        let aabbs = vec![
            Aabb::new(Vec3::ZERO, Vec3::ONE),
            Aabb::new(Vec3::ZERO, Vec3::ONE),
            Aabb::new(Vec3::splat(100.0), Vec3::splat(101.0)),
        ];
        let mut out = [0u32; 1];
        let n = brute_force_query(0..3, Aabb::new(Vec3::ZERO, Vec3::ONE), &mut out, &aabbs);
        assert_eq!(n, 1);
    }
}
