// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multi-Box Pruning: a fixed 2-D grid of regions over the XZ plane, each
//! holding a deferred-sort sweep list along X.

use super::{brute_force_query, ActiveSet, Dedup, Index, DEFAULT_BRUTE_FORCE_THRESHOLD};
use crate::aabb::Aabb;

#[derive(Default, Debug)]
struct Region {
    shape_indices: Vec<u32>,
    min_x: Vec<f32>,
    max_x: Vec<f32>,
    is_sorted: bool,
}

impl Region {
    fn push(&mut self, shape: u32, min_x: f32, max_x: f32) {
        self.shape_indices.push(shape);
        self.min_x.push(min_x);
        self.max_x.push(max_x);
        self.is_sorted = false;
    }

    fn remove(&mut self, shape: u32) -> bool {
        if let Some(pos) = self.shape_indices.iter().position(|&s| s == shape) {
            self.shape_indices.swap_remove(pos);
            self.min_x.swap_remove(pos);
            self.max_x.swap_remove(pos);
            self.is_sorted = false;
            true
        } else {
            false
        }
    }

    /// Insertion sort by `min_x`; cheap when the region is already nearly
    /// sorted, which it is after one burst of local motion.
    fn ensure_sorted(&mut self) {
        if self.is_sorted {
            return;
        }
        let n = self.shape_indices.len();
        for i in 1..n {
            let mut j = i;
            while j > 0 && self.min_x[j - 1] > self.min_x[j] {
                self.shape_indices.swap(j - 1, j);
                self.min_x.swap(j - 1, j);
                self.max_x.swap(j - 1, j);
                j -= 1;
            }
        }
        self.is_sorted = true;
    }

    fn query(&mut self, q_min_x: f32, q_max_x: f32, dedup: &mut Dedup, out: &mut Vec<u32>) {
        self.ensure_sorted();
        for i in 0..self.shape_indices.len() {
            if self.min_x[i] > q_max_x {
                break;
            }
            if self.max_x[i] < q_min_x {
                continue;
            }
            let shape = self.shape_indices[i];
            if dedup.visit(shape) {
                out.push(shape);
            }
        }
    }
}

/// Multi-Box Pruning broad phase over a fixed world AABB.
#[derive(Debug)]
pub struct Mbp {
    world_bounds: Aabb,
    regions_x: u32,
    regions_z: u32,
    regions: Vec<Region>,
    shape_regions: hashbrown::HashMap<u32, smallvec::SmallVec<[u32; 4]>>,
    out_of_bounds: Vec<u32>,
    active: ActiveSet,
    dedup: Dedup,
    query_candidates: Vec<u32>,
}

impl Mbp {
    /// Build an MBP index over `world_bounds` split into `regions_x *
    /// regions_z` cells in the XZ plane.
    pub fn new(world_bounds: Aabb, regions_x: u32, regions_z: u32) -> Self {
        let count = (regions_x.max(1) * regions_z.max(1)) as usize;
        Self {
            world_bounds,
            regions_x: regions_x.max(1),
            regions_z: regions_z.max(1),
            regions: (0..count).map(|_| Region::default()).collect(),
            shape_regions: hashbrown::HashMap::new(),
            out_of_bounds: Vec::new(),
            active: ActiveSet::default(),
            dedup: Dedup::default(),
            query_candidates: Vec::new(),
        }
    }

    #[inline]
    fn region_index(&self, rx: u32, rz: u32) -> u32 {
        rz * self.regions_x + rx
    }

    /// Region coordinate range an AABB's XZ footprint spans, clamped into
    /// `[0, regions-1]` per §9 ("MBP region borders... treat this as
    /// normative").
    fn region_range(&self, aabb: &Aabb) -> Option<(u32, u32, u32, u32)> {
        if !aabb.intersects(&self.world_bounds) {
            return None;
        }
        let size_x = (self.world_bounds.max.x - self.world_bounds.min.x) / self.regions_x as f32;
        let size_z = (self.world_bounds.max.z - self.world_bounds.min.z) / self.regions_z as f32;
        let clamp_x = |v: f32| -> u32 {
            let r = ((v - self.world_bounds.min.x) / size_x).floor();
            r.max(0.0).min((self.regions_x - 1) as f32) as u32
        };
        let clamp_z = |v: f32| -> u32 {
            let r = ((v - self.world_bounds.min.z) / size_z).floor();
            r.max(0.0).min((self.regions_z - 1) as f32) as u32
        };
        Some((
            clamp_x(aabb.min.x),
            clamp_x(aabb.max.x),
            clamp_z(aabb.min.z),
            clamp_z(aabb.max.z),
        ))
    }
}

impl Index for Mbp {
    fn add(&mut self, i: u32, aabb: Aabb) {
        match self.region_range(&aabb) {
            Some((rx0, rx1, rz0, rz1)) => {
                let mut spans = smallvec::SmallVec::new();
                for rx in rx0..=rx1 {
                    for rz in rz0..=rz1 {
                        let idx = self.region_index(rx, rz);
                        self.regions[idx as usize].push(i, aabb.min.x, aabb.max.x);
                        spans.push(idx);
                    }
                }
                self.shape_regions.insert(i, spans);
            }
            None => self.out_of_bounds.push(i),
        }
        self.active.insert(i);
        self.dedup.ensure_capacity(i as usize + 1);
    }

    fn remove(&mut self, i: u32) -> bool {
        if let Some(spans) = self.shape_regions.remove(&i) {
            for idx in spans {
                self.regions[idx as usize].remove(i);
            }
            self.active.remove(i);
            true
        } else if let Some(pos) = self.out_of_bounds.iter().position(|&s| s == i) {
            self.out_of_bounds.swap_remove(pos);
            self.active.remove(i);
            true
        } else {
            false
        }
    }

    fn update(&mut self, i: u32, old_aabb: Aabb, new_aabb: Aabb) {
        self.remove_internal(i, old_aabb);
        self.add(i, new_aabb);
    }

    fn query(&mut self, q: Aabb, out: &mut [u32], all_aabbs: &[Aabb]) -> usize {
        if self.active.len() <= self.brute_force_threshold() {
            return brute_force_query(self.active.iter(), q, out, all_aabbs);
        }
        let Some((rx0, rx1, rz0, rz1)) = self.region_range(&q) else {
            return brute_force_query(self.out_of_bounds.iter().copied(), q, out, all_aabbs);
        };

        self.dedup.begin();
        self.query_candidates.clear();
        for rx in rx0..=rx1 {
            for rz in rz0..=rz1 {
                let idx = self.region_index(rx, rz);
                self.regions[idx as usize].query(q.min.x, q.max.x, &mut self.dedup, &mut self.query_candidates);
            }
        }
        for &id in &self.out_of_bounds {
            if self.dedup.visit(id) {
                self.query_candidates.push(id);
            }
        }

        let mut n = 0;
        for &id in &self.query_candidates {
            if n >= out.len() {
                break;
            }
            if all_aabbs[id as usize].intersects(&q) {
                out[n] = id;
                n += 1;
            }
        }
        n
    }

    fn clear(&mut self) {
        self.regions.iter_mut().for_each(|r| *r = Region::default());
        self.shape_regions.clear();
        self.out_of_bounds.clear();
        self.active.clear();
        self.dedup.clear();
    }

    fn shape_count(&self) -> usize {
        self.active.len()
    }

    fn brute_force_threshold(&self) -> usize {
        DEFAULT_BRUTE_FORCE_THRESHOLD
    }
}

impl Mbp {
    fn remove_internal(&mut self, i: u32, _old_aabb: Aabb) {
        if let Some(spans) = self.shape_regions.remove(&i) {
            for idx in spans {
                self.regions[idx as usize].remove(i);
            }
        } else if let Some(pos) = self.out_of_bounds.iter().position(|&s| s == i) {
            self.out_of_bounds.swap_remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn world() -> Aabb {
        Aabb::new(Vec3::splat(-50.0), Vec3::splat(50.0))
    }

    fn aabb_at(c: Vec3) -> Aabb {
        Aabb::from_center_half_extents(c, Vec3::splat(0.4))
    }

    #[test]
    fn insert_then_query_finds_shape() {
        let mut m = Mbp::new(world(), 4, 4);
        let all = vec![aabb_at(Vec3::ZERO)];
        m.add(0, all[0]);
        let mut out = [0u32; 8];
        assert_eq!(m.query(aabb_at(Vec3::ZERO), &mut out, &all), 1);
    }

    #[test]
    fn out_of_bounds_shape_still_matches_a_query_outside_the_world() {
        let mut m = Mbp::new(world(), 4, 4);
        let far = aabb_at(Vec3::new(1000.0, 0.0, 0.0));
        let mut all = vec![far; 40];
        for (i, a) in all.iter().enumerate() {
            m.add(i as u32, *a);
        }
        let mut out = [0u32; 64];
        let n = m.query(all[0], &mut out, &all);
        assert_eq!(n, 40);
        let _ = &mut all;
    }

    #[test]
    fn deferred_sort_still_yields_correct_results_after_many_inserts() {
        let mut m = Mbp::new(world(), 8, 8);
        let mut all = Vec::new();
        for i in 0..60 {
            let c = Vec3::new((i as f32 - 30.0) * 1.5, 0.0, 0.0);
            all.push(aabb_at(c));
            m.add(i as u32, all[i]);
        }
        let mut out = [0u32; 64];
        let n = m.query(aabb_at(Vec3::ZERO), &mut out, &all);
        assert!(n >= 1);
    }
}
