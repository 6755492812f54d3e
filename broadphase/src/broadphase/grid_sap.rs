// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Grid + Sweep-and-Prune ("Zone Sweep"): space partitioned into zones, each
//! owning a 1-D sweep list sorted by a primary axis.

use hashbrown::HashMap;
use smallvec::SmallVec;

use super::{brute_force_query, ActiveSet, Dedup, Index, DEFAULT_BRUTE_FORCE_THRESHOLD};
use crate::aabb::Aabb;

/// Which axis a zone's sweep list is sorted by, and whether a secondary
/// axis gate is applied on query (§4.4).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AxisMode {
    /// Sort and scan by X only.
    X,
    /// Sort and scan by Z only.
    Z,
    /// Sort and scan by X, additionally gating on Z overlap.
    Xz,
}

impl AxisMode {
    #[inline]
    fn primary(self, a: &Aabb) -> (f32, f32) {
        match self {
            AxisMode::X | AxisMode::Xz => (a.min.x, a.max.x),
            AxisMode::Z => (a.min.z, a.max.z),
        }
    }

    #[inline]
    fn secondary(self, a: &Aabb) -> Option<(f32, f32)> {
        match self {
            AxisMode::Xz => Some((a.min.z, a.max.z)),
            _ => None,
        }
    }
}

/// Default cap on zones a single shape may span before it is demoted to
/// the large-objects list (§4.4).
const DEFAULT_MAX_ZONES_PER_SHAPE: usize = 64;
/// Default cap on zones a single query may walk before falling back to
/// brute force (§4.4).
const DEFAULT_ZONE_QUERY_CAP: usize = 2048;

#[derive(Copy, Clone, Debug)]
struct SapEntry {
    shape: u32,
    min_p: f32,
    max_p: f32,
    secondary: Option<(f32, f32)>,
}

#[derive(Default, Debug)]
struct Zone {
    entries: Vec<SapEntry>,
    shape_to_entry: HashMap<u32, usize>,
}

impl Zone {
    fn insert(&mut self, entry: SapEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.min_p < entry.min_p);
        self.entries.insert(pos, entry);
        self.reindex_from(pos);
    }

    fn remove(&mut self, shape: u32) {
        if let Some(&idx) = self.shape_to_entry.get(&shape) {
            self.entries.remove(idx);
            self.shape_to_entry.remove(&shape);
            self.reindex_from(idx);
        }
    }

    fn reindex_from(&mut self, from: usize) {
        for (i, e) in self.entries.iter().enumerate().skip(from) {
            self.shape_to_entry.insert(e.shape, i);
        }
    }

    /// Update in place, then repair ordering by local insertion-sort — fast
    /// for the small, coherent motion typical of physics updates.
    fn update(&mut self, shape: u32, min_p: f32, max_p: f32, secondary: Option<(f32, f32)>) {
        let Some(&mut idx) = self.shape_to_entry.get_mut(&shape) else {
            self.insert(SapEntry {
                shape,
                min_p,
                max_p,
                secondary,
            });
            return;
        };
        self.entries[idx].min_p = min_p;
        self.entries[idx].max_p = max_p;
        self.entries[idx].secondary = secondary;

        let mut i = idx;
        while i > 0 && self.entries[i - 1].min_p > self.entries[i].min_p {
            self.entries.swap(i - 1, i);
            i -= 1;
        }
        while i + 1 < self.entries.len() && self.entries[i + 1].min_p < self.entries[i].min_p {
            self.entries.swap(i, i + 1);
            i += 1;
        }
        if i != idx {
            self.reindex_from(idx.min(i));
        }
    }

    fn query(&self, min_p: f32, max_p: f32, secondary: Option<(f32, f32)>, dedup: &mut Dedup, out: &mut Vec<u32>) {
        let start = self.entries.partition_point(|e| e.max_p < min_p);
        for e in &self.entries[start..] {
            if e.min_p > max_p {
                break;
            }
            if let (Some((qs_min, qs_max)), Some((es_min, es_max))) = (secondary, e.secondary) {
                if qs_max < es_min || es_max < qs_min {
                    continue;
                }
            }
            if dedup.visit(e.shape) {
                out.push(e.shape);
            }
        }
    }
}

/// Zone-sweep broad phase: a uniform grid of zones, each a 1-D SAP list.
#[derive(Debug)]
pub struct GridSap {
    grid_size: f32,
    axis_mode: AxisMode,
    zones: HashMap<(i32, i32, i32), Zone>,
    shape_zones: HashMap<u32, SmallVec<[(i32, i32, i32); 8]>>,
    large_objects: Vec<(u32, Aabb)>,
    max_zones_per_shape: usize,
    zone_query_cap: usize,
    active: ActiveSet,
    dedup: Dedup,
    query_candidates: Vec<u32>,
}

impl GridSap {
    /// Build a zone-sweep index with the given zone size and axis mode.
    pub fn new(grid_size: f32, axis_mode: AxisMode) -> Self {
        Self {
            grid_size,
            axis_mode,
            zones: HashMap::new(),
            shape_zones: HashMap::new(),
            large_objects: Vec::new(),
            max_zones_per_shape: DEFAULT_MAX_ZONES_PER_SHAPE,
            zone_query_cap: DEFAULT_ZONE_QUERY_CAP,
            active: ActiveSet::default(),
            dedup: Dedup::default(),
            query_candidates: Vec::new(),
        }
    }

    #[inline]
    fn zone_coord(&self, v: f32) -> i32 {
        (v / self.grid_size).floor() as i32
    }

    fn zone_range(&self, aabb: &Aabb) -> Option<[(i32, i32); 3]> {
        let min_x = self.zone_coord(aabb.min.x);
        let min_y = self.zone_coord(aabb.min.y);
        let min_z = self.zone_coord(aabb.min.z);
        let max_x = self.zone_coord(aabb.max.x);
        let max_y = self.zone_coord(aabb.max.y);
        let max_z = self.zone_coord(aabb.max.z);
        Some([(min_x, max_x), (min_y, max_y), (min_z, max_z)])
    }

    fn zone_keys(&self, aabb: &Aabb) -> SmallVec<[(i32, i32, i32); 8]> {
        let [(min_x, max_x), (min_y, max_y), (min_z, max_z)] = self.zone_range(aabb).unwrap();
        let mut keys = SmallVec::new();
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                for z in min_z..=max_z {
                    keys.push((x, y, z));
                }
            }
        }
        keys
    }

    fn entry_for(&self, shape: u32, aabb: &Aabb) -> SapEntry {
        let (min_p, max_p) = self.axis_mode.primary(aabb);
        let secondary = self.axis_mode.secondary(aabb);
        SapEntry {
            shape,
            min_p,
            max_p,
            secondary,
        }
    }
}

impl Index for GridSap {
    fn add(&mut self, i: u32, aabb: Aabb) {
        let keys = self.zone_keys(&aabb);
        if keys.len() > self.max_zones_per_shape {
            self.large_objects.push((i, aabb));
        } else {
            let entry = self.entry_for(i, &aabb);
            for &key in &keys {
                self.zones.entry(key).or_default().insert(entry);
            }
            self.shape_zones.insert(i, keys);
        }
        self.active.insert(i);
        self.dedup.ensure_capacity(i as usize + 1);
    }

    fn remove(&mut self, i: u32) -> bool {
        if let Some(keys) = self.shape_zones.remove(&i) {
            for key in keys {
                if let Some(zone) = self.zones.get_mut(&key) {
                    zone.remove(i);
                }
            }
            self.active.remove(i);
            true
        } else if let Some(pos) = self.large_objects.iter().position(|(id, _)| *id == i) {
            self.large_objects.swap_remove(pos);
            self.active.remove(i);
            true
        } else {
            false
        }
    }

    fn update(&mut self, i: u32, _old_aabb: Aabb, new_aabb: Aabb) {
        if let Some((_, aabb)) = self.large_objects.iter_mut().find(|(id, _)| *id == i) {
            *aabb = new_aabb;
            return;
        }
        let new_keys = self.zone_keys(&new_aabb);
        let same_keys = self
            .shape_zones
            .get(&i)
            .is_some_and(|old| old.len() == new_keys.len() && old.iter().all(|k| new_keys.contains(k)));
        if same_keys {
            let entry = self.entry_for(i, &new_aabb);
            for key in new_keys {
                if let Some(zone) = self.zones.get_mut(&key) {
                    zone.update(i, entry.min_p, entry.max_p, entry.secondary);
                }
            }
            return;
        }
        if let Some(old_keys) = self.shape_zones.remove(&i) {
            for key in old_keys {
                if let Some(zone) = self.zones.get_mut(&key) {
                    zone.remove(i);
                }
            }
        }
        self.add(i, new_aabb);
    }

    fn query(&mut self, q: Aabb, out: &mut [u32], all_aabbs: &[Aabb]) -> usize {
        if self.active.len() <= self.brute_force_threshold() {
            return brute_force_query(self.active.iter(), q, out, all_aabbs);
        }

        let [(min_x, max_x), (min_y, max_y), (min_z, max_z)] = self.zone_range(&q).unwrap();
        let zone_count =
            (max_x - min_x + 1) as i64 * (max_y - min_y + 1) as i64 * (max_z - min_z + 1) as i64;
        if zone_count < 0 || zone_count as usize > self.zone_query_cap {
            return brute_force_query(self.active.iter(), q, out, all_aabbs);
        }

        let (q_min_p, q_max_p) = self.axis_mode.primary(&q);
        let q_secondary = self.axis_mode.secondary(&q);

        self.dedup.begin();
        self.query_candidates.clear();
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                for z in min_z..=max_z {
                    if let Some(zone) = self.zones.get(&(x, y, z)) {
                        zone.query(q_min_p, q_max_p, q_secondary, &mut self.dedup, &mut self.query_candidates);
                    }
                }
            }
        }
        for &(id, _) in &self.large_objects {
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
        self.zones.clear();
        self.shape_zones.clear();
        self.large_objects.clear();
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

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn aabb_at(c: Vec3) -> Aabb {
        Aabb::from_center_half_extents(c, Vec3::splat(0.4))
    }

    #[test]
    fn insert_then_query_finds_shape() {
        let mut g = GridSap::new(2.0, AxisMode::X);
        let all = vec![aabb_at(Vec3::ZERO)];
        g.add(0, all[0]);
        let mut out = [0u32; 8];
        assert_eq!(g.query(aabb_at(Vec3::ZERO), &mut out, &all), 1);
    }

    #[test]
    fn large_object_bypasses_zones_but_still_matches() {
        let mut g = GridSap::new(0.1, AxisMode::Xz);
        let huge = Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0));
        let mut all = vec![huge];
        for i in 0..40 {
            let c = Vec3::new(i as f32 * 0.5, 0.0, 0.0);
            all.push(aabb_at(c));
        }
        g.add(0, huge);
        for i in 0..40u32 {
            g.add(i + 1, all[i as usize + 1]);
        }
        let mut out = [0u32; 64];
        let n = g.query(aabb_at(Vec3::new(1.0, 0.0, 0.0)), &mut out, &all);
        assert!(out[..n].contains(&0));
    }

    #[test]
    fn remove_then_query_omits_shape() {
        let mut g = GridSap::new(2.0, AxisMode::Z);
        let all = vec![aabb_at(Vec3::ZERO); 40];
        for (i, a) in all.iter().enumerate() {
            g.add(i as u32, *a);
        }
        g.remove(0);
        let mut out = [0u32; 64];
        let n = g.query(aabb_at(Vec3::ZERO), &mut out, &all);
        assert!(!out[..n].contains(&0));
    }
}
