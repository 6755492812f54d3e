// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixed-size hash table of cells, keyed by a packed 3-axis cell coordinate.

use smallvec::SmallVec;

use super::{brute_force_query, ActiveSet, Dedup, Index, DEFAULT_BRUTE_FORCE_THRESHOLD};
use crate::aabb::Aabb;

/// Bias added to each axis so negative cell coordinates fit in 21 unsigned
/// bits (§6, §9 "Packed cell keys"). Reproduced exactly: query-side hashing
/// must use this same bias or cross-engine dedup breaks.
const AXIS_BIAS: i64 = 1 << 20;
const AXIS_BITS: u32 = 21;
const AXIS_MASK: u64 = (1 << AXIS_BITS) - 1;

/// Default cap on the number of cells a single query may walk before
/// falling back to brute force (§4.3).
const DEFAULT_CELL_QUERY_CAP: usize = 512;

#[inline]
fn pack_cell_key(x: i32, y: i32, z: i32) -> u64 {
    let bx = (x as i64 + AXIS_BIAS) as u64 & AXIS_MASK;
    let by = (y as i64 + AXIS_BIAS) as u64 & AXIS_MASK;
    let bz = (z as i64 + AXIS_BIAS) as u64 & AXIS_MASK;
    bx | (by << AXIS_BITS) | (bz << (AXIS_BITS * 2))
}

/// splitmix64 finalizer, used to scramble packed cell keys into bucket
/// indices (§9 "Marker dedup" neighbour: deterministic, allocation-free).
#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

#[inline]
fn cell_coord(v: f32, cell_size: f32) -> i32 {
    (v / cell_size).floor() as i32
}

/// A power-of-two bucket table of cells. Cell key collisions within a
/// bucket are resolved by matching the full key; distinct keys hashing to
/// the same bucket simply widen that bucket's candidate list, which costs
/// time but never correctness (the driver's final AABB test still applies).
#[derive(Debug)]
pub struct SpatialHash {
    cell_size: f32,
    buckets: Vec<SmallVec<[(u64, u32); 4]>>,
    bucket_mask: u64,
    shape_cells: hashbrown::HashMap<u32, SmallVec<[u64; 8]>>,
    cell_query_cap: usize,
    active: ActiveSet,
    dedup: Dedup,
}

impl SpatialHash {
    /// Build a spatial hash with the given cell size and a bucket table
    /// sized to the next power of two at or above `capacity_hint`.
    pub fn new(cell_size: f32, capacity_hint: usize) -> Self {
        let capacity = capacity_hint.max(1).next_power_of_two();
        Self {
            cell_size,
            buckets: vec![SmallVec::new(); capacity],
            bucket_mask: (capacity - 1) as u64,
            shape_cells: hashbrown::HashMap::new(),
            cell_query_cap: DEFAULT_CELL_QUERY_CAP,
            active: ActiveSet::default(),
            dedup: Dedup::default(),
        }
    }

    #[inline]
    fn bucket_index(&self, key: u64) -> usize {
        (splitmix64(key) & self.bucket_mask) as usize
    }

    fn cell_keys(&self, aabb: Aabb) -> SmallVec<[u64; 8]> {
        let min_x = cell_coord(aabb.min.x, self.cell_size);
        let min_y = cell_coord(aabb.min.y, self.cell_size);
        let min_z = cell_coord(aabb.min.z, self.cell_size);
        let max_x = cell_coord(aabb.max.x, self.cell_size);
        let max_y = cell_coord(aabb.max.y, self.cell_size);
        let max_z = cell_coord(aabb.max.z, self.cell_size);
        let mut keys = SmallVec::new();
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                for z in min_z..=max_z {
                    keys.push(pack_cell_key(x, y, z));
                }
            }
        }
        keys
    }

    fn insert_into_cells(&mut self, i: u32, keys: &[u64]) {
        for &key in keys {
            let b = self.bucket_index(key);
            self.buckets[b].push((key, i));
        }
    }

    fn remove_from_cells(&mut self, i: u32, keys: &[u64]) {
        for &key in keys {
            let b = self.bucket_index(key);
            if let Some(pos) = self.buckets[b]
                .iter()
                .position(|&(k, id)| k == key && id == i)
            {
                self.buckets[b].swap_remove(pos);
            }
        }
    }
}

impl Index for SpatialHash {
    fn add(&mut self, i: u32, aabb: Aabb) {
        let keys = self.cell_keys(aabb);
        self.insert_into_cells(i, &keys);
        self.shape_cells.insert(i, keys);
        self.active.insert(i);
        self.dedup.ensure_capacity(i as usize + 1);
    }

    fn remove(&mut self, i: u32) -> bool {
        if let Some(keys) = self.shape_cells.remove(&i) {
            self.remove_from_cells(i, &keys);
            self.active.remove(i);
            true
        } else {
            false
        }
    }

    fn update(&mut self, i: u32, _old_aabb: Aabb, new_aabb: Aabb) {
        let new_keys = self.cell_keys(new_aabb);
        let unchanged = self
            .shape_cells
            .get(&i)
            .is_some_and(|old| old.len() == new_keys.len() && old.iter().all(|k| new_keys.contains(k)));
        if unchanged {
            return;
        }
        if let Some(old_keys) = self.shape_cells.remove(&i) {
            self.remove_from_cells(i, &old_keys);
        }
        self.insert_into_cells(i, &new_keys);
        self.shape_cells.insert(i, new_keys);
    }

    fn query(&mut self, q: Aabb, out: &mut [u32], all_aabbs: &[Aabb]) -> usize {
        if self.active.len() <= self.brute_force_threshold() {
            return brute_force_query(self.active.iter(), q, out, all_aabbs);
        }

        let min_x = cell_coord(q.min.x, self.cell_size);
        let min_y = cell_coord(q.min.y, self.cell_size);
        let min_z = cell_coord(q.min.z, self.cell_size);
        let max_x = cell_coord(q.max.x, self.cell_size);
        let max_y = cell_coord(q.max.y, self.cell_size);
        let max_z = cell_coord(q.max.z, self.cell_size);

        let cell_count = (max_x - min_x + 1) as i64 * (max_y - min_y + 1) as i64 * (max_z - min_z + 1) as i64;
        if cell_count < 0 || cell_count as usize > self.cell_query_cap {
            return brute_force_query(self.active.iter(), q, out, all_aabbs);
        }

        self.dedup.begin();
        let mut n = 0;
        'outer: for x in min_x..=max_x {
            for y in min_y..=max_y {
                for z in min_z..=max_z {
                    let key = pack_cell_key(x, y, z);
                    let b = self.bucket_index(key);
                    for &(k, id) in &self.buckets[b] {
                        if k != key {
                            continue;
                        }
                        if !self.dedup.visit(id) {
                            continue;
                        }
                        if all_aabbs[id as usize].intersects(&q) {
                            if n >= out.len() {
                                break 'outer;
                            }
                            out[n] = id;
                            n += 1;
                        }
                    }
                }
            }
        }
        n
    }

    fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| b.clear());
        self.shape_cells.clear();
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
