// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Top-down bounding volume hierarchy with lazy full rebuild.

use super::{brute_force_query, ActiveSet, Index, DEFAULT_BRUTE_FORCE_THRESHOLD};
use crate::aabb::Aabb;

#[derive(Debug)]
struct BvhNode {
    bounds: Aabb,
    left: i32,
    right: i32,
    shape: u32,
}

impl BvhNode {
    #[inline]
    fn is_leaf(&self) -> bool {
        self.left < 0
    }
}

/// Top-down BVH. `add`/`remove`/`update` only touch the flat entry list and
/// mark the tree dirty; the next `query` performs a full rebuild (§4.7).
#[derive(Debug)]
pub struct Bvh {
    entries: Vec<(u32, Aabb)>,
    shape_entry: hashbrown::HashMap<u32, usize>,
    nodes: Vec<BvhNode>,
    root: i32,
    dirty: bool,
    use_sah: bool,
    active: ActiveSet,
    query_stack: Vec<i32>,
}

impl Bvh {
    /// Build an empty BVH. `use_sah` selects SAH-at-parent-centroid splits
    /// over median splits on every rebuild (§4.7).
    pub fn new(use_sah: bool) -> Self {
        Self {
            entries: Vec::new(),
            shape_entry: hashbrown::HashMap::new(),
            nodes: Vec::new(),
            root: -1,
            dirty: false,
            use_sah,
            active: ActiveSet::default(),
            query_stack: Vec::new(),
        }
    }

    fn rebuild(&mut self) {
        self.nodes.clear();
        if self.entries.is_empty() {
            self.root = -1;
            self.dirty = false;
            return;
        }
        self.nodes.reserve(2 * self.entries.len() - 1);
        let mut items = self.entries.clone();
        self.root = self.build_recursive(&mut items);
        self.dirty = false;
    }

    fn build_recursive(&mut self, items: &mut [(u32, Aabb)]) -> i32 {
        if items.len() == 1 {
            let (shape, aabb) = items[0];
            self.nodes.push(BvhNode {
                bounds: aabb,
                left: -1,
                right: -1,
                shape,
            });
            return self.nodes.len() as i32 - 1;
        }

        let mut bounds = Aabb::empty();
        for (_, aabb) in items.iter() {
            bounds.merge_with(aabb);
        }

        let (axis, split) = if self.use_sah {
            self.choose_split_sah(items, &bounds)
        } else {
            Self::choose_split_median(&bounds)
        };

        let centroid = |aabb: &Aabb, axis: usize| -> f32 {
            let c = aabb.center();
            match axis {
                0 => c.x,
                1 => c.y,
                _ => c.z,
            }
        };

        let mut i = 0usize;
        let mut j = items.len() - 1;
        loop {
            while i <= j && centroid(&items[i].1, axis) < split {
                i += 1;
            }
            if i > j {
                break;
            }
            items.swap(i, j);
            if j == 0 {
                break;
            }
            j -= 1;
        }
        let mut mid = i;
        if mid == 0 || mid == items.len() {
            // Degenerate split (all on one side): fall back to index-median.
            mid = items.len() / 2;
        }

        let (left_items, right_items) = items.split_at_mut(mid);
        let left = self.build_recursive(left_items);
        let right = self.build_recursive(right_items);
        self.nodes.push(BvhNode {
            bounds,
            left,
            right,
            shape: 0,
        });
        self.nodes.len() as i32 - 1
    }

    fn choose_split_median(bounds: &Aabb) -> (usize, f32) {
        let size = bounds.size();
        let axis = if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        };
        let c = bounds.center();
        let split = match axis {
            0 => c.x,
            1 => c.y,
            _ => c.z,
        };
        (axis, split)
    }

    fn choose_split_sah(&self, items: &[(u32, Aabb)], parent: &Aabb) -> (usize, f32) {
        let parent_area = parent.surface_area().max(f32::MIN_POSITIVE);
        let c = parent.center();
        let mut best_axis = 0usize;
        let mut best_cost = f32::INFINITY;
        for axis in 0..3 {
            let split = match axis {
                0 => c.x,
                1 => c.y,
                _ => c.z,
            };
            let mut left = Aabb::empty();
            let mut right = Aabb::empty();
            let mut n_l = 0u32;
            let mut n_r = 0u32;
            for (_, aabb) in items {
                let ac = aabb.center();
                let v = match axis {
                    0 => ac.x,
                    1 => ac.y,
                    _ => ac.z,
                };
                if v < split {
                    left.merge_with(aabb);
                    n_l += 1;
                } else {
                    right.merge_with(aabb);
                    n_r += 1;
                }
            }
            let cost = (left.surface_area() * n_l as f32 + right.surface_area() * n_r as f32)
                / parent_area;
            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
            }
        }
        let split = match best_axis {
            0 => c.x,
            1 => c.y,
            _ => c.z,
        };
        (best_axis, split)
    }
}

impl Index for Bvh {
    fn add(&mut self, i: u32, aabb: Aabb) {
        let idx = self.entries.len();
        self.entries.push((i, aabb));
        self.shape_entry.insert(i, idx);
        self.active.insert(i);
        self.dirty = true;
    }

    fn remove(&mut self, i: u32) -> bool {
        let Some(idx) = self.shape_entry.remove(&i) else {
            return false;
        };
        self.entries.swap_remove(idx);
        if idx < self.entries.len() {
            let moved_shape = self.entries[idx].0;
            self.shape_entry.insert(moved_shape, idx);
        }
        self.active.remove(i);
        self.dirty = true;
        true
    }

    fn update(&mut self, i: u32, _old_aabb: Aabb, new_aabb: Aabb) {
        if let Some(&idx) = self.shape_entry.get(&i) {
            self.entries[idx].1 = new_aabb;
            self.dirty = true;
        }
    }

    fn query(&mut self, q: Aabb, out: &mut [u32], all_aabbs: &[Aabb]) -> usize {
        if self.active.len() <= self.brute_force_threshold() {
            return brute_force_query(self.active.iter(), q, out, all_aabbs);
        }
        if self.dirty {
            self.rebuild();
        }
        if self.root < 0 {
            return 0;
        }

        let mut n = 0;
        self.query_stack.clear();
        self.query_stack.push(self.root);
        while let Some(node_idx) = self.query_stack.pop() {
            let node = &self.nodes[node_idx as usize];
            if !node.bounds.intersects(&q) {
                continue;
            }
            if node.is_leaf() {
                if all_aabbs[node.shape as usize].intersects(&q) {
                    if n >= out.len() {
                        return n;
                    }
                    out[n] = node.shape;
                    n += 1;
                }
            } else {
                self.query_stack.push(node.left);
                self.query_stack.push(node.right);
            }
        }
        n
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.shape_entry.clear();
        self.nodes.clear();
        self.root = -1;
        self.dirty = false;
        self.active.clear();
    }

    fn shape_count(&self) -> usize {
        self.active.len()
    }

    fn brute_force_threshold(&self) -> usize {
        DEFAULT_BRUTE_FORCE_THRESHOLD
    }
}
