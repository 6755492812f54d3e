// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dynamic BVH: an incrementally maintained tree of fat AABBs, updated by
//! branch-and-bound best-sibling insertion instead of full rebuilds.

use super::{brute_force_query, ActiveSet, Index, DEFAULT_BRUTE_FORCE_THRESHOLD};
use crate::aabb::Aabb;

/// Default margin a shape's real AABB is expanded by to form its fat AABB
/// (§4.8); small motions inside the margin need no structural change.
const DEFAULT_FAT_MARGIN: f32 = 0.1;

/// Sentinel marking a node slot as free, distinct from `NONE` (no parent /
/// no child) so the free list can reuse the `left` field as its next
/// pointer without colliding with "this is the root" (§9).
const FREE: i32 = -2;
const NONE: i32 = -1;

#[derive(Debug)]
struct DbvtNode {
    fat_bounds: Aabb,
    parent: i32,
    left: i32,
    right: i32,
    shape: u32,
}

impl DbvtNode {
    #[inline]
    fn is_leaf(&self) -> bool {
        self.left == NONE && self.parent != FREE
    }
}

/// Dynamic BVH broad phase with fat-AABB incremental update.
#[derive(Debug)]
pub struct Dbvt {
    nodes: Vec<DbvtNode>,
    root: i32,
    free_head: i32,
    shape_node: hashbrown::HashMap<u32, u32>,
    fat_margin: f32,
    active: ActiveSet,
    query_stack: Vec<i32>,
}

impl Dbvt {
    /// Build an empty DBVT with the given fat-AABB margin.
    pub fn new(fat_margin: f32) -> Self {
        Self {
            nodes: Vec::new(),
            root: NONE,
            free_head: NONE,
            shape_node: hashbrown::HashMap::new(),
            fat_margin,
            active: ActiveSet::default(),
            query_stack: Vec::new(),
        }
    }

    fn alloc_node(&mut self, node: DbvtNode) -> i32 {
        if self.free_head != NONE {
            let idx = self.free_head;
            self.free_head = self.nodes[idx as usize].left;
            self.nodes[idx as usize] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() as i32 - 1
        }
    }

    fn free_node(&mut self, idx: i32) {
        self.nodes[idx as usize].parent = FREE;
        self.nodes[idx as usize].left = self.free_head;
        self.free_head = idx;
    }

    fn refit_ancestors(&mut self, mut idx: i32) {
        while idx != NONE {
            let left = self.nodes[idx as usize].left;
            let right = self.nodes[idx as usize].right;
            self.nodes[idx as usize].fat_bounds =
                Aabb::merge(&self.nodes[left as usize].fat_bounds, &self.nodes[right as usize].fat_bounds);
            idx = self.nodes[idx as usize].parent;
        }
    }

    fn find_best_sibling(&self, leaf_bounds: Aabb) -> i32 {
        let mut index = self.root;
        let mut inherited_cost = 0.0f32;
        loop {
            let node = &self.nodes[index as usize];
            if node.is_leaf() {
                return index;
            }
            let combined = Aabb::merge(&node.fat_bounds, &leaf_bounds);
            let cost_here = 2.0 * combined.surface_area() + inherited_cost;
            let new_inherited = inherited_cost + (combined.surface_area() - node.fat_bounds.surface_area());

            let left = &self.nodes[node.left as usize];
            let right = &self.nodes[node.right as usize];
            let child_cost = |child: &DbvtNode| -> f32 {
                let c = Aabb::merge(&child.fat_bounds, &leaf_bounds);
                let base = if child.is_leaf() {
                    2.0 * c.surface_area()
                } else {
                    c.surface_area()
                };
                base + new_inherited
            };
            let cost_left = child_cost(left);
            let cost_right = child_cost(right);

            if cost_here <= cost_left && cost_here <= cost_right {
                return index;
            }
            index = if cost_left < cost_right { node.left } else { node.right };
            inherited_cost = new_inherited;
        }
    }

    fn insert_leaf(&mut self, shape: u32, real_aabb: Aabb) {
        let fat = real_aabb.expand(self.fat_margin);
        let leaf = self.alloc_node(DbvtNode {
            fat_bounds: fat,
            parent: NONE,
            left: NONE,
            right: NONE,
            shape,
        });
        self.shape_node.insert(shape, leaf as u32);

        if self.root == NONE {
            self.root = leaf;
            return;
        }

        let sibling = self.find_best_sibling(fat);
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node(DbvtNode {
            fat_bounds: Aabb::merge(&self.nodes[sibling as usize].fat_bounds, &fat),
            parent: old_parent,
            left: sibling,
            right: leaf,
            shape: 0,
        });
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        if old_parent == NONE {
            self.root = new_parent;
        } else if self.nodes[old_parent as usize].left == sibling {
            self.nodes[old_parent as usize].left = new_parent;
        } else {
            self.nodes[old_parent as usize].right = new_parent;
        }
        self.refit_ancestors(new_parent);
    }

    fn remove_leaf(&mut self, leaf: i32) {
        let parent = self.nodes[leaf as usize].parent;
        if parent == NONE {
            self.root = NONE;
            self.free_node(leaf);
            return;
        }
        let grandparent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };
        if grandparent == NONE {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NONE;
        } else {
            if self.nodes[grandparent as usize].left == parent {
                self.nodes[grandparent as usize].left = sibling;
            } else {
                self.nodes[grandparent as usize].right = sibling;
            }
            self.nodes[sibling as usize].parent = grandparent;
            self.refit_ancestors(grandparent);
        }
        self.free_node(parent);
        self.free_node(leaf);
    }
}

impl Index for Dbvt {
    fn add(&mut self, i: u32, aabb: Aabb) {
        self.insert_leaf(i, aabb);
        self.active.insert(i);
    }

    fn remove(&mut self, i: u32) -> bool {
        let Some(leaf) = self.shape_node.remove(&i) else {
            return false;
        };
        self.remove_leaf(leaf as i32);
        self.active.remove(i);
        true
    }

    /// The hot path: if the new AABB still fits inside the stored fat
    /// AABB, this is a pure no-op — no removal, no re-insertion, no
    /// sibling search (§4.8, scenario S7).
    fn update(&mut self, i: u32, _old_aabb: Aabb, new_aabb: Aabb) {
        let Some(&leaf) = self.shape_node.get(&i) else {
            return;
        };
        if self.nodes[leaf as usize].fat_bounds.contains_aabb(&new_aabb) {
            return;
        }
        self.remove_leaf(leaf as i32);
        self.shape_node.remove(&i);
        self.insert_leaf(i, new_aabb);
    }

    fn query(&mut self, q: Aabb, out: &mut [u32], all_aabbs: &[Aabb]) -> usize {
        if self.active.len() <= self.brute_force_threshold() {
            return brute_force_query(self.active.iter(), q, out, all_aabbs);
        }
        if self.root == NONE {
            return 0;
        }
        let mut n = 0;
        self.query_stack.clear();
        self.query_stack.push(self.root);
        while let Some(idx) = self.query_stack.pop() {
            let node = &self.nodes[idx as usize];
            if !node.fat_bounds.intersects(&q) {
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
        self.nodes.clear();
        self.root = NONE;
        self.free_head = NONE;
        self.shape_node.clear();
        self.active.clear();
    }

    fn shape_count(&self) -> usize {
        self.active.len()
    }

    fn brute_force_threshold(&self) -> usize {
        DEFAULT_BRUTE_FORCE_THRESHOLD
    }
}

impl Default for Dbvt {
    fn default() -> Self {
        Self::new(DEFAULT_FAT_MARGIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn aabb_at(c: Vec3, he: f32) -> Aabb {
        Aabb::from_center_half_extents(c, Vec3::splat(he))
    }

    #[test]
    fn insert_then_query_finds_shape() {
        let mut d = Dbvt::default();
        let mut all = Vec::new();
        for i in 0..40 {
            all.push(aabb_at(Vec3::new(i as f32, 0.0, 0.0), 0.1));
        }
        for (i, a) in all.iter().enumerate() {
            d.add(i as u32, *a);
        }
        let mut out = [0u32; 64];
        let n = d.query(aabb_at(Vec3::new(5.0, 0.0, 0.0), 0.1), &mut out, &all);
        assert!(out[..n].contains(&5));
    }

    #[test]
    fn small_move_inside_fat_margin_is_a_no_op() {
        let mut d = Dbvt::new(0.1);
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let all = vec![aabb];
        d.add(0, aabb);
        let leaf_before = *d.shape_node.get(&0).unwrap();
        let moved = Aabb::new(Vec3::new(-1.05, -1.0, -1.0), Vec3::new(0.95, 1.0, 1.0));
        d.update(0, aabb, moved);
        let leaf_after = *d.shape_node.get(&0).unwrap();
        assert_eq!(leaf_before, leaf_after);
        let mut out = [0u32; 8];
        assert_eq!(d.query(moved, &mut out, &all), 1);
        let _ = all;
    }

    #[test]
    fn move_outside_fat_margin_triggers_reinsertion() {
        let mut d = Dbvt::new(0.1);
        let mut all = Vec::new();
        for i in 0..40 {
            all.push(aabb_at(Vec3::new(i as f32 * 2.0, 0.0, 0.0), 0.1));
        }
        for (i, a) in all.iter().enumerate() {
            d.add(i as u32, *a);
        }
        let moved = aabb_at(Vec3::new(500.0, 0.0, 0.0), 0.1);
        let old = all[0];
        all[0] = moved;
        d.update(0, old, moved);
        let mut out = [0u32; 8];
        let n = d.query(moved, &mut out, &all);
        assert!(out[..n].contains(&0));
    }

    #[test]
    fn remove_then_query_omits_shape() {
        let mut d = Dbvt::default();
        let mut all = Vec::new();
        for i in 0..40 {
            all.push(aabb_at(Vec3::new(i as f32, 0.0, 0.0), 0.1));
        }
        for (i, a) in all.iter().enumerate() {
            d.add(i as u32, *a);
        }
        d.remove(5);
        let mut out = [0u32; 8];
        let n = d.query(aabb_at(Vec3::new(5.0, 0.0, 0.0), 0.1), &mut out, &all);
        assert!(!out[..n].contains(&5));
    }
}
