// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Loose-free octree: nodes subdivide lazily, objects that straddle more
//! than one child are kept at the node that can't split them further.

use super::{brute_force_query, ActiveSet, Dedup, Index, DEFAULT_BRUTE_FORCE_THRESHOLD};
use crate::aabb::Aabb;

/// Default object count a leaf may hold before it subdivides (§4.6).
const DEFAULT_MAX_OBJECTS_PER_NODE: u32 = 8;

#[derive(Debug)]
struct Node {
    bounds: Aabb,
    depth: u32,
    children: Option<[u32; 8]>,
    object_head: i32,
    object_count: u32,
}

/// A slot in the intrusive object-list arena. Free slots chain through
/// `next_in_node` with sentinel `-1` (§9 "Intrusive free lists").
#[derive(Debug)]
struct ObjectSlot {
    shape: u32,
    aabb: Aabb,
    node: u32,
    next_in_node: i32,
}

#[derive(Debug)]
pub struct Octree {
    nodes: Vec<Node>,
    objects: Vec<ObjectSlot>,
    free_head: i32,
    shape_slot: hashbrown::HashMap<u32, usize>,
    max_objects_per_node: u32,
    max_depth: u32,
    active: ActiveSet,
    dedup: Dedup,
    query_stack: Vec<u32>,
}

impl Octree {
    /// Build an octree rooted at `world_bounds`, subdividing up to
    /// `max_depth` levels.
    pub fn new(world_bounds: Aabb, max_depth: u32) -> Self {
        Self {
            nodes: vec![Node {
                bounds: world_bounds,
                depth: 0,
                children: None,
                object_head: -1,
                object_count: 0,
            }],
            objects: Vec::new(),
            free_head: -1,
            shape_slot: hashbrown::HashMap::new(),
            max_objects_per_node: DEFAULT_MAX_OBJECTS_PER_NODE,
            max_depth,
            active: ActiveSet::default(),
            dedup: Dedup::default(),
            query_stack: Vec::new(),
        }
    }

    fn alloc_slot(&mut self, shape: u32, aabb: Aabb, node: u32) -> usize {
        if self.free_head >= 0 {
            let idx = self.free_head as usize;
            self.free_head = self.objects[idx].next_in_node;
            self.objects[idx] = ObjectSlot {
                shape,
                aabb,
                node,
                next_in_node: -1,
            };
            idx
        } else {
            self.objects.push(ObjectSlot {
                shape,
                aabb,
                node,
                next_in_node: -1,
            });
            self.objects.len() - 1
        }
    }

    fn free_slot(&mut self, idx: usize) {
        self.objects[idx].next_in_node = self.free_head;
        self.free_head = idx as i32;
    }

    fn append_to_node(&mut self, node_idx: usize, shape: u32, aabb: Aabb) {
        let slot = self.alloc_slot(shape, aabb, node_idx as u32);
        let head = self.nodes[node_idx].object_head;
        self.objects[slot].next_in_node = head;
        self.nodes[node_idx].object_head = slot as i32;
        self.nodes[node_idx].object_count += 1;
        self.shape_slot.insert(shape, slot);
    }

    fn child_bounds(parent: &Aabb, octant: usize) -> Aabb {
        let c = parent.center();
        let lo = parent.min;
        let hi = parent.max;
        let (min_x, max_x) = if octant & 1 == 0 { (lo.x, c.x) } else { (c.x, hi.x) };
        let (min_y, max_y) = if octant & 2 == 0 { (lo.y, c.y) } else { (c.y, hi.y) };
        let (min_z, max_z) = if octant & 4 == 0 { (lo.z, c.z) } else { (c.z, hi.z) };
        Aabb::new(
            glam::Vec3::new(min_x, min_y, min_z),
            glam::Vec3::new(max_x, max_y, max_z),
        )
    }

    fn subdivide(&mut self, node_idx: usize) {
        let (bounds, depth) = {
            let n = &self.nodes[node_idx];
            (n.bounds, n.depth)
        };
        let mut children = [0u32; 8];
        for (octant, child) in children.iter_mut().enumerate() {
            self.nodes.push(Node {
                bounds: Self::child_bounds(&bounds, octant),
                depth: depth + 1,
                children: None,
                object_head: -1,
                object_count: 0,
            });
            *child = self.nodes.len() as u32 - 1;
        }
        self.nodes[node_idx].children = Some(children);

        // Re-distribute existing objects: anything that now fits fully in
        // one child moves down; stragglers stay at this node.
        let mut remaining_head = -1i32;
        let mut remaining_count = 0u32;
        let mut cur = self.nodes[node_idx].object_head;
        while cur >= 0 {
            let slot = cur as usize;
            let next = self.objects[slot].next_in_node;
            let aabb = self.objects[slot].aabb;
            let shape = self.objects[slot].shape;
            match Self::select_octant(&bounds, &aabb) {
                Some(octant) => {
                    let child_idx = children[octant] as usize;
                    self.objects[slot].next_in_node = self.nodes[child_idx].object_head;
                    self.objects[slot].node = child_idx as u32;
                    self.nodes[child_idx].object_head = slot as i32;
                    self.nodes[child_idx].object_count += 1;
                    self.shape_slot.insert(shape, slot);
                }
                None => {
                    self.objects[slot].next_in_node = remaining_head;
                    remaining_head = slot as i32;
                    remaining_count += 1;
                }
            }
            cur = next;
        }
        self.nodes[node_idx].object_head = remaining_head;
        self.nodes[node_idx].object_count = remaining_count;
    }

    fn select_octant(parent: &Aabb, aabb: &Aabb) -> Option<usize> {
        for octant in 0..8 {
            if Self::child_bounds(parent, octant).contains_aabb(aabb) {
                return Some(octant);
            }
        }
        None
    }

    fn insert_at(&mut self, node_idx: usize, shape: u32, aabb: Aabb) {
        if self.nodes[node_idx].children.is_some() {
            let bounds = self.nodes[node_idx].bounds;
            match Self::select_octant(&bounds, &aabb) {
                Some(octant) => {
                    let child_idx = self.nodes[node_idx].children.unwrap()[octant] as usize;
                    self.insert_at(child_idx, shape, aabb);
                }
                None => self.append_to_node(node_idx, shape, aabb),
            }
            return;
        }

        let node = &self.nodes[node_idx];
        if node.object_count < self.max_objects_per_node || node.depth >= self.max_depth {
            self.append_to_node(node_idx, shape, aabb);
            return;
        }

        self.subdivide(node_idx);
        self.insert_at(node_idx, shape, aabb);
    }

    fn remove_shape(&mut self, shape: u32) -> bool {
        let Some(slot) = self.shape_slot.remove(&shape) else {
            return false;
        };
        let node_idx = self.objects[slot].node as usize;
        let mut cur = self.nodes[node_idx].object_head;
        let mut prev: i32 = -1;
        while cur >= 0 {
            if cur as usize == slot {
                let next = self.objects[slot].next_in_node;
                if prev < 0 {
                    self.nodes[node_idx].object_head = next;
                } else {
                    self.objects[prev as usize].next_in_node = next;
                }
                self.nodes[node_idx].object_count -= 1;
                self.free_slot(slot);
                return true;
            }
            prev = cur;
            cur = self.objects[cur as usize].next_in_node;
        }
        false
    }
}

impl Index for Octree {
    fn add(&mut self, i: u32, aabb: Aabb) {
        self.insert_at(0, i, aabb);
        self.active.insert(i);
        self.dedup.ensure_capacity(i as usize + 1);
    }

    fn remove(&mut self, i: u32) -> bool {
        let removed = self.remove_shape(i);
        if removed {
            self.active.remove(i);
        }
        removed
    }

    fn update(&mut self, i: u32, _old_aabb: Aabb, new_aabb: Aabb) {
        let Some(&slot) = self.shape_slot.get(&i) else {
            return;
        };
        let node_idx = self.objects[slot].node as usize;
        if self.nodes[node_idx].bounds.contains_aabb(&new_aabb) {
            self.objects[slot].aabb = new_aabb;
        } else {
            self.remove_shape(i);
            self.insert_at(0, i, new_aabb);
        }
    }

    fn query(&mut self, q: Aabb, out: &mut [u32], all_aabbs: &[Aabb]) -> usize {
        if self.active.len() <= self.brute_force_threshold() {
            return brute_force_query(self.active.iter(), q, out, all_aabbs);
        }

        self.dedup.begin();
        let mut n = 0;
        self.query_stack.clear();
        self.query_stack.push(0);
        while let Some(node_idx) = self.query_stack.pop() {
            let node_idx = node_idx as usize;
            if !self.nodes[node_idx].bounds.intersects(&q) {
                continue;
            }
            let mut cur = self.nodes[node_idx].object_head;
            while cur >= 0 {
                let slot = cur as usize;
                let shape = self.objects[slot].shape;
                if self.dedup.visit(shape) && all_aabbs[shape as usize].intersects(&q) {
                    if n >= out.len() {
                        return n;
                    }
                    out[n] = shape;
                    n += 1;
                }
                cur = self.objects[slot].next_in_node;
            }
            if let Some(children) = self.nodes[node_idx].children {
                self.query_stack.extend_from_slice(&children);
            }
        }
        n
    }

    fn clear(&mut self) {
        let root_bounds = self.nodes[0].bounds;
        self.nodes.clear();
        self.nodes.push(Node {
            bounds: root_bounds,
            depth: 0,
            children: None,
            object_head: -1,
            object_count: 0,
        });
        self.objects.clear();
        self.free_head = -1;
        self.shape_slot.clear();
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

    fn world() -> Aabb {
        Aabb::new(Vec3::splat(-64.0), Vec3::splat(64.0))
    }

    fn aabb_at(c: Vec3) -> Aabb {
        Aabb::from_center_half_extents(c, Vec3::splat(0.1))
    }

    #[test]
    fn insert_then_query_finds_shape() {
        let mut t = Octree::new(world(), 6);
        let all = vec![aabb_at(Vec3::ZERO)];
        t.add(0, all[0]);
        let mut out = [0u32; 8];
        assert_eq!(t.query(aabb_at(Vec3::ZERO), &mut out, &all), 1);
    }

    #[test]
    fn many_inserts_trigger_subdivision_and_still_find_all() {
        let mut t = Octree::new(world(), 6);
        let mut all = Vec::new();
        for i in 0..60 {
            let c = Vec3::new((i % 6) as f32 * 2.0, (i / 6 % 6) as f32 * 2.0, 0.0);
            all.push(aabb_at(c));
            t.add(i as u32, all[i]);
        }
        let big = Aabb::new(Vec3::splat(-1.0), Vec3::splat(20.0));
        let mut out = [0u32; 64];
        let n = t.query(big, &mut out, &all);
        assert!(n > 0);
    }

    #[test]
    fn remove_then_query_omits_shape() {
        let mut t = Octree::new(world(), 6);
        let all = vec![aabb_at(Vec3::ZERO); 40];
        for (i, a) in all.iter().enumerate() {
            t.add(i as u32, *a);
        }
        assert!(t.remove(0));
        let mut out = [0u32; 64];
        let n = t.query(aabb_at(Vec3::ZERO), &mut out, &all);
        assert!(!out[..n].contains(&0));
    }

    #[test]
    fn update_within_node_bounds_mutates_in_place() {
        let mut t = Octree::new(world(), 6);
        let all = vec![aabb_at(Vec3::ZERO)];
        t.add(0, all[0]);
        t.update(0, all[0], aabb_at(Vec3::new(0.2, 0.0, 0.0)));
        let mut out = [0u32; 8];
        let moved = vec![aabb_at(Vec3::new(0.2, 0.0, 0.0))];
        assert_eq!(t.query(moved[0], &mut out, &moved), 1);
    }
}
