// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The shape registry: a struct-of-arrays store of shapes addressed by
//! generational [`Handle`]s.

use crate::aabb::Aabb;
use crate::error::RegistryError;
use crate::mask::LayerMask;
use crate::shape::{Shape, ShapeParams};

/// A stable reference to a shape in a [`Registry`].
///
/// Pairs a slot index with the generation the slot was at when the handle
/// was issued. A handle whose generation no longer matches the slot's
/// current generation is stale: the shape it named has been removed and
/// the slot recycled for something else.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// The slot index this handle names.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generation recorded in this handle.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Struct-of-arrays shape store.
///
/// Every field vector is indexed in lockstep by slot index. Removed slots
/// are pushed onto `free_list` and their `active` flag cleared; `add` prefers
/// recycling a free slot (bumping its generation) over growing the arrays.
#[derive(Debug, Default)]
pub struct Registry {
    active: Vec<bool>,
    generation: Vec<u32>,
    params: Vec<ShapeParams>,
    aabb: Vec<Aabb>,
    mask: Vec<LayerMask>,
    user_tag: Vec<i64>,
    free_list: Vec<u32>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots currently in use (live shapes only).
    pub fn len(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    /// Whether the registry holds no live shapes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots, live and free.
    pub fn capacity_used(&self) -> usize {
        self.active.len()
    }

    /// Add a shape, returning a handle to it.
    pub fn add(&mut self, params: ShapeParams, mask: LayerMask, user_tag: i64) -> Handle {
        let aabb = params.compute_aabb();
        if let Some(index) = self.free_list.pop() {
            let i = index as usize;
            self.active[i] = true;
            self.params[i] = params;
            self.aabb[i] = aabb;
            self.mask[i] = mask;
            self.user_tag[i] = user_tag;
            Handle {
                index,
                generation: self.generation[i],
            }
        } else {
            let index = self.active.len() as u32;
            self.active.push(true);
            self.generation.push(0);
            self.params.push(params);
            self.aabb.push(aabb);
            self.mask.push(mask);
            self.user_tag.push(user_tag);
            Handle {
                index,
                generation: 0,
            }
        }
    }

    /// Update a shape's parameters in place, recomputing its cached AABB.
    ///
    /// Returns `(old_aabb, new_aabb)` on success, for the caller to forward
    /// to the broad phase (§4.1). Returns `None` silently (no panic, no
    /// error) if `handle` is stale, per this registry's failure semantics
    /// for mutators.
    pub fn update(&mut self, handle: Handle, params: ShapeParams) -> Option<(Aabb, Aabb)> {
        let i = self.check(handle).ok()?;
        let old_aabb = self.aabb[i];
        let new_aabb = params.compute_aabb();
        self.aabb[i] = new_aabb;
        self.params[i] = params;
        Some((old_aabb, new_aabb))
    }

    /// Update a shape's mask in place.
    pub fn set_mask(&mut self, handle: Handle, mask: LayerMask) -> bool {
        match self.check(handle) {
            Ok(i) => {
                self.mask[i] = mask;
                true
            }
            Err(_) => false,
        }
    }

    /// Remove a shape, bumping its slot's generation and returning the slot
    /// to the free list.
    ///
    /// Returns `false` silently if `handle` is already stale.
    pub fn remove(&mut self, handle: Handle) -> bool {
        match self.check(handle) {
            Ok(i) => {
                self.active[i] = false;
                self.generation[i] = self.generation[i].wrapping_add(1);
                self.free_list.push(i as u32);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove every shape, resetting the registry to empty.
    pub fn clear(&mut self) {
        self.active.clear();
        self.generation.clear();
        self.params.clear();
        self.aabb.clear();
        self.mask.clear();
        self.user_tag.clear();
        self.free_list.clear();
    }

    /// Fetch a shape by handle.
    pub fn get(&self, handle: Handle) -> Result<Shape, RegistryError> {
        let i = self.check(handle)?;
        Ok(Shape {
            params: self.params[i],
            aabb: self.aabb[i],
            mask: self.mask[i],
            user_tag: self.user_tag[i],
            active: self.active[i],
            generation: self.generation[i],
        })
    }

    /// Fetch a shape's cached AABB by handle.
    pub fn aabb(&self, handle: Handle) -> Result<Aabb, RegistryError> {
        let i = self.check(handle)?;
        Ok(self.aabb[i])
    }

    /// Fetch a shape's mask by handle.
    pub fn mask(&self, handle: Handle) -> Result<LayerMask, RegistryError> {
        let i = self.check(handle)?;
        Ok(self.mask[i])
    }

    /// Fetch a shape's user tag by handle.
    pub fn user_tag(&self, handle: Handle) -> Result<i64, RegistryError> {
        let i = self.check(handle)?;
        Ok(self.user_tag[i])
    }

    /// Iterate over every live slot as `(index, aabb, mask)`, for backends
    /// that need to bulk-load the whole registry (e.g. BVH rebuilds).
    pub fn iter_live(&self) -> impl Iterator<Item = (u32, Aabb, LayerMask)> + '_ {
        (0..self.active.len()).filter_map(move |i| {
            self.active[i].then(|| (i as u32, self.aabb[i], self.mask[i]))
        })
    }

    /// Fetch a shape directly by slot index, bypassing generation checks.
    ///
    /// Intended for callers (the query driver, the façade) that already
    /// obtained `index` from a broad-phase query over currently-registered
    /// indices — those indices are always live by construction, so there is
    /// no handle to validate.
    pub fn shape_at(&self, index: u32) -> Shape {
        let i = index as usize;
        Shape {
            params: self.params[i],
            aabb: self.aabb[i],
            mask: self.mask[i],
            user_tag: self.user_tag[i],
            active: self.active[i],
            generation: self.generation[i],
        }
    }

    /// Raw AABB view indexed by slot index, live or not (§4.1 `aabbs()`).
    /// Broad-phase backends use this for the final per-candidate AABB test
    /// since they may themselves store a fattened or bucket-bound surrogate.
    pub fn aabb_slice(&self) -> &[Aabb] {
        &self.aabb
    }

    /// Raw mask view indexed by slot index, live or not.
    pub fn mask_slice(&self) -> &[LayerMask] {
        &self.mask
    }

    /// Resolve a handle to a slot index, validating bounds and generation.
    fn check(&self, handle: Handle) -> Result<usize, RegistryError> {
        let i = handle.index as usize;
        let len = self.active.len() as u32;
        if i >= self.active.len() {
            return Err(RegistryError::IndexOutOfBounds {
                index: handle.index,
                len,
            });
        }
        if !self.active[i] || self.generation[i] != handle.generation {
            return Err(RegistryError::StaleHandle {
                handle_generation: handle.generation,
                slot_generation: self.generation[i],
            });
        }
        Ok(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn sphere(center: Vec3, radius: f32) -> ShapeParams {
        ShapeParams::Sphere { center, radius }
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut r = Registry::new();
        let h = r.add(sphere(Vec3::ZERO, 1.0), LayerMask::ALL, 42);
        let s = r.get(h).unwrap();
        assert_eq!(s.user_tag, 42);
        assert_eq!(s.mask, LayerMask::ALL);
    }

    #[test]
    fn remove_then_get_is_stale() {
        let mut r = Registry::new();
        let h = r.add(sphere(Vec3::ZERO, 1.0), LayerMask::ALL, 0);
        assert!(r.remove(h));
        assert!(matches!(r.get(h), Err(RegistryError::StaleHandle { .. })));
    }

    #[test]
    fn remove_is_idempotent_false_on_second_call() {
        let mut r = Registry::new();
        let h = r.add(sphere(Vec3::ZERO, 1.0), LayerMask::ALL, 0);
        assert!(r.remove(h));
        assert!(!r.remove(h));
    }

    #[test]
    fn recycled_slot_bumps_generation_and_invalidates_old_handle() {
        let mut r = Registry::new();
        let h1 = r.add(sphere(Vec3::ZERO, 1.0), LayerMask::ALL, 0);
        r.remove(h1);
        let h2 = r.add(sphere(Vec3::ONE, 2.0), LayerMask::ALL, 0);
        assert_eq!(h1.index(), h2.index());
        assert_ne!(h1.generation(), h2.generation());
        assert!(r.get(h1).is_err());
        assert!(r.get(h2).is_ok());
    }

    #[test]
    fn update_recomputes_cached_aabb() {
        let mut r = Registry::new();
        let h = r.add(sphere(Vec3::ZERO, 1.0), LayerMask::ALL, 0);
        let before = r.aabb(h).unwrap();
        r.update(h, sphere(Vec3::ZERO, 5.0));
        let after = r.aabb(h).unwrap();
        assert!(after.size().x > before.size().x);
    }

    #[test]
    fn out_of_bounds_handle_is_rejected() {
        let r = Registry::new();
        let bogus = Handle {
            index: 7,
            generation: 0,
        };
        assert!(matches!(
            r.get(bogus),
            Err(RegistryError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn shape_at_matches_get_for_a_live_slot() {
        let mut r = Registry::new();
        let h = r.add(sphere(Vec3::ONE, 3.0), LayerMask::from_bits_retain(0x04), 9);
        let via_handle = r.get(h).unwrap();
        let via_index = r.shape_at(h.index());
        assert_eq!(via_handle, via_index);
    }

    #[test]
    fn iter_live_skips_removed_slots() {
        let mut r = Registry::new();
        let h1 = r.add(sphere(Vec3::ZERO, 1.0), LayerMask::ALL, 0);
        let _h2 = r.add(sphere(Vec3::ONE, 1.0), LayerMask::ALL, 0);
        r.remove(h1);
        assert_eq!(r.iter_live().count(), 1);
    }
}
