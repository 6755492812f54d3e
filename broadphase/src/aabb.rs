// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Axis-aligned bounding boxes in 3-space.

use glam::Vec3;

/// Axis-aligned bounding box with `min <= max` on every axis.
///
/// An empty/degenerate box (any axis where `min > max`) is a valid value —
/// `intersects` and `contains_point` treat it as containing nothing.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Build an AABB from explicit min/max corners.
    ///
    /// Does not validate `min <= max`; callers that need a canonical box
    /// from two arbitrary corners should use [`Self::from_corners`].
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Build an AABB from two arbitrary corners, ordering them per axis.
    #[inline]
    pub fn from_corners(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Build an AABB from a center point and half-extents.
    #[inline]
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// The empty AABB (degenerate at the origin); unions with anything
    /// return the other operand unchanged.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Center of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Extents (full side lengths) of the box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        (self.max - self.min).max(Vec3::ZERO)
    }

    /// Half-extents of the box.
    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// `2 * (sx*sy + sy*sz + sz*sx)`, the surface area used by SAH costs.
    #[inline]
    pub fn surface_area(&self) -> f32 {
        let s = self.size();
        2.0 * (s.x * s.y + s.y * s.z + s.z * s.x)
    }

    /// Whether this box is empty (any axis inverted or zero-extent).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Whether this box overlaps another. Touching faces count as overlap.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Whether the given point lies within the box (inclusive).
    #[inline]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Whether `other` is fully contained within `self`.
    #[inline]
    pub fn contains_aabb(&self, other: &Self) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Smallest AABB enclosing both inputs.
    #[inline]
    pub fn merge(a: &Self, b: &Self) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    /// This box expanded outward by `margin` on every axis.
    #[inline]
    pub fn expand(&self, margin: f32) -> Self {
        let m = Vec3::splat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Union this box with another in place.
    #[inline]
    pub fn merge_with(&mut self, other: &Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersects_is_inclusive_of_touching_faces() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        let c = Aabb::new(Vec3::new(1.01, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn merge_encloses_both() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(-1.0), Vec3::splat(0.5));
        let m = Aabb::merge(&a, &b);
        assert_eq!(m.min, Vec3::splat(-1.0));
        assert_eq!(m.max, Vec3::ONE);
    }

    #[test]
    fn surface_area_matches_box_formula() {
        let a = Aabb::from_center_half_extents(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        // size = (2, 4, 6) -> 2*(2*4 + 4*6 + 6*2) = 2*(8+24+12) = 88
        assert!((a.surface_area() - 88.0).abs() < 1e-4);
    }

    #[test]
    fn expand_grows_symmetrically() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let e = a.expand(0.1);
        assert!((e.min.x - (-0.1)).abs() < 1e-6);
        assert!((e.max.x - 1.1).abs() < 1e-6);
    }
}
