// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shape kinds, their geometric parameters, and cached-AABB computation.

use glam::Vec3;

use crate::aabb::Aabb;

/// The kind of geometry a [`Shape`] holds. Kept alongside `ShapeParams` so
/// code can match on kind without destructuring the payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    /// A sphere.
    Sphere,
    /// A capsule (swept sphere between two endpoints).
    Capsule,
    /// A Y-aligned cylinder.
    Cylinder,
    /// A box with yaw about Y.
    Box,
}

/// Kind-specific geometric parameters for a shape.
///
/// This is a tagged union in the sense `spec.md` §4.1 describes ("parameter
/// payload (union with largest variant)"); in Rust that's simply an enum —
/// no manual union/variant-size bookkeeping is needed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ShapeParams {
    /// Sphere: center and radius.
    Sphere {
        /// World-space center.
        center: Vec3,
        /// Radius, must be positive.
        radius: f32,
    },
    /// Capsule: two endpoints and a radius.
    Capsule {
        /// First endpoint (segment start).
        p1: Vec3,
        /// Second endpoint (segment end).
        p2: Vec3,
        /// Radius, must be positive.
        radius: f32,
    },
    /// Y-aligned cylinder: base center, height, and radius.
    Cylinder {
        /// Center of the bottom cap.
        base_center: Vec3,
        /// Height along +Y.
        height: f32,
        /// Radius, must be positive.
        radius: f32,
    },
    /// Box with yaw about Y: center, half-extents, and yaw in radians.
    Box {
        /// World-space center.
        center: Vec3,
        /// Half-extents along the box's local axes.
        half_extents: Vec3,
        /// Rotation about the Y axis, radians.
        yaw: f32,
    },
}

impl ShapeParams {
    /// The [`ShapeKind`] this payload belongs to.
    #[inline]
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Sphere { .. } => ShapeKind::Sphere,
            Self::Capsule { .. } => ShapeKind::Capsule,
            Self::Cylinder { .. } => ShapeKind::Cylinder,
            Self::Box { .. } => ShapeKind::Box,
        }
    }

    /// Compute the world-space AABB for these parameters.
    pub fn compute_aabb(&self) -> Aabb {
        match *self {
            Self::Sphere { center, radius } => {
                Aabb::from_center_half_extents(center, Vec3::splat(radius))
            }
            Self::Capsule { p1, p2, radius } => {
                let seg = Aabb::from_corners(p1, p2);
                seg.expand(radius)
            }
            Self::Cylinder {
                base_center,
                height,
                radius,
            } => {
                let min = base_center - Vec3::new(radius, 0.0, radius);
                let max = base_center + Vec3::new(radius, height.max(0.0), radius);
                Aabb::new(min, max)
            }
            Self::Box {
                center,
                half_extents,
                yaw,
            } => {
                // Rotate the four top-down corner offsets by yaw about Y and
                // take the axis-aligned extent; Y itself is unaffected by a
                // yaw-about-Y rotation.
                let (sin, cos) = yaw.sin_cos();
                let hx = half_extents.x;
                let hz = half_extents.z;
                let corners = [
                    Vec3::new(hx, 0.0, hz),
                    Vec3::new(hx, 0.0, -hz),
                    Vec3::new(-hx, 0.0, hz),
                    Vec3::new(-hx, 0.0, -hz),
                ];
                let mut max_x = 0.0_f32;
                let mut max_z = 0.0_f32;
                for c in corners {
                    let rx = c.x * cos - c.z * sin;
                    let rz = c.x * sin + c.z * cos;
                    max_x = max_x.max(rx.abs());
                    max_z = max_z.max(rz.abs());
                }
                let half = Vec3::new(max_x, half_extents.y, max_z);
                Aabb::from_center_half_extents(center, half)
            }
        }
    }
}

/// A registered shape: kind-specific parameters plus the bookkeeping fields
/// the registry and broad phase need (mask, tag, liveness, generation).
///
/// The cached `aabb` is recomputed whenever `params` changes; it is never
/// derived lazily from `params` on the query path so that every consumer
/// (registry readers and every broad-phase implementation) agrees on the
/// same box without recomputing trigonometry per query.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Shape {
    /// Geometric parameters.
    pub params: ShapeParams,
    /// Cached world-space AABB, recomputed on every `params` change.
    pub aabb: Aabb,
    /// Collision layer mask.
    pub mask: crate::mask::LayerMask,
    /// Caller-defined opaque tag.
    pub user_tag: i64,
    /// Whether this slot currently holds a live shape.
    pub active: bool,
    /// Bumped every time this slot is recycled; part of the stable `Handle`.
    pub generation: u32,
}

impl Shape {
    /// The shape's kind.
    #[inline]
    pub fn kind(&self) -> ShapeKind {
        self.params.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::FRAC_PI_2;

    #[test]
    fn sphere_aabb_is_centered_cube() {
        let p = ShapeParams::Sphere {
            center: Vec3::new(1.0, 2.0, 3.0),
            radius: 0.5,
        };
        let a = p.compute_aabb();
        assert_eq!(a.min, Vec3::new(0.5, 1.5, 2.5));
        assert_eq!(a.max, Vec3::new(1.5, 2.5, 3.5));
    }

    #[test]
    fn capsule_aabb_encloses_both_spheres() {
        let p = ShapeParams::Capsule {
            p1: Vec3::new(0.0, 0.0, 0.0),
            p2: Vec3::new(5.0, 0.0, 0.0),
            radius: 0.5,
        };
        let a = p.compute_aabb();
        assert_eq!(a.min, Vec3::new(-0.5, -0.5, -0.5));
        assert_eq!(a.max, Vec3::new(5.5, 0.5, 0.5));
    }

    #[test]
    fn box_aabb_unrotated_matches_half_extents() {
        let p = ShapeParams::Box {
            center: Vec3::ZERO,
            half_extents: Vec3::new(1.0, 2.0, 3.0),
            yaw: 0.0,
        };
        let a = p.compute_aabb();
        assert!((a.max.x - 1.0).abs() < 1e-5);
        assert!((a.max.y - 2.0).abs() < 1e-5);
        assert!((a.max.z - 3.0).abs() < 1e-5);
    }

    #[test]
    fn box_aabb_rotated_90_degrees_swaps_xz_extent() {
        let p = ShapeParams::Box {
            center: Vec3::ZERO,
            half_extents: Vec3::new(1.0, 1.0, 3.0),
            yaw: FRAC_PI_2,
        };
        let a = p.compute_aabb();
        assert!((a.max.x - 3.0).abs() < 1e-3);
        assert!((a.max.z - 1.0).abs() < 1e-3);
    }

    #[test]
    fn cylinder_aabb_spans_from_base_to_base_plus_height() {
        let p = ShapeParams::Cylinder {
            base_center: Vec3::new(0.0, 1.0, 0.0),
            height: 2.0,
            radius: 0.5,
        };
        let a = p.compute_aabb();
        assert_eq!(a.min.y, 1.0);
        assert_eq!(a.max.y, 3.0);
        assert!((a.max.x - 0.5).abs() < 1e-6);
    }
}
