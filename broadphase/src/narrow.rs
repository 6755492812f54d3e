// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Narrow-phase primitives.
//!
//! This module is intentionally small: it exists only so the broad-phase
//! contract can be exercised end to end by the scenarios in `tests/`, not
//! as a general narrow-phase geometry library. A production integration is
//! expected to replace it with something far more complete.

use glam::Vec3;

use crate::aabb::Aabb;

/// Entry distance of a ray against an AABB (slab method), or `None` if it
/// misses or the entry point is beyond `max_dist`.
///
/// Used by the façade as a stand-in narrow-phase test for shape kinds this
/// module has no dedicated test for (capsule, cylinder, box) — the broad
/// phase has already established the ray's bounding box overlaps the
/// shape's AABB, so this recovers a real entry distance for ranking instead
/// of a true intersection with the shape's exact surface.
pub fn ray_aabb(origin: Vec3, dir: Vec3, max_dist: f32, aabb: Aabb) -> Option<f32> {
    let inv_dir = Vec3::ONE / dir;
    let t0 = (aabb.min - origin) * inv_dir;
    let t1 = (aabb.max - origin) * inv_dir;
    let t_min = t0.min(t1);
    let t_max = t0.max(t1);
    let enter = t_min.x.max(t_min.y).max(t_min.z).max(0.0);
    let exit = t_max.x.min(t_max.y).min(t_max.z);
    (enter <= exit && enter <= max_dist).then_some(enter)
}

/// Closest positive hit distance of a ray against a sphere, or `None` if it
/// misses or the hit is beyond `max_dist`. `dir` must be a unit vector.
pub fn ray_sphere(origin: Vec3, dir: Vec3, max_dist: f32, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.dot(oc) - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    let t0 = -b - sqrt_disc;
    let t1 = -b + sqrt_disc;
    let t = if t0 >= 0.0 {
        t0
    } else if t1 >= 0.0 {
        t1
    } else {
        return None;
    };
    (t <= max_dist).then_some(t)
}

/// Whether two spheres overlap; tangency counts as overlap (§8, S4).
pub fn sphere_sphere_overlap(c1: Vec3, r1: f32, c2: Vec3, r2: f32) -> bool {
    let d2 = (c1 - c2).length_squared();
    let r = r1 + r2;
    d2 <= r * r
}

/// Whether a point lies within a sphere (inclusive).
pub fn point_in_sphere(p: Vec3, center: Vec3, radius: f32) -> bool {
    (p - center).length_squared() <= radius * radius
}

/// Time of impact in `[0, 1]` of a capsule (radius `sweep_radius`) swept
/// from `start` to `end` against a stationary sphere, or `None` if the
/// sweep never comes within contact distance. A sweep that starts already
/// overlapping returns `Some(0.0)` (§8, S5).
pub fn capsule_sweep_vs_sphere(
    start: Vec3,
    end: Vec3,
    sweep_radius: f32,
    sphere_center: Vec3,
    sphere_radius: f32,
) -> Option<f32> {
    let combined_radius = sweep_radius + sphere_radius;
    if (start - sphere_center).length_squared() <= combined_radius * combined_radius {
        return Some(0.0);
    }
    let delta = end - start;
    let len = delta.length();
    if len <= f32::EPSILON {
        return None;
    }
    let dir = delta / len;
    ray_sphere(start, dir, len, sphere_center, combined_radius).map(|t| t / len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_sphere_hits_at_expected_distance() {
        let t = ray_sphere(Vec3::ZERO, Vec3::X, 100.0, Vec3::new(5.0, 0.0, 0.0), 1.0).unwrap();
        assert!((t - 4.0).abs() < 0.01);
    }

    #[test]
    fn ray_sphere_misses_when_offset() {
        assert!(ray_sphere(Vec3::new(0.0, 5.0, 0.0), Vec3::X, 100.0, Vec3::new(5.0, 0.0, 0.0), 1.0).is_none());
    }

    #[test]
    fn sphere_overlap_counts_tangency() {
        assert!(sphere_sphere_overlap(Vec3::ZERO, 1.0, Vec3::new(2.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn ray_aabb_hits_near_face_at_expected_distance() {
        let aabb = Aabb::new(Vec3::splat(4.0), Vec3::splat(6.0));
        let center_dir = Vec3::splat(5.0).normalize();
        let t = ray_aabb(Vec3::ZERO, center_dir, 100.0, aabb).unwrap();
        assert!((t - Vec3::splat(4.0).length()).abs() < 1e-3);
    }

    #[test]
    fn ray_aabb_misses_when_pointed_away() {
        let aabb = Aabb::new(Vec3::splat(4.0), Vec3::splat(6.0));
        assert!(ray_aabb(Vec3::ZERO, Vec3::new(-1.0, 0.0, 0.0), 100.0, aabb).is_none());
    }

    #[test]
    fn capsule_sweep_starting_in_contact_has_zero_toi() {
        let toi = capsule_sweep_vs_sphere(Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0), 0.5, Vec3::ZERO, 2.0).unwrap();
        assert_eq!(toi, 0.0);
    }
}
