// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Literal scenarios S1-S7 (`spec.md` §8), run against [`SpatialWorld`].

use broadphase::broadphase::dbvt::Dbvt;
use broadphase::broadphase::Index;
use broadphase::mask::LayerMask;
use broadphase::{Aabb, BroadPhaseKind, CapsuleSweepQuery, Config, PointQuery, RayQuery, SphereOverlapQuery, SpatialWorld};
use glam::Vec3;

fn world(kind: BroadPhaseKind) -> SpatialWorld {
    SpatialWorld::new(Config {
        broad_phase_kind: kind,
        ..Config::default()
    })
    .unwrap()
}

/// S1: a ray aimed straight at a sphere hits it at the expected distance.
#[test]
fn s1_ray_hits_sphere_on_axis() {
    let mut world = world(BroadPhaseKind::Dbvt);
    world.add_sphere(Vec3::new(5.0, 0.0, 0.0), 1.0, LayerMask::default(), 0);

    let ray = RayQuery {
        origin: Vec3::ZERO,
        dir: Vec3::X,
        max_dist: 100.0,
        include_mask: LayerMask::ALL,
        exclude_mask: LayerMask::NONE,
    };
    let mut out = [broadphase::RaycastHit {
        shape_index: 0,
        distance: 0.0,
        user_tag: 0,
    }; 8];
    let n = world.raycast(&ray, &mut out);
    assert_eq!(n, 1);
    assert_eq!(out[0].shape_index, 0);
    assert!((out[0].distance - 4.0).abs() < 0.01);
}

/// S2: a parallel ray offset from the sphere misses entirely.
#[test]
fn s2_ray_offset_from_sphere_misses() {
    let mut world = world(BroadPhaseKind::Dbvt);
    world.add_sphere(Vec3::new(5.0, 0.0, 0.0), 1.0, LayerMask::default(), 0);

    let ray = RayQuery {
        origin: Vec3::new(0.0, 5.0, 0.0),
        dir: Vec3::X,
        max_dist: 100.0,
        include_mask: LayerMask::ALL,
        exclude_mask: LayerMask::NONE,
    };
    let mut out = [broadphase::RaycastHit {
        shape_index: 0,
        distance: 0.0,
        user_tag: 0,
    }; 8];
    assert_eq!(world.raycast(&ray, &mut out), 0);
}

/// S3: with two spheres on the ray, the nearer one is reported first.
#[test]
fn s3_ray_reports_nearest_hit_first() {
    let mut world = world(BroadPhaseKind::Dbvt);
    let far = world.add_sphere(Vec3::new(10.0, 0.0, 0.0), 1.0, LayerMask::default(), 0);
    let near = world.add_sphere(Vec3::new(5.0, 0.0, 0.0), 1.0, LayerMask::default(), 0);

    let ray = RayQuery {
        origin: Vec3::ZERO,
        dir: Vec3::X,
        max_dist: 100.0,
        include_mask: LayerMask::ALL,
        exclude_mask: LayerMask::NONE,
    };
    let mut out = [broadphase::RaycastHit {
        shape_index: 0,
        distance: 0.0,
        user_tag: 0,
    }; 8];
    let n = world.raycast(&ray, &mut out);
    assert_eq!(n, 2);
    assert_eq!(out[0].shape_index, near.index());
    assert_eq!(out[1].shape_index, far.index());
    assert!(out[0].distance < out[1].distance);
}

/// S4: two spheres exactly touching at their surfaces count as overlapping.
#[test]
fn s4_tangent_spheres_count_as_overlapping() {
    let mut world = world(BroadPhaseKind::Dbvt);
    world.add_sphere(Vec3::ZERO, 1.0, LayerMask::default(), 0);

    let q = SphereOverlapQuery {
        center: Vec3::new(2.0, 0.0, 0.0),
        radius: 1.0,
        include_mask: LayerMask::ALL,
        exclude_mask: LayerMask::NONE,
    };
    let mut out = [0u32; 8];
    assert_eq!(world.sphere_overlap(&q, &mut out), 1);
}

/// S5: a capsule swept toward a sphere it already overlaps at the start of
/// the sweep reports a zero time of impact.
#[test]
fn s5_sweep_starting_in_contact_has_zero_toi() {
    let mut world = world(BroadPhaseKind::Dbvt);
    world.add_sphere(Vec3::ZERO, 2.0, LayerMask::default(), 0);

    let q = CapsuleSweepQuery {
        start: Vec3::ZERO,
        end: Vec3::new(5.0, 0.0, 0.0),
        radius: 0.5,
        include_mask: LayerMask::ALL,
        exclude_mask: LayerMask::NONE,
    };
    let mut out = [broadphase::SweepHit {
        shape_index: 0,
        time_of_impact: 0.0,
        user_tag: 0,
    }; 8];
    let n = world.capsule_sweep(&q, &mut out);
    assert_eq!(n, 1);
    assert_eq!(out[0].time_of_impact, 0.0);
}

/// S6: a point query at the shared center of two overlapping spheres is
/// filtered correctly by include- and exclude-masks.
#[test]
fn s6_point_query_mask_filtering() {
    let mut world = world(BroadPhaseKind::Dbvt);
    let a = world.add_sphere(Vec3::ZERO, 2.0, LayerMask::from_bits_retain(0x01), 0);
    let b = world.add_sphere(Vec3::ZERO, 2.0, LayerMask::from_bits_retain(0x02), 0);

    let mut out = [0u32; 8];

    let include_a = PointQuery {
        point: Vec3::ZERO,
        include_mask: LayerMask::from_bits_retain(0x01),
        exclude_mask: LayerMask::NONE,
    };
    let n = world.point_query(&include_a, &mut out);
    assert_eq!(n, 1);
    assert_eq!(out[0], a.index());

    let include_b = PointQuery {
        point: Vec3::ZERO,
        include_mask: LayerMask::from_bits_retain(0x02),
        exclude_mask: LayerMask::NONE,
    };
    let n = world.point_query(&include_b, &mut out);
    assert_eq!(n, 1);
    assert_eq!(out[0], b.index());

    let exclude_a = PointQuery {
        point: Vec3::ZERO,
        include_mask: LayerMask::ALL,
        exclude_mask: LayerMask::from_bits_retain(0x01),
    };
    let n = world.point_query(&exclude_a, &mut out);
    assert_eq!(n, 1);
    assert_eq!(out[0], b.index());
}

/// S7: a small move fully inside the DBVT's fat margin is a structural
/// no-op — the leaf's fat bounds stay put and the shape's own AABB still
/// answers queries correctly at its new position.
#[test]
fn s7_small_move_inside_fat_margin_is_a_structural_no_op() {
    let mut dbvt = Dbvt::new(0.1);
    let start = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
    dbvt.add(0, start);

    let moved = Aabb::new(Vec3::new(-1.05, -1.0, -1.0), Vec3::new(0.95, 1.0, 1.0));
    let all_aabbs = [moved];
    dbvt.update(0, start, moved);

    let mut out = [0u32; 4];
    let n = dbvt.query(moved, &mut out, &all_aabbs);
    assert_eq!(n, 1);
    assert_eq!(out[0], 0);
    assert_eq!(dbvt.shape_count(), 1);
}
