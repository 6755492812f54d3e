// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The external façade (§6): assembles a [`Registry`], a chosen
//! [`BroadPhase`] backend, and a [`QueryDriver`] into the single entry
//! point callers are expected to use instead of wiring the core's parts
//! together themselves.

use glam::Vec3;
use smallvec::SmallVec;

use crate::aabb::Aabb;
use crate::broadphase::bvh::Bvh;
use crate::broadphase::dbvt::Dbvt;
use crate::broadphase::grid_sap::{AxisMode, GridSap};
use crate::broadphase::mbp::Mbp;
use crate::broadphase::octree::Octree;
use crate::broadphase::spatial_hash::SpatialHash;
use crate::broadphase::{BroadPhase, Index as BroadPhaseIndex};
use crate::error::{ConfigError, InvalidConfiguration};
use crate::mask::LayerMask;
use crate::narrow;
use crate::query::{CapsuleSweepQuery, PointQuery, QueryDriver, RayQuery, SlashQuery, SphereOverlapQuery};
use crate::registry::{Handle, Registry};
use crate::shape::ShapeParams;

/// Stack-allocated candidate buffer the façade feeds from the query driver
/// before running narrow-phase, mirroring [`crate::query`]'s own sizing.
const CANDIDATE_BUFFER_LEN: usize = 256;

/// Which broad-phase backend a [`SpatialWorld`] indexes shapes with (§6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BroadPhaseKind {
    /// §4.3
    SpatialHash,
    /// §4.4
    GridSap,
    /// §4.5
    Mbp,
    /// §4.6
    Octree,
    /// §4.7
    Bvh,
    /// §4.8
    Dbvt,
}

/// Configuration recognised by [`SpatialWorld::new`] (§6).
///
/// Not every field applies to every [`BroadPhaseKind`]; [`Config::validate`]
/// only checks the fields the chosen kind actually reads.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Which broad-phase backend to build.
    pub broad_phase_kind: BroadPhaseKind,
    /// Fixed world bounds, required by [`BroadPhaseKind::Octree`] and
    /// [`BroadPhaseKind::Mbp`].
    pub world_bounds: Aabb,
    /// Cell edge length, used by [`BroadPhaseKind::SpatialHash`].
    pub cell_size: f32,
    /// Zone edge length, used by [`BroadPhaseKind::GridSap`].
    pub grid_size: f32,
    /// Region columns across the X axis, used by [`BroadPhaseKind::Mbp`].
    pub regions_x: u32,
    /// Region columns across the Z axis, used by [`BroadPhaseKind::Mbp`].
    pub regions_z: u32,
    /// Maximum subdivision depth, used by [`BroadPhaseKind::Octree`].
    pub max_depth: u32,
    /// Whether to use SAH (vs. median) splits, used by
    /// [`BroadPhaseKind::Bvh`].
    pub use_sah: bool,
    /// Fat-AABB margin, used by [`BroadPhaseKind::Dbvt`].
    pub fat_margin: f32,
    /// Soft cap on live shapes; `0` means unbounded. Exceeding it degrades
    /// further `add_*` calls to registry-only no-ops on the broad phase
    /// (§4.10) rather than failing.
    pub max_shapes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broad_phase_kind: BroadPhaseKind::Dbvt,
            world_bounds: Aabb::new(Vec3::splat(-1000.0), Vec3::splat(1000.0)),
            cell_size: 4.0,
            grid_size: 8.0,
            regions_x: 16,
            regions_z: 16,
            max_depth: 8,
            use_sah: true,
            fat_margin: 0.1,
            max_shapes: 0,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.broad_phase_kind {
            BroadPhaseKind::SpatialHash => {
                if self.cell_size <= 0.0 {
                    return Err(InvalidConfiguration::NonPositiveCellSize(self.cell_size).into());
                }
            }
            BroadPhaseKind::GridSap => {
                if self.grid_size <= 0.0 {
                    return Err(InvalidConfiguration::NonPositiveGridSize(self.grid_size).into());
                }
            }
            BroadPhaseKind::Mbp => {
                self.check_world_bounds()?;
                if self.regions_x == 0 || self.regions_z == 0 {
                    return Err(InvalidConfiguration::ZeroRegions(self.regions_x, self.regions_z).into());
                }
            }
            BroadPhaseKind::Octree => self.check_world_bounds()?,
            BroadPhaseKind::Bvh | BroadPhaseKind::Dbvt => {}
        }
        Ok(())
    }

    fn check_world_bounds(&self) -> Result<(), ConfigError> {
        let wb = self.world_bounds;
        if wb.min.x >= wb.max.x || wb.min.y >= wb.max.y || wb.min.z >= wb.max.z {
            return Err(InvalidConfiguration::DegenerateWorldBounds.into());
        }
        Ok(())
    }

    fn build_backend(&self) -> BroadPhase {
        match self.broad_phase_kind {
            BroadPhaseKind::SpatialHash => BroadPhase::SpatialHash(SpatialHash::new(self.cell_size, 256)),
            BroadPhaseKind::GridSap => BroadPhase::GridSap(GridSap::new(self.grid_size, AxisMode::Xz)),
            BroadPhaseKind::Mbp => BroadPhase::Mbp(Mbp::new(self.world_bounds, self.regions_x, self.regions_z)),
            BroadPhaseKind::Octree => BroadPhase::Octree(Octree::new(self.world_bounds, self.max_depth)),
            BroadPhaseKind::Bvh => BroadPhase::Bvh(Bvh::new(self.use_sah)),
            BroadPhaseKind::Dbvt => BroadPhase::Dbvt(Dbvt::new(self.fat_margin)),
        }
    }
}

/// A raycast result: which shape, how far along the ray, and its tag.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RaycastHit {
    /// Index of the hit shape (pair with a [`Handle`] via the registry if a
    /// stable reference across later mutation is needed).
    pub shape_index: u32,
    /// Distance from the ray origin to the hit point, along `dir`.
    pub distance: f32,
    /// The hit shape's user tag.
    pub user_tag: i64,
}

/// A swept-capsule result: which shape, the normalized time of impact in
/// `[0, 1]`, and its tag.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepHit {
    /// Index of the hit shape.
    pub shape_index: u32,
    /// Normalized time of impact along the sweep, in `[0, 1]`.
    pub time_of_impact: f32,
    /// The hit shape's user tag.
    pub user_tag: i64,
}

/// The façade described in §6: owns a [`Registry`], one [`BroadPhase`]
/// backend, and a [`QueryDriver`], and exposes shape-add/update/remove plus
/// every query kind from `spec.md` §6/§8.
#[derive(Debug)]
pub struct SpatialWorld {
    registry: Registry,
    broad_phase: BroadPhase,
    driver: QueryDriver,
    max_shapes: u32,
    insert_failed_count: u64,
    /// Whether slot `i` was actually handed to the broad phase — `false`
    /// for a shape added past `max_shapes` (§4.10). Indexed in lockstep
    /// with the registry's own slots.
    indexed: Vec<bool>,
}

impl SpatialWorld {
    /// Build a world from a validated [`Config`] (§7: construction errors
    /// surface to the caller).
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: Registry::new(),
            broad_phase: config.build_backend(),
            driver: QueryDriver::new(),
            max_shapes: config.max_shapes,
            insert_failed_count: 0,
            indexed: Vec::new(),
        })
    }

    /// Read-only access to the underlying registry, e.g. to inspect a
    /// shape's current parameters by handle.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// How many `add_*` calls degraded to a registry-only no-op on the
    /// broad phase because `max_shapes` was reached (§4.10, §7). Purely
    /// observational; the registered shape is otherwise fully usable.
    pub fn insert_failed_count(&self) -> u64 {
        self.insert_failed_count
    }

    fn register(&mut self, params: ShapeParams, mask: LayerMask, user_tag: i64) -> Handle {
        let handle = self.registry.add(params, mask, user_tag);
        let i = handle.index() as usize;
        if self.indexed.len() <= i {
            self.indexed.resize(i + 1, false);
        }
        self.driver.ensure_capacity(i + 1);
        if self.max_shapes != 0 && self.registry.len() as u32 > self.max_shapes {
            self.indexed[i] = false;
            self.insert_failed_count += 1;
            log::warn!(
                "broadphase: max_shapes ({}) reached, shape {} registered but not indexed",
                self.max_shapes,
                handle.index()
            );
        } else {
            let aabb = self.registry.aabb(handle).expect("handle was just issued by add");
            self.broad_phase.add(handle.index(), aabb);
            self.indexed[i] = true;
        }
        handle
    }

    /// Add a sphere, returning a handle to it.
    pub fn add_sphere(&mut self, center: Vec3, radius: f32, mask: LayerMask, user_tag: i64) -> Handle {
        self.register(ShapeParams::Sphere { center, radius }, mask, user_tag)
    }

    /// Add a capsule (swept sphere between `p1` and `p2`), returning a
    /// handle to it.
    pub fn add_capsule(&mut self, p1: Vec3, p2: Vec3, radius: f32, mask: LayerMask, user_tag: i64) -> Handle {
        self.register(ShapeParams::Capsule { p1, p2, radius }, mask, user_tag)
    }

    /// Add a Y-aligned cylinder, returning a handle to it.
    pub fn add_cylinder(
        &mut self,
        base_center: Vec3,
        height: f32,
        radius: f32,
        mask: LayerMask,
        user_tag: i64,
    ) -> Handle {
        self.register(
            ShapeParams::Cylinder {
                base_center,
                height,
                radius,
            },
            mask,
            user_tag,
        )
    }

    /// Add a box with yaw about Y, returning a handle to it.
    pub fn add_box(
        &mut self,
        center: Vec3,
        half_extents: Vec3,
        yaw: f32,
        mask: LayerMask,
        user_tag: i64,
    ) -> Handle {
        self.register(
            ShapeParams::Box {
                center,
                half_extents,
                yaw,
            },
            mask,
            user_tag,
        )
    }

    fn apply_update(&mut self, handle: Handle, params: ShapeParams) -> bool {
        match self.registry.update(handle, params) {
            Some((old_aabb, new_aabb)) => {
                if self.indexed.get(handle.index() as usize).copied().unwrap_or(false) {
                    self.broad_phase.update(handle.index(), old_aabb, new_aabb);
                }
                true
            }
            None => false,
        }
    }

    /// Update a sphere's parameters. Returns `false` silently if `handle`
    /// is stale (§4.1).
    pub fn update_sphere(&mut self, handle: Handle, center: Vec3, radius: f32) -> bool {
        self.apply_update(handle, ShapeParams::Sphere { center, radius })
    }

    /// Update a capsule's parameters.
    pub fn update_capsule(&mut self, handle: Handle, p1: Vec3, p2: Vec3, radius: f32) -> bool {
        self.apply_update(handle, ShapeParams::Capsule { p1, p2, radius })
    }

    /// Update a cylinder's parameters.
    pub fn update_cylinder(&mut self, handle: Handle, base_center: Vec3, height: f32, radius: f32) -> bool {
        self.apply_update(
            handle,
            ShapeParams::Cylinder {
                base_center,
                height,
                radius,
            },
        )
    }

    /// Update a box's parameters.
    pub fn update_box(&mut self, handle: Handle, center: Vec3, half_extents: Vec3, yaw: f32) -> bool {
        self.apply_update(
            handle,
            ShapeParams::Box {
                center,
                half_extents,
                yaw,
            },
        )
    }

    /// Remove a shape. Returns `false` silently if `handle` is already
    /// stale (§4.1, §4.10).
    pub fn remove(&mut self, handle: Handle) -> bool {
        let was_live = self.registry.remove(handle);
        if was_live {
            let i = handle.index() as usize;
            if self.indexed.get(i).copied().unwrap_or(false) {
                self.broad_phase.remove(handle.index());
            }
            self.indexed[i] = false;
        }
        was_live
    }

    /// Collect the broad phase's AABB/mask-filtered candidates for a query
    /// AABB into a fixed-size stack buffer.
    fn candidates(&mut self, q_aabb: Aabb, include: LayerMask, exclude: LayerMask) -> ([u32; CANDIDATE_BUFFER_LEN], usize) {
        let mut buf = [0u32; CANDIDATE_BUFFER_LEN];
        let n = self
            .driver
            .query(&mut self.broad_phase, &self.registry, q_aabb, include, exclude, &mut buf);
        (buf, n)
    }

    /// Cast a ray, writing every hit into `out` ordered nearest-first, up to
    /// `out.len()` (§8, S1-S3). Shape kinds this crate's `narrow` module has
    /// no dedicated ray test for (capsule, cylinder, box) are ranked by
    /// entry distance into their AABB rather than their exact surface.
    pub fn raycast(&mut self, query: &RayQuery, out: &mut [RaycastHit]) -> usize {
        let (candidates, n) = self.candidates(query.bounding_aabb(), query.include_mask, query.exclude_mask);

        let mut hits: SmallVec<[RaycastHit; 32]> = SmallVec::new();
        for &i in &candidates[..n] {
            let shape = self.registry.shape_at(i);
            let distance = match shape.params {
                ShapeParams::Sphere { center, radius } => {
                    narrow::ray_sphere(query.origin, query.dir, query.max_dist, center, radius)
                }
                _ => narrow::ray_aabb(query.origin, query.dir, query.max_dist, shape.aabb),
            };
            if let Some(distance) = distance {
                hits.push(RaycastHit {
                    shape_index: i,
                    distance,
                    user_tag: shape.user_tag,
                });
            }
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        let count = hits.len().min(out.len());
        out[..count].copy_from_slice(&hits[..count]);
        count
    }

    /// Find every shape overlapping a stationary query sphere (§8, S4).
    pub fn sphere_overlap(&mut self, query: &SphereOverlapQuery, out: &mut [u32]) -> usize {
        let (candidates, n) = self.candidates(query.bounding_aabb(), query.include_mask, query.exclude_mask);

        let mut count = 0;
        for &i in &candidates[..n] {
            if count >= out.len() {
                break;
            }
            let shape = self.registry.shape_at(i);
            let overlaps = match shape.params {
                ShapeParams::Sphere { center, radius } => {
                    narrow::sphere_sphere_overlap(query.center, query.radius, center, radius)
                }
                // No dedicated narrow-phase test for this kind; the AABB
                // overlap the driver already confirmed stands in for it.
                _ => true,
            };
            if overlaps {
                out[count] = i;
                count += 1;
            }
        }
        count
    }

    /// Sweep a capsule from `query.start` to `query.end`, writing every hit
    /// into `out` ordered by increasing time of impact (§8, S5, S7).
    pub fn capsule_sweep(&mut self, query: &CapsuleSweepQuery, out: &mut [SweepHit]) -> usize {
        let (candidates, n) = self.candidates(query.bounding_aabb(), query.include_mask, query.exclude_mask);

        let mut hits: SmallVec<[SweepHit; 32]> = SmallVec::new();
        for &i in &candidates[..n] {
            let shape = self.registry.shape_at(i);
            let toi = match shape.params {
                ShapeParams::Sphere { center, radius } => {
                    narrow::capsule_sweep_vs_sphere(query.start, query.end, query.radius, center, radius)
                }
                _ => Some(0.0),
            };
            if let Some(time_of_impact) = toi {
                hits.push(SweepHit {
                    shape_index: i,
                    time_of_impact,
                    user_tag: shape.user_tag,
                });
            }
        }
        hits.sort_by(|a, b| a.time_of_impact.total_cmp(&b.time_of_impact));
        let count = hits.len().min(out.len());
        out[..count].copy_from_slice(&hits[..count]);
        count
    }

    /// Run a "slash" ribbon query, writing every candidate shape index
    /// within the ribbon's bounding AABB into `out` (no dedicated narrow
    /// phase exists for the ribbon shape itself, per this crate's scope).
    pub fn slash(&mut self, query: &SlashQuery, out: &mut [u32]) -> usize {
        let (candidates, n) = self.candidates(query.bounding_aabb(), query.include_mask, query.exclude_mask);
        let count = n.min(out.len());
        out[..count].copy_from_slice(&candidates[..count]);
        count
    }

    /// Test a single point against every registered shape, writing
    /// containing shape indices into `out` (§8, S6).
    pub fn point_query(&mut self, query: &PointQuery, out: &mut [u32]) -> usize {
        let (candidates, n) = self.candidates(query.bounding_aabb(), query.include_mask, query.exclude_mask);

        let mut count = 0;
        for &i in &candidates[..n] {
            if count >= out.len() {
                break;
            }
            let shape = self.registry.shape_at(i);
            let contains = match shape.params {
                ShapeParams::Sphere { center, radius } => narrow::point_in_sphere(query.point, center, radius),
                _ => shape.aabb.contains_point(query.point),
            };
            if contains {
                out[count] = i;
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_cell_size_is_rejected_at_construction() {
        let config = Config {
            broad_phase_kind: BroadPhaseKind::SpatialHash,
            cell_size: 0.0,
            ..Config::default()
        };
        assert!(matches!(
            SpatialWorld::new(config),
            Err(ConfigError::InvalidConfiguration(InvalidConfiguration::NonPositiveCellSize(_)))
        ));
    }

    #[test]
    fn degenerate_world_bounds_is_rejected_for_octree() {
        let config = Config {
            broad_phase_kind: BroadPhaseKind::Octree,
            world_bounds: Aabb::new(Vec3::ZERO, Vec3::ZERO),
            ..Config::default()
        };
        assert!(matches!(
            SpatialWorld::new(config),
            Err(ConfigError::InvalidConfiguration(InvalidConfiguration::DegenerateWorldBounds))
        ));
    }

    #[test]
    fn bvh_and_dbvt_accept_any_world_bounds() {
        let config = Config {
            broad_phase_kind: BroadPhaseKind::Dbvt,
            world_bounds: Aabb::new(Vec3::ZERO, Vec3::ZERO),
            ..Config::default()
        };
        assert!(SpatialWorld::new(config).is_ok());
    }

    #[test]
    fn add_then_remove_round_trips() {
        let mut world = SpatialWorld::new(Config::default()).unwrap();
        let h = world.add_sphere(Vec3::ZERO, 1.0, LayerMask::default(), 0);
        assert!(world.remove(h));
        assert!(!world.remove(h));
    }

    #[test]
    fn stale_update_returns_false() {
        let mut world = SpatialWorld::new(Config::default()).unwrap();
        let h = world.add_sphere(Vec3::ZERO, 1.0, LayerMask::default(), 0);
        world.remove(h);
        assert!(!world.update_sphere(h, Vec3::ONE, 2.0));
    }

    #[test]
    fn max_shapes_degrades_indexing_but_keeps_the_registry_entry() {
        let mut world = SpatialWorld::new(Config {
            max_shapes: 1,
            ..Config::default()
        })
        .unwrap();
        let _h1 = world.add_sphere(Vec3::ZERO, 1.0, LayerMask::default(), 0);
        let h2 = world.add_sphere(Vec3::new(50.0, 0.0, 0.0), 1.0, LayerMask::default(), 0);
        assert_eq!(world.insert_failed_count(), 1);
        assert!(world.registry().get(h2).is_ok());

        let q = SphereOverlapQuery {
            center: Vec3::new(50.0, 0.0, 0.0),
            radius: 1.0,
            include_mask: LayerMask::ALL,
            exclude_mask: LayerMask::NONE,
        };
        let mut out = [0u32; 8];
        // h2 was never indexed by the broad phase, so it is invisible to
        // queries even though the registry still holds it.
        assert_eq!(world.sphere_overlap(&q, &mut out), 0);
    }
}
