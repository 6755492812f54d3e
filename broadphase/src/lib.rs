// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=broadphase --heading-base-level=0

//! Broadphase: a broad-phase spatial indexing core for real-time 3-D
//! collision detection.
//!
//! Manages a population of spheres, capsules, cylinders, and yaw-rotated
//! boxes in a [`Registry`](registry::Registry), and indexes their AABBs with
//! one of six interchangeable acceleration structures behind a single
//! [`Index`](broadphase::Index) contract:
//!
//! - [`spatial_hash`](broadphase::spatial_hash) — fixed hash table of cells
//! - [`grid_sap`](broadphase::grid_sap) — grid of zones, each a sweep-and-prune list
//! - [`mbp`](broadphase::mbp) — multi-box pruning over a fixed world AABB
//! - [`octree`](broadphase::octree) — lazily-subdivided loose octree
//! - [`bvh`](broadphase::bvh) — top-down bounding volume hierarchy, lazy rebuild
//! - [`dbvt`](broadphase::dbvt) — dynamic BVH with incremental fat-AABB update
//!
//! [`world::SpatialWorld`] assembles a registry, a chosen backend, and the
//! [`query::QueryDriver`] into the façade most callers want: add/update/
//! remove shapes by kind, then run a ray/sphere/capsule-sweep/slash/point
//! query into a caller-supplied output buffer with no heap traffic once
//! warmed up.
//!
//! This crate ships only the narrow-phase primitives needed to exercise the
//! broad phase end to end (see [`narrow`]); it is not a general narrow-phase
//! geometry library.
//!
//! # Example
//!
//! ```rust
//! use broadphase::{BroadPhaseKind, Config, LayerMask, RayQuery, SpatialWorld};
//! use glam::Vec3;
//!
//! let mut world = SpatialWorld::new(Config {
//!     broad_phase_kind: BroadPhaseKind::SpatialHash,
//!     ..Config::default()
//! })
//! .unwrap();
//!
//! let _handle = world.add_sphere(Vec3::new(5.0, 0.0, 0.0), 1.0, LayerMask::default(), 0);
//!
//! let ray = RayQuery {
//!     origin: Vec3::ZERO,
//!     dir: Vec3::X,
//!     max_dist: 100.0,
//!     include_mask: LayerMask::ALL,
//!     exclude_mask: LayerMask::NONE,
//! };
//! let mut hits = [0u32; 8];
//! let n = world.raycast(&ray, &mut hits);
//! assert_eq!(n, 1);
//! ```

pub mod aabb;
pub mod broadphase;
pub mod error;
pub mod mask;
pub mod narrow;
pub mod query;
pub mod registry;
pub mod shape;
pub mod world;

pub use aabb::Aabb;
pub use broadphase::{BroadPhase, Index as BroadPhaseIndex};
pub use error::{ConfigError, InvalidConfiguration, RegistryError};
pub use mask::LayerMask;
pub use query::{CapsuleSweepQuery, PointQuery, RayQuery, SlashQuery, SphereOverlapQuery};
pub use registry::{Handle, Registry};
pub use shape::{Shape, ShapeKind, ShapeParams};
pub use world::{BroadPhaseKind, Config, RaycastHit, SpatialWorld, SweepHit};
