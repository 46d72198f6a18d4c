//! # rank-mesh
//!
//! rank-mesh turns a flat collection of distributed processes into an
//! addressable n-dimensional grid and layers collective communication on
//! top of it. A [`topology::RankMesh`] owns one communication group per
//! mesh dimension, derived identically on every rank from a purely local
//! grid description, and exposes scatter, broadcast, all-gather,
//! all-reduce, reduce-scatter, and all-to-all addressed by mesh
//! dimension instead of raw group handles.
//!
//! ## Features
//! - `RankGrid` validation and deterministic per-dimension partitioning
//! - Pluggable transports behind the [`comm::GroupComm`] trait, with an
//!   in-process thread-per-rank transport for tests and single-node runs
//! - A backend capability table with documented fallback compositions
//!   for transports lacking reduce-scatter or all-to-all
//! - A scoped, nestable active-mesh registry
//!
//! ## Example (four ranks in one process)
//! ```
//! use rank_mesh::prelude::*;
//! use std::sync::Arc;
//!
//! let mut handles = Vec::new();
//! for comm in LocalWorld::spawn(4) {
//!     handles.push(std::thread::spawn(move || {
//!         comm.initialize(BackendKind::Loopback).unwrap();
//!         let grid = RankGrid::from_rows(vec![vec![0, 1], vec![2, 3]]).unwrap();
//!         let mesh = RankMesh::new(Arc::new(comm), DeviceType::Cpu, grid).unwrap();
//!         let mut shard = Shard::from_vec(vec![mesh.rank() as u64], vec![1]).unwrap();
//!         // Reduce down each column (mesh dimension 0).
//!         mesh.all_reduce(&mut shard, ReduceOp::Sum, 0).unwrap();
//!         shard.into_vec().unwrap()[0]
//!     }));
//! }
//! let sums: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
//! assert_eq!(sums, vec![2, 4, 2, 4]);
//! ```
//!
//! ## Determinism
//! Group creation is a positional, cluster-wide rendezvous: every
//! process must issue the same group-creation calls in the same order.
//! The mesh derives that order from the grid layout alone, so identical
//! grids yield identical call sequences on every rank.

pub mod algs;
pub mod comm;
pub mod data;
pub mod error;
pub mod registry;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::local::{LocalComm, LocalGroup, LocalWorld};
    pub use crate::comm::{
        BackendKind, CollectiveKind, CommGroup, DeviceType, GroupComm, ReduceElement, ReduceOp,
        Wait,
    };
    pub use crate::data::Shard;
    pub use crate::error::RankMeshError;
    pub use crate::registry::{current, enter, ActiveMeshGuard};
    pub use crate::topology::{RankGrid, RankMesh};
}
