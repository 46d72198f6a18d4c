//! RankMeshError: unified error type for rank-mesh public APIs.
//!
//! Every fallible operation in this crate reports through this enum so
//! callers get non-panicking, matchable errors. Construction-time
//! configuration problems, membership bugs detected during group
//! derivation, and per-call unsupported-collective failures are all
//! fatal to the triggering call and never retried internally.

use crate::comm::backend::{BackendKind, CollectiveKind, DeviceType};
use thiserror::Error;

/// Unified error type for rank-mesh operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RankMeshError {
    /// The default group's backend cannot serve the requested device type.
    #[error("backend {backend} does not support {device} devices")]
    IncompatibleBackend {
        backend: BackendKind,
        device: DeviceType,
    },

    /// The grid names more ranks than the world holds.
    #[error("mesh should not be bigger than the world, but found {mesh_len} ranks (world size {world_size})")]
    MeshTooLarge { mesh_len: usize, world_size: usize },

    /// The same rank appears at two grid positions.
    #[error("mesh cannot have duplicate values, but found {grid:?}")]
    DuplicateRanks { grid: Vec<usize> },

    /// A grid entry is not a valid rank of the current world.
    #[error("rank {rank} in mesh is outside the world [0, {world_size})")]
    RankOutOfRange { rank: usize, world_size: usize },

    /// Bootstrap found a grid that does not cover the whole world.
    #[error("mesh must include every process in the world, but WORLD_SIZE ({world_size}) != mesh size ({mesh_len})")]
    WorldSizeMismatch { world_size: usize, mesh_len: usize },

    /// Bootstrap found a grid whose ranks are not exactly `{0..n-1}`.
    #[error("mesh must hold all ranks of the world, but found {grid:?}")]
    NonContiguousRanks { grid: Vec<usize> },

    /// A bypass group list has the wrong length for this rank.
    #[error("dimension group list has length {got}, expected {expected} on rank {rank}")]
    DimGroupArity {
        rank: usize,
        expected: usize,
        got: usize,
    },

    /// A rank was found in more than one line of the same dimension.
    #[error("rank {rank} belongs to more than one group of mesh dimension {dim} (line {line:?})")]
    MultipleMembership {
        rank: usize,
        dim: usize,
        line: Vec<usize>,
    },

    /// `mesh_dim` (or a tensor dimension) is out of range for this mesh.
    #[error("dimension {dim} is out of range for {ndim} dimensions")]
    InvalidDimension { dim: usize, ndim: usize },

    /// The backend has neither a native path nor a fallback for this op.
    #[error("backend {backend} does not support {op}")]
    UnsupportedCollective {
        backend: BackendKind,
        op: CollectiveKind,
    },

    /// A scatter/chunk extent does not divide evenly over the line.
    #[error("extent {extent} along dim {dim} is not divisible by {chunks} participants (pre-pad the input)")]
    UnevenChunk {
        extent: usize,
        dim: usize,
        chunks: usize,
    },

    /// The scatter source rank supplied no input list.
    #[error("rank {rank} is the scatter source for mesh dimension {dim} but provided no input")]
    MissingScatterInput { rank: usize, dim: usize },

    /// A collective payload's shape disagrees with its peers or its output.
    #[error("shape mismatch in collective payload: {context}")]
    ShapeMismatch { context: String },

    /// A placeholder shard reached an operation that needs real storage.
    #[error("placeholder shard has no storage for {op}")]
    PlaceholderShard { op: CollectiveKind },

    /// `current()` was called with no active mesh in scope.
    #[error("no active mesh is set; enter a mesh scope first")]
    NoActiveMesh,

    /// The active mesh was entered over a different transport type.
    #[error("the active mesh uses a different transport type")]
    ActiveMeshTypeMismatch,

    /// A collective or group call was issued before the transport was initialized.
    #[error("communication layer is not initialized")]
    NotInitialized,

    /// `initialize` was called again with a different backend tag.
    #[error("communication layer already initialized with backend {backend}")]
    AlreadyInitialized { backend: BackendKind },

    /// Ranks disagreed on the membership of a positional group-creation call.
    #[error("group creation call {call} disagrees across ranks: saw {seen:?}, expected {expected:?}")]
    GroupMismatch {
        call: u64,
        expected: Vec<usize>,
        seen: Vec<usize>,
    },

    /// The calling rank is not a member of the addressed group.
    #[error("rank {rank} is not a member of the addressed group {ranks:?}")]
    NotAMember { rank: usize, ranks: Vec<usize> },
}
