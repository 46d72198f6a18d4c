//! Transport boundary: group-communication traits and backends.
//!
//! The mesh layer consumes a [`GroupComm`] implementation and never
//! touches wire details. Payloads are contiguous slices of
//! [`ReduceElement`] scalars; group handles are opaque [`CommGroup`]
//! values owned by the mesh that created them.
//!
//! [`GroupComm::create_group`] is a cluster-wide rendezvous: every
//! process must call it the same number of times with the same member
//! lists in the same order, because transports match calls positionally
//! across processes, not by content. Skipping or reordering a call on
//! one process deadlocks or misassigns groups cluster-wide.

pub mod backend;
pub mod local;
pub mod reduce;

use crate::error::RankMeshError;
pub use backend::{BackendKind, CollectiveKind, CollectiveSupport, DeviceSupport, DeviceType};
pub use reduce::{ReduceElement, ReduceOp};

/// Anything that can be waited on.
pub trait Wait {
    /// Block until the operation completes; the payload buffer must not
    /// be reused before this returns.
    fn wait(self);
}

/// Already-complete work (synchronous transports).
impl Wait for () {
    fn wait(self) {}
}

/// Opaque handle to a communication group over a fixed rank set.
pub trait CommGroup: Clone + Send + Sync + 'static {
    /// Global ranks of the members, in group order.
    fn ranks(&self) -> &[usize];

    fn len(&self) -> usize {
        self.ranks().len()
    }

    fn is_empty(&self) -> bool {
        self.ranks().is_empty()
    }

    /// Position of a global rank within the group, if a member.
    fn position_of(&self, global_rank: usize) -> Option<usize> {
        self.ranks().iter().position(|&r| r == global_rank)
    }

    /// Global rank at a group position.
    fn global_rank(&self, position: usize) -> Option<usize> {
        self.ranks().get(position).copied()
    }
}

/// Group-communication capability of a transport backend.
///
/// One instance per participating process. All collectives below are
/// synchronous rendezvous from the caller's point of view except those
/// returning a [`Wait`] handle, which may complete asynchronously.
pub trait GroupComm: Send + Sync + 'static {
    /// Opaque group handle.
    type Group: CommGroup;
    /// Handle for possibly-asynchronous operations.
    type Work: Wait;

    /// Global rank of this process.
    fn rank(&self) -> usize;

    /// Number of processes in the world.
    fn world_size(&self) -> usize;

    /// Capability tag of this transport.
    fn backend(&self) -> BackendKind;

    /// Whether the world-spanning default group exists yet.
    fn is_initialized(&self) -> bool;

    /// One-time world setup; must run on every process with the same
    /// backend tag before any group can be created.
    fn initialize(&self, backend: BackendKind) -> Result<(), RankMeshError>;

    /// The pre-existing world-spanning group.
    fn world_group(&self) -> Result<Self::Group, RankMeshError>;

    /// Cluster-wide rendezvous creating a group over `ranks`.
    ///
    /// Every process must issue this call, members and non-members
    /// alike; it blocks until the whole world agrees on the membership.
    /// Creating a group with exactly the world's membership is not
    /// allowed; use [`GroupComm::world_group`] instead.
    fn create_group(&self, ranks: &[usize]) -> Result<Self::Group, RankMeshError>;

    /// Broadcast `data` from the member at `src_pos` to every member.
    fn broadcast<T: ReduceElement>(
        &self,
        group: &Self::Group,
        data: &mut [T],
        src_pos: usize,
    ) -> Result<Self::Work, RankMeshError>;

    /// Scatter one chunk per member from `src_pos`; only the source
    /// supplies `input` (one chunk per member, each `output.len()` long).
    fn scatter<T: ReduceElement>(
        &self,
        group: &Self::Group,
        output: &mut [T],
        input: Option<&[Vec<T>]>,
        src_pos: usize,
    ) -> Result<Self::Work, RankMeshError>;

    /// Gather every member's `data`; returns contributions in group order.
    fn all_gather<T: ReduceElement>(
        &self,
        group: &Self::Group,
        data: &[T],
    ) -> Result<Vec<Vec<T>>, RankMeshError>;

    /// Reduce `data` element-wise across members with `op`, in place.
    fn all_reduce<T: ReduceElement>(
        &self,
        group: &Self::Group,
        data: &mut [T],
        op: ReduceOp,
    ) -> Result<(), RankMeshError>;

    /// Reduce `input` across members and return this member's 1/N chunk.
    fn reduce_scatter<T: ReduceElement>(
        &self,
        group: &Self::Group,
        input: &[T],
        op: ReduceOp,
    ) -> Result<Vec<T>, RankMeshError>;

    /// Exchange `input[j]` to member `j`; returns one chunk per source,
    /// in group order.
    fn all_to_all<T: ReduceElement>(
        &self,
        group: &Self::Group,
        input: &[Vec<T>],
    ) -> Result<Vec<Vec<T>>, RankMeshError>;
}
