//! `RankMesh`: the immutable logical grid plus its per-dimension groups.
//!
//! Construction is a cluster-wide, order-sensitive affair: every process
//! must build the same mesh from the same grid so the positional
//! `create_group` rendezvous calls line up (see [`crate::comm`]). After
//! construction the mesh is read-only and can be shared freely between
//! local callers.

use crate::comm::backend::{BackendKind, DeviceSupport, DeviceType};
use crate::comm::GroupComm;
use crate::error::RankMeshError;
use crate::topology::grid::RankGrid;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Environment variable consulted when the communication layer has to be
/// bootstrapped during mesh construction.
pub const WORLD_SIZE_ENV: &str = "WORLD_SIZE";

/// An n-dimensional mesh over the world's ranks.
///
/// Each value of the grid is a global rank id of the default group; each
/// mesh dimension owns exactly one communication group per member rank,
/// created once at construction and held for the mesh's lifetime.
pub struct RankMesh<C: GroupComm> {
    comm: Arc<C>,
    device: DeviceType,
    backend: BackendKind,
    grid: RankGrid,
    coordinate: Option<Vec<usize>>,
    dim_groups: Vec<C::Group>,
}

impl<C: GroupComm> RankMesh<C> {
    /// Builds a mesh, deriving one group per dimension via cluster-wide
    /// rendezvous. Every process of the world must make this call with
    /// an element-wise identical grid, members and non-members alike.
    pub fn new(comm: Arc<C>, device: DeviceType, grid: RankGrid) -> Result<Self, RankMeshError> {
        Self::build(comm, device, grid, None)
    }

    /// Builds a mesh adopting caller-supplied dimension groups verbatim,
    /// skipping group derivation entirely.
    ///
    /// The list must hold exactly one group per mesh dimension on ranks
    /// present in the grid, and must be empty on absent ranks.
    pub fn with_dim_groups(
        comm: Arc<C>,
        device: DeviceType,
        grid: RankGrid,
        dim_groups: Vec<C::Group>,
    ) -> Result<Self, RankMeshError> {
        Self::build(comm, device, grid, Some(dim_groups))
    }

    fn build(
        comm: Arc<C>,
        device: DeviceType,
        grid: RankGrid,
        dim_groups: Option<Vec<C::Group>>,
    ) -> Result<Self, RankMeshError> {
        let backend = Self::ensure_default_group(&comm, device, &grid)?;
        match backend.accepts(device) {
            DeviceSupport::Yes => {}
            DeviceSupport::WithWarning => log::warn!(
                "backend {backend} may only have partial support for {device} devices; \
                 prefer the accel backend"
            ),
            DeviceSupport::No => {
                return Err(RankMeshError::IncompatibleBackend { backend, device })
            }
        }

        let world_size = comm.world_size();
        if grid.numel() > world_size {
            return Err(RankMeshError::MeshTooLarge {
                mesh_len: grid.numel(),
                world_size,
            });
        }
        grid.check_unique()?;
        grid.check_bounds(world_size)?;

        let rank = comm.rank();
        let coordinate = grid.coordinate_of(rank);

        let dim_groups = match dim_groups {
            Some(groups) => {
                let expected = if coordinate.is_some() { grid.ndim() } else { 0 };
                if groups.len() != expected {
                    return Err(RankMeshError::DimGroupArity {
                        rank,
                        expected,
                        got: groups.len(),
                    });
                }
                groups
            }
            None => Self::derive_dim_groups(&comm, &grid, rank, world_size)?,
        };

        Ok(Self {
            comm,
            device,
            backend,
            grid,
            coordinate,
            dim_groups,
        })
    }

    /// Bootstraps the communication layer when no default group exists
    /// yet: the expected world size comes from [`WORLD_SIZE_ENV`]
    /// (default 1), the grid must cover exactly that world with the
    /// contiguous rank set `{0..n-1}`, and the backend follows from the
    /// device type. Runs identically and synchronously on every process.
    fn ensure_default_group(
        comm: &C,
        device: DeviceType,
        grid: &RankGrid,
    ) -> Result<BackendKind, RankMeshError> {
        if !comm.is_initialized() {
            let world_size: usize = std::env::var(WORLD_SIZE_ENV)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            if grid.numel() != world_size {
                return Err(RankMeshError::WorldSizeMismatch {
                    world_size,
                    mesh_len: grid.numel(),
                });
            }
            grid.check_unique()?;
            if !grid.is_contiguous_world() {
                return Err(RankMeshError::NonContiguousRanks {
                    grid: grid.ranks().to_vec(),
                });
            }
            comm.initialize(BackendKind::default_for(device))?;
        }
        Ok(comm.backend())
    }

    /// The derivation path of the group factory.
    ///
    /// For every dimension, in increasing order, every line's group is
    /// created by every process; only the line containing the local rank
    /// is recorded. Finding the local rank in a second line of one
    /// dimension means a malformed grid or desynchronized derivation and
    /// fails immediately.
    fn derive_dim_groups(
        comm: &C,
        grid: &RankGrid,
        rank: usize,
        world_size: usize,
    ) -> Result<Vec<C::Group>, RankMeshError> {
        // A 1-D mesh spanning the whole world reuses the default group:
        // transports refuse a new group with the world's exact membership.
        if grid.ndim() == 1 && grid.max_rank() == world_size - 1 {
            return Ok(vec![comm.world_group()?]);
        }

        let mut dim_groups = Vec::with_capacity(grid.ndim());
        for dim in 0..grid.ndim() {
            let mut recorded: Option<C::Group> = None;
            for line in grid.lines_along(dim)? {
                // Issued regardless of membership: group creation is a
                // collective call with no partial participation.
                let group = comm.create_group(&line)?;
                if line.contains(&rank) {
                    if recorded.is_some() {
                        return Err(RankMeshError::MultipleMembership { rank, dim, line });
                    }
                    recorded = Some(group);
                }
            }
            if let Some(group) = recorded {
                dim_groups.push(group);
            }
        }
        Ok(dim_groups)
    }

    /// Transport this mesh communicates through.
    pub fn comm(&self) -> &Arc<C> {
        &self.comm
    }

    /// Device type the mesh was built for.
    pub fn device(&self) -> DeviceType {
        self.device
    }

    /// Capability tag of the underlying transport.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// The rank grid.
    pub fn grid(&self) -> &RankGrid {
        &self.grid
    }

    /// Number of mesh dimensions.
    pub fn ndim(&self) -> usize {
        self.grid.ndim()
    }

    /// Extent of one mesh dimension.
    pub fn size(&self, dim: usize) -> Result<usize, RankMeshError> {
        self.grid.size(dim)
    }

    /// Global rank of this process.
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// This rank's position in the mesh, or `None` if absent.
    pub fn coordinate(&self) -> Option<&[usize]> {
        self.coordinate.as_deref()
    }

    /// Whether this rank appears in the grid.
    pub fn is_member(&self) -> bool {
        self.coordinate.is_some()
    }

    /// All of this rank's dimension groups, in dimension order.
    pub fn dim_groups(&self) -> &[C::Group] {
        &self.dim_groups
    }

    /// This rank's group for one mesh dimension.
    pub fn dim_group(&self, mesh_dim: usize) -> Result<&C::Group, RankMeshError> {
        self.dim_groups
            .get(mesh_dim)
            .ok_or(RankMeshError::InvalidDimension {
                dim: mesh_dim,
                ndim: self.dim_groups.len(),
            })
    }
}

/// Meshes are equal iff their grids are element-wise equal; backend and
/// coordinate are deliberately not part of the contract.
impl<C: GroupComm> PartialEq for RankMesh<C> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.grid == other.grid
    }
}

impl<C: GroupComm> Eq for RankMesh<C> {}

/// Hashes grid contents only, keeping `Hash` consistent with `Eq`.
impl<C: GroupComm> Hash for RankMesh<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.grid.hash(state);
    }
}

impl<C: GroupComm> fmt::Debug for RankMesh<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankMesh")
            .field("device", &self.device)
            .field("backend", &self.backend)
            .field("grid", &self.grid)
            .field("coordinate", &self.coordinate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::local::LocalWorld;
    use crate::comm::CommGroup;

    #[test]
    fn single_rank_full_world_reuses_default_group() {
        let comms = LocalWorld::spawn(1);
        let comm = Arc::new(comms.into_iter().next().unwrap());
        comm.initialize(BackendKind::Loopback).unwrap();
        let mesh = RankMesh::new(
            Arc::clone(&comm),
            DeviceType::Cpu,
            RankGrid::from_ranks(vec![0]).unwrap(),
        )
        .unwrap();
        assert_eq!(mesh.ndim(), 1);
        assert_eq!(mesh.coordinate(), Some(&[0][..]));
        assert_eq!(mesh.dim_group(0).unwrap().ranks(), &[0]);
    }

    #[test]
    fn duplicate_grid_is_rejected_before_any_group_call() {
        let comms = LocalWorld::spawn(4);
        let comm = Arc::new(comms.into_iter().next().unwrap());
        comm.initialize(BackendKind::Loopback).unwrap();
        let err = RankMesh::new(
            comm,
            DeviceType::Cpu,
            RankGrid::from_ranks(vec![0, 1, 1]).unwrap(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RankMeshError::DuplicateRanks {
                grid: vec![0, 1, 1]
            }
        );
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let comms = LocalWorld::spawn(2);
        let comm = Arc::new(comms.into_iter().next().unwrap());
        comm.initialize(BackendKind::Loopback).unwrap();
        let err = RankMesh::new(
            comm,
            DeviceType::Cpu,
            RankGrid::from_ranks(vec![0, 1, 2]).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, RankMeshError::MeshTooLarge { mesh_len: 3, world_size: 2 }));
    }

    #[test]
    fn accel_backend_refuses_cpu_device() {
        let comms = LocalWorld::spawn(1);
        let comm = Arc::new(comms.into_iter().next().unwrap());
        comm.initialize(BackendKind::Accel).unwrap();
        let err = RankMesh::new(
            comm,
            DeviceType::Cpu,
            RankGrid::from_ranks(vec![0]).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, RankMeshError::IncompatibleBackend { .. }));
    }

    #[test]
    fn bypass_group_arity_is_checked() {
        let comms = LocalWorld::spawn(1);
        let comm = Arc::new(comms.into_iter().next().unwrap());
        comm.initialize(BackendKind::Loopback).unwrap();
        let err = RankMesh::with_dim_groups(
            Arc::clone(&comm),
            DeviceType::Cpu,
            RankGrid::from_ranks(vec![0]).unwrap(),
            vec![],
        )
        .unwrap_err();
        assert_eq!(
            err,
            RankMeshError::DimGroupArity {
                rank: 0,
                expected: 1,
                got: 0
            }
        );

        let wg = comm.world_group().unwrap();
        let mesh = RankMesh::with_dim_groups(
            comm,
            DeviceType::Cpu,
            RankGrid::from_ranks(vec![0]).unwrap(),
            vec![wg],
        )
        .unwrap();
        assert_eq!(mesh.dim_groups().len(), 1);
    }

    #[test]
    fn equality_and_hash_follow_the_grid() {
        use std::collections::hash_map::DefaultHasher;

        let comms = LocalWorld::spawn(1);
        let comm = Arc::new(comms.into_iter().next().unwrap());
        comm.initialize(BackendKind::Loopback).unwrap();
        let grid = RankGrid::from_ranks(vec![0]).unwrap();
        let a = RankMesh::new(Arc::clone(&comm), DeviceType::Cpu, grid.clone()).unwrap();
        let b = RankMesh::new(comm, DeviceType::Cpu, grid).unwrap();
        assert_eq!(a, b);

        let hash = |mesh: &RankMesh<_>| {
            let mut h = DefaultHasher::new();
            mesh.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }
}
