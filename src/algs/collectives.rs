//! Collective facade: mesh-dimension-addressed communication.
//!
//! Every operation takes a `mesh_dim`, resolves it to this rank's
//! dimension group, consults the backend capability table once, and
//! either delegates to the transport's native primitive or runs the
//! documented fallback composition. The source of truth for scatter and
//! broadcast is always the first rank of the addressed line.
//!
//! Placeholder shards (shape-only, no storage) short-circuit scatter and
//! broadcast to `Ok(None)`: communicating placeholder data is
//! meaningless and must be skipped without error.

use crate::comm::backend::{support, CollectiveKind, CollectiveSupport};
use crate::comm::{CommGroup, GroupComm, ReduceElement, ReduceOp};
use crate::data::Shard;
use crate::error::RankMeshError;
use crate::topology::RankMesh;

impl<C: GroupComm> RankMesh<C> {
    /// This rank's position in its `mesh_dim` line.
    fn line_position(&self, group: &C::Group) -> Result<usize, RankMeshError> {
        group
            .position_of(self.rank())
            .ok_or_else(|| RankMeshError::NotAMember {
                rank: self.rank(),
                ranks: group.ranks().to_vec(),
            })
    }

    /// Scatters one shard per line member from the line's first rank.
    ///
    /// Only the source provides `input` (one shard per member, each
    /// shaped like `output`); every other rank passes `None`, and any
    /// `input` it does pass is ignored. Returns `None` for placeholder
    /// outputs.
    pub fn scatter<T: ReduceElement>(
        &self,
        output: &mut Shard<T>,
        input: Option<&[Shard<T>]>,
        mesh_dim: usize,
    ) -> Result<Option<C::Work>, RankMeshError> {
        if output.is_placeholder() {
            return Ok(None);
        }
        let group = self.dim_group(mesh_dim)?;
        let pos = self.line_position(group)?;
        let chunks: Option<Vec<Vec<T>>> = if pos == 0 {
            let shards = input.ok_or(RankMeshError::MissingScatterInput {
                rank: self.rank(),
                dim: mesh_dim,
            })?;
            let mut chunks = Vec::with_capacity(shards.len());
            for shard in shards {
                chunks.push(shard.require_data(CollectiveKind::Scatter)?.to_vec());
            }
            Some(chunks)
        } else {
            None
        };
        let out = output
            .as_mut_slice()
            .ok_or(RankMeshError::PlaceholderShard {
                op: CollectiveKind::Scatter,
            })?;
        let work = self.comm().scatter(group, out, chunks.as_deref(), 0)?;
        Ok(Some(work))
    }

    /// Broadcasts from the line's first rank into `tensor`.
    ///
    /// Returns `None` for placeholder tensors.
    pub fn broadcast<T: ReduceElement>(
        &self,
        tensor: &mut Shard<T>,
        mesh_dim: usize,
    ) -> Result<Option<C::Work>, RankMeshError> {
        if tensor.is_placeholder() {
            return Ok(None);
        }
        let group = self.dim_group(mesh_dim)?;
        self.line_position(group)?;
        let data = tensor
            .as_mut_slice()
            .ok_or(RankMeshError::PlaceholderShard {
                op: CollectiveKind::Broadcast,
            })?;
        let work = self.comm().broadcast(group, data, 0)?;
        Ok(Some(work))
    }

    /// Gathers every line member's `tensor` and concatenates the
    /// contributions, in line order, along `gather_dim`.
    ///
    /// Contributions must share `tensor`'s shape; callers with uneven
    /// extents pre-pad (at most one element, see [`Shard::pad_one`]) and
    /// unpad afterwards.
    pub fn all_gather<T: ReduceElement>(
        &self,
        tensor: &Shard<T>,
        mesh_dim: usize,
        gather_dim: usize,
    ) -> Result<Shard<T>, RankMeshError> {
        let group = self.dim_group(mesh_dim)?;
        self.line_position(group)?;
        let data = tensor.require_data(CollectiveKind::AllGather)?;
        let parts = self.comm().all_gather(group, data)?;
        let mut shards = Vec::with_capacity(parts.len());
        for part in parts {
            if part.len() != tensor.numel() {
                return Err(RankMeshError::ShapeMismatch {
                    context: format!(
                        "all-gather contribution of {} elements, expected {}",
                        part.len(),
                        tensor.numel()
                    ),
                });
            }
            shards.push(Shard::from_vec(part, tensor.shape().to_vec())?);
        }
        Shard::concat(&shards, gather_dim)
    }

    /// Reduces `tensor` element-wise across the line, in place.
    pub fn all_reduce<T: ReduceElement>(
        &self,
        tensor: &mut Shard<T>,
        op: ReduceOp,
        mesh_dim: usize,
    ) -> Result<(), RankMeshError> {
        let group = self.dim_group(mesh_dim)?;
        self.line_position(group)?;
        let data = tensor
            .as_mut_slice()
            .ok_or(RankMeshError::PlaceholderShard {
                op: CollectiveKind::AllReduce,
            })?;
        self.comm().all_reduce(group, data, op)
    }

    /// Reduces `input` across the line and returns this rank's `1/N`
    /// contiguous chunk along `scatter_dim`, `N` being the line length.
    ///
    /// Backends without a native primitive fall back to a full
    /// all-reduce followed by local chunk selection; the fallback is
    /// strictly more expensive and emits a warning on every call.
    pub fn reduce_scatter<T: ReduceElement>(
        &self,
        input: &Shard<T>,
        op: ReduceOp,
        mesh_dim: usize,
        scatter_dim: usize,
    ) -> Result<Shard<T>, RankMeshError> {
        let group = self.dim_group(mesh_dim)?;
        let pos = self.line_position(group)?;
        let line_len = group.len();
        let data = input.require_data(CollectiveKind::ReduceScatter)?;

        match support(self.backend(), CollectiveKind::ReduceScatter) {
            CollectiveSupport::Native => {
                // The transport hands back a contiguous flat chunk, so
                // feed it the scatter-dim chunks in line order.
                let chunks = input.chunk(scatter_dim, line_len)?;
                let mut flat = Vec::with_capacity(data.len());
                for chunk in &chunks {
                    flat.extend_from_slice(
                        chunk.require_data(CollectiveKind::ReduceScatter)?,
                    );
                }
                let reduced = self.comm().reduce_scatter(group, &flat, op)?;
                Shard::from_vec(reduced, chunks[pos].shape().to_vec())
            }
            CollectiveSupport::AllReduceThenChunk => {
                log::warn!(
                    "backend {} does not support reduce_scatter, falling back to all-reduce",
                    self.backend()
                );
                let mut reduced = data.to_vec();
                self.comm().all_reduce(group, &mut reduced, op)?;
                Shard::from_vec(reduced, input.shape().to_vec())?
                    .select_chunk(scatter_dim, line_len, pos)
            }
            CollectiveSupport::ScatterPerSource | CollectiveSupport::Unsupported => {
                Err(RankMeshError::UnsupportedCollective {
                    backend: self.backend(),
                    op: CollectiveKind::ReduceScatter,
                })
            }
        }
    }

    /// Exchanges `input[j]` to the line member at position `j`; the
    /// contribution of source `i` lands in `output[i]` on every member.
    ///
    /// Backends without a native primitive run one scatter per source
    /// position, in order; the returned work handle, if any, is the last
    /// scatter's.
    pub fn all_to_all<T: ReduceElement>(
        &self,
        output: &mut [Shard<T>],
        input: &[Shard<T>],
        mesh_dim: usize,
    ) -> Result<Option<C::Work>, RankMeshError> {
        let group = self.dim_group(mesh_dim)?;
        let pos = self.line_position(group)?;
        let line_len = group.len();
        if input.len() != line_len || output.len() != line_len {
            return Err(RankMeshError::ShapeMismatch {
                context: format!(
                    "all-to-all needs {line_len} input and output shards, got {} and {}",
                    input.len(),
                    output.len()
                ),
            });
        }

        match support(self.backend(), CollectiveKind::AllToAll) {
            CollectiveSupport::Native => {
                let mut chunks = Vec::with_capacity(line_len);
                for shard in input {
                    chunks.push(shard.require_data(CollectiveKind::AllToAll)?.to_vec());
                }
                let results = self.comm().all_to_all(group, &chunks)?;
                for (out, result) in output.iter_mut().zip(results) {
                    let slot = out.as_mut_slice().ok_or(RankMeshError::PlaceholderShard {
                        op: CollectiveKind::AllToAll,
                    })?;
                    if result.len() != slot.len() {
                        return Err(RankMeshError::ShapeMismatch {
                            context: format!(
                                "all-to-all chunk of {} elements, output expects {}",
                                result.len(),
                                slot.len()
                            ),
                        });
                    }
                    slot.copy_from_slice(&result);
                }
                Ok(None)
            }
            CollectiveSupport::ScatterPerSource => {
                let mut work = None;
                for src_pos in 0..line_len {
                    let chunks: Option<Vec<Vec<T>>> = if pos == src_pos {
                        let mut chunks = Vec::with_capacity(line_len);
                        for shard in input {
                            chunks.push(shard.require_data(CollectiveKind::AllToAll)?.to_vec());
                        }
                        Some(chunks)
                    } else {
                        None
                    };
                    let slot = output[src_pos].as_mut_slice().ok_or(
                        RankMeshError::PlaceholderShard {
                            op: CollectiveKind::AllToAll,
                        },
                    )?;
                    work = Some(self.comm().scatter(group, slot, chunks.as_deref(), src_pos)?);
                }
                Ok(work)
            }
            CollectiveSupport::Unsupported | CollectiveSupport::AllReduceThenChunk => {
                Err(RankMeshError::UnsupportedCollective {
                    backend: self.backend(),
                    op: CollectiveKind::AllToAll,
                })
            }
        }
    }
}
