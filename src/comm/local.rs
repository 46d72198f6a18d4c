//! In-process, thread-per-rank transport (the `Loopback` backend).
//!
//! Every rank of a [`LocalWorld`] lives on its own thread inside one
//! process; payloads are contiguous byte buffers, group creation and
//! every collective go through one rendezvous primitive. Useful for
//! tests and single-node runs; it can also advertise a different
//! [`BackendKind`] at `initialize` time so fallback paths can be
//! exercised without a real cluster.

use crate::comm::backend::BackendKind;
use crate::comm::reduce::{fold_contributions, ReduceElement, ReduceOp};
use crate::comm::{CommGroup, GroupComm};
use crate::error::RankMeshError;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared bookkeeping of one group: identity, membership, and one
/// collective-call counter per member position (calls are matched
/// positionally, so each member counts its own calls).
struct GroupRecord {
    id: u64,
    ranks: Vec<usize>,
    op_calls: Vec<AtomicU64>,
}

impl GroupRecord {
    fn new(id: u64, ranks: Vec<usize>) -> Self {
        let op_calls = ranks.iter().map(|_| AtomicU64::new(0)).collect();
        Self { id, ranks, op_calls }
    }
}

/// Group handle over the local world.
#[derive(Clone)]
pub struct LocalGroup {
    record: Arc<GroupRecord>,
}

impl CommGroup for LocalGroup {
    fn ranks(&self) -> &[usize] {
        &self.record.ranks
    }
}

/// Rendezvous slot for one positional `create_group` call.
struct CreateState {
    ranks: Vec<usize>,
    record: Arc<GroupRecord>,
    arrived: usize,
    departed: usize,
    /// Set when some rank named a different membership for this call.
    mismatch: Option<Vec<usize>>,
}

/// Rendezvous slot for one collective call on one group.
struct ExchangeState {
    parts: Vec<Option<Bytes>>,
    arrived: usize,
    departed: usize,
}

struct Slot<T> {
    state: Mutex<T>,
    cond: Condvar,
}

struct WorldState {
    world_size: usize,
    backend: OnceCell<BackendKind>,
    world_group: OnceCell<Arc<GroupRecord>>,
    next_group_id: AtomicU64,
    /// Per-rank count of `create_group` calls; the index pairs calls
    /// positionally across ranks.
    create_calls: Vec<AtomicU64>,
    create_slots: DashMap<u64, Arc<Slot<CreateState>>>,
    exchange_slots: DashMap<(u64, u64), Arc<Slot<ExchangeState>>>,
}

/// Spawner for in-process worlds.
pub struct LocalWorld;

impl LocalWorld {
    /// Creates one [`LocalComm`] per rank, all sharing one world.
    ///
    /// The world is not initialized yet; either call
    /// [`GroupComm::initialize`] on every rank or let mesh construction
    /// bootstrap it.
    pub fn spawn(world_size: usize) -> Vec<LocalComm> {
        let state = Arc::new(WorldState {
            world_size,
            backend: OnceCell::new(),
            world_group: OnceCell::new(),
            next_group_id: AtomicU64::new(1),
            create_calls: (0..world_size).map(|_| AtomicU64::new(0)).collect(),
            create_slots: DashMap::new(),
            exchange_slots: DashMap::new(),
        });
        (0..world_size)
            .map(|rank| LocalComm {
                rank,
                world: Arc::clone(&state),
            })
            .collect()
    }
}

/// One rank's handle onto a [`LocalWorld`].
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    world: Arc<WorldState>,
}

impl LocalComm {
    fn validate_group_ranks(&self, ranks: &[usize]) -> Result<(), RankMeshError> {
        let world_size = self.world.world_size;
        for &rank in ranks {
            if rank >= world_size {
                return Err(RankMeshError::RankOutOfRange { rank, world_size });
            }
        }
        let mut sorted: Vec<usize> = ranks.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != ranks.len() {
            return Err(RankMeshError::DuplicateRanks {
                grid: ranks.to_vec(),
            });
        }
        Ok(())
    }

    /// Position of this rank in `group`, or an error for non-members.
    fn my_position(&self, group: &LocalGroup) -> Result<usize, RankMeshError> {
        group
            .position_of(self.rank)
            .ok_or_else(|| RankMeshError::NotAMember {
                rank: self.rank,
                ranks: group.ranks().to_vec(),
            })
    }

    /// Deposits `payload` for this collective call and blocks until all
    /// members of `group` arrive; returns every deposit in group order.
    ///
    /// This is the single rendezvous all collectives are built on; the
    /// call sequence number pairs deposits positionally, so every member
    /// must reach the same collectives in the same order.
    fn exchange(&self, group: &LocalGroup, payload: Bytes) -> Result<Vec<Bytes>, RankMeshError> {
        if !self.is_initialized() {
            return Err(RankMeshError::NotInitialized);
        }
        let pos = self.my_position(group)?;
        let size = group.len();
        let seq = group.record.op_calls[pos].fetch_add(1, Ordering::SeqCst);
        let slot = self
            .world
            .exchange_slots
            .entry((group.record.id, seq))
            .or_insert_with(|| {
                Arc::new(Slot {
                    state: Mutex::new(ExchangeState {
                        parts: vec![None; size],
                        arrived: 0,
                        departed: 0,
                    }),
                    cond: Condvar::new(),
                })
            })
            .clone();

        let mut state = slot.state.lock();
        state.parts[pos] = Some(payload);
        state.arrived += 1;
        if state.arrived == size {
            slot.cond.notify_all();
        }
        while state.arrived < size {
            slot.cond.wait(&mut state);
        }
        let parts: Vec<Bytes> = state
            .parts
            .iter()
            .map(|p| p.clone().unwrap_or_default())
            .collect();
        state.departed += 1;
        let done = state.departed == size;
        drop(state);
        if done {
            self.world.exchange_slots.remove(&(group.record.id, seq));
        }
        Ok(parts)
    }
}

fn encode<T: ReduceElement>(data: &[T]) -> Bytes {
    Bytes::copy_from_slice(bytemuck::cast_slice(data))
}

fn decode<T: ReduceElement>(bytes: &Bytes) -> Result<Vec<T>, RankMeshError> {
    if bytes.len() % std::mem::size_of::<T>() != 0 {
        return Err(RankMeshError::ShapeMismatch {
            context: format!(
                "payload of {} bytes is not a whole number of {}-byte elements",
                bytes.len(),
                std::mem::size_of::<T>()
            ),
        });
    }
    // Copies; the shared buffer may not be aligned for T.
    Ok(bytemuck::pod_collect_to_vec::<u8, T>(&bytes[..]))
}

impl GroupComm for LocalComm {
    type Group = LocalGroup;
    type Work = ();

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world.world_size
    }

    fn backend(&self) -> BackendKind {
        self.world
            .backend
            .get()
            .copied()
            .unwrap_or(BackendKind::Loopback)
    }

    fn is_initialized(&self) -> bool {
        self.world.backend.get().is_some()
    }

    fn initialize(&self, backend: BackendKind) -> Result<(), RankMeshError> {
        let recorded = *self.world.backend.get_or_init(|| backend);
        if recorded != backend {
            return Err(RankMeshError::AlreadyInitialized { backend: recorded });
        }
        self.world.world_group.get_or_init(|| {
            Arc::new(GroupRecord::new(0, (0..self.world.world_size).collect()))
        });
        Ok(())
    }

    fn world_group(&self) -> Result<LocalGroup, RankMeshError> {
        let record = self
            .world
            .world_group
            .get()
            .ok_or(RankMeshError::NotInitialized)?;
        Ok(LocalGroup {
            record: Arc::clone(record),
        })
    }

    fn create_group(&self, ranks: &[usize]) -> Result<LocalGroup, RankMeshError> {
        if !self.is_initialized() {
            return Err(RankMeshError::NotInitialized);
        }
        self.validate_group_ranks(ranks)?;
        let world_size = self.world.world_size;
        if ranks.len() == world_size {
            // A second group with the world's exact membership is not
            // allowed; callers must reuse `world_group`.
            return Err(RankMeshError::GroupMismatch {
                call: self.world.create_calls[self.rank].load(Ordering::SeqCst),
                expected: (0..world_size).collect(),
                seen: ranks.to_vec(),
            });
        }

        let call = self.world.create_calls[self.rank].fetch_add(1, Ordering::SeqCst);
        let world = &self.world;
        let slot = world
            .create_slots
            .entry(call)
            .or_insert_with(|| {
                let id = world.next_group_id.fetch_add(1, Ordering::SeqCst);
                Arc::new(Slot {
                    state: Mutex::new(CreateState {
                        ranks: ranks.to_vec(),
                        record: Arc::new(GroupRecord::new(id, ranks.to_vec())),
                        arrived: 0,
                        departed: 0,
                        mismatch: None,
                    }),
                    cond: Condvar::new(),
                })
            })
            .clone();

        let mut state = slot.state.lock();
        if state.ranks != ranks {
            state.mismatch = Some(ranks.to_vec());
            slot.cond.notify_all();
            return Err(RankMeshError::GroupMismatch {
                call,
                expected: state.ranks.clone(),
                seen: ranks.to_vec(),
            });
        }
        state.arrived += 1;
        if state.arrived == world_size {
            slot.cond.notify_all();
        }
        while state.arrived < world_size && state.mismatch.is_none() {
            slot.cond.wait(&mut state);
        }
        if let Some(seen) = &state.mismatch {
            return Err(RankMeshError::GroupMismatch {
                call,
                expected: state.ranks.clone(),
                seen: seen.clone(),
            });
        }
        let group = LocalGroup {
            record: Arc::clone(&state.record),
        };
        // The last rank out drops the slot, as `exchange` does; a
        // mismatched slot stays behind so later arrivals still error.
        state.departed += 1;
        let done = state.departed == world_size;
        drop(state);
        if done {
            world.create_slots.remove(&call);
        }
        Ok(group)
    }

    fn broadcast<T: ReduceElement>(
        &self,
        group: &LocalGroup,
        data: &mut [T],
        src_pos: usize,
    ) -> Result<(), RankMeshError> {
        let pos = self.my_position(group)?;
        let payload = if pos == src_pos {
            encode(data)
        } else {
            Bytes::new()
        };
        let parts = self.exchange(group, payload)?;
        let incoming: Vec<T> = decode(&parts[src_pos])?;
        if incoming.len() != data.len() {
            return Err(RankMeshError::ShapeMismatch {
                context: format!(
                    "broadcast source sent {} elements, receiver expects {}",
                    incoming.len(),
                    data.len()
                ),
            });
        }
        data.copy_from_slice(&incoming);
        Ok(())
    }

    fn scatter<T: ReduceElement>(
        &self,
        group: &LocalGroup,
        output: &mut [T],
        input: Option<&[Vec<T>]>,
        src_pos: usize,
    ) -> Result<(), RankMeshError> {
        let pos = self.my_position(group)?;
        let size = group.len();
        let payload = if pos == src_pos {
            let chunks = input.ok_or(RankMeshError::ShapeMismatch {
                context: "scatter source provided no input chunks".into(),
            })?;
            if chunks.len() != size {
                return Err(RankMeshError::ShapeMismatch {
                    context: format!(
                        "scatter input has {} chunks for a group of {size}",
                        chunks.len()
                    ),
                });
            }
            let mut flat = Vec::with_capacity(size * output.len());
            for chunk in chunks {
                if chunk.len() != output.len() {
                    return Err(RankMeshError::ShapeMismatch {
                        context: format!(
                            "scatter chunk of {} elements, output expects {}",
                            chunk.len(),
                            output.len()
                        ),
                    });
                }
                flat.extend_from_slice(chunk);
            }
            encode(&flat)
        } else {
            Bytes::new()
        };
        let parts = self.exchange(group, payload)?;
        let flat: Vec<T> = decode(&parts[src_pos])?;
        if flat.len() != size * output.len() {
            return Err(RankMeshError::ShapeMismatch {
                context: format!(
                    "scatter source sent {} elements, expected {}",
                    flat.len(),
                    size * output.len()
                ),
            });
        }
        output.copy_from_slice(&flat[pos * output.len()..(pos + 1) * output.len()]);
        Ok(())
    }

    fn all_gather<T: ReduceElement>(
        &self,
        group: &LocalGroup,
        data: &[T],
    ) -> Result<Vec<Vec<T>>, RankMeshError> {
        let parts = self.exchange(group, encode(data))?;
        parts.iter().map(decode).collect()
    }

    fn all_reduce<T: ReduceElement>(
        &self,
        group: &LocalGroup,
        data: &mut [T],
        op: ReduceOp,
    ) -> Result<(), RankMeshError> {
        let parts = self.exchange(group, encode(data))?;
        let contributions: Vec<Vec<T>> = parts.iter().map(decode).collect::<Result<_, _>>()?;
        let reduced = fold_contributions(op, &contributions, self.backend())?;
        if reduced.len() != data.len() {
            return Err(RankMeshError::ShapeMismatch {
                context: format!(
                    "all-reduce produced {} elements, expected {}",
                    reduced.len(),
                    data.len()
                ),
            });
        }
        data.copy_from_slice(&reduced);
        Ok(())
    }

    fn reduce_scatter<T: ReduceElement>(
        &self,
        group: &LocalGroup,
        input: &[T],
        op: ReduceOp,
    ) -> Result<Vec<T>, RankMeshError> {
        let pos = self.my_position(group)?;
        let size = group.len();
        if input.len() % size != 0 {
            return Err(RankMeshError::UnevenChunk {
                extent: input.len(),
                dim: 0,
                chunks: size,
            });
        }
        let parts = self.exchange(group, encode(input))?;
        let contributions: Vec<Vec<T>> = parts.iter().map(decode).collect::<Result<_, _>>()?;
        let reduced = fold_contributions(op, &contributions, self.backend())?;
        let chunk = reduced.len() / size;
        Ok(reduced[pos * chunk..(pos + 1) * chunk].to_vec())
    }

    fn all_to_all<T: ReduceElement>(
        &self,
        group: &LocalGroup,
        input: &[Vec<T>],
    ) -> Result<Vec<Vec<T>>, RankMeshError> {
        let pos = self.my_position(group)?;
        let size = group.len();
        if input.len() != size {
            return Err(RankMeshError::ShapeMismatch {
                context: format!(
                    "all-to-all input has {} chunks for a group of {size}",
                    input.len()
                ),
            });
        }
        // Chunks from one source must share a length so receivers can
        // split the flat payload back apart.
        let chunk_len = input.first().map(Vec::len).unwrap_or(0);
        let mut flat = Vec::with_capacity(size * chunk_len);
        for chunk in input {
            if chunk.len() != chunk_len {
                return Err(RankMeshError::ShapeMismatch {
                    context: format!(
                        "all-to-all chunk of {} elements, expected {chunk_len}",
                        chunk.len()
                    ),
                });
            }
            flat.extend_from_slice(chunk);
        }
        let parts = self.exchange(group, encode(&flat))?;
        let mut out = Vec::with_capacity(size);
        for part in &parts {
            let source: Vec<T> = decode(part)?;
            if source.len() % size != 0 {
                return Err(RankMeshError::UnevenChunk {
                    extent: source.len(),
                    dim: 0,
                    chunks: size,
                });
            }
            let per_dest = source.len() / size;
            out.push(source[pos * per_dest..(pos + 1) * per_dest].to_vec());
        }
        Ok(out)
    }
}
