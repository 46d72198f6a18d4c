//! `Shard<T>`: minimal n-dimensional buffer for collective payloads.
//!
//! A shard is a shape plus (optionally) row-major storage. A shard
//! without storage is a *placeholder*: it tracks shape only, the way
//! shape-tracing passes do, and collective entry points short-circuit on
//! it instead of communicating meaningless bytes.
//!
//! The helpers here are exactly what the collective facade needs: split
//! into equal chunks along a dimension, concatenate along a dimension,
//! and grow/shrink by one element for the documented one-element padding
//! escape hatch on uneven all-gather extents.

use crate::comm::backend::CollectiveKind;
use crate::error::RankMeshError;
use std::fmt;

/// Row-major n-dimensional payload buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Shard<T> {
    shape: Vec<usize>,
    data: Option<Vec<T>>,
}

impl<T> Shard<T> {
    /// Builds a shard from row-major data and its shape.
    pub fn from_vec(data: Vec<T>, shape: Vec<usize>) -> Result<Self, RankMeshError> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(RankMeshError::ShapeMismatch {
                context: format!(
                    "shard shape {shape:?} expects {numel} elements, got {}",
                    data.len()
                ),
            });
        }
        Ok(Self {
            shape,
            data: Some(data),
        })
    }

    /// Shape-only shard with no storage.
    pub fn placeholder(shape: Vec<usize>) -> Self {
        Self { shape, data: None }
    }

    pub fn is_placeholder(&self) -> bool {
        self.data.is_none()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn as_slice(&self) -> Option<&[T]> {
        self.data.as_deref()
    }

    pub fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        self.data.as_deref_mut()
    }

    /// Consumes the shard, yielding its storage if any.
    pub fn into_vec(self) -> Option<Vec<T>> {
        self.data
    }

    /// Storage of a non-placeholder shard, or a placeholder error naming
    /// the operation that needed it.
    pub(crate) fn require_data(&self, op: CollectiveKind) -> Result<&[T], RankMeshError> {
        self.data
            .as_deref()
            .ok_or(RankMeshError::PlaceholderShard { op })
    }

    fn check_dim(&self, dim: usize) -> Result<usize, RankMeshError> {
        self.shape
            .get(dim)
            .copied()
            .ok_or(RankMeshError::InvalidDimension {
                dim,
                ndim: self.ndim(),
            })
    }

    /// Elements spanned by one step of the leading axes before `dim`
    /// (`outer`) and one index of `dim` (`inner`).
    fn split_factors(&self, dim: usize) -> (usize, usize) {
        let outer: usize = self.shape[..dim].iter().product();
        let inner: usize = self.shape[dim + 1..].iter().product();
        (outer, inner)
    }
}

impl<T: Clone> Shard<T> {
    /// This rank's `1/chunks` contiguous piece along `dim`.
    ///
    /// The extent must divide evenly; callers with uneven extents must
    /// pre-pad (see [`Shard::pad_one`]).
    pub fn select_chunk(
        &self,
        dim: usize,
        chunks: usize,
        index: usize,
    ) -> Result<Self, RankMeshError> {
        let extent = self.check_dim(dim)?;
        if chunks == 0 || extent % chunks != 0 {
            return Err(RankMeshError::UnevenChunk {
                extent,
                dim,
                chunks,
            });
        }
        let data = self.require_data(CollectiveKind::ReduceScatter)?;
        let per = extent / chunks;
        let (outer, inner) = self.split_factors(dim);
        let mut out = Vec::with_capacity(outer * per * inner);
        for o in 0..outer {
            let base = o * extent * inner + index * per * inner;
            out.extend_from_slice(&data[base..base + per * inner]);
        }
        let mut shape = self.shape.clone();
        shape[dim] = per;
        Self::from_vec(out, shape)
    }

    /// All `chunks` pieces along `dim`, in order.
    pub fn chunk(&self, dim: usize, chunks: usize) -> Result<Vec<Self>, RankMeshError> {
        (0..chunks)
            .map(|index| self.select_chunk(dim, chunks, index))
            .collect()
    }

    /// Concatenates shards along `dim`; shapes must agree on every other
    /// dimension.
    pub fn concat(parts: &[Self], dim: usize) -> Result<Self, RankMeshError> {
        let first = parts.first().ok_or(RankMeshError::ShapeMismatch {
            context: "cannot concatenate zero shards".into(),
        })?;
        first.check_dim(dim)?;
        let mut extent = 0;
        for part in parts {
            let same_elsewhere = part.ndim() == first.ndim()
                && part
                    .shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(d, (a, b))| d == dim || a == b);
            if !same_elsewhere {
                return Err(RankMeshError::ShapeMismatch {
                    context: format!(
                        "cannot concatenate {:?} with {:?} along dim {dim}",
                        part.shape, first.shape
                    ),
                });
            }
            extent += part.shape[dim];
        }
        let (outer, inner) = first.split_factors(dim);
        let mut out = Vec::with_capacity(outer * extent * inner);
        for o in 0..outer {
            for part in parts {
                let data = part.require_data(CollectiveKind::AllGather)?;
                let part_extent = part.shape[dim];
                let base = o * part_extent * inner;
                out.extend_from_slice(&data[base..base + part_extent * inner]);
            }
        }
        let mut shape = first.shape.clone();
        shape[dim] = extent;
        Self::from_vec(out, shape)
    }
}

impl<T: Clone + Default> Shard<T> {
    /// Grows the shard by one default element along `dim`.
    pub fn pad_one(&self, dim: usize) -> Result<Self, RankMeshError> {
        let extent = self.check_dim(dim)?;
        let data = self.require_data(CollectiveKind::AllGather)?;
        let (outer, inner) = self.split_factors(dim);
        let mut out = Vec::with_capacity(outer * (extent + 1) * inner);
        for o in 0..outer {
            let base = o * extent * inner;
            out.extend_from_slice(&data[base..base + extent * inner]);
            out.extend((0..inner).map(|_| T::default()));
        }
        let mut shape = self.shape.clone();
        shape[dim] = extent + 1;
        Self::from_vec(out, shape)
    }

    /// Drops the trailing element along `dim` (inverse of [`pad_one`]).
    ///
    /// [`pad_one`]: Shard::pad_one
    pub fn unpad_one(&self, dim: usize) -> Result<Self, RankMeshError> {
        let extent = self.check_dim(dim)?;
        if extent == 0 {
            return Err(RankMeshError::UnevenChunk {
                extent,
                dim,
                chunks: 1,
            });
        }
        let data = self.require_data(CollectiveKind::AllGather)?;
        let (outer, inner) = self.split_factors(dim);
        let mut out = Vec::with_capacity(outer * (extent - 1) * inner);
        for o in 0..outer {
            let base = o * extent * inner;
            out.extend_from_slice(&data[base..base + (extent - 1) * inner]);
        }
        let mut shape = self.shape.clone();
        shape[dim] = extent - 1;
        Self::from_vec(out, shape)
    }
}

impl<T: fmt::Debug> fmt::Debug for Shard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => f
                .debug_struct("Shard")
                .field("shape", &self.shape)
                .field("data", data)
                .finish(),
            None => f
                .debug_struct("Shard")
                .field("shape", &self.shape)
                .field("data", &"<placeholder>")
                .finish(),
        }
    }
}
