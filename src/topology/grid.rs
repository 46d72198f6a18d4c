//! `RankGrid`: n-dimensional, row-major grid of global rank ids.
//!
//! The grid is the immutable description a mesh is built from: its
//! shape gives the mesh dimensions, its entries name which global rank
//! sits at each position. Uniqueness and world-size bounds are checked
//! at mesh construction (where the world is known); this module owns the
//! purely structural concerns: shape/data agreement, coordinate lookup,
//! and the per-dimension line enumeration the group factory relies on.

use crate::error::RankMeshError;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row-major n-dimensional array of global rank ids.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankGrid {
    shape: Vec<usize>,
    data: Vec<usize>,
}

impl RankGrid {
    /// Builds a grid from an explicit shape and row-major data.
    ///
    /// The element count must match the shape's product and every
    /// dimension must be non-empty.
    pub fn from_shape_vec(shape: Vec<usize>, data: Vec<usize>) -> Result<Self, RankMeshError> {
        if shape.is_empty() || shape.contains(&0) {
            return Err(RankMeshError::ShapeMismatch {
                context: format!("rank grid shape {shape:?} has an empty dimension"),
            });
        }
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(RankMeshError::ShapeMismatch {
                context: format!(
                    "rank grid shape {shape:?} expects {numel} entries, got {}",
                    data.len()
                ),
            });
        }
        Ok(Self { shape, data })
    }

    /// 1-D grid over the given ranks.
    pub fn from_ranks(ranks: Vec<usize>) -> Result<Self, RankMeshError> {
        let len = ranks.len();
        Self::from_shape_vec(vec![len], ranks)
    }

    /// 2-D grid from rows of ranks; all rows must have equal length.
    pub fn from_rows(rows: Vec<Vec<usize>>) -> Result<Self, RankMeshError> {
        let height = rows.len();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|row| row.len() != width) {
            return Err(RankMeshError::ShapeMismatch {
                context: "rank grid rows have unequal lengths".into(),
            });
        }
        let data = rows.into_iter().flatten().collect();
        Self::from_shape_vec(vec![height, width], data)
    }

    /// Number of mesh dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Extent of one dimension.
    pub fn size(&self, dim: usize) -> Result<usize, RankMeshError> {
        self.shape
            .get(dim)
            .copied()
            .ok_or(RankMeshError::InvalidDimension {
                dim,
                ndim: self.ndim(),
            })
    }

    /// Total number of grid positions.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major entries.
    pub fn ranks(&self) -> &[usize] {
        &self.data
    }

    /// Whether a global rank appears anywhere in the grid.
    pub fn contains(&self, rank: usize) -> bool {
        self.data.contains(&rank)
    }

    /// Largest rank id in the grid.
    pub fn max_rank(&self) -> usize {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Fails if any rank id appears twice, reporting the offending grid.
    pub fn check_unique(&self) -> Result<(), RankMeshError> {
        let unique = self.data.iter().unique().count();
        if unique != self.data.len() {
            return Err(RankMeshError::DuplicateRanks {
                grid: self.data.clone(),
            });
        }
        Ok(())
    }

    /// Fails if any rank id lies outside `[0, world_size)`.
    pub fn check_bounds(&self, world_size: usize) -> Result<(), RankMeshError> {
        for &rank in &self.data {
            if rank >= world_size {
                return Err(RankMeshError::RankOutOfRange { rank, world_size });
            }
        }
        Ok(())
    }

    /// Whether the grid holds exactly the contiguous set `{0..n-1}`.
    ///
    /// Assumes entries are already known unique; contiguity follows from
    /// the closed-form sum `0+1+…+(n-1)` plus a zero minimum, avoiding
    /// an explicit set enumeration.
    pub fn is_contiguous_world(&self) -> bool {
        let n = self.data.len();
        if n == 0 {
            return false;
        }
        let min = self.data.iter().copied().min().unwrap_or(0);
        let sum: usize = self.data.iter().sum();
        min == 0 && 2 * sum == n * (n - 1)
    }

    /// Coordinate of `rank` in the grid, or `None` if absent.
    ///
    /// Grid uniqueness guarantees at most one match.
    pub fn coordinate_of(&self, rank: usize) -> Option<Vec<usize>> {
        let flat = self.data.iter().position(|&r| r == rank)?;
        let mut coord = vec![0; self.ndim()];
        let mut rest = flat;
        for (dim, &extent) in self.shape.iter().enumerate().rev() {
            coord[dim] = rest % extent;
            rest /= extent;
        }
        Some(coord)
    }

    /// Lines of ranks along `dim`, as if `dim` were swapped with the
    /// trailing axis and the rest flattened row-major into a leading
    /// axis: rows of that view are the lines.
    ///
    /// The order of lines (and of ranks within a line) is a pure
    /// function of the grid layout, so every process enumerating the
    /// same grid sees the same sequence — group creation depends on
    /// that.
    pub fn lines_along(&self, dim: usize) -> Result<Vec<Vec<usize>>, RankMeshError> {
        let extent = self.size(dim)?;
        // Strides of the row-major layout.
        let mut strides = vec![1usize; self.ndim()];
        for d in (0..self.ndim() - 1).rev() {
            strides[d] = strides[d + 1] * self.shape[d + 1];
        }
        // Axis order of the swapped view, minus the line axis itself.
        // For a trailing `dim` this is just the natural leading axes.
        let mut outer: Vec<usize> = (0..self.ndim()).collect();
        let last = self.ndim() - 1;
        outer.swap(dim, last);
        outer.pop();
        let line_count = self.numel() / extent;
        let mut lines = Vec::with_capacity(line_count);
        // Odometer over the outer axes; each base index anchors one
        // line that varies along `dim`.
        let mut coord = vec![0usize; self.ndim()];
        for _ in 0..line_count {
            let base: usize = coord
                .iter()
                .zip(&strides)
                .map(|(&c, &s)| c * s)
                .sum();
            let line = (0..extent)
                .map(|i| self.data[base + i * strides[dim]])
                .collect();
            lines.push(line);
            // The last outer axis varies fastest.
            for &d in outer.iter().rev() {
                coord[d] += 1;
                if coord[d] < self.shape[d] {
                    break;
                }
                coord[d] = 0;
            }
        }
        Ok(lines)
    }
}

impl fmt::Debug for RankGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankGrid")
            .field("shape", &self.shape)
            .field("ranks", &self.data)
            .finish()
    }
}

impl fmt::Display for RankGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RankGrid{:?}{:?}", self.shape, self.data)
    }
}
