//! Mesh topology: the rank grid and the mesh built over it.

pub mod grid;
pub mod mesh;

pub use grid::RankGrid;
pub use mesh::{RankMesh, WORLD_SIZE_ENV};
