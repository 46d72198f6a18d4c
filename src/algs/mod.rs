//! Algorithms layered over the mesh topology.

pub mod collectives;
