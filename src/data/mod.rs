//! Payload buffers exchanged by the collective facade.

pub mod shard;

pub use shard::Shard;
