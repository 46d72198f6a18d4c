//! Backend tags, device types, and the collective capability table.
//!
//! The facade never branches on backend names directly; it asks this
//! table once per call and follows the answer (native delegation, a
//! fallback composition, or an unsupported-operation error).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device class a mesh is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Host-memory devices.
    Cpu,
    /// Accelerator devices (GPU-class).
    Accel,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Accel => write!(f, "accel"),
        }
    }
}

/// Capability class of a communication backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Accelerator-optimized transport; native support for all collectives.
    Accel,
    /// General-purpose transport; CPU-capable, lacks reduce-scatter and
    /// all-to-all primitives.
    Generic,
    /// In-process transport used for tests and single-node runs.
    Loopback,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Accel => write!(f, "accel"),
            BackendKind::Generic => write!(f, "generic"),
            BackendKind::Loopback => write!(f, "loopback"),
        }
    }
}

impl BackendKind {
    /// Backend selected during default-group bootstrap for a device type.
    pub fn default_for(device: DeviceType) -> Self {
        match device {
            DeviceType::Cpu => BackendKind::Generic,
            DeviceType::Accel => BackendKind::Accel,
        }
    }

    /// Whether this backend can serve the given device type.
    pub fn accepts(self, device: DeviceType) -> DeviceSupport {
        match (self, device) {
            (BackendKind::Loopback, _) => DeviceSupport::Yes,
            (BackendKind::Generic, DeviceType::Cpu) => DeviceSupport::Yes,
            // General-purpose transports move accelerator data through
            // host memory; allowed, but worth a warning.
            (BackendKind::Generic, DeviceType::Accel) => DeviceSupport::WithWarning,
            (BackendKind::Accel, DeviceType::Accel) => DeviceSupport::Yes,
            (BackendKind::Accel, DeviceType::Cpu) => DeviceSupport::No,
        }
    }
}

/// Answer of [`BackendKind::accepts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSupport {
    Yes,
    /// Allowed, but the pairing is known to be slow or partial.
    WithWarning,
    No,
}

/// The six collective operations the facade exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectiveKind {
    Broadcast,
    Scatter,
    AllGather,
    AllReduce,
    ReduceScatter,
    AllToAll,
}

impl fmt::Display for CollectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectiveKind::Broadcast => "broadcast",
            CollectiveKind::Scatter => "scatter",
            CollectiveKind::AllGather => "all_gather",
            CollectiveKind::AllReduce => "all_reduce",
            CollectiveKind::ReduceScatter => "reduce_scatter",
            CollectiveKind::AllToAll => "all_to_all",
        };
        write!(f, "{name}")
    }
}

/// How a backend realizes one collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveSupport {
    /// The transport has a native primitive.
    Native,
    /// Reduce-scatter realized as all-reduce plus local chunk selection.
    AllReduceThenChunk,
    /// All-to-all realized as one scatter per source position.
    ScatterPerSource,
    /// No native path and no fallback.
    Unsupported,
}

/// Pure capability lookup; no side effects.
pub const fn support(backend: BackendKind, op: CollectiveKind) -> CollectiveSupport {
    match (backend, op) {
        (BackendKind::Generic, CollectiveKind::ReduceScatter) => {
            CollectiveSupport::AllReduceThenChunk
        }
        (BackendKind::Generic, CollectiveKind::AllToAll) => CollectiveSupport::ScatterPerSource,
        _ => CollectiveSupport::Native,
    }
}
