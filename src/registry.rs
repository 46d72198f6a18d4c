//! Scoped registry of the mesh currently in effect.
//!
//! A thread-local stack replaces the bare mutable global the pattern is
//! usually built on: entries nest properly (the innermost scope wins),
//! and the RAII guard releases its entry on every exit path, so the slot
//! can never leak a mesh the caller no longer controls. Entries are
//! type-erased so meshes over different transports can coexist.

use crate::comm::GroupComm;
use crate::error::RankMeshError;
use crate::topology::RankMesh;
use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct ActiveEntry {
    mesh: Arc<dyn Any + Send + Sync>,
    token: u64,
}

thread_local! {
    static ACTIVE: RefCell<Vec<ActiveEntry>> = const { RefCell::new(Vec::new()) };
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// RAII guard for one active-mesh scope; dropping it releases the entry.
#[must_use = "the mesh stays active only while the guard lives"]
pub struct ActiveMeshGuard {
    token: u64,
    // Guards belong to the thread whose stack they manipulate.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ActiveMeshGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.last().map(|e| e.token),
                Some(self.token),
                "active-mesh guards must be dropped in reverse entry order"
            );
            if let Some(idx) = stack.iter().rposition(|e| e.token == self.token) {
                stack.remove(idx);
            }
        });
    }
}

/// Makes `mesh` the active mesh of this thread until the guard drops.
///
/// Nested entries shadow outer ones.
pub fn enter<C: GroupComm>(mesh: Arc<RankMesh<C>>) -> ActiveMeshGuard {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    ACTIVE.with(|stack| {
        stack.borrow_mut().push(ActiveEntry { mesh, token });
    });
    ActiveMeshGuard {
        token,
        _not_send: PhantomData,
    }
}

/// The innermost active mesh of this thread.
pub fn current<C: GroupComm>() -> Result<Arc<RankMesh<C>>, RankMeshError> {
    ACTIVE.with(|stack| {
        let stack = stack.borrow();
        let entry = stack.last().ok_or(RankMeshError::NoActiveMesh)?;
        Arc::clone(&entry.mesh)
            .downcast::<RankMesh<C>>()
            .map_err(|_| RankMeshError::ActiveMeshTypeMismatch)
    })
}
