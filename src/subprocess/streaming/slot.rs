//! At-most-one-in-flight policy for sessions that must not overlap

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

struct ActiveSession {
    id: u64,
    token: CancellationToken,
}

/// A single slot for a long-running session.
///
/// The lease returned by [`SessionSlot::try_acquire`] frees the slot when
/// dropped. [`SessionSlot::terminate`] cancels and clears the active session
/// under one lock, so it can race the lease's own release safely.
#[derive(Clone, Default)]
pub struct SessionSlot {
    active: Arc<Mutex<Option<ActiveSession>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a session driven by `token`, unless one is already running.
    pub fn try_acquire(&self, token: &CancellationToken) -> Option<SlotLease> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *active = Some(ActiveSession {
            id,
            token: token.clone(),
        });
        Some(SlotLease {
            slot: self.clone(),
            id,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Cancel the running session, if any, and free the slot.
    ///
    /// Returns whether a session was terminated; a second call is a no-op.
    pub fn terminate(&self) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.take() {
            Some(session) => {
                tracing::info!("Terminating active session {}", session.id);
                session.token.cancel();
                true
            }
            None => false,
        }
    }

    fn release(&self, id: u64) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        // A terminated lease must not free a newer session's claim
        if active.as_ref().is_some_and(|session| session.id == id) {
            *active = None;
        }
    }
}

/// Proof of ownership of a [`SessionSlot`]; releases it on drop.
pub struct SlotLease {
    slot: SessionSlot,
    id: u64,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.slot.release(self.id);
    }
}
