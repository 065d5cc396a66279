use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::errors::{CropError, CropResult};

#[derive(Default)]
struct GuardState {
    label: Option<&'static str>,
    started: Option<Instant>,
    heartbeat: Option<Instant>,
    token: Option<CancellationToken>,
}

/// Process-wide single-owner flag for mutating flows.
///
/// Acquisition is a compare-and-swap; there is no queue. Every acquisition
/// and every forced reset bumps the generation, so a ticket outliving a
/// reset can never release someone else's hold.
#[derive(Default)]
pub struct OperationGuard {
    busy: AtomicBool,
    generation: AtomicU64,
    state: Mutex<GuardState>,
}

impl OperationGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_acquire(self: &Arc<Self>, label: &'static str) -> CropResult<GuardTicket> {
        let mut state = self.state();
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CropError::Busy);
        }
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let now = Instant::now();
        *state = GuardState {
            label: Some(label),
            started: Some(now),
            heartbeat: Some(now),
            token: Some(token.clone()),
        };
        Ok(GuardTicket {
            guard: Arc::clone(self),
            generation,
            token,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn current_label(&self) -> Option<&'static str> {
        self.state().label
    }

    /// Time since the holder last proved it was alive, if held.
    pub fn since_heartbeat(&self) -> Option<Duration> {
        self.state().heartbeat.map(|beat| beat.elapsed())
    }

    pub fn held_for(&self) -> Option<Duration> {
        self.state().started.map(|started| started.elapsed())
    }

    /// Clear the guard regardless of who holds it, cancelling the holder's
    /// outstanding work. Returns whether it was held.
    pub fn force_reset(&self) -> bool {
        let mut state = self.state();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(token) = state.token.take() {
            token.cancel();
        }
        *state = GuardState::default();
        self.busy.swap(false, Ordering::AcqRel)
    }

    fn touch(&self, generation: u64) {
        let mut state = self.state();
        if self.generation.load(Ordering::Acquire) == generation {
            state.heartbeat = Some(Instant::now());
        }
    }

    fn release(&self, generation: u64) {
        let mut state = self.state();
        if self.generation.load(Ordering::Acquire) == generation {
            *state = GuardState::default();
            self.busy.store(false, Ordering::Release);
        }
    }
}

/// Proof of holding the [`OperationGuard`]; releases it on drop.
pub struct GuardTicket {
    guard: Arc<OperationGuard>,
    generation: u64,
    token: CancellationToken,
}

impl GuardTicket {
    /// Cancelled when the guard is force-reset.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Heartbeat; keeps the watchdog away from a long but healthy flow.
    pub fn touch(&self) {
        self.guard.touch(self.generation);
    }

    /// Whether this ticket still owns the guard.
    pub fn is_current(&self) -> bool {
        self.guard.generation.load(Ordering::Acquire) == self.generation
            && !self.token.is_cancelled()
    }
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        self.guard.release(self.generation);
    }
}
