//! Failsafe supervisor around every mutating flow.
//!
//! Owns the [`OperationGuard`], the stale-heartbeat watchdog, the panic trap
//! and the notification channel that tells clients to re-enable controls or
//! re-fetch changed images.

pub mod guard;

use futures::FutureExt;
use log::{error, info, warn};
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::errors::{CropError, CropResult};
use crate::models::dto::LeaveOutcome;
use crate::models::entity::ResourceId;
use crate::utils::{cache_busted, now_ms};

pub use guard::{GuardTicket, OperationGuard};

const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetReason {
    Stale,
    UncaughtError,
    Navigation,
    MasterTimeout,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "kind",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Notification {
    Reset { reason: ResetReason },
    /// Every interactive control may return to its default state
    ControlsRestored,
    /// Bytes behind `resource_id` changed; re-fetch from `url`
    Refresh { resource_id: ResourceId, url: String },
    LeaveWarning { message: String },
}

pub struct Supervisor {
    guard: Arc<OperationGuard>,
    notifications: broadcast::Sender<Notification>,
    stale_threshold: Duration,
}

impl Supervisor {
    pub fn new(stale_threshold: Duration) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            guard: OperationGuard::new(),
            notifications,
            stale_threshold,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    pub fn try_acquire(&self, label: &'static str) -> CropResult<GuardTicket> {
        let ticket = self.guard.try_acquire(label)?;
        info!("Operation `{}` started", label);
        Ok(ticket)
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }

    /// Clear the guard and cancel whatever holds it. Always succeeds;
    /// clients are told to restore their controls either way.
    pub fn force_reset(&self, reason: ResetReason) -> bool {
        let label = self.guard.current_label();
        let was_busy = self.guard.force_reset();
        if was_busy {
            warn!(
                "Forced reset of `{}` ({:?})",
                label.unwrap_or("unknown operation"),
                reason
            );
            self.notify(Notification::Reset { reason });
        }
        self.notify(Notification::ControlsRestored);
        was_busy
    }

    /// One watchdog check. Returns whether it had to reset.
    pub fn tick(&self) -> bool {
        match self.guard.since_heartbeat() {
            Some(elapsed) if elapsed > self.stale_threshold => {
                error!(
                    "Operation heartbeat is {:?} old (threshold {:?}), resetting",
                    elapsed, self.stale_threshold
                );
                self.force_reset(ResetReason::Stale)
            }
            _ => false,
        }
    }

    /// Run `tick` every `every` until `shutdown` fires.
    pub fn start_watchdog(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        supervisor.tick();
                    }
                }
            }
        })
    }

    /// Run a guarded flow; a panic anywhere inside it resets the guard
    /// instead of leaving it held forever.
    pub async fn trap<T, F>(&self, flow: F) -> CropResult<T>
    where
        F: Future<Output = CropResult<T>>,
    {
        match AssertUnwindSafe(flow).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(self.abort(panic)),
        }
    }

    /// Turn a caught panic into [`CropError::Aborted`] and reset the guard.
    pub fn abort(&self, panic: Box<dyn Any + Send>) -> CropError {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Uncaught error in guarded operation: {}", message);
        self.force_reset(ResetReason::UncaughtError);
        CropError::Aborted(message)
    }

    /// Caller is navigating away. A running flow is cancelled with a warning;
    /// leaving is always allowed.
    pub fn leave(&self) -> LeaveOutcome {
        if !self.guard.is_busy() {
            return LeaveOutcome {
                allowed: true,
                warning: None,
            };
        }
        let message =
            "An operation was in progress and has been cancelled; its current item may be incomplete."
                .to_string();
        self.force_reset(ResetReason::Navigation);
        self.notify(Notification::LeaveWarning {
            message: message.clone(),
        });
        LeaveOutcome {
            allowed: true,
            warning: Some(message),
        }
    }

    /// Tell clients to re-fetch a resource whose bytes changed under the
    /// same id.
    pub fn refresh(&self, resource_id: ResourceId, url: &str) -> String {
        let url = cache_busted(url, now_ms());
        self.notify(Notification::Refresh {
            resource_id,
            url: url.clone(),
        });
        url
    }
}
