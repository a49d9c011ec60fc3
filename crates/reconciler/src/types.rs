//! Reconcile contract shared by the LRP and Task reconcilers.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::{CallContext, ObjectKey, Result};

/// Outcome of one successful reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Re-run the reconcile for the same key after this delay.
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Nothing further to do until the record changes.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    #[must_use]
    pub const fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }
}

/// Converges the runtime state for one declared record key.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Record kind, for logs and spans.
    fn kind(&self) -> &'static str;

    /// Reconcile the record at `key`.
    ///
    /// An absent record is success: cleanup follows owner references.
    async fn reconcile(&self, ctx: &CallContext, key: &ObjectKey) -> Result<ReconcileResult>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = guard.checked_add_signed(by).unwrap_or(*guard);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map_or_else(|poisoned| *poisoned.into_inner(), |guard| *guard)
    }
}
