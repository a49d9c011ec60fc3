//! Per-call deadline, cancellation and logging context.
//!
//! Every store read or write takes a [`CallContext`]. The context carries
//! the caller's deadline, a stop signal shared with the controller loop,
//! and the tracing span that operation logs attach to. Nothing here is
//! process-global.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, Span};

use crate::error::Error;
use crate::result::Result;

/// Deadline, cancellation signal and span for one unit of work.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: watch::Receiver<bool>,
    span: Span,
}

/// Sending half of a [`CallContext`] cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every context derived from this handle.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// A fresh context observing this handle.
    #[must_use]
    pub fn context(&self) -> CallContext {
        CallContext {
            deadline: None,
            cancel: self.tx.subscribe(),
            span: Span::current(),
        }
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            deadline: None,
            cancel: rx,
            span: Span::current(),
        }
    }

    /// A context plus the handle that cancels it.
    #[must_use]
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            deadline: None,
            cancel: rx,
            span: Span::current(),
        };
        (ctx, CancelHandle { tx })
    }

    /// Build a context from an existing stop signal.
    #[must_use]
    pub fn from_signal(cancel: watch::Receiver<bool>) -> Self {
        Self {
            deadline: None,
            cancel,
            span: Span::current(),
        }
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(current), Some(new)) => Some(current.min(new)),
            (current, None) => current,
            (None, new) => new,
        };
        Self {
            deadline,
            cancel: self.cancel.clone(),
            span: self.span.clone(),
        }
    }

    /// Derive a context that logs into `span`.
    #[must_use]
    pub fn with_span(&self, span: Span) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.clone(),
            span,
        }
    }

    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Fail fast when the context is already done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Run `operation` inside this context's span, aborting it when the
    /// context is cancelled or its deadline passes.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, or [`Error::Cancelled`] /
    /// [`Error::DeadlineExceeded`] when the context ends first.
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            loop {
                if *cancel.borrow_and_update() {
                    return;
                }
                if cancel.changed().await.is_err() {
                    // sender dropped: nobody can cancel any more
                    std::future::pending::<()>().await;
                }
            }
        };

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = operation.instrument(self.span.clone()) => result,
            () = cancelled => Err(Error::Cancelled),
            () = expired => Err(Error::DeadlineExceeded),
        }
    }

    /// Sleep for `delay` unless the context ends first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
