//! Rate-limited outbound dispatch.
//!
//! Every forward, send and reply waits for a permit from its destination's
//! bucket before the gateway is called; edits and deletes go straight
//! through. Gateway failures are logged and counted but never returned:
//! callers see `None` and carry on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::gateway::{Content, Destination, MessageRef, MessagingGateway, OutboundAction};
use crate::permits::{Admission, PermitRegistry};

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Actions that obtained a permit.
    pub admitted: AtomicU64,
    /// Actions dropped while waiting for a permit.
    pub not_admitted: AtomicU64,
    /// Gateway calls made.
    pub invoked: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
}

impl DispatchMetrics {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            not_admitted: self.not_admitted.load(Ordering::Relaxed),
            invoked: self.invoked.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatch metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub admitted: u64,
    pub not_admitted: u64,
    pub invoked: u64,
    pub succeeded: u64,
    pub failed: u64,
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Sends outbound actions through a gateway under per-destination limits.
pub struct Dispatcher<G> {
    gateway: Arc<G>,
    permits: Arc<PermitRegistry>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<DispatchMetrics>,
}

impl<G> Clone for Dispatcher<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            permits: self.permits.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<G: MessagingGateway> Dispatcher<G> {
    /// Create a dispatcher. Waiting for a permit is abandoned once
    /// `shutdown_rx` turns `true`.
    pub fn new(
        gateway: Arc<G>,
        permits: Arc<PermitRegistry>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            permits,
            shutdown_rx,
            metrics: Arc::new(DispatchMetrics::default()),
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn permits(&self) -> &Arc<PermitRegistry> {
        &self.permits
    }

    pub fn metrics(&self) -> DispatchSnapshot {
        self.metrics.snapshot()
    }

    /// Perform `action`.
    ///
    /// Returns the resulting message on success. For a delete that is the
    /// deleted message. Returns `None` when the action was not admitted or
    /// the gateway failed; both are logged.
    pub async fn dispatch(&self, action: OutboundAction) -> Option<MessageRef> {
        let kind = action.kind();

        if let Some(destination) = action.admission_key() {
            let mut shutdown_rx = self.shutdown_rx.clone();
            let admission = self.permits.acquire(destination, &mut shutdown_rx).await;
            if !admission.is_admitted() {
                self.metrics.not_admitted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    action = %kind,
                    destination = %destination,
                    attempts = admission.attempts(),
                    waited_ms = admission.waited().as_millis() as u64,
                    cancelled = matches!(admission, Admission::Cancelled { .. }),
                    "Outbound action dropped while waiting for a permit"
                );
                return None;
            }
            self.metrics.admitted.fetch_add(1, Ordering::Relaxed);
        }

        self.metrics.invoked.fetch_add(1, Ordering::Relaxed);
        let result = match &action {
            OutboundAction::Forward { to, message } => self.gateway.forward(to, message).await,
            OutboundAction::Send { to, content } => self.gateway.send(to, content).await,
            OutboundAction::Reply { to, content } => self.gateway.reply(to, content).await,
            OutboundAction::Edit { message, content } => self.gateway.edit(message, content).await,
            OutboundAction::Delete { message } => {
                self.gateway.delete(message).await.map(|()| message.clone())
            }
        };

        match result {
            Ok(message) => {
                self.metrics.succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(action = %kind, message = %message, "Outbound action delivered");
                Some(message)
            }
            Err(error) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    action = %kind,
                    target = %action.target(),
                    error = %error,
                    "Outbound action failed"
                );
                None
            }
        }
    }

    pub async fn forward(&self, to: &Destination, message: &MessageRef) -> Option<MessageRef> {
        self.dispatch(OutboundAction::Forward {
            to: to.clone(),
            message: message.clone(),
        })
        .await
    }

    pub async fn send(&self, to: &Destination, content: impl Into<Content>) -> Option<MessageRef> {
        self.dispatch(OutboundAction::Send {
            to: to.clone(),
            content: content.into(),
        })
        .await
    }

    pub async fn reply(&self, to: &MessageRef, content: impl Into<Content>) -> Option<MessageRef> {
        self.dispatch(OutboundAction::Reply {
            to: to.clone(),
            content: content.into(),
        })
        .await
    }

    pub async fn edit(
        &self,
        message: &MessageRef,
        content: impl Into<Content>,
    ) -> Option<MessageRef> {
        self.dispatch(OutboundAction::Edit {
            message: message.clone(),
            content: content.into(),
        })
        .await
    }

    /// Delete `message`. Returns whether the gateway confirmed it.
    pub async fn delete(&self, message: &MessageRef) -> bool {
        self.dispatch(OutboundAction::Delete {
            message: message.clone(),
        })
        .await
        .is_some()
    }
}
