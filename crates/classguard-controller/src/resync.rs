//! Hand-off of dependents that should be re-synced against their class
//!
//! When a live class is reconciled, every dependent referencing it is
//! handed to the consumer of this channel (the machine controller) so that
//! class changes propagate to the machines built from it.

#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::dependent::DependentKey;

/// Sink for dependent re-sync requests
#[cfg_attr(test, automock)]
pub trait DependentResync: Send + Sync {
    /// Request a re-sync of `dependent`. Never blocks and never fails.
    fn resync(&self, dependent: &DependentKey);
}

/// Re-sync sink backed by an unbounded channel
#[derive(Clone)]
pub struct ChannelResync {
    tx: mpsc::UnboundedSender<DependentKey>,
}

impl ChannelResync {
    /// Create a sink and the receiver its requests arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DependentKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DependentResync for ChannelResync {
    fn resync(&self, dependent: &DependentKey) {
        if self.tx.send(dependent.clone()).is_err() {
            debug!(dependent = %dependent, "Re-sync consumer gone; dropping request");
        }
    }
}

/// Re-sync sink that drops every request
pub struct NoopResync;

impl DependentResync for NoopResync {
    fn resync(&self, _dependent: &DependentKey) {}
}
