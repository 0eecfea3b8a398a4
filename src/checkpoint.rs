//! Checkpoint hooks: quiesce before an external process checkpoint, rebuild
//! the topology after resume.
//!
//! The external checkpoint facility cannot snapshot live sockets, so the
//! pre-checkpoint hook tears the whole topology down: coordinator cancelled,
//! every stream closed, filesystem endpoint unbound. Resume rebuilds it from
//! the retained configuration. Sync-point counters restart from zero on
//! every instance, so the hosted computation must restart its own logical
//! numbering too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tracing::{info, warn};

use crate::client::Validator;
use crate::error::Error;

/// Pause after resume before re-dialing, giving peers time to reach their
/// own resume hook.
pub const RESUME_SETTLE: Duration = Duration::from_millis(500);

/// Process-wide checkpoint-in-progress flag.
///
/// Written by the hooks, read by `validate`. The one piece of state shared
/// across tasks; a single atomic word suffices.
#[derive(Debug, Clone, Default)]
pub struct CheckpointFlag(Arc<AtomicBool>);

impl CheckpointFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

impl Validator {
    /// Quiesce for an external checkpoint.
    ///
    /// Sets the checkpoint flag first, so `validate` calls racing the hook
    /// return immediately instead of blocking on closing sockets. Then stops
    /// the coordinator, closes the client stream, and unbinds the endpoint.
    pub async fn pre_checkpoint(&mut self) {
        self.checkpoint.set(true);
        info!(
            instance = self.config.instance_id,
            "pre-checkpoint: closing validation endpoints"
        );
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.shutdown().await;
        }
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.close().await;
        }
    }

    /// Rebuild the topology after a successful checkpoint (resume in place).
    ///
    /// Zeroes the sync-point counter, waits [`RESUME_SETTLE`] for peers to
    /// reach their own resume, then re-runs the init path with the retained
    /// configuration. The flag clears only once the topology is back, so
    /// in-flight `validate` calls keep short-circuiting until then.
    pub async fn resume(&mut self) -> Result<(), Error> {
        self.sync_counter = 0;
        tokio::time::sleep(RESUME_SETTLE).await;
        info!(
            instance = self.config.instance_id,
            instances = self.config.num_instances,
            "resume: reinitializing validation topology"
        );
        self.establish().await?;
        self.checkpoint.set(false);
        Ok(())
    }

    /// Cold restart from a checkpoint image.
    ///
    /// Rejected: peer endpoints recorded in an image are meaningless in a
    /// fresh process tree, and a half-reconstructed topology would hang the
    /// first rendezvous. Resume-in-place is the supported path.
    pub fn restart(&mut self) -> Result<(), Error> {
        warn!(
            instance = self.config.instance_id,
            "restart from a checkpoint image requested, rejecting"
        );
        Err(Error::RestartUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_shared_across_clones() {
        let flag = CheckpointFlag::new();
        let observer = flag.clone();
        assert!(!observer.in_progress());
        flag.set(true);
        assert!(observer.in_progress());
        flag.set(false);
        assert!(!observer.in_progress());
    }
}
