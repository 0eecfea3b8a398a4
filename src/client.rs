//! Participant client: the handle the hosted computation drives.
//!
//! One [`Validator`] per process. Instance 0 additionally hosts the
//! coordinator task in the same process. The client is strictly
//! request/response: `validate` submits a fingerprint and blocks until the
//! round resolves or the deadline passes, so a participant never runs ahead
//! of the barrier.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointFlag;
use crate::config::Config;
use crate::coordinator::CoordinatorHandle;
use crate::error::Error;
use crate::transport::{self, Listener, ValidationStream};
use crate::wire::{FrameCodec, Message, MessageType};

/// Total deadline for a validation round to resolve.
pub const RESULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Disposition of one `validate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All instances agreed at this sync point.
    Match,
    /// At least one pair of fingerprints disagreed.
    Mismatch {
        /// This instance's submitted fingerprint.
        local: String,
        /// The peer's fingerprint (two-instance runs) or the coordinator's
        /// mismatch report.
        details: String,
    },
    /// The round did not resolve within [`RESULT_TIMEOUT`]. Deliberately not
    /// a failure: the hosted computation continues.
    TimedOut,
    /// No result was produced: validation disabled, a checkpoint in
    /// progress, or the transport failed mid-round.
    Skipped,
}

/// One participant's connection into the validation topology.
pub struct Validator {
    pub(crate) config: Config,
    pub(crate) sync_counter: u32,
    pub(crate) conn: Option<Framed<ValidationStream, FrameCodec>>,
    pub(crate) coordinator: Option<CoordinatorHandle>,
    pub(crate) checkpoint: CheckpointFlag,
}

impl Validator {
    /// Connect this instance into the validation topology.
    ///
    /// Instance 0 binds the coordinator endpoint and spawns the coordinator
    /// task before dialing its own client stream, so every participant finds
    /// a listener to retry against regardless of launch order.
    pub async fn init(config: Config) -> Result<Self, Error> {
        let mut validator = Self {
            config,
            sync_counter: 0,
            conn: None,
            coordinator: None,
            checkpoint: CheckpointFlag::new(),
        };
        validator.establish().await?;
        Ok(validator)
    }

    pub(crate) async fn establish(&mut self) -> Result<(), Error> {
        if self.config.instance_id == 0 {
            let listener = Listener::bind(&self.config.endpoint).await?;
            info!(
                endpoint = %self.config.endpoint,
                instances = self.config.num_instances,
                "coordinator listening"
            );
            self.coordinator = Some(CoordinatorHandle::spawn(
                listener,
                self.config.num_instances,
                self.config.assert_on_mismatch,
            ));
        }

        let stream = transport::connect(&self.config.endpoint).await?;
        let mut conn = Framed::new(stream, FrameCodec);
        conn.send(Message::register(self.config.instance_id)).await?;
        self.conn = Some(conn);
        info!(
            instance = self.config.instance_id,
            endpoint = %self.config.endpoint,
            "connected to validation coordinator"
        );
        Ok(())
    }

    /// Submit a fingerprint and assert agreement.
    ///
    /// Never returns on a mismatch: the process aborts after logging both
    /// fingerprints (every participant terminates individually, not just the
    /// coordinator). Timeouts and transport failures return without
    /// asserting.
    ///
    /// Precondition: every instance calls `validate` the same number of
    /// times in the same order. The call ordinal, not `label`, identifies
    /// the sync point across instances; `label` is for logging only.
    pub async fn validate(&mut self, label: &str, fingerprint: &str) -> Outcome {
        let outcome = self.submit(label, fingerprint).await;
        if let Outcome::Mismatch { local, details } = &outcome {
            error!(
                instance = self.config.instance_id,
                sync_point = self.sync_counter,
                label,
                "ASSERTION FAILED: cross-instance validation mismatch"
            );
            eprintln!("ASSERTION FAILED: cross-instance validation mismatch");
            eprintln!(
                "  instance {} at sync point {} ({label})",
                self.config.instance_id, self.sync_counter
            );
            eprintln!("  local: {local}");
            eprintln!("  other: {details}");
            if self.config.assert_on_mismatch {
                std::process::abort();
            }
        }
        outcome
    }

    /// Submit a fingerprint and only log a mismatch.
    ///
    /// Same rendezvous path as [`validate`](Self::validate); the difference
    /// is solely the disposition of a failed round.
    pub async fn validate_logged(&mut self, label: &str, fingerprint: &str) -> Outcome {
        let outcome = self.submit(label, fingerprint).await;
        if let Outcome::Mismatch { local, details } = &outcome {
            warn!(
                instance = self.config.instance_id,
                sync_point = self.sync_counter,
                label,
                local = %local,
                details = %details,
                "MISMATCH (logged only)"
            );
        }
        outcome
    }

    async fn submit(&mut self, label: &str, fingerprint: &str) -> Outcome {
        if self.checkpoint.in_progress() {
            debug!(label, "skipping validation during checkpoint");
            return Outcome::Skipped;
        }
        let instance_id = self.config.instance_id;
        let Some(conn) = self.conn.as_mut() else {
            debug!(label, "validation disabled, skipping");
            return Outcome::Skipped;
        };

        self.sync_counter += 1;
        let sync_point = self.sync_counter;
        info!(instance = instance_id, sync_point, label, fingerprint, "submitting sync point");

        if let Err(e) = conn
            .send(Message::sync_point(instance_id, sync_point, fingerprint))
            .await
        {
            warn!(instance = instance_id, sync_point, error = %e, "failed to send sync point");
            return Outcome::Skipped;
        }

        match tokio::time::timeout(RESULT_TIMEOUT, conn.next()).await {
            Err(_) => {
                warn!(instance = instance_id, sync_point, "timeout waiting for validation result");
                Outcome::TimedOut
            }
            Ok(None) => {
                warn!(instance = instance_id, sync_point, "coordinator closed the stream mid-round");
                Outcome::Skipped
            }
            Ok(Some(Err(e))) => {
                warn!(instance = instance_id, sync_point, error = %e, "failed to receive validation result");
                Outcome::Skipped
            }
            Ok(Some(Ok(msg))) => Self::interpret(instance_id, sync_point, fingerprint, msg),
        }
    }

    fn interpret(instance_id: i32, sync_point: u32, local: &str, msg: Message) -> Outcome {
        if msg.msg_type != MessageType::ValidationResult {
            warn!(
                instance = instance_id,
                msg_type = ?msg.msg_type,
                "unexpected frame while awaiting a result, dropping"
            );
            return Outcome::Skipped;
        }
        // Each stream is strictly request/response, so a result can only be
        // for the round just submitted; a disagreement here is a bug.
        if msg.sync_point != sync_point {
            warn!(
                instance = instance_id,
                expected = sync_point,
                got = msg.sync_point,
                "validation result for an unexpected sync point"
            );
        }
        if msg.validation_passed {
            info!(instance = instance_id, sync_point, fingerprint = local, "MATCH at sync point");
            Outcome::Match
        } else {
            info!(instance = instance_id, sync_point, "MISMATCH at sync point");
            Outcome::Mismatch {
                local: local.to_owned(),
                details: msg.mismatch_details,
            }
        }
    }

    /// Tear down the validation topology: best-effort SHUTDOWN, close the
    /// client stream, stop the coordinator, unbind the endpoint. Idempotent.
    pub async fn cleanup(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.send(Message::shutdown(self.config.instance_id)).await;
            let _ = conn.close().await;
        }
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.shutdown().await;
        }
        info!(instance = self.config.instance_id, "validation torn down");
    }

    pub fn instance_id(&self) -> i32 {
        self.config.instance_id
    }

    pub fn num_instances(&self) -> usize {
        self.config.num_instances
    }

    /// Whether this instance hosts the coordinator.
    pub fn is_coordinator(&self) -> bool {
        self.config.instance_id == 0
    }

    /// Whether the topology is up and `validate` will submit.
    pub fn is_active(&self) -> bool {
        self.conn.is_some() && !self.checkpoint.in_progress()
    }

    /// Ordinal of the most recent sync point submitted by this instance.
    /// Zero before the first `validate` and again after a checkpoint resume.
    pub fn last_sync_point(&self) -> u32 {
        self.sync_counter
    }
}
