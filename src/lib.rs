//! Lockstep — cross-instance synchronized validation.
//!
//! A small rendezvous service that verifies replicated copies of a
//! deterministic computation reach identical intermediate states. At each
//! sync point every participant submits a compact textual fingerprint of its
//! local state; the coordinator (hosted inside instance 0) waits until all
//! participants arrive, compares the fingerprints with a numeric tolerance,
//! and broadcasts the verdict. A mismatch is a correctness failure of the
//! hosted computation and takes the whole fleet down loudly; it is how
//! non-determinism, miscompilation, data races, and checkpoint/restart
//! corruption get caught at runtime instead of in the published results.
//!
//! ```no_run
//! # async fn run() -> Result<(), lockstep::Error> {
//! let config = lockstep::Config::from_env()?;
//! let mut validator = lockstep::Validator::init(config).await?;
//!
//! // Once per sync point, in the same order on every instance:
//! let fp = lockstep::fingerprint!("energy={:.12} step={}", -123.456, 1);
//! validator.validate("forces", &fp).await;
//!
//! validator.cleanup().await;
//! # Ok(())
//! # }
//! ```
//!
//! The hosted computation, its threading, and the external checkpoint tool
//! are collaborators, not part of this crate: callers compute fingerprints,
//! drive [`Validator::validate`] synchronously, and wire the
//! [`checkpoint`] hooks into their checkpoint facility.

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod transport;
pub mod wire;

pub use checkpoint::CheckpointFlag;
pub use client::{Outcome, Validator, RESULT_TIMEOUT};
pub use config::{Config, MAX_INSTANCES};
pub use error::Error;
pub use transport::Endpoint;
