//! End-to-end rendezvous scenarios with real in-process fleets.
//!
//! Each test runs a full topology: instance 0 hosts the coordinator, every
//! instance dials it, and the barrier semantics are observed from the
//! outside through `validate_logged` outcomes. Mismatch aborts are disabled
//! via the config so failing rounds stay observable in-process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::SinkExt;
use tokio::sync::Barrier;
use tokio_util::codec::Framed;

use lockstep::wire::{FrameCodec, Message};
use lockstep::{transport, Config, Endpoint, Outcome, Validator, RESULT_TIMEOUT};

fn unix_endpoint(tag: &str) -> Endpoint {
    let path = std::env::temp_dir().join(format!("lockstep-{tag}-{}.sock", rand::random::<u64>()));
    Endpoint::parse(&format!("unix:{}", path.display()), 0).unwrap()
}

fn harness_config(instance_id: i32, num_instances: usize, endpoint: &Endpoint) -> Config {
    let mut config = Config::new(instance_id, num_instances, endpoint.clone()).unwrap();
    // Keep mismatch rounds observable instead of aborting the test runner.
    config.assert_on_mismatch = false;
    config
}

#[tokio::test]
async fn happy_path_two_instances() {
    let ep = unix_endpoint("happy");

    let ep0 = ep.clone();
    let t0 = async move {
        let mut v = Validator::init(harness_config(0, 2, &ep0)).await.unwrap();
        let outcome = v.validate_logged("A", "energy=100.0 step=1").await;
        v.cleanup().await;
        outcome
    };
    let ep1 = ep.clone();
    let t1 = async move {
        let mut v = Validator::init(harness_config(1, 2, &ep1)).await.unwrap();
        let outcome = v.validate_logged("A", "energy=100.0 step=1").await;
        v.cleanup().await;
        outcome
    };

    let (o0, o1) = tokio::join!(t0, t1);
    assert_eq!(o0, Outcome::Match);
    assert_eq!(o1, Outcome::Match);
}

#[tokio::test]
async fn tolerant_numeric_match() {
    let ep = unix_endpoint("tolerant");

    let ep0 = ep.clone();
    let t0 = async move {
        let mut v = Validator::init(harness_config(0, 2, &ep0)).await.unwrap();
        let outcome = v.validate_logged("poteng", "energy=1.0000000001").await;
        v.cleanup().await;
        outcome
    };
    let ep1 = ep.clone();
    let t1 = async move {
        let mut v = Validator::init(harness_config(1, 2, &ep1)).await.unwrap();
        let outcome = v.validate_logged("poteng", "energy=1.0").await;
        v.cleanup().await;
        outcome
    };

    let (o0, o1) = tokio::join!(t0, t1);
    assert_eq!(o0, Outcome::Match);
    assert_eq!(o1, Outcome::Match);
}

#[tokio::test]
async fn numeric_mismatch_reported_to_both() {
    let ep = unix_endpoint("mismatch");

    let ep0 = ep.clone();
    let t0 = async move {
        let mut v = Validator::init(harness_config(0, 2, &ep0)).await.unwrap();
        let outcome = v.validate_logged("poteng", "energy=1.0").await;
        v.cleanup().await;
        outcome
    };
    let ep1 = ep.clone();
    let t1 = async move {
        let mut v = Validator::init(harness_config(1, 2, &ep1)).await.unwrap();
        let outcome = v.validate_logged("poteng", "energy=1.001").await;
        v.cleanup().await;
        outcome
    };

    let (o0, o1) = tokio::join!(t0, t1);
    // Two-instance runs carry the peer's fingerprint, so each side can show
    // both values without another round-trip.
    assert_eq!(
        o0,
        Outcome::Mismatch {
            local: "energy=1.0".into(),
            details: "energy=1.001".into(),
        }
    );
    assert_eq!(
        o1,
        Outcome::Mismatch {
            local: "energy=1.001".into(),
            details: "energy=1.0".into(),
        }
    );
}

#[tokio::test]
async fn late_participant_blocks_until_broadcast() {
    let ep = unix_endpoint("late");
    let barrier = Arc::new(Barrier::new(2));

    let ep0 = ep.clone();
    let b0 = barrier.clone();
    let t0 = async move {
        let mut v = Validator::init(harness_config(0, 2, &ep0)).await.unwrap();
        b0.wait().await;
        let start = Instant::now();
        let outcome = v.validate_logged("kineti", "ke=42.0").await;
        let waited = start.elapsed();
        v.cleanup().await;
        (outcome, waited)
    };
    let ep1 = ep.clone();
    let b1 = barrier.clone();
    let t1 = async move {
        let mut v = Validator::init(harness_config(1, 2, &ep1)).await.unwrap();
        b1.wait().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        let outcome = v.validate_logged("kineti", "ke=42.0").await;
        v.cleanup().await;
        outcome
    };

    let ((o0, waited), o1) = tokio::join!(t0, t1);
    assert_eq!(o0, Outcome::Match);
    assert_eq!(o1, Outcome::Match);
    // Instance 0 sat inside validate until its peer arrived.
    assert!(waited >= Duration::from_millis(1900), "waited {waited:?}");
}

#[tokio::test]
async fn lost_participant_times_out_without_failing() {
    let ep = unix_endpoint("lost");
    let barrier = Arc::new(Barrier::new(2));

    let ep0 = ep.clone();
    let b0 = barrier.clone();
    let t0 = async move {
        let mut v = Validator::init(harness_config(0, 2, &ep0)).await.unwrap();
        b0.wait().await;
        let start = Instant::now();
        let outcome = v.validate_logged("interf", "forces=9.81").await;
        let waited = start.elapsed();
        v.cleanup().await;
        (outcome, waited)
    };
    let ep1 = ep.clone();
    let b1 = barrier.clone();
    let t1 = async move {
        // Registers, then never submits.
        let mut v = Validator::init(harness_config(1, 2, &ep1)).await.unwrap();
        b1.wait().await;
        tokio::time::sleep(RESULT_TIMEOUT + Duration::from_secs(1)).await;
        v.cleanup().await;
    };

    let ((o0, waited), ()) = tokio::join!(t0, t1);
    assert_eq!(o0, Outcome::TimedOut);
    assert!(waited >= RESULT_TIMEOUT - Duration::from_millis(100), "waited {waited:?}");
}

#[tokio::test]
async fn checkpoint_cycle_resets_sync_points() {
    let ep = unix_endpoint("ckpt");
    let barrier = Arc::new(Barrier::new(2));

    let ep0 = ep.clone();
    let b0 = barrier.clone();
    let t0 = async move {
        let mut v = Validator::init(harness_config(0, 2, &ep0)).await.unwrap();
        assert_eq!(v.validate_logged("A", "energy=1.0").await, Outcome::Match);
        assert_eq!(v.last_sync_point(), 1);
        b0.wait().await;

        v.pre_checkpoint().await;
        assert!(!v.is_active());
        // In-flight validate calls short-circuit while quiesced.
        assert_eq!(v.validate_logged("B", "x=1").await, Outcome::Skipped);
        b0.wait().await;

        v.resume().await.unwrap();
        assert_eq!(v.last_sync_point(), 0);
        assert_eq!(v.validate_logged("C", "energy=2.0").await, Outcome::Match);
        assert_eq!(v.last_sync_point(), 1);
        v.cleanup().await;
    };
    let ep1 = ep.clone();
    let b1 = barrier.clone();
    let t1 = async move {
        let mut v = Validator::init(harness_config(1, 2, &ep1)).await.unwrap();
        assert_eq!(v.validate_logged("A", "energy=1.0").await, Outcome::Match);
        b1.wait().await;

        v.pre_checkpoint().await;
        b1.wait().await;

        v.resume().await.unwrap();
        assert_eq!(v.validate_logged("C", "energy=2.0").await, Outcome::Match);
        assert_eq!(v.last_sync_point(), 1);
        v.cleanup().await;
    };

    tokio::join!(t0, t1);
}

#[tokio::test]
async fn single_instance_matches_trivially() {
    let ep = unix_endpoint("solo");
    let mut v = Validator::init(harness_config(0, 1, &ep)).await.unwrap();
    assert!(v.is_coordinator());
    assert_eq!(v.validate_logged("A", "state=init").await, Outcome::Match);
    assert_eq!(v.validate_logged("B", "state=done").await, Outcome::Match);
    v.cleanup().await;
}

#[tokio::test]
async fn four_instances_register_and_match() {
    let ep = unix_endpoint("fleet");

    let mut fleet = Vec::new();
    for instance_id in 0..4 {
        let ep = ep.clone();
        fleet.push(async move {
            let mut v = Validator::init(harness_config(instance_id, 4, &ep))
                .await
                .unwrap();
            let outcome = v.validate_logged("step", "energy=7.5 step=1").await;
            v.cleanup().await;
            outcome
        });
    }
    let outcomes = futures::future::join_all(fleet).await;
    assert!(outcomes.iter().all(|o| *o == Outcome::Match));
}

#[tokio::test]
async fn out_of_range_registration_is_ignored() {
    let ep = unix_endpoint("extra");
    let barrier = Arc::new(Barrier::new(2));

    let ep0 = ep.clone();
    let b0 = barrier.clone();
    let t0 = async move {
        let mut v = Validator::init(harness_config(0, 2, &ep0)).await.unwrap();

        // An impostor claims an id the fleet does not have; the coordinator
        // must drop it without consuming a registration slot.
        let stream = transport::connect(&ep0).await.unwrap();
        let mut impostor = Framed::new(stream, FrameCodec);
        impostor.send(Message::register(7)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        b0.wait().await;
        let outcome = v.validate_logged("A", "energy=3.0").await;
        v.cleanup().await;
        outcome
    };
    let ep1 = ep.clone();
    let b1 = barrier.clone();
    let t1 = async move {
        let mut v = Validator::init(harness_config(1, 2, &ep1)).await.unwrap();
        b1.wait().await;
        let outcome = v.validate_logged("A", "energy=3.0").await;
        v.cleanup().await;
        outcome
    };

    let (o0, o1) = tokio::join!(t0, t1);
    assert_eq!(o0, Outcome::Match);
    assert_eq!(o1, Outcome::Match);
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let ep = unix_endpoint("cleanup");
    let mut v = Validator::init(harness_config(0, 1, &ep)).await.unwrap();
    assert_eq!(v.validate_logged("A", "x=1").await, Outcome::Match);

    v.cleanup().await;
    assert!(!v.is_active());
    v.cleanup().await;

    // After teardown the validator is inert, not broken.
    assert_eq!(v.validate_logged("B", "x=2").await, Outcome::Skipped);
}
