//! Coordinator: barrier rendezvous and result broadcast.
//!
//! Runs as a spawned task inside instance 0. The task owns the listening
//! endpoint and the registration table; per-connection reader tasks decode
//! frames and feed one event channel, so the rendezvous state is touched by a
//! single loop and needs no locking.
//!
//! Phases:
//! 1. Registration window: accept connections and record REGISTER messages
//!    until all `N` distinct instance ids are present. Further accepts stop.
//! 2. Operating loop: SYNC_POINT feeds the rendezvous; SHUTDOWN is logged
//!    without disconnecting (peers may still need their current round);
//!    anything else is dropped.
//! 3. Teardown on cancellation: close every stream, unbind the endpoint.

use std::collections::HashMap;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fingerprint;
use crate::transport::{Listener, ValidationStream};
use crate::wire::{FrameCodec, Message, MessageType};

type WireSink = SplitSink<Framed<ValidationStream, FrameCodec>, Message>;
type WireSource = SplitStream<Framed<ValidationStream, FrameCodec>>;

/// Handle to the spawned coordinator task. Dropping the handle cancels the
/// task; [`shutdown`](CoordinatorHandle::shutdown) also waits for it to drain.
pub(crate) struct CoordinatorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CoordinatorHandle {
    pub fn spawn(listener: Listener, num_instances: usize, assert_on_mismatch: bool) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            listener,
            num_instances,
            assert_on_mismatch,
            cancel.clone(),
        ));
        Self {
            cancel,
            task: Some(task),
        }
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum ConnEvent {
    Frame(u64, Message),
    Closed(u64),
}

async fn run(
    listener: Listener,
    num_instances: usize,
    assert_on_mismatch: bool,
    cancel: CancellationToken,
) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ConnEvent>();
    let mut state = Coordinator::new(num_instances, assert_on_mismatch);
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    let mut next_conn: u64 = 0;

    info!(instances = num_instances, "coordinator ready, awaiting registrations");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            // Registration window: stop accepting once everyone is in.
            accepted = listener.accept(), if state.registered() < num_instances => {
                match accepted {
                    Ok(stream) => {
                        let conn = next_conn;
                        next_conn += 1;
                        let (sink, source) = Framed::new(stream, FrameCodec).split();
                        state.pending.insert(conn, sink);
                        readers.push(tokio::spawn(read_frames(conn, source, event_tx.clone())));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }

            event = event_rx.recv() => {
                // The loop holds an event_tx clone, so recv only fails on
                // cancellation racing the channel; treat it as shutdown.
                let Some(event) = event else { break };
                match event {
                    ConnEvent::Frame(conn, msg) => state.on_frame(conn, msg).await,
                    ConnEvent::Closed(conn) => state.on_closed(conn),
                }
            }
        }
    }

    for (_, mut sink) in state.registry.drain() {
        let _ = sink.close().await;
    }
    for (_, mut sink) in state.pending.drain() {
        let _ = sink.close().await;
    }
    for reader in readers {
        reader.abort();
    }
    listener.unbind();
    info!("coordinator stopped");
}

/// Forward decoded frames from one participant stream into the event channel.
async fn read_frames(conn: u64, mut source: WireSource, events: mpsc::UnboundedSender<ConnEvent>) {
    while let Some(next) = source.next().await {
        match next {
            Ok(msg) => {
                if events.send(ConnEvent::Frame(conn, msg)).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(conn, error = %e, "dropping connection on decode failure");
                break;
            }
        }
    }
    let _ = events.send(ConnEvent::Closed(conn));
}

struct Coordinator {
    num_instances: usize,
    assert_on_mismatch: bool,
    /// Write halves parked between accept and REGISTER.
    pending: HashMap<u64, WireSink>,
    /// Registration table: instance id to the stream last used by it.
    registry: HashMap<i32, WireSink>,
    conn_instance: HashMap<u64, i32>,
    rendezvous: Rendezvous,
}

impl Coordinator {
    fn new(num_instances: usize, assert_on_mismatch: bool) -> Self {
        Self {
            num_instances,
            assert_on_mismatch,
            pending: HashMap::new(),
            registry: HashMap::new(),
            conn_instance: HashMap::new(),
            rendezvous: Rendezvous::new(num_instances),
        }
    }

    fn registered(&self) -> usize {
        self.registry.len()
    }

    async fn on_frame(&mut self, conn: u64, msg: Message) {
        match msg.msg_type {
            MessageType::Register => self.on_register(conn, msg.instance_id),
            MessageType::SyncPoint => self.on_sync_point(msg).await,
            MessageType::Shutdown => {
                // Peers may still be mid-round; keep the stream open.
                info!(instance = msg.instance_id, "participant shutting down");
            }
            MessageType::ValidationResult => {
                debug!(conn, "dropping unexpected frame from participant");
            }
        }
    }

    fn on_register(&mut self, conn: u64, instance_id: i32) {
        let Some(sink) = self.pending.remove(&conn) else {
            warn!(conn, instance_id, "duplicate REGISTER on one connection, ignoring");
            return;
        };
        if instance_id < 0
            || instance_id as usize >= self.num_instances
            || self.registry.contains_key(&instance_id)
        {
            warn!(instance_id, "rejecting registration: id out of range or taken");
            return;
        }
        self.conn_instance.insert(conn, instance_id);
        self.registry.insert(instance_id, sink);
        info!(
            instance = instance_id,
            registered = self.registry.len(),
            total = self.num_instances,
            "instance registered"
        );
        if self.registry.len() == self.num_instances {
            info!("all instances registered, rendezvous open");
        }
    }

    fn on_closed(&mut self, conn: u64) {
        self.pending.remove(&conn);
        if let Some(instance_id) = self.conn_instance.remove(&conn) {
            self.registry.remove(&instance_id);
            debug!(instance = instance_id, "participant stream closed");
        }
    }

    async fn on_sync_point(&mut self, msg: Message) {
        let Some(round) = self
            .rendezvous
            .submit(msg.sync_point, msg.instance_id, msg.fingerprint)
        else {
            return;
        };

        if round.passed {
            info!(
                sync_point = round.sync_point,
                fingerprint = %round.arrivals[0].1,
                "MATCH: all instances agree"
            );
        } else {
            let details = round.mismatch.as_deref().unwrap_or("");
            error!(sync_point = round.sync_point, details, "MISMATCH at sync point");
        }

        self.broadcast(&round).await;

        // The coordinator fails with its participants so the whole fleet
        // stops atomically.
        if !round.passed && self.assert_on_mismatch {
            let details = round.mismatch.as_deref().unwrap_or("");
            eprintln!("ASSERTION FAILED: cross-instance validation mismatch");
            eprintln!("  {details}");
            std::process::abort();
        }
    }

    async fn broadcast(&mut self, round: &Round) {
        for (&instance_id, sink) in self.registry.iter_mut() {
            let details = result_details(round, self.num_instances, instance_id);
            let msg = Message::result(round.sync_point, round.passed, &details);
            if let Err(e) = sink.send(msg).await {
                warn!(instance = instance_id, error = %e, "failed to deliver validation result");
            }
        }
    }
}

/// Per-receiver payload for a broadcast result.
///
/// Two-instance runs always carry the peer's fingerprint so each client can
/// reproduce the comparison locally without another round-trip; larger runs
/// get the coordinator's mismatch report (empty on a pass).
fn result_details(round: &Round, num_instances: usize, receiver: i32) -> String {
    if num_instances == 2 {
        if let Some((_, fp)) = round.arrivals.iter().find(|(id, _)| *id != receiver) {
            return fp.clone();
        }
    }
    round.mismatch.clone().unwrap_or_default()
}

/// The single live rendezvous slot.
///
/// Assumes all participants progress through the same sequence of sync-point
/// ordinals: a submission bearing a new ordinal supersedes whatever the slot
/// had accumulated, which is also how a round abandoned by a lost participant
/// is eventually reclaimed.
#[derive(Debug)]
struct Rendezvous {
    num_instances: usize,
    current: Option<u32>,
    arrivals: Vec<(i32, String)>,
}

/// A resolved round, ready to broadcast.
#[derive(Debug)]
struct Round {
    sync_point: u32,
    passed: bool,
    mismatch: Option<String>,
    arrivals: Vec<(i32, String)>,
}

impl Rendezvous {
    fn new(num_instances: usize) -> Self {
        Self {
            num_instances,
            current: None,
            arrivals: Vec::with_capacity(num_instances),
        }
    }

    /// Record one submission. Returns the resolved round once the last
    /// participant arrives.
    fn submit(&mut self, sync_point: u32, instance_id: i32, fingerprint: String) -> Option<Round> {
        if self.current != Some(sync_point) {
            self.current = Some(sync_point);
            self.arrivals.clear();
        } else if self.arrivals.len() == self.num_instances {
            warn!(sync_point, instance_id, "submission for an already resolved sync point, ignoring");
            return None;
        } else if self.arrivals.iter().any(|(id, _)| *id == instance_id) {
            warn!(sync_point, instance_id, "duplicate submission from one instance, ignoring");
            return None;
        }

        self.arrivals.push((instance_id, fingerprint));
        info!(
            sync_point,
            instance = instance_id,
            arrived = self.arrivals.len(),
            total = self.num_instances,
            "sync point submission"
        );

        if self.arrivals.len() < self.num_instances {
            return None;
        }
        Some(self.resolve(sync_point))
    }

    /// Compare the first arrival against every other; report the first
    /// failing pair.
    fn resolve(&self, sync_point: u32) -> Round {
        let (first_id, first_fp) = &self.arrivals[0];
        let mut mismatch = None;
        for (id, fp) in &self.arrivals[1..] {
            if !fingerprint::matches(first_fp, fp) {
                mismatch = Some(format!(
                    "Sync point {sync_point}: Instance {first_id}='{first_fp}' vs Instance {id}='{fp}'"
                ));
                break;
            }
        }
        Round {
            sync_point,
            passed: mismatch.is_none(),
            mismatch,
            arrivals: self.arrivals.clone(),
        }
    }
}
