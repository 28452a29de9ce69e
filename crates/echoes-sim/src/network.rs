use std::collections::VecDeque;

use anyhow::{Context, Result};
use echoes_core::config::SyncMode;
use echoes_core::protocol::codec::{
    decode_incoming, decode_outgoing, encode_incoming, encode_outgoing,
};
use echoes_core::protocol::{IncomingMessage, IncomingRole, OutgoingAction, OutgoingRole};
use echoes_core::{EventIdentifier, EventLog, SiteIdentifier};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::replica::SimulatedReplica;
use crate::rng::DeterministicRng;

/// Fault injection and flow control for simulated sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Chance, before each delivery, that every channel of the session
    /// closes at once.
    pub disconnect_percent: u8,
    /// Credit granted per `Request`.
    pub request_batch: u32,
    /// Deliveries after which a session counts as stalled.
    pub max_steps: usize,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            disconnect_percent: 2,
            request_batch: 4,
            max_steps: 100_000,
        }
    }
}

impl FaultConfig {
    /// The same flow control with no injected faults.
    #[must_use]
    pub const fn fault_free(self) -> Self {
        Self {
            disconnect_percent: 0,
            ..self
        }
    }
}

/// What one pairwise session did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub site_a: SiteIdentifier,
    pub site_b: SiteIdentifier,
    /// Frames delivered.
    pub steps: usize,
    /// Events that were new to their receiver.
    pub transferred: usize,
    /// New events that sorted before the receiver's last event, forcing a
    /// rewind.
    pub late_inserts: usize,
    pub disconnected: bool,
    /// No frame in flight, yet some role still waits for `Done`.
    pub stalled: bool,
    /// Codec, protocol or insert failure that closed the session.
    pub failure: Option<String>,
}

impl SessionOutcome {
    const fn new(site_a: SiteIdentifier, site_b: SiteIdentifier) -> Self {
        Self {
            site_a,
            site_b,
            steps: 0,
            transferred: 0,
            late_inserts: 0,
            disconnected: false,
            stalled: false,
            failure: None,
        }
    }
}

/// One direction of a session: a serving role on one replica, a
/// requesting role on the other, and the two FIFO channels between them.
/// Frames travel encoded, as they would on a wire.
#[derive(Debug)]
struct Direction {
    incoming: IncomingRole,
    outgoing: OutgoingRole,
    served: VecDeque<Vec<u8>>,
    requests: VecDeque<Vec<u8>>,
}

impl Direction {
    fn start(server: &EventLog, batch: u32) -> Result<Self> {
        let mut incoming = IncomingRole::new(SyncMode::Once);
        let opening = incoming.start(server);
        let mut direction = Self {
            incoming,
            outgoing: OutgoingRole::new(batch),
            served: VecDeque::new(),
            requests: VecDeque::new(),
        };
        direction.serve(opening)?;
        Ok(direction)
    }

    const fn is_terminated(&self) -> bool {
        self.incoming.is_terminated() && self.outgoing.is_terminated()
    }

    fn disconnect(&mut self) {
        self.incoming.on_channel_closed();
        self.outgoing.on_channel_closed();
        self.served.clear();
        self.requests.clear();
    }

    fn serve(&mut self, messages: Vec<IncomingMessage>) -> Result<()> {
        for message in messages {
            let frame = encode_incoming(&message)
                .with_context(|| format!("encoding {}", message.kind()))?;
            self.served.push_back(frame);
        }
        Ok(())
    }

    /// Deliver the oldest served frame to the requesting replica. Returns
    /// whether the replica's log grew.
    fn deliver_served(
        &mut self,
        client: &mut SimulatedReplica,
        outcome: &mut SessionOutcome,
    ) -> Result<bool> {
        let Some(frame) = self.served.pop_front() else {
            return Ok(false);
        };
        let message = decode_incoming(&frame).context("decoding served frame")?;
        trace!(to = %client.site(), kind = message.kind(), "deliver");
        let actions = self
            .outgoing
            .on_message(message, client.log())
            .context("outgoing role rejected message")?;

        let mut grew = false;
        for action in actions {
            match action {
                OutgoingAction::Send(message) => self.requests.push_back(encode_outgoing(&message)),
                OutgoingAction::Insert {
                    seqno,
                    site,
                    payload,
                } => {
                    let id = EventIdentifier::new(seqno, site);
                    let late = client.log().last_id().is_some_and(|last| last > id);
                    let inserted = client
                        .insert(seqno, site, &payload)
                        .with_context(|| format!("inserting {id}"))?;
                    if inserted {
                        grew = true;
                        outcome.transferred += 1;
                        if late {
                            outcome.late_inserts += 1;
                        }
                    }
                }
            }
        }
        Ok(grew)
    }

    /// Deliver the oldest request frame to the serving replica.
    fn deliver_request(&mut self, server: &SimulatedReplica) -> Result<()> {
        let Some(frame) = self.requests.pop_front() else {
            return Ok(());
        };
        let message = decode_outgoing(&frame).context("decoding request frame")?;
        trace!(to = %server.site(), kind = message.kind(), "deliver");
        let replies = self
            .incoming
            .on_message(message, server.log())
            .context("incoming role rejected message")?;
        self.serve(replies)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    /// Events and control from `a` to `b`.
    ServedToB,
    /// Requests from `b` to `a`.
    RequestsToA,
    ServedToA,
    RequestsToB,
}

/// Runs pairwise sessions between replicas over in-memory channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedNetwork {
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self { fault }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Sync `a` and `b` in both directions until every role terminates, a
    /// disconnect is injected, or the session fails.
    ///
    /// Each step the RNG picks one non-empty channel and delivers its
    /// oldest frame, so every interleaving that keeps each channel FIFO is
    /// reachable.
    pub fn run_session(
        &self,
        a: &mut SimulatedReplica,
        b: &mut SimulatedReplica,
        rng: &mut DeterministicRng,
    ) -> SessionOutcome {
        let mut outcome = SessionOutcome::new(a.site(), b.site());
        if let Err(err) = self.drive(a, b, rng, &mut outcome) {
            let message = format!("{err:#}");
            debug!(a = %a.site(), b = %b.site(), error = %message, "session failed");
            outcome.failure = Some(message);
        }
        debug!(
            a = %a.site(),
            b = %b.site(),
            steps = outcome.steps,
            transferred = outcome.transferred,
            disconnected = outcome.disconnected,
            "session finished"
        );
        outcome
    }

    fn drive(
        &self,
        a: &mut SimulatedReplica,
        b: &mut SimulatedReplica,
        rng: &mut DeterministicRng,
        outcome: &mut SessionOutcome,
    ) -> Result<()> {
        let batch = self.fault.request_batch;
        let mut a_serves = Direction::start(a.log(), batch)?;
        let mut b_serves = Direction::start(b.log(), batch)?;

        while !(a_serves.is_terminated() && b_serves.is_terminated()) {
            let ready: Vec<Channel> = [
                (Channel::ServedToB, a_serves.served.is_empty()),
                (Channel::RequestsToA, a_serves.requests.is_empty()),
                (Channel::ServedToA, b_serves.served.is_empty()),
                (Channel::RequestsToB, b_serves.requests.is_empty()),
            ]
            .into_iter()
            .filter_map(|(channel, empty)| (!empty).then_some(channel))
            .collect();

            let Some(pick) = rng.pick(ready.len()) else {
                outcome.stalled = true;
                return Ok(());
            };
            if outcome.steps >= self.fault.max_steps {
                outcome.stalled = true;
                return Ok(());
            }
            if rng.hit_rate_percent(self.fault.disconnect_percent) {
                a_serves.disconnect();
                b_serves.disconnect();
                outcome.disconnected = true;
                return Ok(());
            }

            outcome.steps += 1;
            match ready[pick] {
                Channel::ServedToB => {
                    if a_serves.deliver_served(b, outcome)? {
                        let fresh = b_serves.incoming.on_log_changed(b.log());
                        b_serves.serve(fresh)?;
                    }
                }
                Channel::RequestsToA => a_serves.deliver_request(a)?,
                Channel::ServedToA => {
                    if b_serves.deliver_served(a, outcome)? {
                        let fresh = a_serves.incoming.on_log_changed(a.log());
                        a_serves.serve(fresh)?;
                    }
                }
                Channel::RequestsToB => b_serves.deliver_request(b)?,
            }
        }
        Ok(())
    }
}
