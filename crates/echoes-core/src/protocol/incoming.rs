use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::causal::{SequenceNumber, SiteIdentifier};
use crate::config::SyncMode;
use crate::log::EventLog;

use super::{IncomingMessage, OutgoingMessage, ProtocolError};

/// Observable state of an [`IncomingRole`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingState {
    /// Not started yet.
    Advertising,
    /// Ready; at least one acknowledged site has credit left.
    Serving,
    /// Ready; waiting for the peer to grant credit.
    AwaitingRequest,
    /// One side has sent `Done`; waiting for the other.
    Done,
    /// `Done` both sent and received.
    Terminated,
}

/// Per-site serving state.
#[derive(Debug, Clone, Copy, Default)]
struct Stream {
    /// Peer watermark from `Acknowledge`.
    acknowledged: Option<SequenceNumber>,
    /// Events the peer still accepts.
    credit: u32,
    /// Last sequence number sent for this site.
    sent: Option<SequenceNumber>,
}

impl Stream {
    fn from(&self) -> Option<SequenceNumber> {
        let ack = self.acknowledged?;
        Some(self.sent.map_or(ack, |sent| ack.max(sent.inc())))
    }
}

/// The serving side of a sync session.
///
/// Feed it the peer's messages with [`Self::on_message`] and call
/// [`Self::on_log_changed`] whenever the local log gains events. Every call
/// returns the messages to send, in order.
#[derive(Debug, Clone)]
pub struct IncomingRole {
    mode: SyncMode,
    started: bool,
    advertised: BTreeSet<SiteIdentifier>,
    streams: BTreeMap<SiteIdentifier, Stream>,
    done_sent: bool,
    done_received: bool,
}

impl IncomingRole {
    /// A role that has not started yet.
    #[must_use]
    pub const fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            started: false,
            advertised: BTreeSet::new(),
            streams: BTreeMap::new(),
            done_sent: false,
            done_received: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> IncomingState {
        if self.done_sent && self.done_received {
            IncomingState::Terminated
        } else if self.done_sent || self.done_received {
            IncomingState::Done
        } else if !self.started {
            IncomingState::Advertising
        } else if self
            .streams
            .values()
            .any(|s| s.acknowledged.is_some() && s.credit > 0)
        {
            IncomingState::Serving
        } else {
            IncomingState::AwaitingRequest
        }
    }

    /// Whether `Done` has been both sent and received.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.done_sent && self.done_received
    }

    /// Whether this role has sent `Done`.
    #[must_use]
    pub const fn done_sent(&self) -> bool {
        self.done_sent
    }

    /// Advertise every known site, then `Ready`.
    pub fn start(&mut self, log: &EventLog) -> Vec<IncomingMessage> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        let mut out = Vec::new();
        self.advertise(log, &mut out);
        out.push(IncomingMessage::Ready);
        debug!(sites = self.advertised.len(), "incoming role ready");
        self.finish_if_idle(log, &mut out);
        out
    }

    /// Handle one message from the peer.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RequestBeforeReady`] when the peer acknowledges or
    /// requests before `Ready` was sent.
    pub fn on_message(
        &mut self,
        message: OutgoingMessage,
        log: &EventLog,
    ) -> Result<Vec<IncomingMessage>, ProtocolError> {
        let mut out = Vec::new();
        match message {
            OutgoingMessage::Acknowledge { site, next } => {
                self.require_started(site)?;
                let stream = self.streams.entry(site).or_default();
                stream.acknowledged = Some(stream.acknowledged.map_or(next, |a| a.max(next)));
                trace!(%site, %next, "peer acknowledged");
            }
            OutgoingMessage::Request { site, count } => {
                self.require_started(site)?;
                let stream = self.streams.entry(site).or_default();
                stream.credit = stream.credit.saturating_add(count);
                trace!(%site, count, credit = stream.credit, "peer granted credit");
            }
            OutgoingMessage::Done => {
                self.done_received = true;
                if !self.done_sent {
                    self.done_sent = true;
                    out.push(IncomingMessage::Done);
                }
                debug!("incoming role received done");
                return Ok(out);
            }
        }
        self.serve(log, &mut out);
        Ok(out)
    }

    /// The local log changed: advertise new sites and serve new events.
    pub fn on_log_changed(&mut self, log: &EventLog) -> Vec<IncomingMessage> {
        let mut out = Vec::new();
        if self.started && !self.done_sent {
            self.advertise(log, &mut out);
            self.serve(log, &mut out);
        }
        out
    }

    /// Initiate termination.
    pub fn finish(&mut self) -> Vec<IncomingMessage> {
        if self.done_sent {
            return Vec::new();
        }
        self.done_sent = true;
        vec![IncomingMessage::Done]
    }

    /// The channel closed: treat as `Done` in both directions.
    pub fn on_channel_closed(&mut self) {
        self.done_sent = true;
        self.done_received = true;
    }

    fn require_started(&self, site: SiteIdentifier) -> Result<(), ProtocolError> {
        if self.started {
            Ok(())
        } else {
            Err(ProtocolError::RequestBeforeReady { site })
        }
    }

    fn advertise(&mut self, log: &EventLog, out: &mut Vec<IncomingMessage>) {
        for site in log.sites() {
            if self.advertised.insert(site) {
                out.push(IncomingMessage::Advertisement { site });
            }
        }
    }

    fn serve(&mut self, log: &EventLog, out: &mut Vec<IncomingMessage>) {
        if self.done_sent {
            return;
        }
        for (site, stream) in &mut self.streams {
            let Some(from) = stream.from() else {
                continue;
            };
            if stream.credit == 0 {
                continue;
            }
            let sent = stream.sent;
            let pending = log
                .events_of_from(*site, from)
                .filter(|event| Some(event.id.seqno()) > sent)
                .take(stream.credit as usize);
            for event in pending {
                let seqno = event.id.seqno();
                out.push(IncomingMessage::Event {
                    seqno,
                    site: *site,
                    payload: event.payload().into_owned(),
                });
                stream.sent = Some(seqno);
                stream.credit -= 1;
            }
        }
        self.finish_if_idle(log, out);
    }

    /// In one-shot mode, send `Done` once every advertised site has been
    /// acknowledged and nothing acknowledged is left to send.
    fn finish_if_idle(&mut self, log: &EventLog, out: &mut Vec<IncomingMessage>) {
        if self.mode != SyncMode::Once || self.done_sent {
            return;
        }
        let all_acknowledged = self.advertised.iter().all(|site| {
            self.streams
                .get(site)
                .is_some_and(|s| s.acknowledged.is_some())
        });
        if !all_acknowledged {
            return;
        }
        let pending = self.streams.iter().any(|(site, stream)| {
            stream.from().is_some_and(|from| {
                log.events_of_from(*site, from)
                    .any(|event| Some(event.id.seqno()) > stream.sent)
            })
        });
        if !pending {
            debug!("incoming role served everything, finishing");
            self.done_sent = true;
            out.push(IncomingMessage::Done);
        }
    }
}
