use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::causal::{SequenceNumber, SiteIdentifier};
use crate::log::EventLog;

use super::{IncomingMessage, OutgoingMessage, ProtocolError};

/// Observable state of an [`OutgoingRole`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingState {
    /// Waiting for the peer's `Ready`.
    AwaitingReady,
    /// Acknowledging, requesting and receiving events.
    Requesting,
    /// One side has sent `Done`; draining until the other does too.
    Done,
    /// `Done` both sent and received.
    Terminated,
}

/// What the driver must do next, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingAction {
    /// Send a message to the peer.
    Send(OutgoingMessage),
    /// Insert a received event into the local history.
    Insert {
        /// Sequence number of the event.
        seqno: SequenceNumber,
        /// Site of the event.
        site: SiteIdentifier,
        /// Opaque payload.
        payload: Vec<u8>,
    },
}

/// The requesting side of a sync session.
#[derive(Debug, Clone)]
pub struct OutgoingRole {
    batch: u32,
    ready: bool,
    advertised: BTreeSet<SiteIdentifier>,
    credit: BTreeMap<SiteIdentifier, u32>,
    received: BTreeMap<SiteIdentifier, SequenceNumber>,
    done_sent: bool,
    done_received: bool,
}

impl OutgoingRole {
    /// A role granting `batch` credit per request.
    #[must_use]
    pub const fn new(batch: u32) -> Self {
        Self {
            batch,
            ready: false,
            advertised: BTreeSet::new(),
            credit: BTreeMap::new(),
            received: BTreeMap::new(),
            done_sent: false,
            done_received: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> OutgoingState {
        if self.done_sent && self.done_received {
            OutgoingState::Terminated
        } else if self.done_sent || self.done_received {
            OutgoingState::Done
        } else if self.ready {
            OutgoingState::Requesting
        } else {
            OutgoingState::AwaitingReady
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

    /// Handle one message from the peer.
    ///
    /// Every received event yields an [`OutgoingAction::Insert`] before any
    /// message that follows from it.
    ///
    /// # Errors
    ///
    /// [`ProtocolError`] when the peer sends a duplicate `Ready`, or an event
    /// that arrives before `Ready`, names an unadvertised site, exceeds the
    /// granted credit or goes backwards within its site.
    pub fn on_message(
        &mut self,
        message: IncomingMessage,
        log: &EventLog,
    ) -> Result<Vec<OutgoingAction>, ProtocolError> {
        let mut out = Vec::new();
        match message {
            IncomingMessage::Advertisement { site } => {
                let new = self.advertised.insert(site);
                if new && self.ready && !self.done_sent {
                    self.open(site, log, &mut out);
                }
            }
            IncomingMessage::Ready => {
                if self.ready {
                    return Err(ProtocolError::DuplicateReady);
                }
                self.ready = true;
                if !self.done_sent {
                    let sites: BTreeSet<SiteIdentifier> =
                        self.advertised.iter().copied().chain(log.sites()).collect();
                    for site in sites {
                        self.open(site, log, &mut out);
                    }
                }
                debug!(sites = self.credit.len(), "outgoing role requesting");
            }
            IncomingMessage::Event {
                seqno,
                site,
                payload,
            } => {
                self.accept(seqno, site)?;
                out.push(OutgoingAction::Insert {
                    seqno,
                    site,
                    payload,
                });
                if !self.done_sent {
                    let credit = self.credit.entry(site).or_default();
                    if *credit == 0 {
                        *credit = self.batch;
                        out.push(OutgoingAction::Send(OutgoingMessage::Request {
                            site,
                            count: self.batch,
                        }));
                    }
                }
            }
            IncomingMessage::Done => {
                self.done_received = true;
                if !self.done_sent {
                    self.done_sent = true;
                    out.push(OutgoingAction::Send(OutgoingMessage::Done));
                }
                debug!("outgoing role received done");
            }
        }
        Ok(out)
    }

    /// Initiate termination. Events already in flight are still accepted.
    pub fn finish(&mut self) -> Vec<OutgoingAction> {
        if self.done_sent {
            return Vec::new();
        }
        self.done_sent = true;
        vec![OutgoingAction::Send(OutgoingMessage::Done)]
    }

    /// The channel closed: treat as `Done` in both directions.
    pub fn on_channel_closed(&mut self) {
        self.done_sent = true;
        self.done_received = true;
    }

    fn open(&mut self, site: SiteIdentifier, log: &EventLog, out: &mut Vec<OutgoingAction>) {
        let next = log.expected(site);
        let credit = self.credit.entry(site).or_default();
        *credit = credit.saturating_add(self.batch);
        trace!(%site, %next, batch = self.batch, "requesting site");
        out.push(OutgoingAction::Send(OutgoingMessage::Acknowledge { site, next }));
        out.push(OutgoingAction::Send(OutgoingMessage::Request {
            site,
            count: self.batch,
        }));
    }

    fn accept(&mut self, seqno: SequenceNumber, site: SiteIdentifier) -> Result<(), ProtocolError> {
        if !self.ready {
            return Err(ProtocolError::EventBeforeReady { seqno, site });
        }
        if !self.advertised.contains(&site) {
            return Err(ProtocolError::UnadvertisedSite { seqno, site });
        }
        let behind = self.received.get(&site).copied().filter(|&p| seqno <= p);
        if let Some(previous) = behind {
            return Err(ProtocolError::OutOfOrder {
                seqno,
                site,
                previous,
            });
        }
        let credit = self.credit.entry(site).or_default();
        if *credit == 0 {
            return Err(ProtocolError::CreditExceeded { seqno, site });
        }
        *credit -= 1;
        self.received.insert(site, seqno);
        Ok(())
    }
}
