//! Two-role sync protocol.
//!
//! A sync session runs one role on each end of a duplex channel:
//!
//! - the **incoming** role owns the log being served. It advertises every
//!   site it knows, signals `Ready`, then streams events for each site the
//!   peer acknowledged, within the credit the peer granted;
//! - the **outgoing** role is the requester. After `Ready` it declares its
//!   watermark per site with `Acknowledge`, grants credit with `Request`,
//!   and inserts every received event into its history.
//!
//! Both roles are pure state machines: they take a message (or a "local
//! log changed" nudge) plus a read-only view of the log and return what to
//! send. Channel I/O lives in [`crate::sync`] and in the simulator.
//!
//! Termination is cooperative: either side sends `Done`, the other answers
//! with its own `Done` after draining what is in flight, and a closed
//! channel counts as `Done`.

pub mod codec;
mod incoming;
mod message;
mod outgoing;

pub use codec::CodecError;
pub use incoming::{IncomingRole, IncomingState};
pub use message::{IncomingMessage, OutgoingMessage};
pub use outgoing::{OutgoingAction, OutgoingRole, OutgoingState};

use crate::causal::{SequenceNumber, SiteIdentifier};
use crate::error::ErrorCode;

/// A message the peer was not allowed to send in the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// `Acknowledge` or `Request` arrived before `Ready` was sent.
    #[error("request for site {site} arrived before ready")]
    RequestBeforeReady {
        /// Site named by the message.
        site: SiteIdentifier,
    },

    /// `Event` arrived before `Ready`.
    #[error("event {seqno}@{site} arrived before ready")]
    EventBeforeReady {
        /// Sequence number of the event.
        seqno: SequenceNumber,
        /// Site of the event.
        site: SiteIdentifier,
    },

    /// A second `Ready`.
    #[error("ready received twice")]
    DuplicateReady,

    /// `Event` for a site that was never advertised.
    #[error("event {seqno}@{site} for a site that was never advertised")]
    UnadvertisedSite {
        /// Sequence number of the event.
        seqno: SequenceNumber,
        /// Site of the event.
        site: SiteIdentifier,
    },

    /// More events than the granted credit.
    #[error("event {seqno}@{site} exceeds the granted credit")]
    CreditExceeded {
        /// Sequence number of the event.
        seqno: SequenceNumber,
        /// Site of the event.
        site: SiteIdentifier,
    },

    /// An event did not come after the previous event of its site.
    #[error("event {seqno}@{site} does not follow {previous}@{site}")]
    OutOfOrder {
        /// Sequence number of the event.
        seqno: SequenceNumber,
        /// Site of the event.
        site: SiteIdentifier,
        /// Sequence number of the previous event from this site.
        previous: SequenceNumber,
    },
}

impl ProtocolError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ProtocolViolation
    }
}
