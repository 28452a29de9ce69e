use serde::{Deserialize, Serialize};

use crate::causal::{SequenceNumber, SiteIdentifier};

/// Messages sent by the incoming (serving) role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// The sender holds events from `site`.
    Advertisement {
        /// Advertised site.
        site: SiteIdentifier,
    },
    /// Initial advertisements are complete; requests are now accepted.
    Ready,
    /// One event.
    Event {
        /// Sequence number of the event.
        seqno: SequenceNumber,
        /// Site of the event.
        site: SiteIdentifier,
        /// Opaque payload.
        payload: Vec<u8>,
    },
    /// The sender is finishing the session.
    Done,
}

impl IncomingMessage {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Advertisement { .. } => "advertisement",
            Self::Ready => "ready",
            Self::Event { .. } => "event",
            Self::Done => "done",
        }
    }
}

/// Messages sent by the outgoing (requesting) role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// The sender already holds every event of `site` below `next`.
    Acknowledge {
        /// Acknowledged site.
        site: SiteIdentifier,
        /// First sequence number the sender is missing.
        next: SequenceNumber,
    },
    /// Grant credit for `count` more events of `site`.
    Request {
        /// Requested site.
        site: SiteIdentifier,
        /// Additional events the sender accepts.
        count: u32,
    },
    /// The sender is finishing the session.
    Done,
}

impl OutgoingMessage {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Acknowledge { .. } => "acknowledge",
            Self::Request { .. } => "request",
            Self::Done => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_rendering_uses_hex_sites() {
        let site = SiteIdentifier::new(0xab).unwrap();
        let json = serde_json::to_string(&OutgoingMessage::Request { site, count: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"request","site":"000000ab","count":3}"#);

        let back: OutgoingMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OutgoingMessage::Request { site, count: 3 });
    }

    #[test]
    fn kinds_name_the_variant() {
        assert_eq!(IncomingMessage::Ready.kind(), "ready");
        assert_eq!(OutgoingMessage::Done.kind(), "done");
    }
}
