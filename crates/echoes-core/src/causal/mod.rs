//! Causal identifiers: sites, logical sequence numbers and the packed
//! event identifier that totally orders every event in a log.
//!
//! # Packing
//!
//! An [`EventIdentifier`] is stored as a single `u64`:
//!
//! ```text
//!  63                32 31                 0
//! +--------------------+--------------------+
//! |   raw seqno (u32)  |   raw site (u32)   |
//! +--------------------+--------------------+
//! ```
//!
//! With the sequence number in the high half, comparing two packed values
//! as plain integers is the same as ordering by sequence number first and
//! by site second. The log and the replay engine rely on this: identifier
//! comparison is a single integer comparison and must stay that way.
//!
//! Both halves reserve `0` as the "unspecified" sentinel. Sentinels only
//! exist at the packing boundary ([`pack_seqno`], [`unpack_seqno`],
//! [`unpack`]); the public types are always specified, and an absent value
//! is spelled `Option<_>`.

mod event_id;
mod seqno;
mod site;

pub use event_id::{EventIdentifier, pack, unpack};
pub use seqno::{SequenceNumber, pack_seqno, unpack_seqno};
pub use site::SiteIdentifier;

use crate::error::ErrorCode;

/// Errors raised when a sentinel value reaches a boundary that requires a
/// real identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CausalError {
    /// The reserved site value `0` was used as a real site.
    #[error("site identifier 00000000 is reserved and cannot identify a site")]
    UnspecifiedSite,

    /// The reserved sequence number was used as a real sequence number.
    #[error("sequence number is unspecified")]
    UnspecifiedSequenceNumber,

    /// A raw value above [`SequenceNumber::MAX`].
    #[error("sequence number {value} exceeds the largest sequence number")]
    SequenceNumberOutOfRange {
        /// The rejected value.
        value: u32,
    },

    /// A site identifier string was not 8 hex characters.
    #[error("invalid site identifier {input:?}: expected 8 hex characters")]
    InvalidSiteFormat {
        /// The rejected input.
        input: String,
    },
}

impl CausalError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnspecifiedSite | Self::UnspecifiedSequenceNumber => {
                ErrorCode::UnspecifiedIdentifier
            }
            Self::InvalidSiteFormat { .. } | Self::SequenceNumberOutOfRange { .. } => {
                ErrorCode::MalformedIdentifier
            }
        }
    }
}
