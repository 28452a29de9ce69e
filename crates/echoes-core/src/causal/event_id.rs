use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CausalError, SequenceNumber, SiteIdentifier, pack_seqno, unpack_seqno};

/// Identifier of a single event: a sequence number and the site that
/// issued it, packed into one `u64`.
///
/// Invariant: the packed value always carries a specified sequence number
/// and a specified site, so it is never `0`. `Ord` compares the packed
/// integers, which orders by sequence number and then by site.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "(SequenceNumber, SiteIdentifier)", from = "(SequenceNumber, SiteIdentifier)")]
pub struct EventIdentifier(u64);

impl EventIdentifier {
    /// Build an identifier. Both parts are real values by construction.
    #[must_use]
    pub const fn new(seqno: SequenceNumber, site: SiteIdentifier) -> Self {
        Self(pack(seqno, site))
    }

    /// Build an identifier from raw storage values, rejecting sentinels.
    ///
    /// # Errors
    ///
    /// Returns [`CausalError::UnspecifiedSequenceNumber`] for a raw seqno of
    /// `0` and [`CausalError::UnspecifiedSite`] for a raw site of `0`.
    pub fn from_raw(raw_seqno: u32, raw_site: u32) -> Result<Self, CausalError> {
        let seqno = unpack_seqno(raw_seqno).ok_or(CausalError::UnspecifiedSequenceNumber)?;
        let site = SiteIdentifier::try_from(raw_site)?;
        Ok(Self::new(seqno, site))
    }

    /// The sequence number half.
    #[must_use]
    pub const fn seqno(self) -> SequenceNumber {
        match unpack_seqno((self.0 >> 32) as u32) {
            Some(seqno) => seqno,
            None => SequenceNumber::MIN,
        }
    }

    /// The site half.
    #[must_use]
    pub const fn site(self) -> SiteIdentifier {
        match SiteIdentifier::new(self.0 as u32) {
            Some(site) => site,
            None => SiteIdentifier::MIN,
        }
    }

    /// The packed representation.
    #[must_use]
    pub const fn packed(self) -> u64 {
        self.0
    }
}

impl Ord for EventIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for EventIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<(SequenceNumber, SiteIdentifier)> for EventIdentifier {
    fn from((seqno, site): (SequenceNumber, SiteIdentifier)) -> Self {
        Self::new(seqno, site)
    }
}

impl From<EventIdentifier> for (SequenceNumber, SiteIdentifier) {
    fn from(id: EventIdentifier) -> Self {
        (id.seqno(), id.site())
    }
}

impl fmt::Display for EventIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.seqno(), self.site())
    }
}

impl fmt::Debug for EventIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventIdentifier({self})")
    }
}

/// Pack a sequence number and a site into the `u64` storage form.
#[must_use]
pub const fn pack(seqno: SequenceNumber, site: SiteIdentifier) -> u64 {
    ((pack_seqno(Some(seqno)) as u64) << 32) | site.get() as u64
}

/// Unpack a stored `u64`, or `None` if either half holds a sentinel.
#[must_use]
pub const fn unpack(packed: u64) -> Option<EventIdentifier> {
    let seqno = unpack_seqno((packed >> 32) as u32);
    let site = SiteIdentifier::new(packed as u32);
    match (seqno, site) {
        (Some(_), Some(_)) => Some(EventIdentifier(packed)),
        _ => None,
    }
}
