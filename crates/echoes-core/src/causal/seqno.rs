use std::fmt;

use serde::{Deserialize, Serialize};

use super::CausalError;

/// Logical clock value scoped to a single site.
///
/// Real sequence numbers span `MIN..=MAX`. The "unspecified" sentinel is not
/// a value of this type: it is `None` in an `Option<SequenceNumber>`, whose
/// ordering (`None < Some(_)`) keeps it below every real sequence number so
/// max-reductions over an unset accumulator behave. The sentinel only takes
/// a concrete form when packed (see [`pack_seqno`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    /// The first sequence number of every site.
    pub const MIN: Self = Self(0);

    /// The largest sequence number. One raw slot is given up to the sentinel.
    pub const MAX: Self = Self(u32::MAX - 1);

    /// Wrap a raw value, or `None` if it exceeds [`Self::MAX`].
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value > Self::MAX.0 {
            None
        } else {
            Some(Self(value))
        }
    }

    /// The numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The next sequence number, saturating at [`Self::MAX`].
    #[must_use]
    pub const fn inc(self) -> Self {
        self.plus(1)
    }

    /// Advance by `count`, saturating at [`Self::MAX`].
    #[must_use]
    pub const fn plus(self, count: u32) -> Self {
        let sum = self.0.saturating_add(count);
        if sum > Self::MAX.0 {
            Self::MAX
        } else {
            Self(sum)
        }
    }
}

impl TryFrom<u32> for SequenceNumber {
    type Error = CausalError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(CausalError::SequenceNumberOutOfRange { value })
    }
}

impl From<SequenceNumber> for u32 {
    fn from(seqno: SequenceNumber) -> Self {
        seqno.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pack an optional sequence number into its raw storage form.
///
/// `None` packs to `0`; `Some(n)` packs to `n + 1`. The mapping is strictly
/// monotonic, so raw values compare exactly like the optional values.
#[must_use]
pub const fn pack_seqno(seqno: Option<SequenceNumber>) -> u32 {
    match seqno {
        Some(value) => value.0 + 1,
        None => 0,
    }
}

/// Inverse of [`pack_seqno`].
#[must_use]
pub const fn unpack_seqno(raw: u32) -> Option<SequenceNumber> {
    match raw {
        0 => None,
        n => Some(SequenceNumber(n - 1)),
    }
}
