use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::CausalError;

/// Globally unique identifier of a participant.
///
/// The raw value `0` is reserved as the "unspecified" sentinel and can never
/// be wrapped by this type. Sites render as 8 lowercase hex characters, so
/// the textual order of two identifiers matches their numeric order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SiteIdentifier(NonZeroU32);

impl SiteIdentifier {
    /// Smallest real site identifier.
    pub const MIN: Self = Self(NonZeroU32::MIN);

    /// Largest real site identifier.
    pub const MAX: Self = Self(NonZeroU32::MAX);

    /// Wrap a raw value, or `None` for the reserved sentinel `0`.
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Draw a random, non-sentinel site identifier.
    #[must_use]
    pub fn random() -> Self {
        loop {
            if let Some(site) = Self::new(rand::random::<u32>()) {
                return site;
            }
        }
    }

    /// The raw 32-bit value, as stored in packed identifiers.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<u32> for SiteIdentifier {
    type Error = CausalError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or(CausalError::UnspecifiedSite)
    }
}

impl From<SiteIdentifier> for u32 {
    fn from(site: SiteIdentifier) -> Self {
        site.get()
    }
}

impl fmt::Display for SiteIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.get())
    }
}

impl fmt::Debug for SiteIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteIdentifier({self})")
    }
}

impl FromStr for SiteIdentifier {
    type Err = CausalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CausalError::InvalidSiteFormat {
            input: s.to_string(),
        };
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let raw = u32::from_str_radix(s, 16).map_err(|_| invalid())?;
        Self::try_from(raw)
    }
}

impl Serialize for SiteIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SiteIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
