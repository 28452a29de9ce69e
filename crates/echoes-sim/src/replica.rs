use echoes_core::history::HistoryError;
use echoes_core::{
    EventIdentifier, EventLog, History, ProjectionError, SequenceNumber, SiteIdentifier,
    TwoWayProjection,
};
use serde::{Deserialize, Serialize};

/// Appends every payload to a string. Order-sensitive on purpose: two
/// replicas agree only if they applied the same events in the same order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scribe;

impl TwoWayProjection for Scribe {
    type Model = String;
    type Change = usize;

    fn forward(
        &self,
        model: &mut String,
        _id: EventIdentifier,
        payload: &[u8],
    ) -> Result<usize, ProjectionError> {
        let text =
            std::str::from_utf8(payload).map_err(|err| ProjectionError::Decode(err.to_string()))?;
        model.push_str(text);
        Ok(text.len())
    }

    fn backward(&self, model: &mut String, _id: EventIdentifier, _payload: &[u8], len: usize) {
        model.truncate(model.len().saturating_sub(len));
    }
}

/// Immutable snapshot of a replica, comparable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub site: SiteIdentifier,
    pub events: usize,
    /// blake3 of the global view, hex.
    pub digest: String,
    pub model: String,
}

/// One simulated site: a [`History`] over [`Scribe`].
#[derive(Debug, Clone)]
pub struct SimulatedReplica {
    site: SiteIdentifier,
    history: History<Scribe>,
}

impl SimulatedReplica {
    #[must_use]
    pub fn new(site: SiteIdentifier) -> Self {
        Self {
            site,
            history: History::new(Scribe, String::new()),
        }
    }

    #[must_use]
    pub const fn site(&self) -> SiteIdentifier {
        self.site
    }

    #[must_use]
    pub const fn log(&self) -> &EventLog {
        self.history.log()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.history.model()
    }

    /// Append a local event.
    ///
    /// # Errors
    ///
    /// When the payload is not UTF-8.
    pub fn emit(&mut self, payload: &str) -> Result<EventIdentifier, HistoryError> {
        self.history.append(self.site, payload.as_bytes())
    }

    /// Insert an event received from a peer. Returns whether it was new.
    ///
    /// # Errors
    ///
    /// As [`History::insert`].
    pub fn insert(
        &mut self,
        seqno: SequenceNumber,
        site: SiteIdentifier,
        payload: &[u8],
    ) -> Result<bool, HistoryError> {
        let before = self.history.log().len();
        self.history.insert(seqno, site, payload)?;
        Ok(self.history.log().len() != before)
    }

    /// Digest of every event in causal order: identifier, length, payload.
    #[must_use]
    pub fn digest(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for event in self.log().events() {
            hasher.update(&event.id.packed().to_be_bytes());
            let len = u32::try_from(event.len()).unwrap_or(u32::MAX);
            hasher.update(&len.to_be_bytes());
            hasher.update(&event.payload());
        }
        hasher.finalize()
    }

    #[must_use]
    pub fn state(&self) -> ReplicaState {
        ReplicaState {
            site: self.site,
            events: self.log().len(),
            digest: self.digest().to_hex().to_string(),
            model: self.model().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(n: u32) -> SiteIdentifier {
        SiteIdentifier::new(n).unwrap()
    }

    #[test]
    fn emit_appends_in_lamport_order() {
        let mut replica = SimulatedReplica::new(site(1));
        let first = replica.emit("a").unwrap();
        let second = replica.emit("b").unwrap();
        assert!(first < second);
        assert_eq!(replica.model(), "ab");
    }

    #[test]
    fn insert_reports_only_new_events() {
        let mut replica = SimulatedReplica::new(site(1));
        let seqno = SequenceNumber::MIN;
        assert!(replica.insert(seqno, site(2), b"x").unwrap());
        assert!(!replica.insert(seqno, site(2), b"x").unwrap());
        assert_eq!(replica.log().len(), 1);
    }

    #[test]
    fn digest_depends_on_content_not_arrival() {
        let mut a = SimulatedReplica::new(site(1));
        let mut b = SimulatedReplica::new(site(2));
        let seq = |n| SequenceNumber::new(n).unwrap();
        a.insert(seq(0), site(3), b"x").unwrap();
        a.insert(seq(1), site(4), b"y").unwrap();
        b.insert(seq(1), site(4), b"y").unwrap();
        b.insert(seq(0), site(3), b"x").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.model(), "xy");
        assert_eq!(b.model(), "xy");

        b.insert(seq(2), site(3), b"z").unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn state_serializes_site_as_hex() {
        let replica = SimulatedReplica::new(site(0xab));
        let json = serde_json::to_string(&replica.state()).unwrap();
        assert!(json.contains("\"site\":\"000000ab\""));
    }
}
