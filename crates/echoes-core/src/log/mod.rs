//! The causally-ordered event log.
//!
//! An [`EventLog`] stores every event twice, in two views built from
//! [`GapBuffer`]s:
//!
//! - the **global view**, ordered by [`EventIdentifier`] (seqno, then site),
//!   used for linear scans and by the replay engine;
//! - one **site view** per site, ordered by sequence number, used for
//!   membership checks, per-site streaming and acknowledgements.
//!
//! Both views always hold the same set of events with identical payload
//! bytes. Each view keeps parallel buffers of keys and payload lengths next
//! to one contiguous byte buffer of payloads.
//!
//! Insertion is not restricted to the tail. The global position of a new
//! event is found by scanning outward from the position of the previous
//! edit, which is where nearly every insertion lands: appends and recent
//! out-of-order arrivals.

mod cursor;
mod iter;

use std::collections::BTreeMap;
use std::fmt;

use tracing::trace;

use crate::buffer::{BufferError, GapBuffer};
use crate::causal::{EventIdentifier, SequenceNumber, SiteIdentifier};
use crate::error::ErrorCode;

pub use cursor::{LogCursor, LogView};
pub use iter::{EventRef, Events};

/// An owned event: identifier and payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventRecord {
    /// Identifier of the event.
    pub id: EventIdentifier,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

/// Errors from event log operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// The log was structurally modified after the cursor was created.
    #[error("event log was structurally modified since the cursor was created")]
    ConcurrentModification,

    /// The cursor cannot move or read past the end (or start) of its view.
    #[error("cursor position {position} is out of bounds for a view of {len} events")]
    OutOfBounds {
        /// Cursor position.
        position: usize,
        /// Number of events in the view.
        len: usize,
    },

    /// A storage buffer rejected an internal operation.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl LogError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ConcurrentModification => ErrorCode::ConcurrentModification,
            Self::OutOfBounds { .. } => ErrorCode::OutOfBounds,
            Self::Buffer(err) => err.code(),
        }
    }
}

/// Observer of structural changes to an [`EventLog`].
///
/// Used to mirror a log elsewhere or to keep derived indexes in step. The
/// callbacks run synchronously inside the mutating call.
pub trait LogListener: Send {
    /// An event was inserted.
    fn on_insert(&mut self, seqno: SequenceNumber, site: SiteIdentifier, payload: &[u8]) {
        let _ = (seqno, site, payload);
    }

    /// An event was removed.
    fn on_removed(&mut self, seqno: SequenceNumber, site: SiteIdentifier) {
        let _ = (seqno, site);
    }

    /// Every event was removed.
    fn on_cleared(&mut self) {}
}

/// Events of one site, ordered by sequence number.
#[derive(Clone, Default)]
struct SiteBlock {
    seqnos: GapBuffer<u32>,
    lengths: GapBuffer<u32>,
    bytes: GapBuffer<u8>,
    /// Highest acknowledged sequence number + 1.
    expected: SequenceNumber,
}

impl SiteBlock {
    fn index_of(&self, seqno: SequenceNumber) -> Result<usize, usize> {
        let raw = seqno.get();
        let index = self.seqnos.partition_point(|s| s < raw);
        match self.seqnos.get(index) {
            Ok(found) if found == raw => Ok(index),
            _ => Err(index),
        }
    }

    /// Byte offset of event `index`, summing lengths from the tail.
    fn offset_of(&self, index: usize) -> Result<usize, BufferError> {
        let (head, tail) = self.lengths.slices(index, self.lengths.len())?;
        let after: usize = head.iter().chain(tail).map(|&l| l as usize).sum();
        Ok(self.bytes.len() - after)
    }

    fn payload(&self, index: usize) -> Result<(usize, usize), BufferError> {
        let start = self.offset_of(index)?;
        let len = self.lengths.get(index)? as usize;
        Ok((start, start + len))
    }
}

/// Position in the global view with its byte offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Position {
    index: usize,
    offset: usize,
}

/// A mutable, ordered collection of events, unique by identifier.
pub struct EventLog {
    ids: GapBuffer<u64>,
    lengths: GapBuffer<u32>,
    bytes: GapBuffer<u8>,
    sites: BTreeMap<SiteIdentifier, SiteBlock>,
    hint: Position,
    generation: u64,
    listeners: Vec<Box<dyn LogListener>>,
}

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: GapBuffer::new(),
            lengths: GapBuffer::new(),
            bytes: GapBuffer::new(),
            sites: BTreeMap::new(),
            hint: Position::default(),
            generation: 0,
            listeners: Vec::new(),
        }
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no event is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Total payload bytes stored (counted once, not per view).
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Counter bumped by every structural change.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Register a listener for structural changes.
    pub fn add_listener(&mut self, listener: Box<dyn LogListener>) {
        self.listeners.push(listener);
    }

    /// Every site with a block in this log, ascending. A site stays known
    /// after its events are removed.
    pub fn sites(&self) -> impl Iterator<Item = SiteIdentifier> + '_ {
        self.sites.keys().copied()
    }

    /// Next sequence number expected from `site`: the highest acknowledged
    /// sequence number + 1, or [`SequenceNumber::MIN`] for an unknown site.
    #[must_use]
    pub fn expected(&self, site: SiteIdentifier) -> SequenceNumber {
        self.sites
            .get(&site)
            .map_or(SequenceNumber::MIN, |block| block.expected)
    }

    /// Largest expected sequence number over all sites. This is the Lamport
    /// clock value a new local event must use to be causally last.
    #[must_use]
    pub fn expected_any(&self) -> SequenceNumber {
        self.sites
            .values()
            .map(|block| block.expected)
            .max()
            .unwrap_or(SequenceNumber::MIN)
    }

    /// Whether the event `(seqno, site)` is stored.
    #[must_use]
    pub fn contains(&self, seqno: SequenceNumber, site: SiteIdentifier) -> bool {
        self.sites
            .get(&site)
            .is_some_and(|block| block.index_of(seqno).is_ok())
    }

    /// Payload of `(seqno, site)`, if stored.
    #[must_use]
    pub fn get(&self, seqno: SequenceNumber, site: SiteIdentifier) -> Option<Vec<u8>> {
        let block = self.sites.get(&site)?;
        let index = block.index_of(seqno).ok()?;
        let (start, end) = block.payload(index).ok()?;
        block.bytes.to_vec_range(start, end).ok()
    }

    /// Identifier of the causally last event.
    #[must_use]
    pub fn last_id(&self) -> Option<EventIdentifier> {
        self.ids.last().and_then(crate::causal::unpack)
    }

    /// Record that `seqno` from `site` has been observed without storing
    /// an event: raises the site's expected sequence number to `seqno + 1`.
    pub fn acknowledge(&mut self, seqno: SequenceNumber, site: SiteIdentifier) {
        let block = self.sites.entry(site).or_default();
        block.expected = block.expected.max(seqno.inc());
    }

    /// Insert an event. Returns `false`, changing nothing, if the
    /// identifier is already present.
    ///
    /// # Errors
    ///
    /// Only on an internal storage failure, which leaves the log unchanged.
    pub fn insert(
        &mut self,
        seqno: SequenceNumber,
        site: SiteIdentifier,
        payload: &[u8],
    ) -> Result<bool, LogError> {
        self.insert_event(EventIdentifier::new(seqno, site), payload, true)
    }

    /// Remove an event. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Only on an internal storage failure.
    pub fn remove(&mut self, seqno: SequenceNumber, site: SiteIdentifier) -> Result<bool, LogError> {
        Ok(self
            .remove_event(EventIdentifier::new(seqno, site), true)?
            .is_some())
    }

    /// Remove every event. Sites and their expected sequence numbers are
    /// kept, so a cleared log does not ask for the same events again.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.lengths.clear();
        self.bytes.clear();
        for block in self.sites.values_mut() {
            block.seqnos.clear();
            block.lengths.clear();
            block.bytes.clear();
        }
        self.hint = Position::default();
        self.bump();
        for listener in &mut self.listeners {
            listener.on_cleared();
        }
    }

    /// Insert every event of `other` and adopt its acknowledgements.
    ///
    /// # Errors
    ///
    /// Only on an internal storage failure.
    pub fn merge(&mut self, other: &Self) -> Result<usize, LogError> {
        let mut inserted = 0;
        for event in other.events() {
            if self.insert_event(event.id, &event.payload(), true)? {
                inserted += 1;
            }
        }
        for (site, block) in &other.sites {
            let mine = self.sites.entry(*site).or_default();
            mine.expected = mine.expected.max(block.expected);
        }
        Ok(inserted)
    }

    /// Keep only the newest event of every site, removing the rest. This is
    /// last-writer-wins compaction; listeners see each removal.
    ///
    /// # Errors
    ///
    /// Only on an internal storage failure.
    pub fn retain_latest_per_site(&mut self) -> Result<usize, LogError> {
        let mut obsolete = Vec::new();
        for (site, block) in &self.sites {
            let count = block.seqnos.len();
            for index in 0..count.saturating_sub(1) {
                let seqno = SequenceNumber::new(block.seqnos.get(index)?)
                    .unwrap_or(SequenceNumber::MAX);
                obsolete.push(EventIdentifier::new(seqno, *site));
            }
        }
        for id in &obsolete {
            self.remove_event(*id, true)?;
        }
        Ok(obsolete.len())
    }

    /// Remove and return the causally last event without notifying
    /// listeners. Used by the replay engine while rewinding.
    pub(crate) fn pop_last_quiet(&mut self) -> Result<Option<EventRecord>, LogError> {
        let Some(id) = self.last_id() else {
            return Ok(None);
        };
        Ok(self.remove_event(id, false)?.map(|payload| EventRecord { id, payload }))
    }

    /// Insert without notifying listeners. Used by the replay engine to put
    /// rewound events back.
    pub(crate) fn insert_quiet(
        &mut self,
        id: EventIdentifier,
        payload: &[u8],
    ) -> Result<bool, LogError> {
        self.insert_event(id, payload, false)
    }

    /// Expected sequence number of `site`, or `None` when the log has no
    /// block for it.
    pub(crate) fn watermark(&self, site: SiteIdentifier) -> Option<SequenceNumber> {
        self.sites.get(&site).map(|block| block.expected)
    }

    /// Put `site` back to a [`watermark`](Self::watermark) taken earlier.
    /// `None` forgets the site, provided it holds no events.
    pub(crate) fn reset_watermark(
        &mut self,
        site: SiteIdentifier,
        watermark: Option<SequenceNumber>,
    ) {
        match watermark {
            Some(expected) => {
                if let Some(block) = self.sites.get_mut(&site) {
                    block.expected = expected;
                }
            }
            None => {
                if self.sites.get(&site).is_some_and(|b| b.seqnos.is_empty()) {
                    self.sites.remove(&site);
                }
            }
        }
    }

    /// Lower the expected sequence number of `id`'s site to `id`'s, so a
    /// peer sends the event again. For events dropped from the tail.
    pub(crate) fn unacknowledge(&mut self, id: EventIdentifier) {
        if let Some(block) = self.sites.get_mut(&id.site()) {
            block.expected = block.expected.min(id.seqno());
        }
    }

    pub(crate) fn notify_inserted(&mut self, id: EventIdentifier, payload: &[u8]) {
        for listener in &mut self.listeners {
            listener.on_insert(id.seqno(), id.site(), payload);
        }
    }

    pub(crate) fn notify_removed(&mut self, id: EventIdentifier) {
        for listener in &mut self.listeners {
            listener.on_removed(id.seqno(), id.site());
        }
    }

    // -- internals ----------------------------------------------------------

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn insert_event(
        &mut self,
        id: EventIdentifier,
        payload: &[u8],
        notify: bool,
    ) -> Result<bool, LogError> {
        let (seqno, site) = (id.seqno(), id.site());
        let length = u32::try_from(payload.len()).map_err(|_| BufferError::OutOfBounds {
            offset: 0,
            count: payload.len(),
            len: u32::MAX as usize,
        })?;

        let block = self.sites.entry(site).or_default();
        let Err(site_index) = block.index_of(seqno) else {
            return Ok(false);
        };
        let site_offset = block.offset_of(site_index)?;

        let global = self.locate(id)?;

        let block = self.sites.entry(site).or_default();
        block.seqnos.insert(site_index, seqno.get())?;
        block.lengths.insert(site_index, length)?;
        block
            .bytes
            .insert_range(site_offset, payload, 0, payload.len())?;
        block.expected = block.expected.max(seqno.inc());

        self.ids.insert(global.index, id.packed())?;
        self.lengths.insert(global.index, length)?;
        self.bytes
            .insert_range(global.offset, payload, 0, payload.len())?;
        self.hint = Position {
            index: global.index + 1,
            offset: global.offset + payload.len(),
        };
        self.bump();

        trace!(%id, index = global.index, len = payload.len(), "event inserted");
        if notify {
            for listener in &mut self.listeners {
                listener.on_insert(seqno, site, payload);
            }
        }
        Ok(true)
    }

    fn remove_event(
        &mut self,
        id: EventIdentifier,
        notify: bool,
    ) -> Result<Option<Vec<u8>>, LogError> {
        let (seqno, site) = (id.seqno(), id.site());
        let Some(block) = self.sites.get_mut(&site) else {
            return Ok(None);
        };
        let Ok(site_index) = block.index_of(seqno) else {
            return Ok(None);
        };
        let (start, end) = block.payload(site_index)?;
        let payload = block.bytes.to_vec_range(start, end)?;
        block.seqnos.remove(site_index, 1)?;
        block.lengths.remove(site_index, 1)?;
        block.bytes.remove(start, end - start)?;

        let packed = id.packed();
        let index = self.ids.partition_point(|v| v < packed);
        let offset = self.offset_of(index)?;
        self.ids.remove(index, 1)?;
        self.lengths.remove(index, 1)?;
        self.bytes.remove(offset, payload.len())?;
        self.hint = Position { index, offset };
        self.bump();

        trace!(%id, index, "event removed");
        if notify {
            for listener in &mut self.listeners {
                listener.on_removed(seqno, site);
            }
        }
        Ok(Some(payload))
    }

    /// Global position where `id` belongs, scanning outward from the
    /// position of the previous edit.
    fn locate(&self, id: EventIdentifier) -> Result<Position, LogError> {
        let packed = id.packed();
        let mut at = self.hint;
        if at.index > self.ids.len() {
            at = Position {
                index: self.ids.len(),
                offset: self.bytes.len(),
            };
        }
        while at.index > 0 && self.ids.get(at.index - 1)? > packed {
            at.index -= 1;
            at.offset -= self.lengths.get(at.index)? as usize;
        }
        while at.index < self.ids.len() && self.ids.get(at.index)? < packed {
            at.offset += self.lengths.get(at.index)? as usize;
            at.index += 1;
        }
        Ok(at)
    }

    /// Byte offset of global event `index`, summed from the edit hint.
    fn offset_of(&self, index: usize) -> Result<usize, BufferError> {
        let hint = self.hint;
        if hint.index <= index && hint.index <= self.lengths.len() {
            let (head, tail) = self.lengths.slices(hint.index, index)?;
            let between: usize = head.iter().chain(tail).map(|&l| l as usize).sum();
            Ok(hint.offset + between)
        } else {
            let (head, tail) = self.lengths.slices(index, self.lengths.len())?;
            let after: usize = head.iter().chain(tail).map(|&l| l as usize).sum();
            Ok(self.bytes.len() - after)
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Clones the stored events and acknowledgements. Listeners observe one
/// particular log and are not carried over to the copy.
impl Clone for EventLog {
    fn clone(&self) -> Self {
        Self {
            ids: self.ids.clone(),
            lengths: self.lengths.clone(),
            bytes: self.bytes.clone(),
            sites: self.sites.clone(),
            hint: self.hint,
            generation: 0,
            listeners: Vec::new(),
        }
    }
}

/// Two logs are equal when they hold the same events and acknowledgements.
impl PartialEq for EventLog {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids
            && self.lengths == other.lengths
            && self.bytes == other.bytes
            && self.sites.len() == other.sites.len()
            && self
                .sites
                .iter()
                .zip(&other.sites)
                .all(|((a, x), (b, y))| a == b && x.expected == y.expected)
    }
}

impl Eq for EventLog {}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .field("payload_bytes", &self.payload_bytes())
            .field("sites", &self.sites.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn seq(n: u32) -> SequenceNumber {
        SequenceNumber::new(n).unwrap()
    }

    fn site(n: u32) -> SiteIdentifier {
        SiteIdentifier::new(n).unwrap()
    }

    fn ids(log: &EventLog) -> Vec<(u32, u32)> {
        log.events()
            .map(|e| (e.id.seqno().get(), e.id.site().get()))
            .collect()
    }

    fn payloads(log: &EventLog) -> Vec<Vec<u8>> {
        log.events().map(|e| e.payload().into_owned()).collect()
    }

    #[test]
    fn keeps_global_order_under_out_of_order_inserts() {
        let mut log = EventLog::new();
        log.insert(seq(2), site(1), b"c").unwrap();
        log.insert(seq(0), site(1), b"a").unwrap();
        log.insert(seq(1), site(2), b"b2").unwrap();
        log.insert(seq(1), site(1), b"b1").unwrap();
        log.insert(seq(5), site(3), b"z").unwrap();

        assert_eq!(ids(&log), vec![(0, 1), (1, 1), (1, 2), (2, 1), (5, 3)]);
        assert_eq!(
            payloads(&log),
            vec![b"a".to_vec(), b"b1".to_vec(), b"b2".to_vec(), b"c".to_vec(), b"z".to_vec()]
        );
    }

    #[test]
    fn duplicate_insert_is_a_noop() {
        let mut log = EventLog::new();
        assert!(log.insert(seq(0), site(1), b"first").unwrap());
        let generation = log.generation();
        assert!(!log.insert(seq(0), site(1), b"second").unwrap());
        assert_eq!(log.generation(), generation);
        assert_eq!(log.get(seq(0), site(1)), Some(b"first".to_vec()));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn expected_tracks_highest_seqno_plus_one() {
        let mut log = EventLog::new();
        assert_eq!(log.expected(site(1)), SequenceNumber::MIN);
        log.insert(seq(4), site(1), b"x").unwrap();
        log.insert(seq(2), site(1), b"y").unwrap();
        assert_eq!(log.expected(site(1)), seq(5));
        log.insert(seq(9), site(2), b"z").unwrap();
        assert_eq!(log.expected_any(), seq(10));
    }

    #[test]
    fn site_view_matches_global_view() {
        let mut log = EventLog::new();
        for (s, n, p) in [(1, 3, "c1"), (2, 0, "a2"), (1, 0, "a1"), (2, 7, "g2"), (1, 1, "b1")] {
            log.insert(seq(n), site(s), p.as_bytes()).unwrap();
        }
        let site_one: Vec<(u32, Vec<u8>)> = log
            .events_of(site(1))
            .map(|e| (e.id.seqno().get(), e.payload().into_owned()))
            .collect();
        assert_eq!(
            site_one,
            vec![(0, b"a1".to_vec()), (1, b"b1".to_vec()), (3, b"c1".to_vec())]
        );
        for event in log.events() {
            assert_eq!(
                log.get(event.id.seqno(), event.id.site()),
                Some(event.payload().into_owned())
            );
        }
    }

    #[test]
    fn remove_deletes_from_both_views() {
        let mut log = EventLog::new();
        log.insert(seq(0), site(1), b"aa").unwrap();
        log.insert(seq(1), site(1), b"bbb").unwrap();
        log.insert(seq(1), site(2), b"c").unwrap();

        assert!(log.remove(seq(1), site(1)).unwrap());
        assert!(!log.remove(seq(1), site(1)).unwrap());
        assert!(!log.contains(seq(1), site(1)));
        assert_eq!(ids(&log), vec![(0, 1), (1, 2)]);
        assert_eq!(payloads(&log), vec![b"aa".to_vec(), b"c".to_vec()]);
        assert_eq!(log.events_of(site(1)).count(), 1);
        assert_eq!(log.payload_bytes(), 3);
        // removal does not forget acknowledgements
        assert_eq!(log.expected(site(1)), seq(2));
    }

    #[test]
    fn removing_then_reinserting_restores_the_log() {
        let mut log = EventLog::new();
        for n in 0..10 {
            log.insert(seq(n), site(1 + n % 3), &[n as u8; 3]).unwrap();
        }
        let before = log.clone();
        log.remove(seq(4), site(2)).unwrap();
        log.insert(seq(4), site(2), &[4; 3]).unwrap();
        assert_eq!(log, before);
    }

    #[test]
    fn acknowledge_raises_expected_without_storing() {
        let mut log = EventLog::new();
        log.acknowledge(seq(6), site(3));
        assert_eq!(log.expected(site(3)), seq(7));
        assert!(log.is_empty());
        assert_eq!(log.sites().collect::<Vec<_>>(), vec![site(3)]);
        log.acknowledge(seq(2), site(3));
        assert_eq!(log.expected(site(3)), seq(7));
    }

    #[test]
    fn merge_copies_events_and_acknowledgements() {
        let mut a = EventLog::new();
        a.insert(seq(0), site(1), b"a").unwrap();
        let mut b = EventLog::new();
        b.insert(seq(0), site(1), b"a").unwrap();
        b.insert(seq(1), site(2), b"b").unwrap();
        b.acknowledge(seq(8), site(4));

        assert_eq!(a.merge(&b).unwrap(), 1);
        assert_eq!(ids(&a), vec![(0, 1), (1, 2)]);
        assert_eq!(a.expected(site(4)), seq(9));
        assert_eq!(b.len(), 2);
    }

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl LogListener for Recorder {
        fn on_insert(&mut self, seqno: SequenceNumber, site: SiteIdentifier, payload: &[u8]) {
            self.0
                .lock()
                .unwrap()
                .push(format!("+{seqno}@{site}:{}", String::from_utf8_lossy(payload)));
        }

        fn on_removed(&mut self, seqno: SequenceNumber, site: SiteIdentifier) {
            self.0.lock().unwrap().push(format!("-{seqno}@{site}"));
        }

        fn on_cleared(&mut self) {
            self.0.lock().unwrap().push("clear".to_string());
        }
    }

    #[test]
    fn listeners_observe_every_structural_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut log = EventLog::new();
        log.add_listener(Box::new(Recorder(Arc::clone(&seen))));

        log.insert(seq(0), site(1), b"x").unwrap();
        log.insert(seq(0), site(1), b"x").unwrap();
        log.remove(seq(0), site(1)).unwrap();
        log.clear();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["+0@00000001:x", "-0@00000001", "clear"]
        );
    }

    #[test]
    fn last_writer_wins_compaction_keeps_newest_per_site() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut log = EventLog::new();
        for n in 0..4 {
            log.insert(seq(n), site(1), b"one").unwrap();
        }
        log.insert(seq(2), site(2), b"two").unwrap();
        log.add_listener(Box::new(Recorder(Arc::clone(&seen))));

        assert_eq!(log.retain_latest_per_site().unwrap(), 3);
        assert_eq!(ids(&log), vec![(2, 2), (3, 1)]);
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(log.expected(site(1)), seq(4));
    }

    #[test]
    fn clear_keeps_sites_and_expectations() {
        let mut log = EventLog::new();
        log.insert(seq(3), site(1), b"x").unwrap();
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.payload_bytes(), 0);
        assert_eq!(log.expected(site(1)), seq(4));
        assert!(log.insert(seq(0), site(1), b"y").unwrap());
        assert_eq!(ids(&log), vec![(0, 1)]);
    }

    #[test]
    fn pop_last_quiet_returns_the_causally_last_event() {
        let mut log = EventLog::new();
        log.insert(seq(1), site(1), b"late").unwrap();
        log.insert(seq(0), site(2), b"early").unwrap();
        let last = log.pop_last_quiet().unwrap().unwrap();
        assert_eq!(last.id, EventIdentifier::new(seq(1), site(1)));
        assert_eq!(last.payload, b"late");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn empty_payloads_are_events_too() {
        let mut log = EventLog::new();
        log.insert(seq(1), site(1), b"").unwrap();
        log.insert(seq(0), site(1), b"a").unwrap();
        assert_eq!(payloads(&log), vec![b"a".to_vec(), Vec::new()]);
        assert_eq!(log.get(seq(1), site(1)), Some(Vec::new()));
    }
}
