//! Replay engine.
//!
//! A [`History`] keeps an application model equal to its projection applied,
//! in causal order, to every event of its log, whatever order the events
//! arrive in.
//!
//! # Rewind, apply, replay
//!
//! An event that sorts before the tail of the log is integrated by undoing
//! every later event (last first, via [`TwoWayProjection::backward`]),
//! applying the new event, then re-applying the undone events (earliest
//! first). Each stored event carries the change record its latest forward
//! produced. Appends never rewind.
//!
//! The rewound events are always a suffix of the global view, so changes
//! live in a plain stack aligned with the global order and every log edit
//! happens at the tail.
//!
//! Insertion is atomic: a projection failure on the new event, or on a
//! later one while replaying, restores the previous model and log, site
//! watermarks included, before the error is returned.

mod projection;

use std::fmt;

use tracing::{trace, warn};

use crate::causal::{EventIdentifier, SequenceNumber, SiteIdentifier};
use crate::error::ErrorCode;
use crate::log::{EventLog, EventRecord, LogError, LogListener};

pub use projection::{OneWay, OneWayProjection, ProjectionError, TwoWayProjection, decode_json};

/// Errors from [`History`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// The projection refused the new event. Nothing changed.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// A later event could not be re-applied on top of the new one. The
    /// insertion was rolled back and nothing changed.
    #[error("re-applying {event} after the insertion failed: {source}")]
    ReplayRejected {
        /// The event whose replay failed.
        event: EventIdentifier,
        /// What the projection reported.
        source: ProjectionError,
    },

    /// Re-applying events failed while rolling back; `dropped` events could
    /// not be restored. The projection is not deterministic.
    #[error("replay diverged at {event}: {dropped} event(s) could not be restored")]
    Diverged {
        /// The first event that could not be restored.
        event: EventIdentifier,
        /// How many events were dropped from the log.
        dropped: usize,
    },

    /// The underlying log failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The change stack fell out of step with the log.
    #[error("change records are out of step with the log")]
    ChangesMisaligned,
}

impl HistoryError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Projection(err) => err.code(),
            Self::ReplayRejected { .. } | Self::Diverged { .. } => ErrorCode::ReplayDiverged,
            Self::Log(err) => err.code(),
            Self::ChangesMisaligned => ErrorCode::InternalUnexpected,
        }
    }
}

/// An event log plus the model it projects to.
pub struct History<P: TwoWayProjection> {
    projection: P,
    model: P::Model,
    log: EventLog,
    /// One change per logged event, in global order.
    changes: Vec<P::Change>,
}

impl<P: TwoWayProjection> History<P> {
    /// An empty history starting from `model`.
    #[must_use]
    pub fn new(projection: P, model: P::Model) -> Self {
        Self {
            projection,
            model,
            log: EventLog::new(),
            changes: Vec::new(),
        }
    }

    /// The current model.
    #[must_use]
    pub const fn model(&self) -> &P::Model {
        &self.model
    }

    /// The event log.
    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    /// The projection.
    #[must_use]
    pub const fn projection(&self) -> &P {
        &self.projection
    }

    /// Consume the history, keeping the model.
    #[must_use]
    pub fn into_model(self) -> P::Model {
        self.model
    }

    /// Register a listener on the underlying log. Listeners see the net
    /// effect of each insertion, not the intermediate rewind and replay.
    pub fn add_listener(&mut self, listener: Box<dyn LogListener>) {
        self.log.add_listener(listener);
    }

    /// Insert an event at its causal position and bring the model up to
    /// date. Inserting an event that is already present changes nothing.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::Projection`] when the projection refuses the event
    /// - [`HistoryError::ReplayRejected`] when a later event no longer
    ///   applies after the new one
    ///
    /// In both cases the history is left as it was.
    pub fn insert(
        &mut self,
        seqno: SequenceNumber,
        site: SiteIdentifier,
        payload: &[u8],
    ) -> Result<EventIdentifier, HistoryError> {
        let id = EventIdentifier::new(seqno, site);
        if self.log.contains(seqno, site) {
            return Ok(id);
        }

        let watermark = self.log.watermark(site);
        let mut rewound = self.rewind_while(|last| last > id)?;
        trace!(%id, depth = rewound.len(), "rewound for insert");

        let change = match self.projection.forward(&mut self.model, id, payload) {
            Ok(change) => change,
            Err(err) => {
                self.restore(&mut rewound)?;
                return Err(err.into());
            }
        };
        self.log.insert_quiet(id, payload)?;
        self.changes.push(change);

        if let Err(source) = self.replay(&mut rewound)? {
            let event = rewound.last().map_or(id, |record| record.id);
            warn!(%id, %event, "replay rejected, rolling back insert");
            let mut undone = self.rewind_while(|last| last >= id)?;
            // The new event is the earliest undone one.
            undone.pop();
            rewound.extend(undone);
            self.log.reset_watermark(site, watermark);
            self.restore(&mut rewound)?;
            return Err(HistoryError::ReplayRejected { event, source });
        }

        self.log.notify_inserted(id, payload);
        Ok(id)
    }

    /// Append a local event from `site` with the next Lamport sequence
    /// number, which sorts after every event currently in the log.
    ///
    /// # Errors
    ///
    /// As [`Self::insert`].
    pub fn append(
        &mut self,
        site: SiteIdentifier,
        payload: &[u8],
    ) -> Result<EventIdentifier, HistoryError> {
        let seqno = self.log.expected_any();
        self.insert(seqno, site, payload)
    }

    /// Insert every event of `other`. Returns how many were new.
    ///
    /// # Errors
    ///
    /// Stops at the first event that fails to insert.
    pub fn merge(&mut self, other: &Self) -> Result<usize, HistoryError> {
        self.merge_log(other.log())
    }

    /// Insert every event of `log` and adopt its acknowledgements. Returns
    /// how many events were new.
    ///
    /// # Errors
    ///
    /// Stops at the first event that fails to insert.
    pub fn merge_log(&mut self, log: &EventLog) -> Result<usize, HistoryError> {
        let mut inserted = 0;
        for event in log.events() {
            let (seqno, site) = (event.id.seqno(), event.id.site());
            if !self.log.contains(seqno, site) {
                self.insert(seqno, site, &event.payload())?;
                inserted += 1;
            }
        }
        for site in log.sites() {
            let acknowledged = log.expected(site).get().checked_sub(1);
            if let Some(seqno) = acknowledged.and_then(SequenceNumber::new) {
                self.log.acknowledge(seqno, site);
            }
        }
        Ok(inserted)
    }

    /// Undo and remove tail events while `undo` holds. Returns them as a
    /// stack whose last element is the causally earliest.
    fn rewind_while(
        &mut self,
        mut undo: impl FnMut(EventIdentifier) -> bool,
    ) -> Result<Vec<EventRecord>, HistoryError> {
        let mut stack = Vec::new();
        while let Some(last) = self.log.last_id() {
            if !undo(last) {
                break;
            }
            let record = self
                .log
                .pop_last_quiet()?
                .ok_or(HistoryError::ChangesMisaligned)?;
            let change = self.changes.pop().ok_or(HistoryError::ChangesMisaligned)?;
            self.projection
                .backward(&mut self.model, record.id, &record.payload, change);
            stack.push(record);
        }
        Ok(stack)
    }

    /// Re-apply a rewound stack, earliest first. A projection failure stops
    /// the replay with the failing record still on top of the stack.
    fn replay(
        &mut self,
        stack: &mut Vec<EventRecord>,
    ) -> Result<Result<(), ProjectionError>, HistoryError> {
        while let Some(record) = stack.pop() {
            match self
                .projection
                .forward(&mut self.model, record.id, &record.payload)
            {
                Ok(change) => {
                    self.log.insert_quiet(record.id, &record.payload)?;
                    self.changes.push(change);
                }
                Err(err) => {
                    stack.push(record);
                    return Ok(Err(err));
                }
            }
        }
        Ok(Ok(()))
    }

    /// Replay a stack that applied cleanly before. Failure here means the
    /// projection is not deterministic; the remaining events are dropped and
    /// their sites expect them again.
    fn restore(&mut self, stack: &mut Vec<EventRecord>) -> Result<(), HistoryError> {
        if self.replay(stack)?.is_err() {
            let dropped = stack.len();
            let event = stack.last().map_or_else(
                || EventIdentifier::new(SequenceNumber::MIN, SiteIdentifier::MIN),
                |record| record.id,
            );
            for record in stack.drain(..) {
                self.log.unacknowledge(record.id);
                self.log.notify_removed(record.id);
            }
            warn!(%event, dropped, "projection diverged during restore");
            return Err(HistoryError::Diverged { event, dropped });
        }
        Ok(())
    }
}

impl<P> Clone for History<P>
where
    P: TwoWayProjection + Clone,
    P::Model: Clone,
    P::Change: Clone,
{
    fn clone(&self) -> Self {
        Self {
            projection: self.projection.clone(),
            model: self.model.clone(),
            log: self.log.clone(),
            changes: self.changes.clone(),
        }
    }
}

impl<P> fmt::Debug for History<P>
where
    P: TwoWayProjection,
    P::Model: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("model", &self.model)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};

    fn seq(n: u32) -> SequenceNumber {
        SequenceNumber::new(n).unwrap()
    }

    fn site(n: u32) -> SiteIdentifier {
        SiteIdentifier::new(n).unwrap()
    }

    /// Appends UTF-8 payloads; the change is the appended length.
    #[derive(Clone)]
    struct Concat;

    impl TwoWayProjection for Concat {
        type Model = String;
        type Change = usize;

        fn forward(
            &self,
            model: &mut String,
            _id: EventIdentifier,
            payload: &[u8],
        ) -> Result<usize, ProjectionError> {
            let text = std::str::from_utf8(payload)
                .map_err(|err| ProjectionError::Decode(err.to_string()))?;
            model.push_str(text);
            Ok(text.len())
        }

        fn backward(&self, model: &mut String, _id: EventIdentifier, _payload: &[u8], len: usize) {
            model.truncate(model.len() - len);
        }
    }

    /// Like [`Concat`], but refuses `!` once the model holds a `z`.
    struct Picky;

    impl TwoWayProjection for Picky {
        type Model = String;
        type Change = usize;

        fn forward(
            &self,
            model: &mut String,
            id: EventIdentifier,
            payload: &[u8],
        ) -> Result<usize, ProjectionError> {
            if payload == b"!" && model.contains('z') {
                return Err(ProjectionError::Rejected("no ! after z".into()));
            }
            Concat.forward(model, id, payload)
        }

        fn backward(&self, model: &mut String, id: EventIdentifier, payload: &[u8], len: usize) {
            Concat.backward(model, id, payload, len);
        }
    }

    #[test]
    fn appends_never_rewind() {
        let mut history = History::new(Concat, String::new());
        history.append(site(1), b"a").unwrap();
        history.append(site(2), b"b").unwrap();
        let id = history.append(site(1), b"c").unwrap();
        assert_eq!(id.seqno(), seq(2));
        assert_eq!(history.model(), "abc");
    }

    #[test]
    fn out_of_order_insert_rewinds_and_replays() {
        let mut history = History::new(Concat, String::new());
        history.insert(seq(0), site(1), b"a").unwrap();
        history.insert(seq(1), site(1), b"b").unwrap();
        history.insert(seq(0), site(2), b"c").unwrap();
        // (0,1) < (0,2) < (1,1)
        assert_eq!(history.model(), "acb");
        assert_eq!(history.log().len(), 3);
    }

    #[test]
    fn duplicate_insert_returns_the_existing_id() {
        let mut history = History::new(Concat, String::new());
        let first = history.insert(seq(3), site(1), b"x").unwrap();
        let again = history.insert(seq(3), site(1), b"y").unwrap();
        assert_eq!(first, again);
        assert_eq!(history.model(), "x");
    }

    #[test]
    fn decode_failure_is_atomic() {
        let mut history = History::new(Concat, String::new());
        history.insert(seq(1), site(1), b"b").unwrap();
        history.insert(seq(2), site(1), b"c").unwrap();
        let log_before = history.log().clone();

        let err = history.insert(seq(0), site(1), &[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeFailed);
        assert_eq!(history.model(), "bc");
        assert_eq!(history.log(), &log_before);

        history.insert(seq(0), site(1), b"a").unwrap();
        assert_eq!(history.model(), "abc");
    }

    #[test]
    fn rejected_replay_rolls_the_insert_back() {
        let mut history = History::new(Picky, String::new());
        history.insert(seq(1), site(1), b"!").unwrap();
        let err = history.insert(seq(0), site(1), b"z").unwrap_err();
        assert_eq!(
            err,
            HistoryError::ReplayRejected {
                event: EventIdentifier::new(seq(1), site(1)),
                source: ProjectionError::Rejected("no ! after z".into()),
            }
        );
        assert_eq!(history.model(), "!");
        assert_eq!(history.log().len(), 1);
        assert!(!history.log().contains(seq(0), site(1)));
    }

    #[test]
    fn rejected_replay_from_a_new_site_leaves_the_log_untouched() {
        let mut history = History::new(Picky, String::new());
        history.insert(seq(1), site(1), b"!").unwrap();
        let before = history.log().clone();

        let err = history.insert(seq(0), site(2), b"z").unwrap_err();
        assert!(matches!(err, HistoryError::ReplayRejected { .. }));
        assert_eq!(history.log(), &before);
        assert_eq!(history.log().sites().collect::<Vec<_>>(), vec![site(1)]);
        assert_eq!(history.log().expected(site(2)), SequenceNumber::MIN);
        assert_eq!(history.log().expected_any(), seq(2));

        let next = history.append(site(2), b"a").unwrap();
        assert_eq!(next.seqno(), seq(2));
        assert_eq!(history.model(), "!a");
    }

    #[test]
    fn rejected_replay_keeps_an_existing_watermark() {
        let mut history = History::new(Picky, String::new());
        history.insert(seq(0), site(2), b"y").unwrap();
        history.insert(seq(2), site(1), b"!").unwrap();
        let before = history.log().clone();

        history.insert(seq(1), site(2), b"z").unwrap_err();
        assert_eq!(history.log(), &before);
        assert_eq!(history.log().expected(site(2)), seq(1));
    }

    /// Applies `#` once only, so a second replay of it fails.
    #[derive(Default)]
    struct Fragile {
        applied: Cell<bool>,
    }

    impl TwoWayProjection for Fragile {
        type Model = String;
        type Change = usize;

        fn forward(
            &self,
            model: &mut String,
            id: EventIdentifier,
            payload: &[u8],
        ) -> Result<usize, ProjectionError> {
            if payload == b"#" && self.applied.replace(true) {
                return Err(ProjectionError::Rejected("applied twice".into()));
            }
            Concat.forward(model, id, payload)
        }

        fn backward(&self, model: &mut String, id: EventIdentifier, payload: &[u8], len: usize) {
            Concat.backward(model, id, payload, len);
        }
    }

    #[test]
    fn diverged_restore_asks_for_dropped_events_again() {
        let mut history = History::new(Fragile::default(), String::new());
        history.insert(seq(0), site(1), b"a").unwrap();
        history.insert(seq(1), site(1), b"#").unwrap();

        let err = history.insert(seq(0), site(2), b"z").unwrap_err();
        assert_eq!(
            err,
            HistoryError::Diverged {
                event: EventIdentifier::new(seq(1), site(1)),
                dropped: 1,
            }
        );
        assert_eq!(history.model(), "a");
        assert!(!history.log().contains(seq(1), site(1)));
        assert_eq!(history.log().expected(site(1)), seq(1));
        assert_eq!(history.log().sites().collect::<Vec<_>>(), vec![site(1)]);
        assert_eq!(history.log().expected(site(2)), SequenceNumber::MIN);
    }

    #[test]
    fn merge_converges_regardless_of_direction() {
        let mut a = History::new(Concat, String::new());
        let mut b = History::new(Concat, String::new());
        a.append(site(1), b"a1").unwrap();
        a.append(site(1), b"a2").unwrap();
        b.append(site(2), b"b1").unwrap();
        b.append(site(2), b"b2").unwrap();

        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        assert_eq!(ba.merge(&a).unwrap(), 2);

        assert_eq!(ab.model(), ba.model());
        assert_eq!(ab.model(), "a1b1a2b2");
        assert_eq!(ab.log(), ba.log());
    }

    #[derive(Default)]
    struct Inserts(Arc<Mutex<Vec<String>>>);

    impl LogListener for Inserts {
        fn on_insert(&mut self, seqno: SequenceNumber, site: SiteIdentifier, _payload: &[u8]) {
            self.0.lock().unwrap().push(format!("+{seqno}@{site}"));
        }

        fn on_removed(&mut self, seqno: SequenceNumber, site: SiteIdentifier) {
            self.0.lock().unwrap().push(format!("-{seqno}@{site}"));
        }
    }

    #[test]
    fn listeners_see_only_net_insertions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut history = History::new(Concat, String::new());
        history.add_listener(Box::new(Inserts(Arc::clone(&seen))));
        history.insert(seq(1), site(1), b"b").unwrap();
        history.insert(seq(0), site(1), b"a").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["+1@00000001", "+0@00000001"]);
    }
}
