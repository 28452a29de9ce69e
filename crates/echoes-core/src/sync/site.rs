use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::causal::{EventIdentifier, SequenceNumber, SiteIdentifier};
use crate::history::{History, HistoryError, TwoWayProjection};

struct Shared<P: TwoWayProjection> {
    history: Mutex<History<P>>,
    revision: watch::Sender<u64>,
}

/// A participant: one [`History`] behind a single-writer lock.
///
/// Cloning a `Site` yields another handle to the same history. Local
/// writes ([`Site::event`]) and remote writes ([`Site::insert`]) are
/// serialized by the lock, so readers never observe a model mid-replay.
/// Every completed mutation bumps a revision counter that sync tasks
/// [`subscribe`](Site::subscribe) to.
pub struct Site<P: TwoWayProjection> {
    id: SiteIdentifier,
    shared: Arc<Shared<P>>,
}

/// Handle for appending local events inside [`Site::event`].
pub struct EventScope<'a, P: TwoWayProjection> {
    site: SiteIdentifier,
    history: &'a mut History<P>,
    appended: usize,
}

impl<P: TwoWayProjection> EventScope<'_, P> {
    /// Append a local event with the next Lamport sequence number.
    ///
    /// # Errors
    ///
    /// As [`History::insert`]; the event is then not recorded.
    pub fn yield_event(&mut self, payload: &[u8]) -> Result<EventIdentifier, HistoryError> {
        let id = self.history.append(self.site, payload)?;
        self.appended += 1;
        Ok(id)
    }

    /// The model including every event yielded so far.
    #[must_use]
    pub fn model(&self) -> &P::Model {
        self.history.model()
    }
}

impl<P: TwoWayProjection> Site<P> {
    /// A site with an empty history.
    #[must_use]
    pub fn new(id: SiteIdentifier, projection: P, model: P::Model) -> Self {
        Self::from_history(id, History::new(projection, model))
    }

    /// Wrap an existing history.
    #[must_use]
    pub fn from_history(id: SiteIdentifier, history: History<P>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            id,
            shared: Arc::new(Shared {
                history: Mutex::new(history),
                revision,
            }),
        }
    }

    /// This site's identifier.
    #[must_use]
    pub const fn id(&self) -> SiteIdentifier {
        self.id
    }

    /// Run `f` with exclusive access, appending local events through the
    /// scope. Each yielded event is atomic on its own; an error from `f`
    /// keeps the events yielded before it.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns.
    pub fn event<R>(
        &self,
        f: impl FnOnce(&mut EventScope<'_, P>) -> Result<R, HistoryError>,
    ) -> Result<R, HistoryError> {
        let (result, appended) = {
            let mut history = self.shared.history.lock();
            let mut scope = EventScope {
                site: self.id,
                history: &mut *history,
                appended: 0,
            };
            let result = f(&mut scope);
            (result, scope.appended)
        };
        if appended > 0 {
            trace!(site = %self.id, appended, "local events appended");
            self.bump();
        }
        result
    }

    /// Insert an event received from elsewhere.
    ///
    /// # Errors
    ///
    /// As [`History::insert`].
    pub fn insert(
        &self,
        seqno: SequenceNumber,
        site: SiteIdentifier,
        payload: &[u8],
    ) -> Result<EventIdentifier, HistoryError> {
        let (id, changed) = {
            let mut history = self.shared.history.lock();
            let before = history.log().len();
            let id = history.insert(seqno, site, payload)?;
            (id, history.log().len() != before)
        };
        if changed {
            self.bump();
        }
        Ok(id)
    }

    /// A consistent copy of the current model.
    #[must_use]
    pub fn current(&self) -> P::Model
    where
        P::Model: Clone,
    {
        self.shared.history.lock().model().clone()
    }

    /// Read the history under the lock. Keep `f` short: it blocks writers.
    pub fn with_history<R>(&self, f: impl FnOnce(&History<P>) -> R) -> R {
        f(&self.shared.history.lock())
    }

    /// Receiver of the revision counter, bumped after every mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Current revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.shared.revision.borrow()
    }

    fn bump(&self) {
        self.shared.revision.send_modify(|revision| *revision += 1);
    }
}

impl<P: TwoWayProjection> Clone for Site<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: TwoWayProjection> fmt::Debug for Site<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("id", &self.id)
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}
