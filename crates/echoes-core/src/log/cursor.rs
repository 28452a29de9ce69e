use crate::causal::{EventIdentifier, SequenceNumber, SiteIdentifier, unpack};

use super::{EventLog, EventRecord, LogError};

/// Which view of the log a [`LogCursor`] walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogView {
    /// Every event in causal order.
    Global,
    /// The events of one site by sequence number.
    Site(SiteIdentifier),
}

/// A position in one view of an [`EventLog`], detached from any borrow.
///
/// The cursor sits between two events. It records the log generation at
/// creation; after any structural change not made through this cursor,
/// every operation on it fails with [`LogError::ConcurrentModification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCursor {
    view: LogView,
    position: usize,
    generation: u64,
}

impl LogCursor {
    /// The view this cursor walks.
    #[must_use]
    pub const fn view(&self) -> LogView {
        self.view
    }

    /// Index of the event after the cursor.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }
}

impl EventLog {
    /// Cursor before the first event of `view`.
    #[must_use]
    pub const fn cursor_at_start(&self, view: LogView) -> LogCursor {
        LogCursor {
            view,
            position: 0,
            generation: self.generation,
        }
    }

    /// Cursor after the last event of `view`.
    #[must_use]
    pub fn cursor_at_end(&self, view: LogView) -> LogCursor {
        LogCursor {
            view,
            position: self.view_len(view),
            generation: self.generation,
        }
    }

    /// Whether [`Self::move_next`] would succeed.
    ///
    /// # Errors
    ///
    /// [`LogError::ConcurrentModification`] for a stale cursor.
    pub fn has_next(&self, cursor: &LogCursor) -> Result<bool, LogError> {
        self.validate(cursor)?;
        Ok(cursor.position < self.view_len(cursor.view))
    }

    /// Whether [`Self::move_previous`] would succeed.
    ///
    /// # Errors
    ///
    /// [`LogError::ConcurrentModification`] for a stale cursor.
    pub fn has_previous(&self, cursor: &LogCursor) -> Result<bool, LogError> {
        self.validate(cursor)?;
        Ok(cursor.position > 0)
    }

    /// Step over the next event and return it.
    ///
    /// # Errors
    ///
    /// Stale cursor, or the cursor is at the end of its view.
    pub fn move_next(&self, cursor: &mut LogCursor) -> Result<EventRecord, LogError> {
        self.validate(cursor)?;
        let record = self.record_at(cursor.view, cursor.position)?;
        cursor.position += 1;
        Ok(record)
    }

    /// Step back over the previous event and return it.
    ///
    /// # Errors
    ///
    /// Stale cursor, or the cursor is at the start of its view.
    pub fn move_previous(&self, cursor: &mut LogCursor) -> Result<EventRecord, LogError> {
        self.validate(cursor)?;
        let index = cursor.position.checked_sub(1).ok_or(LogError::OutOfBounds {
            position: 0,
            len: self.view_len(cursor.view),
        })?;
        let record = self.record_at(cursor.view, index)?;
        cursor.position = index;
        Ok(record)
    }

    /// Remove the event after the cursor from both views and return it.
    /// The cursor stays valid; every other cursor becomes stale.
    ///
    /// # Errors
    ///
    /// Stale cursor, or the cursor is at the end of its view.
    pub fn remove_at(&mut self, cursor: &mut LogCursor) -> Result<EventRecord, LogError> {
        self.validate(cursor)?;
        let id = self.id_at(cursor.view, cursor.position)?;
        let payload = self
            .remove_event(id, true)?
            .ok_or(LogError::OutOfBounds {
                position: cursor.position,
                len: self.view_len(cursor.view),
            })?;
        cursor.generation = self.generation;
        Ok(EventRecord { id, payload })
    }

    fn validate(&self, cursor: &LogCursor) -> Result<(), LogError> {
        if cursor.generation == self.generation {
            Ok(())
        } else {
            Err(LogError::ConcurrentModification)
        }
    }

    fn view_len(&self, view: LogView) -> usize {
        match view {
            LogView::Global => self.ids.len(),
            LogView::Site(site) => self.sites.get(&site).map_or(0, |b| b.seqnos.len()),
        }
    }

    fn id_at(&self, view: LogView, index: usize) -> Result<EventIdentifier, LogError> {
        let out_of_bounds = LogError::OutOfBounds {
            position: index,
            len: self.view_len(view),
        };
        match view {
            LogView::Global => {
                let packed = self.ids.get(index).map_err(|_| out_of_bounds.clone())?;
                unpack(packed).ok_or(out_of_bounds)
            }
            LogView::Site(site) => {
                let block = self.sites.get(&site).ok_or_else(|| out_of_bounds.clone())?;
                let raw = block.seqnos.get(index).map_err(|_| out_of_bounds.clone())?;
                let seqno = SequenceNumber::new(raw).ok_or(out_of_bounds)?;
                Ok(EventIdentifier::new(seqno, site))
            }
        }
    }

    fn record_at(&self, view: LogView, index: usize) -> Result<EventRecord, LogError> {
        let id = self.id_at(view, index)?;
        let payload = self
            .get(id.seqno(), id.site())
            .ok_or(LogError::OutOfBounds {
                position: index,
                len: self.view_len(view),
            })?;
        Ok(EventRecord { id, payload })
    }
}
