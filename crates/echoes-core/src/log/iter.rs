use std::borrow::Cow;
use std::iter::FusedIterator;

use crate::buffer::GapBuffer;
use crate::causal::{EventIdentifier, SequenceNumber, SiteIdentifier, unpack};

use super::{EventLog, EventRecord};

/// A borrowed event. The payload may straddle a buffer gap, so it is held
/// as two slices; [`EventRef::payload`] only copies when it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRef<'a> {
    /// Identifier of the event.
    pub id: EventIdentifier,
    head: &'a [u8],
    tail: &'a [u8],
}

impl<'a> EventRef<'a> {
    /// The payload bytes, borrowed when contiguous.
    #[must_use]
    pub fn payload(&self) -> Cow<'a, [u8]> {
        if self.tail.is_empty() {
            Cow::Borrowed(self.head)
        } else {
            let mut owned = Vec::with_capacity(self.len());
            owned.extend_from_slice(self.head);
            owned.extend_from_slice(self.tail);
            Cow::Owned(owned)
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    /// True for an empty payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy into an owned record.
    #[must_use]
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            id: self.id,
            payload: self.payload().into_owned(),
        }
    }
}

#[derive(Clone, Copy)]
enum Keys<'a> {
    Global(&'a GapBuffer<u64>),
    Site(SiteIdentifier, &'a GapBuffer<u32>),
}

impl Keys<'_> {
    fn id(&self, index: usize) -> Option<EventIdentifier> {
        match self {
            Self::Global(ids) => unpack(ids.get(index).ok()?),
            Self::Site(site, seqnos) => {
                let seqno = SequenceNumber::new(seqnos.get(index).ok()?)?;
                Some(EventIdentifier::new(seqno, *site))
            }
        }
    }
}

#[derive(Clone, Copy)]
struct Source<'a> {
    keys: Keys<'a>,
    lengths: &'a GapBuffer<u32>,
    bytes: &'a GapBuffer<u8>,
}

/// Double-ended iterator over the events of one view of an [`EventLog`].
#[derive(Clone)]
pub struct Events<'a> {
    source: Option<Source<'a>>,
    front: usize,
    front_offset: usize,
    back: usize,
    back_offset: usize,
}

impl<'a> Events<'a> {
    const fn empty() -> Self {
        Self {
            source: None,
            front: 0,
            front_offset: 0,
            back: 0,
            back_offset: 0,
        }
    }

    fn read(source: &Source<'a>, index: usize, start: usize, len: usize) -> Option<EventRef<'a>> {
        let id = source.keys.id(index)?;
        let (head, tail) = source.bytes.slices(start, start + len).ok()?;
        Some(EventRef { id, head, tail })
    }
}

impl<'a> Iterator for Events<'a> {
    type Item = EventRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let source = self.source?;
        let len = source.lengths.get(self.front).ok()? as usize;
        let event = Self::read(&source, self.front, self.front_offset, len)?;
        self.front += 1;
        self.front_offset += len;
        Some(event)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back.saturating_sub(self.front);
        (remaining, Some(remaining))
    }
}

impl DoubleEndedIterator for Events<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let source = self.source?;
        let index = self.back - 1;
        let len = source.lengths.get(index).ok()? as usize;
        let start = self.back_offset - len;
        let event = Self::read(&source, index, start, len)?;
        self.back = index;
        self.back_offset = start;
        Some(event)
    }
}

impl ExactSizeIterator for Events<'_> {}

impl FusedIterator for Events<'_> {}

impl EventLog {
    /// Every event in causal order.
    #[must_use]
    pub fn events(&self) -> Events<'_> {
        Events {
            source: Some(Source {
                keys: Keys::Global(&self.ids),
                lengths: &self.lengths,
                bytes: &self.bytes,
            }),
            front: 0,
            front_offset: 0,
            back: self.ids.len(),
            back_offset: self.bytes.len(),
        }
    }

    /// Events of one site, by ascending sequence number.
    #[must_use]
    pub fn events_of(&self, site: SiteIdentifier) -> Events<'_> {
        self.events_of_from(site, SequenceNumber::MIN)
    }

    /// Events of one site with a sequence number of at least `from`.
    #[must_use]
    pub fn events_of_from(&self, site: SiteIdentifier, from: SequenceNumber) -> Events<'_> {
        let Some(block) = self.sites.get(&site) else {
            return Events::empty();
        };
        let front = match block.index_of(from) {
            Ok(index) | Err(index) => index,
        };
        let Ok(front_offset) = block.offset_of(front) else {
            return Events::empty();
        };
        Events {
            source: Some(Source {
                keys: Keys::Site(site, &block.seqnos),
                lengths: &block.lengths,
                bytes: &block.bytes,
            }),
            front,
            front_offset,
            back: block.seqnos.len(),
            back_offset: block.bytes.len(),
        }
    }
}
