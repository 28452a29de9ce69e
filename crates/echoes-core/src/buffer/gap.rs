use std::fmt;

use super::BufferError;

const MIN_CAPACITY: usize = 16;

/// A growable sequence of `Copy` values with a movable gap.
///
/// Elements live in `data[..gap_start]` and `data[gap_end..]`; the slots in
/// between are free capacity.
#[derive(Clone)]
pub struct GapBuffer<T> {
    data: Vec<T>,
    gap_start: usize,
    gap_end: usize,
    generation: u64,
}

/// A position between two elements of a [`GapBuffer`], detached from any
/// borrow of the buffer.
///
/// Position `p` sits before element `p`: [`GapBuffer::move_next`] returns
/// element `p` and [`GapBuffer::move_previous`] returns element `p - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    position: usize,
    generation: u64,
}

impl Cursor {
    /// Index of the element the cursor sits before.
    #[must_use]
    pub const fn position(self) -> usize {
        self.position
    }
}

impl<T: Copy + Default> GapBuffer<T> {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            gap_start: 0,
            gap_end: 0,
            generation: 0,
        }
    }

    /// Create an empty buffer with room for `capacity` elements.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            gap_start: 0,
            gap_end: capacity,
            generation: 0,
        }
    }

    /// Build a buffer holding `values`.
    #[must_use]
    pub fn from_slice(values: &[T]) -> Self {
        let mut buffer = Self::with_capacity(values.len());
        buffer.extend_from_slice(values);
        buffer
    }

    /// Number of stored elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() - self.gap_len()
    }

    /// True when no element is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots, including the gap.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Counter bumped by every structural change.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Element at `index`.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfBounds`] if `index >= len`.
    pub fn get(&self, index: usize) -> Result<T, BufferError> {
        self.check_range(index, 1)?;
        Ok(self.data[self.physical(index)])
    }

    /// Overwrite the element at `index`. Not a structural change.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfBounds`] if `index >= len`.
    pub fn set(&mut self, index: usize, value: T) -> Result<(), BufferError> {
        self.check_range(index, 1)?;
        let physical = self.physical(index);
        self.data[physical] = value;
        Ok(())
    }

    /// First element, if any.
    #[must_use]
    pub fn first(&self) -> Option<T> {
        self.get(0).ok()
    }

    /// Last element, if any.
    #[must_use]
    pub fn last(&self) -> Option<T> {
        self.len().checked_sub(1).and_then(|i| self.get(i).ok())
    }

    /// Append one element at the end.
    pub fn push(&mut self, value: T) {
        let len = self.len();
        self.splice_in(len, &[value]);
    }

    /// Append every element of `values` at the end.
    pub fn extend_from_slice(&mut self, values: &[T]) {
        let len = self.len();
        self.splice_in(len, values);
    }

    /// Insert one element before `offset`.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfBounds`] if `offset > len`.
    pub fn insert(&mut self, offset: usize, value: T) -> Result<(), BufferError> {
        self.check_position(offset)?;
        self.splice_in(offset, &[value]);
        Ok(())
    }

    /// Insert `values[from..until]` before `offset`. An empty range is a
    /// no-op and does not count as a structural change.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfBounds`] if `offset > len`, or if `from..until`
    /// is not a valid range of `values`.
    pub fn insert_range(
        &mut self,
        offset: usize,
        values: &[T],
        from: usize,
        until: usize,
    ) -> Result<(), BufferError> {
        self.check_position(offset)?;
        if from > until || until > values.len() {
            return Err(BufferError::OutOfBounds {
                offset: from,
                count: until.saturating_sub(from),
                len: values.len(),
            });
        }
        if from < until {
            self.splice_in(offset, &values[from..until]);
        }
        Ok(())
    }

    /// Remove `count` elements starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfBounds`] if `offset + count > len`.
    pub fn remove(&mut self, offset: usize, count: usize) -> Result<(), BufferError> {
        self.check_range(offset, count)?;
        if count > 0 {
            self.splice_out(offset, count);
        }
        Ok(())
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Option<T> {
        let last = self.last()?;
        self.splice_out(self.len() - 1, 1);
        Some(last)
    }

    /// Remove every element, keeping the allocation.
    pub fn clear(&mut self) {
        self.gap_start = 0;
        self.gap_end = self.data.len();
        self.generation = self.generation.wrapping_add(1);
    }

    /// The elements in `start..end` as at most two contiguous slices.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfBounds`] if the range does not fit.
    pub fn slices(&self, start: usize, end: usize) -> Result<(&[T], &[T]), BufferError> {
        if start > end {
            return Err(BufferError::OutOfBounds {
                offset: start,
                count: 0,
                len: self.len(),
            });
        }
        self.check_range(start, end - start)?;
        let gap = self.gap_len();
        if end <= self.gap_start {
            Ok((&self.data[start..end], &[]))
        } else if start >= self.gap_start {
            Ok((&self.data[start + gap..end + gap], &[]))
        } else {
            Ok((
                &self.data[start..self.gap_start],
                &self.data[self.gap_end..end + gap],
            ))
        }
    }

    /// Copy `start..end` into a new vector.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfBounds`] if the range does not fit.
    pub fn to_vec_range(&self, start: usize, end: usize) -> Result<Vec<T>, BufferError> {
        let (head, tail) = self.slices(start, end)?;
        let mut out = Vec::with_capacity(head.len() + tail.len());
        out.extend_from_slice(head);
        out.extend_from_slice(tail);
        Ok(out)
    }

    /// Copy every element into a new vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.data[..self.gap_start]);
        out.extend_from_slice(&self.data[self.gap_end..]);
        out
    }

    /// Borrowing iterator over every element, front to back.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = T> + '_ {
        self.data[..self.gap_start]
            .iter()
            .chain(self.data[self.gap_end..].iter())
            .copied()
    }

    /// Index of the first element for which `pred` is false, assuming the
    /// buffer is partitioned by `pred` (all `true` before all `false`).
    pub fn partition_point(&self, mut pred: impl FnMut(T) -> bool) -> usize {
        let mut low = 0;
        let mut high = self.len();
        while low < high {
            let mid = low + (high - low) / 2;
            if pred(self.data[self.physical(mid)]) {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    // -- cursors ------------------------------------------------------------

    /// Cursor before element `position`.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfBounds`] if `position > len`.
    pub fn cursor(&self, position: usize) -> Result<Cursor, BufferError> {
        self.check_position(position)?;
        Ok(Cursor {
            position,
            generation: self.generation,
        })
    }

    /// Cursor before the first element.
    #[must_use]
    pub const fn cursor_at_start(&self) -> Cursor {
        Cursor {
            position: 0,
            generation: self.generation,
        }
    }

    /// Cursor after the last element.
    #[must_use]
    pub fn cursor_at_end(&self) -> Cursor {
        Cursor {
            position: self.len(),
            generation: self.generation,
        }
    }

    /// Whether [`Self::move_next`] would succeed.
    ///
    /// # Errors
    ///
    /// [`BufferError::ConcurrentModification`] for a stale cursor.
    pub fn has_next(&self, cursor: &Cursor) -> Result<bool, BufferError> {
        self.validate(cursor)?;
        Ok(cursor.position < self.len())
    }

    /// Whether [`Self::move_previous`] would succeed.
    ///
    /// # Errors
    ///
    /// [`BufferError::ConcurrentModification`] for a stale cursor.
    pub fn has_previous(&self, cursor: &Cursor) -> Result<bool, BufferError> {
        self.validate(cursor)?;
        Ok(cursor.position > 0)
    }

    /// The element after the cursor, without moving.
    ///
    /// # Errors
    ///
    /// Stale cursor, or the cursor is at the end.
    pub fn current(&self, cursor: &Cursor) -> Result<T, BufferError> {
        self.validate(cursor)?;
        self.get(cursor.position)
    }

    /// Step over the next element and return it.
    ///
    /// # Errors
    ///
    /// Stale cursor, or the cursor is at the end.
    pub fn move_next(&self, cursor: &mut Cursor) -> Result<T, BufferError> {
        let value = self.current(cursor)?;
        cursor.position += 1;
        Ok(value)
    }

    /// Step back over the previous element and return it.
    ///
    /// # Errors
    ///
    /// Stale cursor, or the cursor is at the start.
    pub fn move_previous(&self, cursor: &mut Cursor) -> Result<T, BufferError> {
        self.validate(cursor)?;
        let index = cursor
            .position
            .checked_sub(1)
            .ok_or(BufferError::OutOfBounds {
                offset: 0,
                count: 1,
                len: self.len(),
            })?;
        let value = self.get(index)?;
        cursor.position = index;
        Ok(value)
    }

    /// Insert `value` at the cursor; the cursor ends up after it and stays
    /// valid. Every other cursor becomes stale.
    ///
    /// # Errors
    ///
    /// [`BufferError::ConcurrentModification`] for a stale cursor.
    pub fn insert_at(&mut self, cursor: &mut Cursor, value: T) -> Result<(), BufferError> {
        self.validate(cursor)?;
        self.splice_in(cursor.position, &[value]);
        cursor.position += 1;
        cursor.generation = self.generation;
        Ok(())
    }

    /// Remove and return the element after the cursor; the cursor stays
    /// valid. Every other cursor becomes stale.
    ///
    /// # Errors
    ///
    /// Stale cursor, or the cursor is at the end.
    pub fn remove_at(&mut self, cursor: &mut Cursor) -> Result<T, BufferError> {
        let value = self.current(cursor)?;
        self.splice_out(cursor.position, 1);
        cursor.generation = self.generation;
        Ok(value)
    }

    // -- internals ----------------------------------------------------------

    const fn gap_len(&self) -> usize {
        self.gap_end - self.gap_start
    }

    const fn physical(&self, index: usize) -> usize {
        if index < self.gap_start {
            index
        } else {
            index + self.gap_len()
        }
    }

    fn validate(&self, cursor: &Cursor) -> Result<(), BufferError> {
        if cursor.generation == self.generation {
            Ok(())
        } else {
            Err(BufferError::ConcurrentModification)
        }
    }

    fn check_position(&self, offset: usize) -> Result<(), BufferError> {
        if offset > self.len() {
            return Err(BufferError::OutOfBounds {
                offset,
                count: 0,
                len: self.len(),
            });
        }
        Ok(())
    }

    fn check_range(&self, offset: usize, count: usize) -> Result<(), BufferError> {
        match offset.checked_add(count) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(BufferError::OutOfBounds {
                offset,
                count,
                len: self.len(),
            }),
        }
    }

    fn move_gap(&mut self, offset: usize) {
        if offset < self.gap_start {
            let moved = self.gap_start - offset;
            self.data
                .copy_within(offset..self.gap_start, self.gap_end - moved);
            self.gap_start = offset;
            self.gap_end -= moved;
        } else if offset > self.gap_start {
            let moved = offset - self.gap_start;
            self.data
                .copy_within(self.gap_end..self.gap_end + moved, self.gap_start);
            self.gap_start += moved;
            self.gap_end += moved;
        }
    }

    fn reserve_gap(&mut self, additional: usize) {
        if self.gap_len() >= additional {
            return;
        }
        let old_capacity = self.data.len();
        let needed = self.len() + additional;
        let new_capacity = needed.max(old_capacity * 2).max(MIN_CAPACITY);
        let suffix = old_capacity - self.gap_end;

        let mut data = vec![T::default(); new_capacity];
        data[..self.gap_start].copy_from_slice(&self.data[..self.gap_start]);
        data[new_capacity - suffix..].copy_from_slice(&self.data[self.gap_end..]);
        self.data = data;
        self.gap_end = new_capacity - suffix;
    }

    fn splice_in(&mut self, offset: usize, values: &[T]) {
        self.reserve_gap(values.len());
        self.move_gap(offset);
        let end = self.gap_start + values.len();
        self.data[self.gap_start..end].copy_from_slice(values);
        self.gap_start = end;
        self.generation = self.generation.wrapping_add(1);
    }

    fn splice_out(&mut self, offset: usize, count: usize) {
        self.move_gap(offset);
        self.gap_end += count;
        self.generation = self.generation.wrapping_add(1);
    }
}

impl<T: Copy + Default> Default for GapBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default + PartialEq> PartialEq for GapBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Copy + Default + Eq> Eq for GapBuffer<T> {}

impl<T: Copy + Default + fmt::Debug> fmt::Debug for GapBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
