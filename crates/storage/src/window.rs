#![forbid(unsafe_code)]

use super::StoreError;
use std::collections::VecDeque;

/// Walks the integers in `(start, upper_bound)` that are not in use, reading the
/// used values in ascending windows of `batch_size` so only one window is held at a time.
///
/// `fetch(after, limit)` must return up to `limit` distinct used values `> after` and
/// `< upper_bound`, ascending.
pub(crate) struct FreeSlotCursor<F> {
    candidate: i64,
    upper_bound: i64,
    batch_size: usize,
    fetched_after: i64,
    window: VecDeque<i64>,
    tail_is_free: bool,
    fetch: F,
}

impl<F> FreeSlotCursor<F>
where
    F: FnMut(i64, usize) -> Result<Vec<i64>, StoreError>,
{
    pub(crate) fn new(start_after: i64, upper_bound: i64, batch_size: usize, fetch: F) -> Self {
        Self {
            candidate: start_after.saturating_add(1),
            upper_bound,
            batch_size: batch_size.max(1),
            fetched_after: start_after,
            window: VecDeque::new(),
            tail_is_free: false,
            fetch,
        }
    }

    /// Next free integer, or `None` once the upper bound is reached.
    pub(crate) fn next_slot(&mut self) -> Result<Option<i64>, StoreError> {
        loop {
            if self.candidate >= self.upper_bound {
                return Ok(None);
            }
            if self.window.is_empty() && !self.tail_is_free {
                self.refill()?;
                continue;
            }
            match self.window.front().copied() {
                Some(used) if used < self.candidate => {
                    self.window.pop_front();
                }
                Some(used) if used == self.candidate => {
                    self.window.pop_front();
                    self.candidate += 1;
                }
                _ => {
                    let slot = self.candidate;
                    self.candidate += 1;
                    return Ok(Some(slot));
                }
            }
        }
    }

    /// Takes up to `count` free slots in ascending order.
    pub(crate) fn take(&mut self, count: usize) -> Result<Vec<i64>, StoreError> {
        let mut slots = Vec::with_capacity(count);
        while slots.len() < count {
            match self.next_slot()? {
                Some(slot) => slots.push(slot),
                None => break,
            }
        }
        Ok(slots)
    }

    fn refill(&mut self) -> Result<(), StoreError> {
        let used = (self.fetch)(self.fetched_after, self.batch_size)?;
        tracing::debug!(
            after = self.fetched_after,
            fetched = used.len(),
            "fetched used resource versions"
        );
        if used.len() < self.batch_size {
            self.tail_is_free = true;
        }
        if let Some(&last) = used.last() {
            if last <= self.fetched_after {
                return Err(StoreError::InvalidInput(
                    "used versions must be fetched in ascending order",
                ));
            }
            self.fetched_after = last;
        }
        self.window.extend(used);
        Ok(())
    }
}
