//! Fixed-size pool of pending clock requests.
//!
//! Slots live in a `Vec` and never move; the pending queue holds slot
//! indices ordered by adjusted media time (ascending for forward playback,
//! descending for reverse). Handles carry a generation so a stale
//! [`RequestId`] never matches a recycled slot.

use crate::clock::MediaTime;
use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Completion callback of a request.
///
/// Receives the media time at which the request was serviced, or
/// [`MediaTime::UNKNOWN`] when the request was flushed.
pub type RequestCallback = Box<dyn FnOnce(MediaTime) + Send + 'static>;

/// Handle of an accepted request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId {
    index: u32,
    generation: u32,
}

impl RequestId {
    /// Slot index inside the pool.
    pub fn slot(self) -> usize {
        self.index as usize
    }

    /// Number of times the slot had been recycled when this request was made.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req#{}.{}", self.index, self.generation)
    }
}

/// A pending request.
pub(crate) struct Request {
    pub(crate) id: RequestId,
    pub(crate) requested: MediaTime,
    pub(crate) adjusted: i64,
    pub(crate) callback: RequestCallback,
}

struct Slot {
    generation: u32,
    request: Option<Request>,
}

pub(crate) struct RequestPool {
    slots: Vec<Slot>,
    free: Vec<usize>,
    pending: VecDeque<usize>,
    reverse: bool,
}

impl RequestPool {
    /// Allocate every slot up front.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the slots cannot be allocated.
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        let mut slots = Vec::new();
        let mut free = Vec::new();
        let mut pending = VecDeque::new();
        slots
            .try_reserve_exact(capacity)
            .and_then(|()| free.try_reserve_exact(capacity))
            .and_then(|()| pending.try_reserve_exact(capacity))
            .map_err(|e| {
                tracing::error!(capacity, error = %e, "request pool allocation failed");
                Error::OutOfMemory
            })?;

        slots.resize_with(capacity, || Slot {
            generation: 0,
            request: None,
        });
        // Lowest index is handed out first
        free.extend((0..capacity).rev());
        Ok(Self {
            slots,
            free,
            pending,
            reverse: false,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn available(&self) -> usize {
        self.free.len()
    }

    fn adjusted_at(&self, slot: usize) -> i64 {
        self.slots[slot]
            .request
            .as_ref()
            .map_or(0, |r| r.adjusted)
    }

    /// True if `a` is serviced no later than `b` in the current direction.
    fn in_order(&self, a: i64, b: i64) -> bool {
        if self.reverse { a >= b } else { a <= b }
    }

    /// Queue a request, keeping the pending order.
    pub(crate) fn insert(
        &mut self,
        requested: MediaTime,
        adjusted: i64,
        callback: RequestCallback,
    ) -> Result<RequestId> {
        let Some(slot) = self.free.pop() else {
            return Err(Error::OutOfResources(format!(
                "all {} request slots in use",
                self.capacity()
            )));
        };

        let id = RequestId {
            index: slot as u32,
            generation: self.slots[slot].generation,
        };
        self.slots[slot].request = Some(Request {
            id,
            requested,
            adjusted,
            callback,
        });

        // Requests usually arrive in order, so try the back first
        match self.pending.back().copied() {
            Some(last) if !self.in_order(self.adjusted_at(last), adjusted) => {
                let pos = self
                    .pending
                    .iter()
                    .position(|&s| !self.in_order(self.adjusted_at(s), adjusted))
                    .unwrap_or(self.pending.len());
                self.pending.insert(pos, slot);
            }
            _ => self.pending.push_back(slot),
        }

        Ok(id)
    }

    /// Adjusted time of the next request to service.
    pub(crate) fn front_adjusted(&self) -> Option<i64> {
        self.pending.front().map(|&s| self.adjusted_at(s))
    }

    /// Take the next request and recycle its slot.
    pub(crate) fn pop_front(&mut self) -> Option<Request> {
        let slot = self.pending.pop_front()?;
        self.release(slot)
    }

    /// Take every pending request in service order.
    pub(crate) fn drain(&mut self) -> Vec<Request> {
        let mut out = Vec::with_capacity(self.pending.len());
        while let Some(req) = self.pop_front() {
            out.push(req);
        }
        out
    }

    fn release(&mut self, slot: usize) -> Option<Request> {
        let entry = &mut self.slots[slot];
        let request = entry.request.take();
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);
        request
    }

    /// Switch the service direction, reordering what is pending.
    pub(crate) fn set_reverse(&mut self, reverse: bool) {
        if self.reverse == reverse {
            return;
        }
        self.reverse = reverse;
        let mut pending: Vec<usize> = self.pending.drain(..).collect();
        pending.sort_by_key(|&s| self.adjusted_at(s));
        if reverse {
            pending.reverse();
        }
        self.pending.extend(pending);
    }

    /// Requested media times in service order.
    #[cfg(test)]
    pub(crate) fn pending_times(&self) -> Vec<i64> {
        self.pending
            .iter()
            .filter_map(|&s| self.slots[s].request.as_ref())
            .map(|r| r.requested.as_micros())
            .collect()
    }
}
