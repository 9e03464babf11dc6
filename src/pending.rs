// Pending-load coordinator
// Tracks frames that one requester is currently decoding, and the other
// requesters queued behind each load. Every requester holds a ticket; when
// a load finishes its outcome is delivered per ticket, so a waiter woken by
// the shared broadcast can tell whether its own request has been served.

use std::collections::HashMap;

use crate::decoder::FrameIndex;
use crate::error::CacheError;
use crate::slot::SlotId;

pub(crate) type Ticket = u64;

/// Outcome delivered to a waiting requester.
pub(crate) type Delivery = Result<SlotId, CacheError>;

#[derive(Debug)]
pub(crate) struct PendingLoad {
    pub loader: Ticket,
    pub waiters: Vec<Ticket>,
}

#[derive(Debug, Default)]
pub(crate) struct PendingLoads {
    loads: HashMap<FrameIndex, PendingLoad>,
    deliveries: HashMap<Ticket, Delivery>,
    next_ticket: Ticket,
}

impl PendingLoads {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    pub fn contains(&self, index: FrameIndex) -> bool {
        self.loads.contains_key(&index)
    }

    /// Register a new load of `index`; the caller becomes its loader.
    pub fn begin(&mut self, index: FrameIndex) -> Ticket {
        let loader = self.issue();
        let previous = self.loads.insert(index, PendingLoad { loader, waiters: Vec::new() });
        debug_assert!(previous.is_none(), "frame {index} already pending");
        loader
    }

    /// Queue behind an in-flight load, if there is one.
    pub fn join(&mut self, index: FrameIndex) -> Option<Ticket> {
        if !self.loads.contains_key(&index) {
            return None;
        }
        let ticket = self.issue();
        self.loads.get_mut(&index)?.waiters.push(ticket);
        Some(ticket)
    }

    /// Close the load of `index`, handing back its requesters.
    pub fn complete(&mut self, index: FrameIndex) -> Option<PendingLoad> {
        self.loads.remove(&index)
    }

    pub fn deliver(&mut self, ticket: Ticket, outcome: Delivery) {
        self.deliveries.insert(ticket, outcome);
    }

    pub fn take(&mut self, ticket: Ticket) -> Option<Delivery> {
        self.deliveries.remove(&ticket)
    }

    /// Withdraw a waiter that gives up before its load completes.
    pub fn abandon(&mut self, index: FrameIndex, ticket: Ticket) -> bool {
        match self.loads.get_mut(&index) {
            Some(load) => {
                let before = load.waiters.len();
                load.waiters.retain(|&t| t != ticket);
                load.waiters.len() != before
            }
            None => false,
        }
    }

    /// Number of frames currently being decoded.
    pub fn loading(&self) -> usize {
        self.loads.len()
    }

    /// Requesters queued behind a loader, across all loads.
    pub fn waiting(&self) -> usize {
        self.loads.values().map(|load| load.waiters.len()).sum()
    }

    #[cfg(test)]
    pub fn undelivered(&self) -> usize {
        self.deliveries.len()
    }

    #[cfg(test)]
    pub fn indices(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        self.loads.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_join() {
        let mut pending = PendingLoads::new();
        assert_eq!(pending.join(3), None);
        let loader = pending.begin(3);
        let w1 = pending.join(3).unwrap();
        let w2 = pending.join(3).unwrap();
        assert_ne!(w1, w2);
        assert_ne!(loader, w1);
        assert!(pending.contains(3));
        assert_eq!(pending.waiting(), 2);

        let load = pending.complete(3).unwrap();
        assert_eq!(load.loader, loader);
        assert_eq!(load.waiters, vec![w1, w2]);
        assert!(!pending.contains(3));
        assert_eq!(pending.loading(), 0);
    }

    #[test]
    fn test_deliveries_are_per_ticket() {
        let mut pending = PendingLoads::new();
        pending.begin(1);
        let w = pending.join(1).unwrap();
        pending.complete(1);
        pending.deliver(w, Err(CacheError::CacheInvalid));
        assert_eq!(pending.take(w + 100), None);
        assert_eq!(pending.take(w), Some(Err(CacheError::CacheInvalid)));
        assert_eq!(pending.take(w), None);
        assert_eq!(pending.undelivered(), 0);
    }

    #[test]
    fn test_abandon_removes_waiter() {
        let mut pending = PendingLoads::new();
        pending.begin(5);
        let w = pending.join(5).unwrap();
        assert!(pending.abandon(5, w));
        assert!(!pending.abandon(5, w));
        assert_eq!(pending.complete(5).unwrap().waiters, Vec::<Ticket>::new());
    }
}
