//! Transmission queue ordered by time to send
//!
//! The heap is not authoritative. Entries are never removed from the middle
//! of it; instead `entries` is the source of truth and stale heap entries are
//! discarded when they reach the front, or all at once when more than half
//! of the heap is stale.
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use tracing::{trace, warn};

use crate::error::{Result, SchedulingError};
use crate::message::{Message, MessageId};
use crate::scheduling_error;

/// Seconds on the caller's clock; `0.0` means "send immediately"
#[derive(Clone, Copy, Debug)]
struct SendTime(f64);

impl PartialEq for SendTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for SendTime {}

impl PartialOrd for SendTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SendTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

type HeapEntry = Reverse<(SendTime, MessageId)>;

#[derive(Debug)]
pub struct TransmissionQueue<M> {
    entries: HashMap<MessageId, (M, SendTime)>,
    heap: BinaryHeap<HeapEntry>,
}

impl<M> Default for TransmissionQueue<M> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            heap: BinaryHeap::new(),
        }
    }
}

impl<M> TransmissionQueue<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live messages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Physical size of the ordering heap, stale entries included
    pub fn ordering_len(&self) -> usize {
        self.heap.len()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn time_to_send(&self, id: &MessageId) -> Option<f64> {
        self.entries.get(id).map(|(_, t)| t.0)
    }

    pub fn message_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.entries.keys()
    }
}

impl<M: Message> TransmissionQueue<M> {
    /// Add a message to be sent at `time_to_send`.
    ///
    /// At most one live entry per identifier; the heap may still hold older
    /// references to the same identifier.
    pub fn enqueue(&mut self, message: M, time_to_send: f64) -> Result<()> {
        let id = message.identifier().clone();
        if !time_to_send.is_finite() {
            return Err(scheduling_error!(
                "cannot enqueue message {} at time {}",
                id.short(),
                time_to_send
            ));
        }
        if self.entries.contains_key(&id) {
            warn!("Refusing to enqueue message {}: already queued", id.short());
            return Err(SchedulingError::DuplicateMessage(id).into());
        }

        let time = SendTime(time_to_send);
        self.heap.push(Reverse((time, id.clone())));
        self.entries.insert(id, (message, time));
        Ok(())
    }

    /// Remove a message if present. The heap entry is left behind.
    pub fn dequeue(&mut self, id: &MessageId) -> Option<M> {
        let removed = self.entries.remove(id).map(|(message, _)| message);
        self.rebuild_if_sparse();
        removed
    }

    /// Earliest live entry, discarding stale entries in front of it.
    pub fn peek_earliest(&mut self) -> Option<(f64, &M)> {
        self.trim_front();
        let Reverse((time, id)) = self.heap.peek()?;
        self.entries
            .get(id)
            .map(|(message, _)| (time.0, message))
    }

    /// Remove and return the earliest live entry.
    pub fn pop_earliest(&mut self) -> Option<(f64, M)> {
        self.trim_front();
        let Reverse((time, id)) = self.heap.peek()?;
        let (time, id) = (time.0, id.clone());
        self.dequeue(&id).map(|message| (time, message))
    }

    fn is_live(&self, time: SendTime, id: &MessageId) -> bool {
        matches!(self.entries.get(id), Some((_, current)) if *current == time)
    }

    // An entry is stale when its id was dequeued, or dequeued and enqueued
    // again with a different time.
    fn trim_front(&mut self) {
        while let Some(Reverse((time, id))) = self.heap.peek() {
            if self.is_live(*time, id) {
                return;
            }
            trace!("Discarding stale heap entry for {}", id.short());
            self.heap.pop();
        }
    }

    fn rebuild_if_sparse(&mut self) {
        if self.heap.len() <= 2 * self.entries.len() {
            return;
        }
        trace!(
            "Rebuilding heap: {} entries for {} live messages",
            self.heap.len(),
            self.entries.len()
        );
        self.heap = self
            .entries
            .iter()
            .map(|(id, (_, time))| Reverse((*time, id.clone())))
            .collect();
    }
}

impl<M> fmt::Display for TransmissionQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.entries.keys().take(4).map(|id| id.short()).collect();
        if self.entries.len() > 4 {
            ids.push("...");
        }
        write!(f, "[{}]", ids.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OutboundMessage;

    fn msg(id: &str) -> OutboundMessage {
        OutboundMessage::new(id, vec![0u8; 16])
    }

    #[test]
    fn peek_returns_minimum() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(msg("b"), 5.0).unwrap();
        queue.enqueue(msg("a"), 3.0).unwrap();
        queue.enqueue(msg("c"), 9.0).unwrap();

        let (time, head) = queue.peek_earliest().unwrap();
        assert_eq!(time, 3.0);
        assert_eq!(head.identifier().as_str(), "a");
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn duplicate_enqueue_fails() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(msg("a"), 1.0).unwrap();
        let err = queue.enqueue(msg("a"), 2.0).unwrap_err();
        assert!(err.is_duplicate_message());
        // the first entry is untouched
        assert_eq!(queue.time_to_send(&MessageId::from("a")), Some(1.0));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn non_finite_time_rejected() {
        let mut queue = TransmissionQueue::new();
        for time in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = queue.enqueue(msg("a"), time).unwrap_err();
            assert_eq!(err.error_type(), "scheduling_error");
        }
        assert!(queue.is_empty());
        assert_eq!(queue.ordering_len(), 0);

        // the queue is still usable afterwards
        queue.enqueue(msg("a"), 1.0).unwrap();
        let (time, head) = queue.peek_earliest().unwrap();
        assert_eq!(time, 1.0);
        assert_eq!(head.identifier().as_str(), "a");
    }

    #[test]
    fn send_time_equality_agrees_with_ordering() {
        assert_eq!(SendTime(f64::NAN), SendTime(f64::NAN));
        assert_eq!(SendTime(f64::NAN).cmp(&SendTime(f64::NAN)), Ordering::Equal);
        assert_ne!(SendTime(0.0), SendTime(-0.0));
        assert_eq!(SendTime(0.0).cmp(&SendTime(-0.0)), Ordering::Greater);
    }

    #[test]
    fn dequeued_message_never_peeked() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(msg("a"), 1.0).unwrap();
        queue.enqueue(msg("b"), 2.0).unwrap();
        queue.enqueue(msg("c"), 3.0).unwrap();

        let removed = queue.dequeue(&MessageId::from("a")).unwrap();
        assert_eq!(removed.identifier().as_str(), "a");
        // heap still carries the stale entry: 3 <= 2 * 2
        assert_eq!(queue.ordering_len(), 3);

        let (time, head) = queue.peek_earliest().unwrap();
        assert_eq!(head.identifier().as_str(), "b");
        assert_eq!(time, 2.0);
        assert_eq!(queue.ordering_len(), 2);
    }

    #[test]
    fn dequeue_absent_is_noop() {
        let mut queue: TransmissionQueue<OutboundMessage> = TransmissionQueue::new();
        assert!(queue.dequeue(&MessageId::from("ghost")).is_none());
        queue.enqueue(msg("a"), 1.0).unwrap();
        assert!(queue.dequeue(&MessageId::from("ghost")).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn reenqueue_with_new_time_skips_stale_entry() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(msg("a"), 1.0).unwrap();
        queue.enqueue(msg("b"), 2.0).unwrap();
        queue.dequeue(&MessageId::from("a"));
        queue.enqueue(msg("a"), 5.0).unwrap();

        let (time, head) = queue.peek_earliest().unwrap();
        assert_eq!(head.identifier().as_str(), "b");
        assert_eq!(time, 2.0);

        queue.dequeue(&MessageId::from("b"));
        let (time, head) = queue.peek_earliest().unwrap();
        assert_eq!(head.identifier().as_str(), "a");
        assert_eq!(time, 5.0);
    }

    #[test]
    fn rebuild_when_mostly_stale() {
        let mut queue = TransmissionQueue::new();
        for i in 0..10 {
            queue.enqueue(msg(&format!("m{}", i)), i as f64).unwrap();
        }
        for i in 0..8 {
            queue.dequeue(&MessageId::from(format!("m{}", i)));
            assert!(queue.ordering_len() <= 2 * queue.len());
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.ordering_len(), 4);

        let (time, head) = queue.peek_earliest().unwrap();
        assert_eq!(head.identifier().as_str(), "m8");
        assert_eq!(time, 8.0);
    }

    #[test]
    fn emptying_queue_empties_heap() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(msg("a"), 1.0).unwrap();
        queue.dequeue(&MessageId::from("a"));
        assert!(queue.is_empty());
        assert_eq!(queue.ordering_len(), 0);
        assert!(queue.peek_earliest().is_none());
    }

    #[test]
    fn pop_earliest_removes() {
        let mut queue = TransmissionQueue::new();
        queue.enqueue(msg("late"), 10.0).unwrap();
        queue.enqueue(msg("now"), 0.0).unwrap();

        let (time, first) = queue.pop_earliest().unwrap();
        assert_eq!(time, 0.0);
        assert_eq!(first.identifier().as_str(), "now");
        assert!(!queue.contains(&MessageId::from("now")));

        let (time, second) = queue.pop_earliest().unwrap();
        assert_eq!(time, 10.0);
        assert_eq!(second.identifier().as_str(), "late");
        assert!(queue.pop_earliest().is_none());
    }

    #[test]
    fn display_summarizes_first_four() {
        let mut queue = TransmissionQueue::new();
        assert_eq!(queue.to_string(), "[]");
        queue.enqueue(msg("0123456789"), 1.0).unwrap();
        assert_eq!(queue.to_string(), "[01234567]");
        for i in 0..4 {
            queue.enqueue(msg(&format!("x{}", i)), 2.0).unwrap();
        }
        let summary = queue.to_string();
        assert!(summary.ends_with(", ...]"));
        assert_eq!(summary.matches(", ").count(), 4);
    }

    #[test]
    fn accessors_need_no_message_bound() {
        let queue: TransmissionQueue<()> = TransmissionQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.to_string(), "[]");
    }
}
