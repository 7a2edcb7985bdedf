//! Deque-backed store.
//!
//! Keeps waiting callers in a `VecDeque` in arrival order. Position lookups
//! and revocations scan the deque, so they are linear in the queue length.
//! Useful as a reference layout for the property suite.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};

use super::{TicketStore, promote_from};
use crate::ticket::{QueueEntry, Ticket};

#[derive(Debug, Default)]
pub struct ScanStore {
    tickets: HashMap<String, Ticket>,
    queue: VecDeque<QueueEntry>,
}

impl ScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, user_id: &str) -> Option<usize> {
        self.queue.iter().position(|e| e.user_id == user_id)
    }
}

impl TicketStore for ScanStore {
    fn ticket(&self, user_id: &str) -> Option<Ticket> {
        self.tickets.get(user_id).cloned()
    }

    fn upsert_ticket(&mut self, ticket: Ticket) {
        self.tickets.insert(ticket.user_id.clone(), ticket);
    }

    fn remove_user(&mut self, user_id: &str) -> bool {
        let dequeued = match self.position(user_id) {
            Some(index) => self.queue.remove(index).is_some(),
            None => false,
        };
        let revoked = self.tickets.remove(user_id).is_some();
        dequeued || revoked
    }

    fn unexpired_count(&self, now: DateTime<Utc>) -> usize {
        self.tickets.values().filter(|t| t.is_unexpired(now)).count()
    }

    fn active_count(&self, now: DateTime<Utc>, activity_cutoff: DateTime<Utc>) -> usize {
        self.tickets
            .values()
            .filter(|t| t.is_active(now, activity_cutoff))
            .count()
    }

    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn requests_ahead(&mut self, user_id: &str, seen_at: Option<DateTime<Utc>>) -> Option<usize> {
        let index = self.position(user_id)?;
        if let Some(seen_at) = seen_at {
            self.queue[index].last_active = seen_at;
        }
        Some(index)
    }

    fn enqueue(&mut self, user_id: &str, last_active: DateTime<Utc>) {
        self.queue.push_back(QueueEntry::new(user_id, last_active));
    }

    fn delete_expired_tickets(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.tickets.len();
        self.tickets.retain(|_, t| t.expires_on >= now);
        before - self.tickets.len()
    }

    fn promote_until_full(
        &mut self,
        now: DateTime<Utc>,
        activity_window: TimeDelta,
        expiration: TimeDelta,
        capacity_limit: usize,
    ) -> bool {
        let queue = &mut self.queue;
        promote_from(
            &mut self.tickets,
            now,
            activity_window,
            expiration,
            capacity_limit,
            || queue.pop_front(),
        )
    }
}
