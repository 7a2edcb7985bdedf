//! "Take a number" store.
//!
//! Every enqueued caller draws the next value of a counter that only ever
//! grows. A serving cursor trails behind it: the distance between a caller's
//! number and the cursor is its position, and the distance between the
//! counter and the cursor is the queue length. Revoked entries leave holes
//! that the cursor steps over during promotion.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

use super::{TicketStore, promote_from};
use crate::ticket::{QueueEntry, Ticket};

#[derive(Debug, Default)]
pub struct NumberedStore {
    tickets: HashMap<String, Ticket>,
    numbers: HashMap<String, u64>,
    waiting: HashMap<u64, QueueEntry>,
    now_serving: u64,
    next_number: u64,
}

impl NumberedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the next entry eligible for promotion.
    pub fn now_serving(&self) -> u64 {
        self.now_serving
    }

    /// Sequence number the next enqueued caller will draw.
    pub fn next_number(&self) -> u64 {
        self.next_number
    }
}

impl TicketStore for NumberedStore {
    fn ticket(&self, user_id: &str) -> Option<Ticket> {
        self.tickets.get(user_id).cloned()
    }

    fn upsert_ticket(&mut self, ticket: Ticket) {
        self.tickets.insert(ticket.user_id.clone(), ticket);
    }

    fn remove_user(&mut self, user_id: &str) -> bool {
        let dequeued = match self.numbers.remove(user_id) {
            Some(number) => self.waiting.remove(&number).is_some(),
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
        usize::try_from(self.next_number - self.now_serving).unwrap_or(usize::MAX)
    }

    fn requests_ahead(&mut self, user_id: &str, seen_at: Option<DateTime<Utc>>) -> Option<usize> {
        let number = *self.numbers.get(user_id)?;
        if number < self.now_serving {
            return None;
        }
        let entry = self.waiting.get_mut(&number)?;
        if let Some(seen_at) = seen_at {
            entry.last_active = seen_at;
        }
        usize::try_from(number - self.now_serving).ok()
    }

    fn enqueue(&mut self, user_id: &str, last_active: DateTime<Utc>) {
        let number = self.next_number;
        self.numbers.insert(user_id.to_string(), number);
        self.waiting
            .insert(number, QueueEntry::new(user_id, last_active));
        self.next_number += 1;
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
        let waiting = &mut self.waiting;
        let numbers = &mut self.numbers;
        let now_serving = &mut self.now_serving;
        let next_number = self.next_number;

        promote_from(
            &mut self.tickets,
            now,
            activity_window,
            expiration,
            capacity_limit,
            || {
                while *now_serving < next_number {
                    let number = *now_serving;
                    *now_serving += 1;
                    if let Some(entry) = waiting.remove(&number) {
                        numbers.remove(&entry.user_id);
                        return Some(entry);
                    }
                }
                None
            },
        )
    }
}
