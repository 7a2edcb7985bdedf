//! Ticket and queue storage.
//!
//! A store owns the admitted tickets and the waiting queue. Every method
//! assumes exclusive access; `AdmissionController` serializes callers.
//!
//! Two layouts are provided:
//! - [`NumberedStore`]: "take a number". Each queue entry holds a sequence
//!   number and a serving cursor trails them, so position queries are O(1).
//! - [`ScanStore`]: an ordered deque with linear position lookup.

mod numbered;
mod scan;

use chrono::{DateTime, TimeDelta, Utc};

pub use numbered::NumberedStore;
pub use scan::ScanStore;

use crate::ticket::{QueueEntry, Ticket};

pub trait TicketStore: Send {
    fn ticket(&self, user_id: &str) -> Option<Ticket>;

    /// Insert or overwrite by `ticket.user_id`.
    fn upsert_ticket(&mut self, ticket: Ticket);

    /// Drop both the ticket and the queue entry of `user_id`.
    ///
    /// Returns whether anything was removed.
    fn remove_user(&mut self, user_id: &str) -> bool;

    fn unexpired_count(&self, now: DateTime<Utc>) -> usize;

    fn active_count(&self, now: DateTime<Utc>, activity_cutoff: DateTime<Utc>) -> usize;

    fn queue_len(&self) -> usize;

    /// Entries that will be promoted before `user_id`, or `None` when it is
    /// not waiting. With `seen_at`, the entry's activity is refreshed.
    fn requests_ahead(&mut self, user_id: &str, seen_at: Option<DateTime<Utc>>) -> Option<usize>;

    /// Append `user_id` to the back of the queue. The caller guarantees it is
    /// not already queued.
    fn enqueue(&mut self, user_id: &str, last_active: DateTime<Utc>);

    /// Remove every ticket with `expires_on < now`. The queue is untouched.
    fn delete_expired_tickets(&mut self, now: DateTime<Utc>) -> usize;

    /// Move waiting callers into free slots, oldest first.
    ///
    /// Stale entries met on the way are discarded without consuming a slot.
    /// Returns `true` when every slot is taken afterwards and `false` when the
    /// queue ran dry first, leaving room for a newcomer.
    fn promote_until_full(
        &mut self,
        now: DateTime<Utc>,
        activity_window: TimeDelta,
        expiration: TimeDelta,
        capacity_limit: usize,
    ) -> bool;
}

pub(crate) fn activity_cutoff(now: DateTime<Utc>, activity_window: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(activity_window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn expiry_from(now: DateTime<Utc>, expiration: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(expiration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Shared promotion loop.
///
/// `next` pops the entry at the head of the queue (advancing past any holes)
/// and returns `None` once the queue is exhausted.
pub(crate) fn promote_from<F>(
    tickets: &mut std::collections::HashMap<String, Ticket>,
    now: DateTime<Utc>,
    activity_window: TimeDelta,
    expiration: TimeDelta,
    capacity_limit: usize,
    mut next: F,
) -> bool
where
    F: FnMut() -> Option<QueueEntry>,
{
    let cutoff = activity_cutoff(now, activity_window);
    let active = tickets
        .values()
        .filter(|t| t.is_active(now, cutoff))
        .count();
    let open_spots = capacity_limit.saturating_sub(active);
    if open_spots == 0 {
        return true;
    }

    let mut filled = 0;
    let mut discarded = 0;
    while filled < open_spots {
        let Some(entry) = next() else {
            break;
        };
        if entry.is_stale(cutoff) {
            discarded += 1;
            continue;
        }
        tracing::debug!(user_id = %entry.user_id, "Promoting queued caller");
        let ticket = Ticket::new(entry.user_id, expiry_from(now, expiration), now);
        tickets.insert(ticket.user_id.clone(), ticket);
        filled += 1;
    }

    if discarded > 0 {
        tracing::debug!(discarded, "Discarded stale queue entries");
    }
    filled == open_spots
}

/// Property suite shared by every store layout.
#[cfg(test)]
macro_rules! store_contract_tests {
    ($store:ty) => {
        use chrono::{DateTime, TimeDelta, TimeZone, Utc};

        use crate::store::TicketStore;
        use crate::ticket::Ticket;

        fn now() -> DateTime<Utc> {
            Utc.timestamp_opt(1_700_000_000, 0).unwrap()
        }

        fn store() -> $store {
            <$store>::default()
        }

        fn mins(n: i64) -> TimeDelta {
            TimeDelta::minutes(n)
        }

        #[test]
        fn unexpired_count_ignores_expired() {
            let mut s = store();
            let now = now();
            s.upsert_ticket(Ticket::new("a", now + mins(1), now));
            s.upsert_ticket(Ticket::new("b", now - mins(1), now));
            assert_eq!(s.unexpired_count(now), 1);
        }

        #[test]
        fn active_count_ignores_idle() {
            let mut s = store();
            let now = now();
            s.upsert_ticket(Ticket::new("a", now + mins(1), now));
            s.upsert_ticket(Ticket::new("b", now + mins(1), now - mins(10)));
            assert_eq!(s.active_count(now, now - mins(5)), 1);
        }

        #[test]
        fn queue_len_counts_enqueued() {
            let mut s = store();
            assert_eq!(s.queue_len(), 0);
            s.enqueue("a", now());
            assert_eq!(s.queue_len(), 1);
        }

        #[test]
        fn requests_ahead_absent_when_not_queued() {
            let mut s = store();
            assert_eq!(s.requests_ahead("missing", None), None);
        }

        #[test]
        fn requests_ahead_follows_enqueue_order() {
            let mut s = store();
            let now = now();
            s.enqueue("first", now);
            s.enqueue("second", now);
            s.enqueue("third", now);
            assert_eq!(s.requests_ahead("first", None), Some(0));
            assert_eq!(s.requests_ahead("second", None), Some(1));
            assert_eq!(s.requests_ahead("third", None), Some(2));
        }

        #[test]
        fn delete_expired_tickets_keeps_live_ones() {
            let mut s = store();
            let now = now();
            s.upsert_ticket(Ticket::new("a", now - mins(1), now));
            s.upsert_ticket(Ticket::new("b", now + mins(1), now));
            assert_eq!(s.delete_expired_tickets(now), 1);
            assert!(s.ticket("a").is_none());
            assert!(s.ticket("b").is_some());
        }

        #[test]
        fn delete_expired_tickets_leaves_queue_alone() {
            let mut s = store();
            let now = now();
            s.enqueue("waiting", now - mins(60));
            assert_eq!(s.delete_expired_tickets(now), 0);
            assert_eq!(s.queue_len(), 1);
        }

        #[test]
        fn upsert_overwrites() {
            let mut s = store();
            let now = now();
            s.upsert_ticket(Ticket::new("a", now, now));
            s.upsert_ticket(Ticket::new("a", now + mins(1), now));
            assert_eq!(s.ticket("a").unwrap().expires_on, now + mins(1));
            assert_eq!(s.unexpired_count(now), 1);
        }

        #[test]
        fn remove_user_clears_ticket_and_queue_entry() {
            let mut s = store();
            let now = now();
            s.enqueue("a", now);
            s.upsert_ticket(Ticket::new("a", now + mins(1), now));
            assert!(s.remove_user("a"));
            assert!(s.ticket("a").is_none());
            assert_eq!(s.requests_ahead("a", None), None);
        }

        #[test]
        fn remove_user_reports_queue_only_removal() {
            let mut s = store();
            s.enqueue("a", now());
            assert!(s.remove_user("a"));
            assert!(!s.remove_user("a"));
        }

        #[test]
        fn remove_user_unknown_is_false() {
            let mut s = store();
            assert!(!s.remove_user("nobody"));
        }

        #[test]
        fn promote_fills_open_spot() {
            let mut s = store();
            let now = now();
            s.enqueue("a", now);
            assert!(s.promote_until_full(now, mins(1), mins(1), 1));
            let ticket = s.ticket("a").unwrap();
            assert_eq!(ticket.expires_on, now + mins(1));
            assert_eq!(ticket.last_active, now);
            assert_eq!(s.queue_len(), 0);
            assert_eq!(s.requests_ahead("a", None), None);
        }

        #[test]
        fn promote_reports_full_without_open_spots() {
            let mut s = store();
            let now = now();
            s.upsert_ticket(Ticket::new("a", now + mins(1), now));
            s.enqueue("b", now);
            assert!(s.promote_until_full(now, mins(1), mins(1), 0));
            assert!(s.promote_until_full(now, mins(1), mins(1), 1));
            assert!(s.ticket("b").is_none());
            assert_eq!(s.queue_len(), 1);
        }

        #[test]
        fn promote_reports_spare_capacity_when_queue_runs_dry() {
            let mut s = store();
            let now = now();
            s.enqueue("a", now);
            assert!(!s.promote_until_full(now, mins(1), mins(1), 3));
            assert!(s.ticket("a").is_some());
        }

        #[test]
        fn promote_discards_stale_entries() {
            let mut s = store();
            let now = now();
            s.enqueue("inactive", now - mins(10));
            s.enqueue("active", now);
            assert!(s.promote_until_full(now, mins(5), mins(1), 1));
            assert!(s.ticket("inactive").is_none());
            assert!(s.ticket("active").is_some());
            assert_eq!(s.requests_ahead("inactive", None), None);
            assert_eq!(s.queue_len(), 0);
        }

        #[test]
        fn promote_preserves_fifo_order() {
            let mut s = store();
            let now = now();
            s.enqueue("first", now);
            s.enqueue("second", now);
            s.enqueue("third", now);
            assert!(s.promote_until_full(now, mins(60), mins(1), 1));
            assert!(s.ticket("first").is_some());
            assert!(s.ticket("second").is_none());
            assert!(s.ticket("third").is_none());
            assert_eq!(s.requests_ahead("second", None), Some(0));
            assert_eq!(s.requests_ahead("third", None), Some(1));
        }

        #[test]
        fn promote_replaces_idle_ticket_holders() {
            let mut s = store();
            let now = now();
            s.upsert_ticket(Ticket::new("idle", now + mins(10), now - mins(10)));
            s.enqueue("next", now);
            assert!(s.promote_until_full(now, mins(5), mins(10), 1));
            assert!(s.ticket("next").is_some());
            assert_eq!(s.active_count(now, now - mins(5)), 1);
        }

        #[test]
        fn requests_ahead_touch_keeps_entry_fresh() {
            let mut s = store();
            let start = now();
            s.enqueue("a", start);
            let later = start + mins(10);
            assert_eq!(s.requests_ahead("a", Some(later)), Some(0));
            assert!(s.promote_until_full(later, mins(5), mins(1), 1));
            assert!(s.ticket("a").is_some());
        }

        #[test]
        fn requests_ahead_without_touch_lets_entry_go_stale() {
            let mut s = store();
            let start = now();
            s.enqueue("a", start);
            let later = start + mins(10);
            assert_eq!(s.requests_ahead("a", None), Some(0));
            assert!(!s.promote_until_full(later, mins(5), mins(1), 1));
            assert!(s.ticket("a").is_none());
        }

        #[test]
        fn capacity_never_exceeded_by_promotion() {
            let mut s = store();
            let now = now();
            for i in 0..20 {
                s.enqueue(&format!("user-{i}"), now);
            }
            assert!(s.promote_until_full(now, mins(5), mins(5), 7));
            assert_eq!(s.active_count(now, now - mins(5)), 7);
            assert_eq!(s.queue_len(), 13);
            assert_eq!(s.requests_ahead("user-7", None), Some(0));
        }
    };
}

#[cfg(test)]
pub(crate) use store_contract_tests;
