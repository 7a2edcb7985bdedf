//! Ticket, queue entry and response records.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Grant of one capacity slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub user_id: String,
    pub expires_on: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Ticket {
    pub fn new(user_id: impl Into<String>, expires_on: DateTime<Utc>, last_active: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            expires_on,
            last_active,
        }
    }

    pub fn is_unexpired(&self, now: DateTime<Utc>) -> bool {
        self.expires_on > now
    }

    /// Unexpired and seen after `activity_cutoff`.
    pub fn is_active(&self, now: DateTime<Utc>, activity_cutoff: DateTime<Utc>) -> bool {
        self.is_unexpired(now) && self.last_active > activity_cutoff
    }
}

/// A caller waiting for a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub user_id: String,
    pub last_active: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(user_id: impl Into<String>, last_active: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            last_active,
        }
    }

    /// Not seen since `activity_cutoff`; discarded instead of promoted.
    pub fn is_stale(&self, activity_cutoff: DateTime<Utc>) -> bool {
        self.last_active < activity_cutoff
    }
}

/// Outcome of a single access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessResponse {
    /// Present when the caller holds a slot.
    pub expires_on: Option<DateTime<Utc>>,
    /// Queue entries that will be promoted before this caller. Zero when admitted.
    pub requests_ahead: usize,
}

impl AccessResponse {
    pub fn admitted(expires_on: DateTime<Utc>) -> Self {
        Self {
            expires_on: Some(expires_on),
            requests_ahead: 0,
        }
    }

    pub fn queued(requests_ahead: usize) -> Self {
        Self {
            expires_on: None,
            requests_ahead,
        }
    }

    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        self.expires_on.is_some_and(|expires_on| expires_on > now)
    }

    /// Serializable view with `has_access` resolved against `now`.
    pub fn view(&self, now: DateTime<Utc>) -> AccessView {
        AccessView {
            expires_on: self.expires_on,
            requests_ahead: self.requests_ahead,
            has_access: self.has_access(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessView {
    pub expires_on: Option<DateTime<Utc>>,
    pub requests_ahead: usize,
    pub has_access: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn ticket_activity_requires_unexpired() {
        let now = at(0);
        let expired = Ticket::new("a", now - TimeDelta::seconds(1), now);
        let fresh = Ticket::new("b", now + TimeDelta::seconds(60), now);
        let idle = Ticket::new("c", now + TimeDelta::seconds(60), now - TimeDelta::seconds(600));
        let cutoff = now - TimeDelta::seconds(300);

        assert!(!expired.is_unexpired(now));
        assert!(!expired.is_active(now, cutoff));
        assert!(fresh.is_active(now, cutoff));
        assert!(idle.is_unexpired(now));
        assert!(!idle.is_active(now, cutoff));
    }

    #[test]
    fn ticket_expiring_exactly_now_is_expired() {
        let now = at(0);
        assert!(!Ticket::new("a", now, now).is_unexpired(now));
    }

    #[test]
    fn entry_seen_exactly_at_cutoff_is_not_stale() {
        let cutoff = at(0);
        assert!(!QueueEntry::new("a", cutoff).is_stale(cutoff));
        assert!(QueueEntry::new("a", cutoff - TimeDelta::milliseconds(1)).is_stale(cutoff));
    }

    #[test]
    fn has_access_depends_on_expiry() {
        let now = at(0);
        assert!(AccessResponse::admitted(now + TimeDelta::seconds(1)).has_access(now));
        assert!(!AccessResponse::admitted(now).has_access(now));
        assert!(!AccessResponse::queued(3).has_access(now));
    }

    #[test]
    fn access_view_serializes_admitted() {
        let now = at(0);
        let view = AccessResponse::admitted(at(300)).view(now);
        insta::assert_json_snapshot!(view, @r#"
        {
          "expires_on": "2023-11-14T22:18:20Z",
          "requests_ahead": 0,
          "has_access": true
        }
        "#);
    }

    #[test]
    fn access_view_serializes_queued() {
        let view = AccessResponse::queued(5).view(at(0));
        insta::assert_json_snapshot!(view, @r#"
        {
          "expires_on": null,
          "requests_ahead": 5,
          "has_access": false
        }
        "#);
    }
}
