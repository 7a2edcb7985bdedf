//! Roster: keeps a set of interested callers polling the gate.
//!
//! The gate only learns that a caller is still around when it asks again.
//! A roster tracks callers by id, re-requests access on behalf of every
//! active one on each recalculation, and partitions them into admitted,
//! queued, and inactive groups. It is the headless counterpart of a
//! waiting-room dashboard and doubles as a load simulator.
//!
//! Entries are read out of the map before any await so no shard lock is
//! held while waiting on the gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::controller::AdmissionController;
use crate::ticket::AccessResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterUser {
    pub id: Uuid,
    /// Whether this caller is still interested in the resource.
    pub active: bool,
    pub latest: Option<AccessResponse>,
    joined: u64,
}

/// Partition of the roster after a recalculation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterStatus {
    pub admitted: Vec<RosterUser>,
    /// Sorted by `requests_ahead`, front of the line first.
    pub queued: Vec<RosterUser>,
    pub inactive: Vec<RosterUser>,
}

pub struct Roster {
    controller: Arc<AdmissionController>,
    users: DashMap<Uuid, RosterUser>,
    next_join: AtomicU64,
    status_tx: watch::Sender<RosterStatus>,
}

impl Roster {
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        let (status_tx, _) = watch::channel(RosterStatus::default());
        Self {
            controller,
            users: DashMap::new(),
            next_join: AtomicU64::new(0),
            status_tx,
        }
    }

    pub fn add_user(&self, active: bool) -> Uuid {
        let id = Uuid::new_v4();
        let joined = self.next_join.fetch_add(1, Ordering::Relaxed);
        self.users.insert(
            id,
            RosterUser {
                id,
                active,
                latest: None,
                joined,
            },
        );
        id
    }

    /// Returns `false` for unknown ids.
    pub fn set_user_active(&self, id: Uuid, active: bool) -> bool {
        match self.users.get_mut(&id) {
            Some(mut user) => {
                user.active = active;
                true
            }
            None => false,
        }
    }

    pub fn user(&self, id: Uuid) -> Option<RosterUser> {
        self.users.get(&id).map(|u| u.clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Poll the gate for every active user, oldest member first.
    pub async fn recalculate(&self) -> RosterStatus {
        let mut members: Vec<(u64, Uuid, bool)> = self
            .users
            .iter()
            .map(|u| (u.joined, u.id, u.active))
            .collect();
        members.sort_unstable_by_key(|(joined, _, _)| *joined);

        let mut status = RosterStatus::default();
        for (_, id, active) in members {
            if active {
                let response = self.controller.request_access(&id.to_string()).await;
                let Some(user) = self.record(id, response) else {
                    continue;
                };
                if response.has_access(self.controller.now()) {
                    status.admitted.push(user);
                } else {
                    status.queued.push(user);
                }
            } else {
                let Some(user) = self.user(id) else {
                    continue;
                };
                // Inactive users keep their slot until the ticket runs out.
                let still_admitted = user
                    .latest
                    .is_some_and(|r| r.has_access(self.controller.now()));
                if still_admitted {
                    status.admitted.push(user);
                } else {
                    status.inactive.push(user);
                }
            }
        }

        status
            .queued
            .sort_by_key(|u| u.latest.map_or(usize::MAX, |r| r.requests_ahead));

        tracing::debug!(
            users = self.len(),
            admitted = status.admitted.len(),
            queued = status.queued.len(),
            inactive = status.inactive.len(),
            "Roster recalculated"
        );
        self.status_tx.send_replace(status.clone());
        status
    }

    /// Mark the user inactive and give its slot or place in line back.
    pub async fn revoke_access(&self, id: Uuid) -> bool {
        match self.users.get_mut(&id) {
            Some(mut user) => {
                user.active = false;
                user.latest = None;
            }
            None => return false,
        }

        self.controller.revoke_access(&id.to_string()).await;
        true
    }

    pub async fn revoke_all_access(&self) {
        let ids: Vec<Uuid> = self.users.iter().map(|u| u.id).collect();
        for id in ids {
            self.revoke_access(id).await;
        }
    }

    /// Revoke everyone and forget them.
    pub async fn reset(&self) {
        self.revoke_all_access().await;
        self.users.clear();
        self.status_tx.send_replace(RosterStatus::default());
    }

    /// Status from the most recent recalculation.
    pub fn status(&self) -> RosterStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RosterStatus> {
        self.status_tx.subscribe()
    }

    fn record(&self, id: Uuid, response: AccessResponse) -> Option<RosterUser> {
        let mut user = self.users.get_mut(&id)?;
        user.latest = Some(response);
        Some(user.clone())
    }
}

/// Recalculate the roster every `interval` until `shutdown` fires.
pub fn spawn_refresh(
    roster: Arc<Roster>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    roster.recalculate().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AdmissionConfig;
    use chrono::TimeDelta;

    fn roster(capacity: usize) -> (Arc<Roster>, Arc<AdmissionController>, ManualClock) {
        let clock = ManualClock::default();
        let config = AdmissionConfig::default()
            .with_capacity_limit(capacity)
            .with_activity_window(Duration::from_secs(10))
            .with_expiration(Duration::from_secs(30));
        let controller = Arc::new(
            AdmissionController::new(config)
                .unwrap()
                .with_clock(Arc::new(clock.clone())),
        );
        (
            Arc::new(Roster::new(Arc::clone(&controller))),
            controller,
            clock,
        )
    }

    fn ids(users: &[RosterUser]) -> Vec<Uuid> {
        users.iter().map(|u| u.id).collect()
    }

    #[tokio::test]
    async fn partitions_users_by_admission() {
        let (roster, _controller, _clock) = roster(2);
        let first = roster.add_user(true);
        let second = roster.add_user(true);
        let third = roster.add_user(true);
        let fourth = roster.add_user(true);
        let idle = roster.add_user(false);
        assert_eq!(roster.len(), 5);

        let status = roster.recalculate().await;

        assert_eq!(ids(&status.admitted), vec![first, second]);
        assert_eq!(ids(&status.queued), vec![third, fourth]);
        assert_eq!(ids(&status.inactive), vec![idle]);
        assert_eq!(status.queued[1].latest.unwrap().requests_ahead, 1);
        assert_eq!(roster.status(), status);
    }

    #[tokio::test]
    async fn inactive_user_counts_as_admitted_until_expiry() {
        let (roster, _controller, clock) = roster(1);
        let user = roster.add_user(true);
        roster.recalculate().await;

        assert!(roster.set_user_active(user, false));
        let status = roster.recalculate().await;
        assert_eq!(ids(&status.admitted), vec![user]);

        clock.advance(TimeDelta::seconds(31));
        let status = roster.recalculate().await;
        assert_eq!(ids(&status.inactive), vec![user]);
    }

    #[tokio::test]
    async fn revoking_promotes_next_in_line() {
        let (roster, _controller, _clock) = roster(1);
        let first = roster.add_user(true);
        let second = roster.add_user(true);
        roster.recalculate().await;

        assert!(roster.revoke_access(first).await);
        let status = roster.recalculate().await;

        assert_eq!(ids(&status.admitted), vec![second]);
        assert_eq!(ids(&status.inactive), vec![first]);
        assert!(roster.user(first).unwrap().latest.is_none());
    }

    #[tokio::test]
    async fn unknown_users_are_ignored() {
        let (roster, _controller, _clock) = roster(1);
        assert!(!roster.set_user_active(Uuid::new_v4(), true));
        assert!(!roster.revoke_access(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn reset_clears_users_and_gate() {
        let (roster, controller, _clock) = roster(1);
        roster.add_user(true);
        roster.add_user(true);
        roster.recalculate().await;
        assert_eq!(controller.queue_count().await, 1);

        roster.reset().await;

        assert!(roster.is_empty());
        assert_eq!(roster.status(), RosterStatus::default());
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.unexpired_tickets, 0);
        assert_eq!(snapshot.active_tickets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_task_publishes_status() {
        let (roster, _controller, _clock) = roster(1);
        let user = roster.add_user(true);
        let mut rx = roster.subscribe();
        let shutdown = CancellationToken::new();

        let handle = spawn_refresh(Arc::clone(&roster), Duration::from_secs(1), shutdown.clone());

        rx.changed().await.unwrap();
        assert_eq!(ids(&rx.borrow_and_update().admitted), vec![user]);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
