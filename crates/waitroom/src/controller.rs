//! AdmissionController: the caller-facing side of the gate.
//!
//! Owns one [`TicketStore`] behind a single async mutex. Every caller-facing
//! operation runs inside one critical section, so the promotion pass and the
//! grant/queue decision that follows are atomic with respect to other
//! callers. The only await point is lock acquisition.
//!
//! Queue entries are never expired eagerly. A caller who stops polling keeps
//! its place (and keeps counting towards everyone's `requests_ahead`) until the
//! cursor reaches it, at which point it is discarded as stale.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{AdmissionConfig, ConfigError, Windows};
use crate::gauges::GaugeSnapshot;
use crate::store::{NumberedStore, TicketStore, activity_cutoff, expiry_from};
use crate::ticket::{AccessResponse, Ticket};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Request cancelled while waiting for the gate")]
    Cancelled,
}

pub struct AdmissionController {
    store: Mutex<Box<dyn TicketStore>>,
    config: AdmissionConfig,
    windows: Windows,
    clock: Arc<dyn Clock>,
    gauges_tx: watch::Sender<GaugeSnapshot>,
}

impl AdmissionController {
    /// Controller backed by a [`NumberedStore`] and the system clock.
    pub fn new(config: AdmissionConfig) -> Result<Self, ConfigError> {
        Self::with_store(config, NumberedStore::new())
    }

    pub fn with_store(
        config: AdmissionConfig,
        store: impl TicketStore + 'static,
    ) -> Result<Self, ConfigError> {
        let windows = config.windows()?;
        let (gauges_tx, _) = watch::channel(GaugeSnapshot::new(0, 0, 0, config.capacity_limit));
        Ok(Self {
            store: Mutex::new(Box::new(store)),
            config,
            windows,
            clock: Arc::new(SystemClock),
            gauges_tx,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Admit, renew, or queue `user_id`.
    pub async fn request_access(&self, user_id: &str) -> AccessResponse {
        let mut store = self.store.lock().await;
        self.admit(store.as_mut(), user_id)
    }

    /// Like [`request_access`](Self::request_access), but gives up waiting for
    /// the lock once `cancel` fires. A cancelled request has not touched any state.
    pub async fn request_access_with_cancel(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessResponse, AdmissionError> {
        let mut store = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(user_id, "Access request cancelled before admission");
                return Err(AdmissionError::Cancelled);
            }
            guard = self.store.lock() => guard,
        };
        Ok(self.admit(store.as_mut(), user_id))
    }

    /// Drop `user_id`'s ticket and queue entry. Returns whether anything changed.
    pub async fn revoke_access(&self, user_id: &str) -> bool {
        let mut store = self.store.lock().await;
        let removed = store.remove_user(user_id);
        if removed {
            tracing::debug!(user_id, "Access revoked");
        }
        self.publish(store.as_ref(), self.clock.now());
        removed
    }

    /// Sweep expired tickets. Waiting callers are left alone.
    pub async fn delete_expired_tickets(&self) -> usize {
        let mut store = self.store.lock().await;
        let now = self.clock.now();
        let removed = store.delete_expired_tickets(now);
        if removed > 0 {
            tracing::debug!(removed, "Deleted expired tickets");
        }
        self.publish(store.as_ref(), now);
        removed
    }

    pub async fn unexpired_tickets_count(&self) -> usize {
        self.snapshot().await.unexpired_tickets
    }

    pub async fn active_tickets_count(&self) -> usize {
        self.snapshot().await.active_tickets
    }

    pub async fn queue_count(&self) -> usize {
        self.snapshot().await.queue_len
    }

    pub async fn snapshot(&self) -> GaugeSnapshot {
        let store = self.store.lock().await;
        self.gauges(store.as_ref(), self.clock.now())
    }

    /// Gauge updates published after every state change.
    pub fn subscribe(&self) -> watch::Receiver<GaugeSnapshot> {
        self.gauges_tx.subscribe()
    }

    fn admit(&self, store: &mut dyn TicketStore, user_id: &str) -> AccessResponse {
        let now = self.clock.now();
        let response = self.decide(store, user_id, now);
        self.publish(store, now);
        response
    }

    fn decide(&self, store: &mut dyn TicketStore, user_id: &str, now: DateTime<Utc>) -> AccessResponse {
        let Windows {
            activity,
            expiration,
        } = self.windows;

        let capacity_was_full =
            store.promote_until_full(now, activity, expiration, self.config.capacity_limit);
        let has_capacity = !capacity_was_full;

        if let Some(ticket) = store.ticket(user_id).filter(|t| t.is_unexpired(now)) {
            // An idle holder's slot counted as free during promotion and may
            // already belong to someone else.
            let holds_slot = has_capacity
                || self.config.keep_idle_slots
                || ticket.is_active(now, activity_cutoff(now, activity));
            if holds_slot {
                let expires_on = if self.config.rolling_expiration {
                    expiry_from(now, expiration)
                } else {
                    ticket.expires_on
                };
                store.upsert_ticket(Ticket::new(user_id, expires_on, now));
                return AccessResponse::admitted(expires_on);
            }
            tracing::debug!(user_id, "Idle ticket holder lost its slot");
            store.remove_user(user_id);
        } else if has_capacity {
            let expires_on = expiry_from(now, expiration);
            store.upsert_ticket(Ticket::new(user_id, expires_on, now));
            tracing::debug!(user_id, %expires_on, "Access granted");
            return AccessResponse::admitted(expires_on);
        }

        let seen_at = self.config.refresh_queued_on_poll.then_some(now);
        if let Some(requests_ahead) = store.requests_ahead(user_id, seen_at) {
            return AccessResponse::queued(requests_ahead);
        }

        let requests_ahead = store.queue_len();
        store.enqueue(user_id, now);
        tracing::debug!(user_id, requests_ahead, "Caller queued");
        AccessResponse::queued(requests_ahead)
    }

    fn gauges(&self, store: &dyn TicketStore, now: DateTime<Utc>) -> GaugeSnapshot {
        let cutoff = activity_cutoff(now, self.windows.activity);
        GaugeSnapshot::new(
            store.unexpired_count(now),
            store.active_count(now, cutoff),
            store.queue_len(),
            self.config.capacity_limit,
        )
    }

    fn publish(&self, store: &dyn TicketStore, now: DateTime<Utc>) {
        if self.gauges_tx.receiver_count() == 0 {
            return;
        }
        let snapshot = self.gauges(store, now);
        self.gauges_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
