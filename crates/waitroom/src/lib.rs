//! waitroom: capacity-bounded admission gate with a fair FIFO waiting room.

mod clock;
mod config;
mod controller;
mod gauges;
mod ticket;

pub mod roster;
pub mod store;
pub mod sweeper;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AdmissionConfig, ConfigError, ENV_ACTIVITY_SECONDS, ENV_CAPACITY_LIMIT,
    ENV_CLEANUP_INTERVAL_SECONDS, ENV_EXPIRATION_SECONDS, ENV_KEEP_IDLE_SLOTS,
    ENV_REFRESH_QUEUED_ON_POLL, ENV_ROLLING_EXPIRATION, cleanup_interval_from_env,
    cleanup_interval_from_lookup,
};
pub use controller::{AdmissionController, AdmissionError};
pub use gauges::{GaugeSnapshot, Occupancy};
pub use roster::{Roster, RosterStatus, RosterUser};
pub use store::{NumberedStore, ScanStore, TicketStore};
pub use sweeper::spawn_cleanup;
pub use ticket::{AccessResponse, AccessView, QueueEntry, Ticket};
