//! Read-only occupancy gauges.

use serde::{Deserialize, Serialize};

/// Coarse state of the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Occupancy {
    /// Slots available, nobody waiting
    #[default]
    Open,
    /// Every slot taken, nobody waiting
    Full,
    /// Callers are waiting in line
    Queueing,
}

impl Occupancy {
    pub fn classify(active_tickets: usize, capacity_limit: usize, queue_len: usize) -> Self {
        if queue_len > 0 {
            Occupancy::Queueing
        } else if active_tickets >= capacity_limit {
            Occupancy::Full
        } else {
            Occupancy::Open
        }
    }
}

/// Consistent view of every gauge, taken under one lock acquisition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaugeSnapshot {
    pub unexpired_tickets: usize,
    pub active_tickets: usize,
    pub queue_len: usize,
    pub capacity_limit: usize,
    pub occupancy: Occupancy,
}

impl GaugeSnapshot {
    pub fn new(
        unexpired_tickets: usize,
        active_tickets: usize,
        queue_len: usize,
        capacity_limit: usize,
    ) -> Self {
        Self {
            unexpired_tickets,
            active_tickets,
            queue_len,
            capacity_limit,
            occupancy: Occupancy::classify(active_tickets, capacity_limit, queue_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupancy_default_is_open() {
        assert_eq!(Occupancy::default(), Occupancy::Open);
    }

    #[test]
    fn occupancy_classification() {
        assert_eq!(Occupancy::classify(2, 5, 0), Occupancy::Open);
        assert_eq!(Occupancy::classify(5, 5, 0), Occupancy::Full);
        assert_eq!(Occupancy::classify(5, 5, 1), Occupancy::Queueing);
        assert_eq!(Occupancy::classify(0, 0, 0), Occupancy::Full);
    }

    #[test]
    fn occupancy_serializes_screaming_snake_case() {
        insta::assert_json_snapshot!(
            [Occupancy::Open, Occupancy::Full, Occupancy::Queueing],
            @r#"
        [
          "OPEN",
          "FULL",
          "QUEUEING"
        ]
        "#
        );
    }

    #[test]
    fn occupancy_deserializes_screaming_snake_case() {
        assert_eq!(
            serde_json::from_str::<Occupancy>("\"QUEUEING\"").unwrap(),
            Occupancy::Queueing
        );
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = GaugeSnapshot::new(5, 5, 6, 5);
        insta::assert_json_snapshot!(snapshot, @r#"
        {
          "unexpired_tickets": 5,
          "active_tickets": 5,
          "queue_len": 6,
          "capacity_limit": 5,
          "occupancy": "QUEUEING"
        }
        "#);
    }
}
