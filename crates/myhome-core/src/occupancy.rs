// Last observed human activity: BLU motion/button frames and Gen2
// input events.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Activity within this window counts as occupied.
pub const OCCUPIED_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyStatus {
    pub occupied: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub devices: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct Occupancy {
    last: DashMap<String, DateTime<Utc>>,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, device_id: &str, at: DateTime<Utc>) {
        self.last
            .entry(device_id.to_owned())
            .and_modify(|t| *t = (*t).max(at))
            .or_insert(at);
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> OccupancyStatus {
        let devices: BTreeMap<String, DateTime<Utc>> = self
            .last
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        let last_activity = devices.values().max().copied();
        let window = chrono::Duration::from_std(OCCUPIED_WINDOW).unwrap_or(chrono::Duration::MAX);
        OccupancyStatus {
            occupied: last_activity.is_some_and(|t| now - t <= window),
            last_activity,
            devices,
        }
    }

    pub fn status(&self) -> OccupancyStatus {
        self.status_at(Utc::now())
    }
}
