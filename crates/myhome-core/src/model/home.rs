// ── Home organisation: groups, rooms, heating setpoints ──

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A named set of devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Comfort and eco setpoints for one room, in °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub room_id: String,
    #[serde(default)]
    pub name: String,
    pub comfort: f32,
    pub eco: f32,
}

impl TemperatureConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.comfort.is_finite() && self.eco.is_finite()) {
            return Err(CoreError::InvalidParams {
                method: "temperature.set".into(),
                reason: "setpoints must be finite".into(),
            });
        }
        Ok(())
    }
}

/// `HH:MM`–`HH:MM` window during which the comfort setpoint applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComfortRange {
    pub start: String,
    pub end: String,
}

impl ComfortRange {
    fn parse(s: &str) -> Result<NaiveTime, CoreError> {
        NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| CoreError::InvalidParams {
            method: "temperature.schedule.set".into(),
            reason: format!("'{s}' is not HH:MM"),
        })
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let (start, end) = (Self::parse(&self.start)?, Self::parse(&self.end)?);
        if start >= end {
            return Err(CoreError::InvalidParams {
                method: "temperature.schedule.set".into(),
                reason: format!("range {}-{} is empty", self.start, self.end),
            });
        }
        Ok(())
    }
}

/// Comfort windows for a kind of day ("workday", "weekend", "holiday", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSchedule {
    pub kind: String,
    #[serde(default)]
    pub ranges: Vec<ComfortRange>,
}

impl KindSchedule {
    /// Ranges must parse and be sorted without overlap.
    pub fn validate(&self) -> Result<(), CoreError> {
        for range in &self.ranges {
            range.validate()?;
        }
        for pair in self.ranges.windows(2) {
            if let [a, b] = pair {
                if a.end > b.start {
                    return Err(CoreError::InvalidParams {
                        method: "temperature.schedule.set".into(),
                        reason: format!("{}-{} overlaps {}-{}", a.start, a.end, b.start, b.end),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Which day kind applies on a weekday unless overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdayDefault {
    pub weekday: Weekday,
    pub kind: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> ComfortRange {
        ComfortRange {
            start: start.into(),
            end: end.into(),
        }
    }

    #[test]
    fn schedule_ranges_must_be_ordered() {
        let ok = KindSchedule {
            kind: "workday".into(),
            ranges: vec![range("06:30", "08:00"), range("17:00", "22:30")],
        };
        assert!(ok.validate().is_ok());

        let overlapping = KindSchedule {
            kind: "workday".into(),
            ranges: vec![range("06:30", "09:00"), range("08:00", "10:00")],
        };
        assert!(overlapping.validate().is_err());
    }

    #[test]
    fn malformed_times_are_invalid_params() {
        let err = range("7h", "08:00").validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidParams { .. }));
        assert!(range("09:00", "08:00").validate().is_err());
    }

    #[test]
    fn weekday_serializes_short_name() {
        let w = WeekdayDefault {
            weekday: Weekday::Sat,
            kind: "weekend".into(),
        };
        let v = serde_json::to_value(&w).unwrap();
        assert_eq!(v["weekday"], "Sat");
    }
}
