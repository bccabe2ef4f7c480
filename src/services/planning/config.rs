//! Tunable planning policy.
//!
//! Every business constant of the engine lives here with its default, and
//! `PlanningConfig::from_env` lets deployments override the scalar ones.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Added to a candidate's score when serving it would finish past its window.
/// Large enough that a late candidate only wins when every candidate is late.
pub const LATENESS_PENALTY: f64 = 1e9;

/// Half-open hour range `[start, end)` on the 24h clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start && hour < self.end
    }
}

/// Coarse time-of-day period a window falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayPeriod {
    Morning,
    Afternoon,
    Evening,
}

/// Boundaries between morning, afternoon and evening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodBoundaries {
    pub morning_start: u32,
    pub afternoon_start: u32,
    pub evening_start: u32,
    pub evening_end: u32,
}

impl Default for PeriodBoundaries {
    fn default() -> Self {
        Self {
            morning_start: 7,
            afternoon_start: 12,
            evening_start: 16,
            evening_end: 20,
        }
    }
}

impl PeriodBoundaries {
    /// Period of an hour, `None` outside the working day
    pub fn period_of(&self, hour: u32) -> Option<DayPeriod> {
        if HourRange::new(self.morning_start, self.afternoon_start).contains(hour) {
            Some(DayPeriod::Morning)
        } else if HourRange::new(self.afternoon_start, self.evening_start).contains(hour) {
            Some(DayPeriod::Afternoon)
        } else if HourRange::new(self.evening_start, self.evening_end).contains(hour) {
            Some(DayPeriod::Evening)
        } else {
            None
        }
    }
}

/// Named daily band used by time-slot planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlotBand {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TimeSlotBand {
    pub fn new(name: &str, start_hour: u32, end_hour: u32) -> Self {
        Self {
            name: name.to_string(),
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        HourRange::new(self.start_hour, self.end_hour).contains(hour)
    }
}

/// What time-slot planning does with a stop whose window starts in no band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfBandPolicy {
    /// Exclude the stop and report an `OUT_OF_BAND` warning
    #[default]
    Drop,
    /// Fail the whole request
    Reject,
}

#[derive(Debug, Clone)]
pub struct PlanningConfig {
    /// Waiting longer than this before a window opens sends the driver back to the depot
    pub wait_threshold_minutes: i64,
    pub periods: PeriodBoundaries,
    pub rush_hours: Vec<HourRange>,
    /// Fraction of travel time added to rush-hour arrivals when avoiding rush hour
    pub rush_hour_penalty: f64,
    pub lateness_penalty: f64,
    /// Traffic-aware solver starts this long before the earliest window
    pub default_start_offset_minutes: i64,
    /// Driver cost per hour, used for leg cost
    pub hourly_rate: f64,
    pub bands: Vec<TimeSlotBand>,
    pub out_of_band: OutOfBandPolicy,
    pub request_timeout: Duration,
    pub external_call_timeout: Duration,
    pub band_concurrency: usize,
    pub geocode_concurrency: usize,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            wait_threshold_minutes: 25,
            periods: PeriodBoundaries::default(),
            rush_hours: vec![HourRange::new(8, 10), HourRange::new(16, 19)],
            rush_hour_penalty: 0.5,
            lateness_penalty: LATENESS_PENALTY,
            default_start_offset_minutes: 60,
            hourly_rate: 25.0,
            bands: vec![
                TimeSlotBand::new("morning", 7, 12),
                TimeSlotBand::new("afternoon", 12, 16),
                TimeSlotBand::new("evening", 16, 20),
            ],
            out_of_band: OutOfBandPolicy::Drop,
            request_timeout: Duration::from_secs(120),
            external_call_timeout: Duration::from_secs(30),
            band_concurrency: 3,
            geocode_concurrency: 4,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}='{}': not a valid value", key, raw);
            None
        }
    }
}

impl PlanningConfig {
    /// Defaults overridden by `PLANNING_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("PLANNING_WAIT_THRESHOLD_MINUTES") {
            config.wait_threshold_minutes = v;
        }
        if let Some(v) = env_parse("PLANNING_RUSH_HOUR_PENALTY") {
            config.rush_hour_penalty = v;
        }
        if let Some(v) = env_parse("PLANNING_HOURLY_RATE") {
            config.hourly_rate = v;
        }
        if let Some(v) = env_parse("PLANNING_DEFAULT_START_OFFSET_MINUTES") {
            config.default_start_offset_minutes = v;
        }
        if let Some(v) = env_parse::<u64>("PLANNING_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("PLANNING_EXTERNAL_TIMEOUT_SECS") {
            config.external_call_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<usize>("PLANNING_BAND_CONCURRENCY") {
            config.band_concurrency = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("PLANNING_GEOCODE_CONCURRENCY") {
            config.geocode_concurrency = v.max(1);
        }
        if let Ok(v) = std::env::var("PLANNING_OUT_OF_BAND") {
            match v.trim() {
                "reject" => config.out_of_band = OutOfBandPolicy::Reject,
                "drop" => config.out_of_band = OutOfBandPolicy::Drop,
                other => tracing::warn!("Unknown PLANNING_OUT_OF_BAND '{}', keeping drop", other),
            }
        }

        config
    }

    pub fn is_rush_hour(&self, hour: u32) -> bool {
        self.rush_hours.iter().any(|r| r.contains(hour))
    }

    pub fn band_for_hour(&self, hour: u32) -> Option<&TimeSlotBand> {
        self.bands.iter().find(|b| b.contains(hour))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_range_is_half_open() {
        let range = HourRange::new(8, 10);
        assert!(!range.contains(7));
        assert!(range.contains(8));
        assert!(range.contains(9));
        assert!(!range.contains(10));
    }

    #[test]
    fn test_period_of_default_boundaries() {
        let periods = PeriodBoundaries::default();
        assert_eq!(periods.period_of(6), None);
        assert_eq!(periods.period_of(7), Some(DayPeriod::Morning));
        assert_eq!(periods.period_of(11), Some(DayPeriod::Morning));
        assert_eq!(periods.period_of(12), Some(DayPeriod::Afternoon));
        assert_eq!(periods.period_of(16), Some(DayPeriod::Evening));
        assert_eq!(periods.period_of(19), Some(DayPeriod::Evening));
        assert_eq!(periods.period_of(20), None);
    }

    #[test]
    fn test_default_config_values() {
        let config = PlanningConfig::default();
        assert_eq!(config.wait_threshold_minutes, 25);
        assert_eq!(config.rush_hour_penalty, 0.5);
        assert_eq!(config.lateness_penalty, LATENESS_PENALTY);
        assert_eq!(config.default_start_offset_minutes, 60);
        assert_eq!(config.out_of_band, OutOfBandPolicy::Drop);
        assert!(config.is_rush_hour(8));
        assert!(config.is_rush_hour(18));
        assert!(!config.is_rush_hour(10));
        assert!(!config.is_rush_hour(19));
    }

    #[test]
    fn test_band_for_hour() {
        let config = PlanningConfig::default();
        assert_eq!(config.band_for_hour(9).map(|b| b.name.as_str()), Some("morning"));
        assert_eq!(config.band_for_hour(12).map(|b| b.name.as_str()), Some("afternoon"));
        assert_eq!(config.band_for_hour(17).map(|b| b.name.as_str()), Some("evening"));
        assert!(config.band_for_hour(5).is_none());
        assert!(config.band_for_hour(21).is_none());
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("PLANNING_WAIT_THRESHOLD_MINUTES", "40");
        std::env::set_var("PLANNING_BAND_CONCURRENCY", "0");
        let config = PlanningConfig::from_env();
        std::env::remove_var("PLANNING_WAIT_THRESHOLD_MINUTES");
        std::env::remove_var("PLANNING_BAND_CONCURRENCY");

        assert_eq!(config.wait_threshold_minutes, 40);
        assert_eq!(config.band_concurrency, 1);
        assert_eq!(config.hourly_rate, 25.0);
    }
}
