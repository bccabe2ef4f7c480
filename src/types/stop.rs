//! Stop types
//!
//! A stop moves through three shapes on its way through the planner:
//! [`Stop`] as supplied by the caller, [`RoutableStop`] once it is known to
//! have coordinates, and [`OptimizedStop`] once the simulator has placed it
//! on the timeline.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Geographic coordinates (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Delivery window, half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn start_hour(&self) -> u32 {
        self.start.hour()
    }
}

/// A delivery stop as supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub id: String,
    /// Free-text address, geocoded when `coordinates` is missing
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    pub time_window: TimeWindow,
    pub service_minutes: u32,
}

/// A stop that is guaranteed to have coordinates and can be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutableStop {
    pub id: String,
    pub label: String,
    pub coordinates: Coordinates,
    pub time_window: TimeWindow,
    pub service_minutes: u32,
}

impl RoutableStop {
    /// Build from a caller stop, `None` if it has no coordinates.
    pub fn from_stop(stop: &Stop) -> Option<Self> {
        let coordinates = stop.coordinates?;
        Some(Self::with_coordinates(stop, coordinates))
    }

    pub fn with_coordinates(stop: &Stop, coordinates: Coordinates) -> Self {
        Self {
            id: stop.id.clone(),
            label: stop.address.clone().unwrap_or_else(|| stop.id.clone()),
            coordinates,
            time_window: stop.time_window,
            service_minutes: stop.service_minutes,
        }
    }

    pub fn service_seconds(&self) -> i64 {
        self.service_minutes as i64 * 60
    }
}

/// Label used for synthetic depot visits
pub const DEPOT_RETURN_LABEL: &str = "Return to Depot";

/// A stop placed on the simulated timeline.
///
/// Synthetic depot visits have `is_depot_return == true`, no `stop_id`, no
/// time window and zero service time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedStop {
    pub stop_id: Option<String>,
    pub label: String,
    pub coordinates: Coordinates,
    pub time_window: Option<TimeWindow>,
    pub service_seconds: i64,
    /// Service start: arrival, or window opening when arriving early
    #[serde(rename = "etaIso")]
    pub eta: NaiveDateTime,
    pub arrival_delay_minutes: i64,
    pub travel_seconds_from_prev: i64,
    pub distance_meters_from_prev: i64,
    pub wait_seconds_before_window: i64,
    pub is_depot_return: bool,
}

impl OptimizedStop {
    pub fn depot_return(
        depot: Coordinates,
        eta: NaiveDateTime,
        travel_seconds: i64,
        distance_meters: i64,
    ) -> Self {
        Self {
            stop_id: None,
            label: DEPOT_RETURN_LABEL.to_string(),
            coordinates: depot,
            time_window: None,
            service_seconds: 0,
            eta,
            arrival_delay_minutes: 0,
            travel_seconds_from_prev: travel_seconds,
            distance_meters_from_prev: distance_meters,
            wait_seconds_before_window: 0,
            is_depot_return: true,
        }
    }

    /// Time spent on this entry: travel to it, waiting, and service.
    pub fn busy_seconds(&self) -> i64 {
        self.travel_seconds_from_prev + self.wait_seconds_before_window + self.service_seconds
    }

    /// Moment the vehicle leaves this entry.
    pub fn departure(&self) -> NaiveDateTime {
        self.eta + chrono::Duration::seconds(self.service_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_time_window_validity() {
        assert!(TimeWindow::new(at(8, 0), at(10, 0)).is_valid());
        assert!(TimeWindow::new(at(8, 0), at(8, 0)).is_valid());
        assert!(!TimeWindow::new(at(10, 0), at(8, 0)).is_valid());
    }

    #[test]
    fn test_routable_stop_requires_coordinates() {
        let mut stop = Stop {
            id: "s1".to_string(),
            address: Some("Main Street 1".to_string()),
            coordinates: None,
            time_window: TimeWindow::new(at(8, 0), at(10, 0)),
            service_minutes: 5,
        };
        assert!(RoutableStop::from_stop(&stop).is_none());

        stop.coordinates = Some(Coordinates { lat: 50.0, lng: 14.0 });
        let routable = RoutableStop::from_stop(&stop).unwrap();
        assert_eq!(routable.label, "Main Street 1");
        assert_eq!(routable.service_seconds(), 300);
    }

    #[test]
    fn test_depot_return_has_no_service() {
        let depot = Coordinates { lat: 50.0, lng: 14.0 };
        let stop = OptimizedStop::depot_return(depot, at(9, 0), 600, 5_000);
        assert!(stop.is_depot_return);
        assert_eq!(stop.service_seconds, 0);
        assert_eq!(stop.busy_seconds(), 600);
        assert_eq!(stop.departure(), at(9, 0));
    }

    #[test]
    fn test_optimized_stop_serializes_eta_iso() {
        let depot = Coordinates { lat: 50.0, lng: 14.0 };
        let stop = OptimizedStop::depot_return(depot, at(9, 0), 600, 5_000);
        let json = serde_json::to_value(&stop).unwrap();
        assert_eq!(json["etaIso"], "2025-03-14T09:00:00");
        assert_eq!(json["isDepotReturn"], true);
        assert_eq!(json["travelSecondsFromPrev"], 600);
    }

    #[test]
    fn test_coordinates_validity() {
        assert!(Coordinates { lat: 50.0, lng: 14.0 }.is_valid());
        assert!(!Coordinates { lat: 91.0, lng: 14.0 }.is_valid());
        assert!(!Coordinates { lat: f64::NAN, lng: 14.0 }.is_valid());
    }
}
