//! Traffic-aware greedy solver.
//!
//! Same loop as [`GreedySolver`](super::solver::GreedySolver) with two changes:
//! arrivals inside rush hours can be penalised, and the projected clock goes
//! through the depot whenever the simulator would send the driver back, so the
//! order is built on the same timeline the simulator will produce.

use chrono::{Duration, NaiveDateTime, Timelike};

use super::config::PlanningConfig;
use crate::types::TimeWindow;

use super::solver::{build_order, earliest_window_start, wait_seconds, Candidate, SolveInput, Solver};
use super::timing::{matrix_node, needs_depot_return, DEPOT_NODE};

#[derive(Debug, Clone)]
pub struct TrafficAwareSolver {
    config: PlanningConfig,
    avoid_rush_hour: bool,
}

impl TrafficAwareSolver {
    pub fn new(config: &PlanningConfig, avoid_rush_hour: bool) -> Self {
        Self {
            config: config.clone(),
            avoid_rush_hour,
        }
    }
}

impl Solver for TrafficAwareSolver {
    /// Earliest window start minus the configured offset
    fn default_start(&self, windows: &[TimeWindow]) -> Option<NaiveDateTime> {
        earliest_window_start(windows)
            .map(|t| t - Duration::minutes(self.config.default_start_offset_minutes))
    }

    fn solve(&self, input: &SolveInput<'_>) -> Vec<usize> {
        if input.is_empty() {
            return vec![];
        }
        let Some(start) = input.start.or_else(|| self.default_start(input.windows)) else {
            return vec![];
        };
        let matrices = input.matrices;

        build_order(input, start, |cursor, index| {
            let node = matrix_node(index);
            if !matrices.is_reachable(cursor.node, node) {
                return None;
            }

            let window = &input.windows[index];
            let direct = matrices.duration(cursor.node, node) as i64;
            let direct_arrival = cursor.clock + Duration::seconds(direct);
            let direct_wait = wait_seconds(direct_arrival, window);

            let (travel, arrival, wait) =
                if needs_depot_return(&self.config, cursor.previous_window.as_ref(), window, direct_wait) {
                    if !matrices.is_reachable(cursor.node, DEPOT_NODE)
                        || !matrices.is_reachable(DEPOT_NODE, node)
                    {
                        return None;
                    }
                    let back = matrices.duration(cursor.node, DEPOT_NODE) as i64;
                    let out = matrices.duration(DEPOT_NODE, node) as i64;
                    (back + out, cursor.clock + Duration::seconds(back + out), 0)
                } else {
                    (direct, direct_arrival, direct_wait)
                };

            let service_start = (arrival + Duration::seconds(wait)).max(window.start);
            let finish = service_start + Duration::seconds(input.service_minutes[index] as i64 * 60);

            // Time until service can begin, idle at the depot included
            let mut score = (service_start - cursor.clock).num_seconds() as f64;
            if self.avoid_rush_hour && self.config.is_rush_hour(arrival.hour()) {
                score += self.config.rush_hour_penalty * travel as f64;
            }
            if finish > window.end {
                score += self.config.lateness_penalty;
            }

            Some(Candidate { score, finish })
        })
    }

    fn name(&self) -> &'static str {
        "traffic_aware"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::routing::DistanceTimeMatrices;
    use crate::services::planning::solver::GreedySolver;
    use chrono::NaiveDate;

    fn hm(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn matrix_from(durations: Vec<Vec<u64>>) -> DistanceTimeMatrices {
        let size = durations.len();
        DistanceTimeMatrices {
            distances: durations.clone(),
            durations,
            size,
        }
    }

    fn uniform_matrix(size: usize, dur_s: u64) -> DistanceTimeMatrices {
        let mut durations = vec![vec![0u64; size]; size];
        for i in 0..size {
            for j in 0..size {
                if i != j {
                    durations[i][j] = dur_s;
                }
            }
        }
        matrix_from(durations)
    }

    #[test]
    fn default_start_is_an_hour_before_earliest_window() {
        let solver = TrafficAwareSolver::new(&PlanningConfig::default(), false);
        let matrices = uniform_matrix(3, 600);
        let windows = [
            TimeWindow::new(hm(9, 30), hm(11, 0)),
            TimeWindow::new(hm(8, 15), hm(11, 0)),
        ];
        let input = SolveInput { matrices: &matrices, service_minutes: &[5, 5], windows: &windows, start: None };

        assert_eq!(solver.default_start(input.windows), Some(hm(7, 15)));
    }

    #[test]
    fn single_stop_waits_for_window_from_default_start() {
        let solver = TrafficAwareSolver::new(&PlanningConfig::default(), true);
        let matrices = uniform_matrix(2, 600);
        let windows = [TimeWindow::new(hm(8, 0), hm(10, 0))];
        let input = SolveInput { matrices: &matrices, service_minutes: &[5], windows: &windows, start: None };

        assert_eq!(solver.solve(&input), vec![0]);
    }

    #[test]
    fn rush_hour_penalty_steers_away_from_peak_arrival() {
        // a: 25 min away, lands 09:55 (rush). b: 35 min away, lands 10:05 (off-peak)
        let matrices = matrix_from(vec![
            vec![0, 1_500, 2_100],
            vec![1_500, 0, 600],
            vec![2_100, 600, 0],
        ]);
        let windows = [
            TimeWindow::new(hm(7, 0), hm(12, 0)),
            TimeWindow::new(hm(7, 0), hm(12, 0)),
        ];
        let input = SolveInput { matrices: &matrices, service_minutes: &[5, 5], windows: &windows, start: Some(hm(9, 30)) };

        let plain = TrafficAwareSolver::new(&PlanningConfig::default(), false);
        assert_eq!(plain.solve(&input), vec![0, 1]);

        // 1500 + 0.5 * 1500 = 2250 > 2100
        let avoiding = TrafficAwareSolver::new(&PlanningConfig::default(), true);
        assert_eq!(avoiding.solve(&input), vec![1, 0]);
    }

    #[test]
    fn rush_hour_penalty_is_advisory() {
        // Only one stop: penalised or not, it is still visited
        let matrices = uniform_matrix(2, 600);
        let windows = [TimeWindow::new(hm(8, 0), hm(9, 0))];
        let input = SolveInput { matrices: &matrices, service_minutes: &[5], windows: &windows, start: Some(hm(8, 0)) };

        let avoiding = TrafficAwareSolver::new(&PlanningConfig::default(), true);
        assert_eq!(avoiding.solve(&input), vec![0]);
    }

    #[test]
    fn projected_clock_goes_through_depot_on_period_change() {
        let config = PlanningConfig::default();
        // depot is 20 min from everything, stops are 5 min apart
        let matrices = matrix_from(vec![
            vec![0, 1_200, 1_200, 1_200],
            vec![1_200, 0, 300, 300],
            vec![1_200, 300, 0, 300],
            vec![1_200, 300, 300, 0],
        ]);
        let windows = [
            TimeWindow::new(hm(11, 0), hm(12, 0)),
            TimeWindow::new(hm(12, 0), hm(12, 20)),
            TimeWindow::new(hm(12, 0), hm(14, 0)),
        ];
        let input = SolveInput { matrices: &matrices, service_minutes: &[10, 5, 5], windows: &windows, start: Some(hm(11, 20)) };

        // Direct hop after the morning stop reaches the tight stop in time
        let greedy = GreedySolver::new(&config).solve(&input);
        assert_eq!(greedy, vec![0, 1, 2]);

        // Through the depot it cannot make 12:20 any more, so the open stop goes first
        let traffic = TrafficAwareSolver::new(&config, false).solve(&input);
        assert_eq!(traffic, vec![0, 2, 1]);
    }
}
