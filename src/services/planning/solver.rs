//! Greedy visiting-order construction.
//!
//! Both solvers share one loop: from the current node and clock, score every
//! unvisited reachable stop, commit the cheapest (first in scan order on
//! ties), advance the clock past its service, repeat. A late candidate is not
//! excluded, only scored with a very large additive penalty, so it is picked
//! last rather than dropped.

use chrono::{Duration, NaiveDateTime};
use tracing::warn;

use crate::services::routing::DistanceTimeMatrices;
use crate::types::TimeWindow;

use super::config::PlanningConfig;
use super::timing::{matrix_node, DEPOT_NODE};

/// Everything a solver sees about one planning problem
#[derive(Debug, Clone, Copy)]
pub struct SolveInput<'a> {
    /// Depot-inclusive matrices, stop `i` at node `i + 1`
    pub matrices: &'a DistanceTimeMatrices,
    pub service_minutes: &'a [u32],
    pub windows: &'a [TimeWindow],
    /// Departure from the depot; solver default when absent
    pub start: Option<NaiveDateTime>,
}

impl SolveInput<'_> {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

pub fn earliest_window_start(windows: &[TimeWindow]) -> Option<NaiveDateTime> {
    windows.iter().map(|w| w.start).min()
}

/// Produces a visiting order (original stop indices)
pub trait Solver: Send + Sync {
    /// Departure used when the caller gives none; `None` for an empty problem
    fn default_start(&self, windows: &[TimeWindow]) -> Option<NaiveDateTime>;

    fn solve(&self, input: &SolveInput<'_>) -> Vec<usize>;

    fn name(&self) -> &'static str;
}

/// Where the vehicle is while the order is being built
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    pub clock: NaiveDateTime,
    pub node: usize,
    /// Window of the stop just served, `None` at the depot
    pub previous_window: Option<TimeWindow>,
}

/// Scored choice of one unvisited stop
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub score: f64,
    /// Clock after serving the stop
    pub finish: NaiveDateTime,
}

/// Shared greedy loop. `evaluate` returns `None` for a stop that cannot be
/// reached from the cursor.
pub(crate) fn build_order<F>(input: &SolveInput<'_>, start: NaiveDateTime, mut evaluate: F) -> Vec<usize>
where
    F: FnMut(&Cursor, usize) -> Option<Candidate>,
{
    let n = input.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut cursor = Cursor {
        clock: start,
        node: DEPOT_NODE,
        previous_window: None,
    };

    while order.len() < n {
        let mut best: Option<(usize, Candidate)> = None;

        for index in 0..n {
            if visited[index] {
                continue;
            }
            let Some(candidate) = evaluate(&cursor, index) else {
                continue;
            };
            if best.map_or(true, |(_, b)| candidate.score < b.score) {
                best = Some((index, candidate));
            }
        }

        let Some((index, candidate)) = best else {
            let remaining = n - order.len();
            warn!(
                "No reachable stop from node {}, appending {} remaining stops in input order",
                cursor.node, remaining
            );
            order.extend((0..n).filter(|&i| !visited[i]));
            break;
        };

        visited[index] = true;
        order.push(index);
        cursor = Cursor {
            clock: candidate.finish,
            node: matrix_node(index),
            previous_window: Some(input.windows[index]),
        };
    }

    order
}

/// Seconds between `arrival` and the window opening, 0 when already open
pub(crate) fn wait_seconds(arrival: NaiveDateTime, window: &TimeWindow) -> i64 {
    (window.start - arrival).num_seconds().max(0)
}

/// Plain greedy solver: score = travel + wait (+ lateness penalty)
#[derive(Debug, Clone)]
pub struct GreedySolver {
    lateness_penalty: f64,
}

impl GreedySolver {
    pub fn new(config: &PlanningConfig) -> Self {
        Self {
            lateness_penalty: config.lateness_penalty,
        }
    }
}

impl Solver for GreedySolver {
    fn default_start(&self, windows: &[TimeWindow]) -> Option<NaiveDateTime> {
        earliest_window_start(windows)
    }

    fn solve(&self, input: &SolveInput<'_>) -> Vec<usize> {
        if input.is_empty() {
            return vec![];
        }
        let Some(start) = input.start.or_else(|| self.default_start(input.windows)) else {
            return vec![];
        };

        build_order(input, start, |cursor, index| {
            let node = matrix_node(index);
            if !input.matrices.is_reachable(cursor.node, node) {
                return None;
            }

            let window = &input.windows[index];
            let travel = input.matrices.duration(cursor.node, node) as i64;
            let arrival = cursor.clock + Duration::seconds(travel);
            let wait = wait_seconds(arrival, window);
            let finish = arrival
                + Duration::seconds(wait)
                + Duration::seconds(input.service_minutes[index] as i64 * 60);

            let mut score = (travel + wait) as f64;
            if finish > window.end {
                score += self.lateness_penalty;
            }

            Some(Candidate { score, finish })
        })
    }

    fn name(&self) -> &'static str {
        "greedy"
    }
}
