// THEORY:
// The `tracker` module is the heart of the association layer. It adds object
// permanence to the engine: given the stateless winners of one frame and the
// live events carried over from earlier frames, it decides which winner extends
// which event and which winners start new events.
//
// This module solves the "data association problem."
//
// Key architectural principles:
// 1.  **Closed Strategy Set**: The tracking mode is picked once per run and
//     becomes a `TrackingStrategy` variant. Fused modes are a primary strategy
//     followed by Hough voting over whatever the primary left unmatched;
//     prediction matches always stand.
// 2.  **Score in Parallel, Assign Serially**: Scoring every (winner, event) pair is
//     independent, so it fans out over winners with rayon. The assignment step is
//     a single serial reduction: all candidates are sorted by residual and taken
//     greedily, one-to-one. Ties break on event id, then winner index, so the
//     result does not depend on thread scheduling.
// 3.  **Proposals, Not Mutations**: The tracker never writes to the `EventSet`. It
//     returns `Mutation`s (absorb, miss, spawn) and the set commits them.
// 4.  **Unmatched Is Not an Error**: A live event without a winner gets a `Miss`
//     and its no-match counter grows. A winner without an event spawns a new
//     `Candidate`.

use crate::config::{DetectionParameters, TrackingMode};
use crate::core_modules::event::{Event, EventId, MotionModel};
use crate::core_modules::event_set::{AppliedFrame, EventSet, Mutation};
use crate::core_modules::hough::HoughMatcher;
use crate::core_modules::winner::Winner;
use crate::error::Result;
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::debug;

/// A scored (winner, event) pairing that passed the gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub winner: usize,
    pub event: EventId,
    /// Distance between the prediction and the evidence, in pixels.
    pub residual: f64,
}

/// One committed pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub winner: usize,
    pub event: EventId,
}

/// The association algorithm for a run.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingStrategy {
    /// Every winner is its own event.
    None,
    /// Centroid distance to the event's last centroid.
    NearestNeighbor { gating_radius: f64 },
    /// Centroid distance to the Kalman-predicted position.
    KalmanFilter { gating_radius: f64 },
    /// Translation voting of the event's shape inside each candidate region.
    Hough(HoughMatcher),
    /// `primary` first, then Hough over the leftovers.
    Fused {
        primary: Box<TrackingStrategy>,
        fallback: HoughMatcher,
    },
}

impl TrackingStrategy {
    pub fn from_params(params: &DetectionParameters) -> Self {
        let hough = HoughMatcher {
            bin_size: params.hough_bin_size,
            min_vote_fraction: params.hough_min_vote_fraction,
            search_radius: params.gating_radius,
        };
        let gating_radius = params.gating_radius;
        match params.tracking_mode {
            TrackingMode::None => TrackingStrategy::None,
            TrackingMode::NearestNeighbor => TrackingStrategy::NearestNeighbor { gating_radius },
            TrackingMode::KalmanFilter => TrackingStrategy::KalmanFilter { gating_radius },
            TrackingMode::Hough => TrackingStrategy::Hough(hough),
            TrackingMode::NearestNeighborHough => TrackingStrategy::Fused {
                primary: Box::new(TrackingStrategy::NearestNeighbor { gating_radius }),
                fallback: hough,
            },
            TrackingMode::KalmanFilterHough => TrackingStrategy::Fused {
                primary: Box::new(TrackingStrategy::KalmanFilter { gating_radius }),
                fallback: hough,
            },
        }
    }

    /// Scores one pairing; `None` if it falls outside the gate.
    fn score(&self, winner: &Winner, event: &Event) -> Option<f64> {
        match self {
            TrackingStrategy::None => None,
            TrackingStrategy::NearestNeighbor { gating_radius }
            | TrackingStrategy::KalmanFilter { gating_radius } => {
                let residual = winner.region().centroid.distance(&event.predicted_position());
                (residual <= *gating_radius).then_some(residual)
            }
            TrackingStrategy::Hough(matcher) => {
                let predicted = event.predicted_position();
                matcher
                    .best_peak(event.template(), predicted, winner.region())
                    .map(|peak| peak.center.distance(&predicted))
            }
            TrackingStrategy::Fused { primary, .. } => primary.score(winner, event),
        }
    }

    /// Matches winners against the given live events. Returns one-to-one assignments.
    pub fn match_winners(&self, winners: &[Winner], events: &[&Event]) -> Vec<Assignment> {
        match self {
            TrackingStrategy::None => Vec::new(),
            TrackingStrategy::Fused { primary, fallback } => {
                let mut assignments = primary.match_winners(winners, events);

                let taken_winners: HashSet<usize> = assignments.iter().map(|a| a.winner).collect();
                let taken_events: HashSet<EventId> = assignments.iter().map(|a| a.event).collect();
                let leftover_winners: Vec<usize> = (0..winners.len())
                    .filter(|i| !taken_winners.contains(i))
                    .collect();
                let leftover_events: Vec<&Event> = events
                    .iter()
                    .copied()
                    .filter(|e| !taken_events.contains(&e.id()))
                    .collect();

                if !leftover_winners.is_empty() && !leftover_events.is_empty() {
                    let hough = TrackingStrategy::Hough(*fallback);
                    let subset: Vec<Winner> =
                        leftover_winners.iter().map(|&i| winners[i].clone()).collect();
                    let recovered = hough.match_winners(&subset, &leftover_events);
                    debug!(recovered = recovered.len(), "Hough fallback matches");
                    assignments.extend(recovered.into_iter().map(|a| Assignment {
                        winner: leftover_winners[a.winner],
                        event: a.event,
                    }));
                }
                assignments
            }
            _ => assign_greedily(self.candidates(winners, events)),
        }
    }

    /// Scores every gated (winner, event) pair, fanned out over winners.
    fn candidates(&self, winners: &[Winner], events: &[&Event]) -> Vec<Candidate> {
        winners
            .par_iter()
            .enumerate()
            .flat_map_iter(|(wi, winner)| {
                events.iter().filter_map(move |event| {
                    self.score(winner, event).map(|residual| Candidate {
                        winner: wi,
                        event: event.id(),
                        residual,
                    })
                })
            })
            .collect()
    }
}

/// Serial reduction: smallest residual first, each winner and event used once.
fn assign_greedily(mut candidates: Vec<Candidate>) -> Vec<Assignment> {
    candidates.sort_by(|a, b| {
        a.residual
            .total_cmp(&b.residual)
            .then(a.event.cmp(&b.event))
            .then(a.winner.cmp(&b.winner))
    });

    let mut used_winners = HashSet::new();
    let mut used_events = HashSet::new();
    let mut assignments = Vec::new();
    for c in candidates {
        if used_winners.contains(&c.winner) || used_events.contains(&c.event) {
            continue;
        }
        used_winners.insert(c.winner);
        used_events.insert(c.event);
        assignments.push(Assignment {
            winner: c.winner,
            event: c.event,
        });
    }
    assignments
}

/// Association engine: turns one frame of winners into event-set mutations.
#[derive(Debug, Clone)]
pub struct Tracker {
    strategy: TrackingStrategy,
    params: DetectionParameters,
}

impl Tracker {
    pub fn new(params: &DetectionParameters) -> Self {
        Self {
            strategy: TrackingStrategy::from_params(params),
            params: params.clone(),
        }
    }

    pub fn strategy(&self) -> &TrackingStrategy {
        &self.strategy
    }

    /// Proposes absorb, miss and spawn mutations for one frame.
    ///
    /// Absorbs come first in event-id order, then misses, then spawns in winner order.
    pub fn propose(&self, winners: Vec<Winner>, events: &EventSet) -> Vec<Mutation> {
        let live: Vec<&Event> = events.live().collect();
        let mut assignments = self.strategy.match_winners(&winners, &live);
        assignments.sort_by_key(|a| a.event);

        let mut slots: Vec<Option<Winner>> = winners.into_iter().map(Some).collect();
        let mut matched_events = HashSet::new();
        let mut mutations = Vec::with_capacity(slots.len() + live.len());

        for a in &assignments {
            if let Some(winner) = slots[a.winner].take() {
                matched_events.insert(a.event);
                mutations.push(Mutation::Absorb {
                    id: a.event,
                    winner,
                });
            }
        }
        for event in &live {
            if !matched_events.contains(&event.id()) {
                mutations.push(Mutation::Miss { id: event.id() });
            }
        }
        for winner in slots.into_iter().flatten() {
            let motion = MotionModel::for_mode(&self.params, winner.region().centroid);
            mutations.push(Mutation::Spawn { winner, motion });
        }

        debug!(
            matched = assignments.len(),
            live = live.len(),
            proposals = mutations.len(),
            "association proposals"
        );
        mutations
    }

    /// Associates the frame's winners with the live events and commits the result.
    pub fn associate(&self, frame: u32, winners: Vec<Winner>, events: &mut EventSet) -> Result<AppliedFrame> {
        let proposals = self.propose(winners, events);
        events.apply(frame, proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::geometry::Vector2D;
    use crate::core_modules::region::Region;
    use crate::core_modules::winner::AttentionPoint;

    fn blob(frame: u32, cx: u32, cy: u32) -> Winner {
        let mut px = Vec::new();
        for dy in 0..3 {
            for dx in 0..3 {
                px.push((cx + dx - 1, cy + dy - 1, 150u8));
            }
        }
        let point = AttentionPoint {
            position: Vector2D::new(cx as f64, cy as f64),
            saliency: 1.0,
            rank: 0,
        };
        Winner::new(point, Region::from_pixels(&px).unwrap(), frame)
    }

    fn tracker(mode: TrackingMode, gating_radius: f64) -> Tracker {
        Tracker::new(&DetectionParameters {
            tracking_mode: mode,
            gating_radius,
            ..DetectionParameters::default()
        })
    }

    #[test]
    fn nearest_neighbour_links_a_slow_track() {
        let t = tracker(TrackingMode::NearestNeighbor, 5.0);
        let mut set = EventSet::new();
        t.associate(1, vec![blob(1, 10, 10)], &mut set).unwrap();
        let a = t.associate(2, vec![blob(2, 12, 11)], &mut set).unwrap();
        assert_eq!(a.absorbed, vec![0]);
        let a = t.associate(3, vec![blob(3, 14, 12)], &mut set).unwrap();
        assert_eq!(a.absorbed, vec![0]);
        assert_eq!(set.live_len(), 1);
        assert_eq!(set.get(0).unwrap().span(), 3);
    }

    #[test]
    fn gate_is_inclusive() {
        let t = tracker(TrackingMode::NearestNeighbor, 5.0);
        let mut set = EventSet::new();
        t.associate(1, vec![blob(1, 10, 10)], &mut set).unwrap();
        // Exactly 5 pixels away.
        let a = t.associate(2, vec![blob(2, 13, 14)], &mut set).unwrap();
        assert_eq!(a.absorbed, vec![0]);
        // 6 pixels away: a new event, and a miss for the old one.
        let a = t.associate(3, vec![blob(3, 19, 14)], &mut set).unwrap();
        assert_eq!(a.spawned, vec![1]);
        assert_eq!(a.missed, vec![0]);
    }

    #[test]
    fn closest_winner_wins_and_the_rest_spawn() {
        let t = tracker(TrackingMode::NearestNeighbor, 5.0);
        let mut set = EventSet::new();
        t.associate(1, vec![blob(1, 10, 10)], &mut set).unwrap();
        let a = t
            .associate(2, vec![blob(2, 13, 10), blob(2, 11, 10)], &mut set)
            .unwrap();
        assert_eq!(a.absorbed, vec![0]);
        assert_eq!(a.spawned, vec![1]);
        assert_eq!(set.get(0).unwrap().last_winner().region().centroid, Vector2D::new(11.0, 10.0));
    }

    #[test]
    fn competing_events_lose_to_the_smallest_residual() {
        let t = tracker(TrackingMode::NearestNeighbor, 5.0);
        let mut set = EventSet::new();
        t.associate(1, vec![blob(1, 10, 10), blob(1, 16, 10)], &mut set).unwrap();
        let a = t.associate(2, vec![blob(2, 15, 10)], &mut set).unwrap();
        assert_eq!(a.absorbed, vec![1]);
        assert_eq!(a.missed, vec![0]);
        assert_eq!(set.get(0).unwrap().no_match_count(), 1);
    }

    #[test]
    fn mode_none_never_associates() {
        let t = tracker(TrackingMode::None, 50.0);
        let mut set = EventSet::new();
        t.associate(1, vec![blob(1, 10, 10)], &mut set).unwrap();
        let a = t.associate(2, vec![blob(2, 10, 10)], &mut set).unwrap();
        assert!(a.absorbed.is_empty());
        assert_eq!(a.spawned, vec![1]);
    }

    #[test]
    fn empty_frames_never_create_events() {
        let t = tracker(TrackingMode::KalmanFilter, 30.0);
        let mut set = EventSet::new();
        for frame in 1..=5 {
            t.associate(frame, Vec::new(), &mut set).unwrap();
        }
        assert!(set.is_empty());
    }

    #[test]
    fn fused_mode_recovers_shape_matches_outside_the_gate() {
        let params = DetectionParameters {
            tracking_mode: TrackingMode::NearestNeighborHough,
            gating_radius: 2.0,
            hough_bin_size: 2.0,
            ..DetectionParameters::default()
        };
        let t = Tracker::new(&params);
        let mut set = EventSet::new();
        t.associate(1, vec![blob(1, 10, 10)], &mut set).unwrap();
        // 3 px is outside the 2 px gate, but part of the translated shape
        // still lands inside the Hough window.
        let a = t.associate(2, vec![blob(2, 13, 10)], &mut set).unwrap();
        assert_eq!(a.absorbed, vec![0]);
        assert!(matches!(t.strategy(), TrackingStrategy::Fused { .. }));
    }

    fn kalman_hough(gating_radius: f64) -> Tracker {
        Tracker::new(&DetectionParameters {
            tracking_mode: TrackingMode::KalmanFilterHough,
            gating_radius,
            hough_bin_size: 2.0,
            ..DetectionParameters::default()
        })
    }

    #[test]
    fn kalman_hough_recovers_shape_matches_outside_the_gate() {
        let t = kalman_hough(2.0);
        let mut set = EventSet::new();
        t.associate(1, vec![blob(1, 10, 10)], &mut set).unwrap();
        assert!(matches!(set.get(0).unwrap().motion(), MotionModel::Kalman(_)));

        let a = t.associate(2, vec![blob(2, 13, 10)], &mut set).unwrap();
        assert_eq!(a.absorbed, vec![0]);
        assert!(a.spawned.is_empty());
        assert_eq!(set.get(0).unwrap().last_winner().region().centroid, Vector2D::new(13.0, 10.0));
    }

    #[test]
    fn kalman_hough_keeps_the_prediction_match_over_a_shape_match() {
        // Build a constant-velocity track with a wide gate first.
        let warmup = tracker(TrackingMode::KalmanFilter, 10.0);
        let mut set = EventSet::new();
        for frame in 1..=5 {
            warmup.associate(frame, vec![blob(frame, 10 + 4 * frame, 10)], &mut set).unwrap();
        }
        let predicted = set.get(0).unwrap().predicted_position();
        assert!((predicted.x - 34.0).abs() < 0.5, "x = {}", predicted.x);

        // One winner where the filter expects it, one sitting on the last
        // observed shape. The prediction match stands; the other spawns.
        let t = kalman_hough(3.0);
        let a = t
            .associate(6, vec![blob(6, 30, 10), blob(6, 34, 11)], &mut set)
            .unwrap();
        assert_eq!(a.absorbed, vec![0]);
        assert_eq!(a.spawned, vec![1]);
        assert_eq!(set.get(0).unwrap().last_winner().region().centroid, Vector2D::new(34.0, 11.0));
        assert_eq!(set.get(1).unwrap().last_winner().region().centroid, Vector2D::new(30.0, 10.0));
    }

    #[test]
    fn assignment_is_independent_of_candidate_order() {
        let mut cands = vec![
            Candidate { winner: 1, event: 7, residual: 1.0 },
            Candidate { winner: 0, event: 7, residual: 1.0 },
            Candidate { winner: 0, event: 3, residual: 2.0 },
        ];
        let forward = assign_greedily(cands.clone());
        cands.reverse();
        assert_eq!(forward, assign_greedily(cands));
        assert_eq!(forward[0], Assignment { winner: 0, event: 7 });
        assert_eq!(forward.len(), 1);
    }
}
