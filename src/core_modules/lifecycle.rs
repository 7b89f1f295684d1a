// THEORY:
// The lifecycle manager turns a stream of observations into a verdict. Each
// frame, after association, it looks at every live event and proposes:
// - a classification (`Candidate`, `Interesting` or `Boring`),
// - an expiry once the event has gone unmatched for too long or has lived too long,
// - and, on expiry, whether the event is kept for reporting or dropped.
//
// Key architectural principles:
// 1.  **Pluggable Scoring**: "How interesting is this event" sits behind the
//     `InterestScorer` trait. The default, `MeanWinnerScore`, averages the
//     interestingness of the absorbed winners. Area bounds and the minimum
//     frame count are checked here, outside the scorer.
// 2.  **Classify While Live, Freeze at Expiry**: An event may move between
//     `Interesting` and `Boring` as evidence accumulates. The classification it
//     holds when it expires is final.
// 3.  **Overlap Suppression Before Commit**: Duplicate detections of one object
//     are resolved on the tracker's proposals, before anything is written. The
//     loser's observation for this frame is dropped, never its history.

use crate::config::{DetectionParameters, TrackingMode};
use crate::core_modules::event::{Classification, Event};
use crate::core_modules::event_set::{EventSet, Mutation};
use crate::core_modules::geometry::BoundingBox;
use std::fmt;
use tracing::debug;

/// Interestingness of an event, larger is more interesting.
pub trait InterestScorer: Send + Sync {
    fn score(&self, event: &Event) -> f64;
}

/// Mean interestingness of the absorbed winners.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanWinnerScore;

impl InterestScorer for MeanWinnerScore {
    fn score(&self, event: &Event) -> f64 {
        let winners = event.winners();
        winners.iter().map(|w| w.score()).sum::<f64>() / winners.len() as f64
    }
}

/// Drives the per-event state machine from the run configuration.
pub struct LifecycleManager {
    tracking_mode: TrackingMode,
    min_event_area: u32,
    max_event_area: u32,
    min_event_frames: u32,
    max_event_frames: Option<u32>,
    event_expiration_frames: u32,
    save_boring_events: bool,
    interesting_threshold: f64,
    overlap_threshold: f64,
    scorer: Box<dyn InterestScorer>,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("tracking_mode", &self.tracking_mode)
            .field("min_event_frames", &self.min_event_frames)
            .field("max_event_frames", &self.max_event_frames)
            .field("event_expiration_frames", &self.event_expiration_frames)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// `params` must already have its area bounds resolved.
    pub fn new(params: &DetectionParameters) -> Self {
        Self {
            tracking_mode: params.tracking_mode,
            min_event_area: params.min_event_area,
            max_event_area: params.max_event_area,
            min_event_frames: params.min_event_frames,
            max_event_frames: params.max_event_frames,
            event_expiration_frames: params.event_expiration_frames,
            save_boring_events: params.save_boring_events,
            interesting_threshold: params.interesting_threshold,
            overlap_threshold: params.overlap_threshold,
            scorer: Box::new(MeanWinnerScore),
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn InterestScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Classification an event has earned so far, with its score.
    pub fn classify(&self, event: &Event) -> (Classification, f64) {
        let score = self.scorer.score(event);
        if (event.observation_count() as u32) < self.min_event_frames {
            return (Classification::Candidate, score);
        }
        let area = event.mean_area();
        let area_ok = area >= self.min_event_area as f64 && area <= self.max_event_area as f64;
        if area_ok && score >= self.interesting_threshold {
            (Classification::Interesting, score)
        } else {
            (Classification::Boring, score)
        }
    }

    /// True once the event has been unmatched or alive for too long.
    pub fn should_expire(&self, event: &Event) -> bool {
        if self.tracking_mode == TrackingMode::None {
            return true;
        }
        if event.no_match_count() > self.event_expiration_frames {
            return true;
        }
        self.max_event_frames.is_some_and(|max| event.span() > max)
    }

    /// Whether an expiring event with this classification is reported.
    ///
    /// An event that lost an overlap and was never observed again is dropped.
    pub fn keep_on_expiry(&self, event: &Event, classification: Classification) -> bool {
        if (event.observation_count() as u32) < self.min_event_frames {
            return false;
        }
        if event.suppressed_since_last_observation() {
            return false;
        }
        match classification {
            Classification::Interesting => true,
            Classification::Boring => self.save_boring_events,
            Classification::Candidate => false,
        }
    }

    /// Proposes classification and expiry mutations for every live event.
    pub fn review(&self, events: &EventSet) -> Vec<Mutation> {
        let mut mutations = Vec::new();
        for event in events.live() {
            let (classification, score) = self.classify(event);
            if classification != event.classification() || score != event.interestingness() {
                mutations.push(Mutation::Classify {
                    id: event.id(),
                    classification,
                    score,
                });
            }
            if self.should_expire(event) {
                let keep = self.keep_on_expiry(event, classification);
                debug!(
                    event = event.id(),
                    class = %classification,
                    keep,
                    no_match = event.no_match_count(),
                    span = event.span(),
                    "event expiring"
                );
                mutations.push(Mutation::Expire { id: event.id(), keep });
            }
        }
        mutations
    }

    /// Expires every live event, as at the end of a run.
    pub fn expire_all(&self, events: &EventSet) -> Vec<Mutation> {
        let mut mutations = Vec::new();
        for event in events.live() {
            let (classification, score) = self.classify(event);
            mutations.push(Mutation::Classify {
                id: event.id(),
                classification,
                score,
            });
            mutations.push(Mutation::Expire {
                id: event.id(),
                keep: self.keep_on_expiry(event, classification),
            });
        }
        mutations
    }

    /// Suppresses overlapping observations among the tracker's proposals.
    ///
    /// Proposals are ranked by interestingness (existing events by their current
    /// score, newborns by their winner's score). Going down the ranking, any
    /// observation whose box overlaps an already kept box by more than the
    /// threshold is dropped: an `Absorb` becomes a `Suppress`, a `Spawn` vanishes.
    pub fn resolve_overlaps(&self, proposals: Vec<Mutation>, events: &EventSet) -> Vec<Mutation> {
        // (proposal index, box, interestingness, tie-break key)
        let mut ranked: Vec<(usize, BoundingBox, f64, u64)> = Vec::new();
        for (i, m) in proposals.iter().enumerate() {
            match m {
                Mutation::Absorb { id, winner } => {
                    let score = events.get(*id).map_or(winner.score(), Event::interestingness);
                    ranked.push((i, winner.region().bounding_box, score, *id));
                }
                Mutation::Spawn { winner, .. } => {
                    ranked.push((i, winner.region().bounding_box, winner.score(), u64::MAX));
                }
                _ => {}
            }
        }
        ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.3.cmp(&b.3)).then(a.0.cmp(&b.0)));

        let mut kept: Vec<BoundingBox> = Vec::new();
        let mut suppressed = vec![false; proposals.len()];
        for (i, bbox, _, _) in ranked {
            if kept
                .iter()
                .any(|k| k.overlap_fraction(&bbox) > self.overlap_threshold)
            {
                suppressed[i] = true;
            } else {
                kept.push(bbox);
            }
        }

        proposals
            .into_iter()
            .zip(suppressed)
            .filter_map(|(m, drop)| match (m, drop) {
                (m, false) => Some(m),
                (Mutation::Absorb { id, .. }, true) => {
                    debug!(event = id, "overlapping observation dropped");
                    Some(Mutation::Suppress { id })
                }
                (_, true) => {
                    debug!("overlapping newborn dropped");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::event::{EventState, MotionModel};
    use crate::core_modules::geometry::Vector2D;
    use crate::core_modules::region::Region;
    use crate::core_modules::winner::{AttentionPoint, Winner};

    fn winner(frame: u32, x: u32, side: u32, saliency: f64) -> Winner {
        let mut px = Vec::new();
        for dy in 0..side {
            for dx in 0..side {
                px.push((x + dx, 10 + dy, 100u8));
            }
        }
        let point = AttentionPoint {
            position: Vector2D::new(x as f64, 10.0),
            saliency,
            rank: 0,
        };
        Winner::new(point, Region::from_pixels(&px).unwrap(), frame)
    }

    fn spawn(w: Winner) -> Mutation {
        let motion = MotionModel::Fixed(w.region().centroid);
        Mutation::Spawn { winner: w, motion }
    }

    fn params() -> DetectionParameters {
        DetectionParameters {
            tracking_mode: TrackingMode::NearestNeighbor,
            min_event_area: 4,
            max_event_area: 100,
            ..DetectionParameters::default()
        }
    }

    #[test]
    fn short_events_stay_candidates_and_are_discarded() {
        let lm = LifecycleManager::new(&DetectionParameters {
            min_event_frames: 3,
            ..params()
        });
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(winner(1, 0, 3, 1.0))]).unwrap();
        set.apply(1, lm.review(&set)).unwrap();
        assert_eq!(set.get(0).unwrap().state(), EventState::Candidate);

        set.apply(2, vec![Mutation::Miss { id: 0 }]).unwrap();
        let applied = set.apply(2, lm.review(&set)).unwrap();
        assert_eq!(applied.discarded, vec![0]);
        assert_eq!(set.finalized_len(), 0);
    }

    #[test]
    fn expiry_budget_is_exceeded_not_reached() {
        let lm = LifecycleManager::new(&DetectionParameters {
            event_expiration_frames: 2,
            ..params()
        });
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(winner(1, 0, 3, 1.0))]).unwrap();
        for frame in 2..=3 {
            set.apply(frame, vec![Mutation::Miss { id: 0 }]).unwrap();
            assert!(set.apply(frame, lm.review(&set)).unwrap().finalized.is_empty());
        }
        set.apply(4, vec![Mutation::Miss { id: 0 }]).unwrap();
        let applied = set.apply(4, lm.review(&set)).unwrap();
        assert_eq!(applied.finalized, vec![0]);
        assert_eq!(
            set.get(0).unwrap().state(),
            EventState::Expired(Classification::Interesting)
        );
    }

    #[test]
    fn max_event_frames_bounds_the_span() {
        let lm = LifecycleManager::new(&DetectionParameters {
            max_event_frames: Some(2),
            event_expiration_frames: 10,
            ..params()
        });
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(winner(1, 0, 3, 1.0))]).unwrap();
        set.apply(2, vec![Mutation::Absorb { id: 0, winner: winner(2, 1, 3, 1.0) }]).unwrap();
        assert!(set.apply(2, lm.review(&set)).unwrap().finalized.is_empty());
        set.apply(3, vec![Mutation::Absorb { id: 0, winner: winner(3, 2, 3, 1.0) }]).unwrap();
        assert_eq!(set.apply(3, lm.review(&set)).unwrap().finalized, vec![0]);
    }

    #[test]
    fn boring_events_need_the_save_flag() {
        let strict = DetectionParameters {
            interesting_threshold: 0.5,
            ..params()
        };
        for (save, expected) in [(false, 0usize), (true, 1usize)] {
            let lm = LifecycleManager::new(&DetectionParameters {
                save_boring_events: save,
                ..strict.clone()
            });
            let mut set = EventSet::new();
            set.apply(1, vec![spawn(winner(1, 0, 3, 0.1))]).unwrap();
            set.apply(1, lm.review(&set)).unwrap();
            assert_eq!(set.get(0).unwrap().classification(), Classification::Boring);
            set.apply(2, vec![Mutation::Miss { id: 0 }]).unwrap();
            set.apply(2, lm.review(&set)).unwrap();
            assert_eq!(set.finalized_len(), expected);
        }
    }

    #[test]
    fn mode_none_expires_every_event_in_its_own_frame() {
        let lm = LifecycleManager::new(&DetectionParameters {
            tracking_mode: TrackingMode::None,
            ..params()
        });
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(winner(1, 0, 3, 1.0)), spawn(winner(1, 40, 3, 1.0))]).unwrap();
        let applied = set.apply(1, lm.review(&set)).unwrap();
        assert_eq!(applied.finalized, vec![0, 1]);
        assert!(set.finalized().all(|e| e.span() == 1));
    }

    struct AreaScore;
    impl InterestScorer for AreaScore {
        fn score(&self, event: &Event) -> f64 {
            event.mean_area()
        }
    }

    #[test]
    fn scorer_is_pluggable() {
        let lm = LifecycleManager::new(&DetectionParameters {
            interesting_threshold: 20.0,
            ..params()
        })
        .with_scorer(Box::new(AreaScore));
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(winner(1, 0, 3, 9.0)), spawn(winner(1, 40, 5, 0.0))]).unwrap();
        assert_eq!(lm.classify(set.get(0).unwrap()).0, Classification::Boring);
        assert_eq!(lm.classify(set.get(1).unwrap()), (Classification::Interesting, 25.0));
    }

    #[test]
    fn overlapping_newborn_loses_to_the_more_interesting_one() {
        let lm = LifecycleManager::new(&params());
        let set = EventSet::new();
        let proposals = vec![spawn(winner(1, 0, 6, 0.2)), spawn(winner(1, 1, 6, 0.9))];
        let kept = lm.resolve_overlaps(proposals, &set);
        assert_eq!(kept.len(), 1);
        assert!(matches!(&kept[0], Mutation::Spawn { winner, .. } if winner.score() == 0.9));
    }

    #[test]
    fn overlapping_existing_event_keeps_its_history() {
        let lm = LifecycleManager::new(&params());
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(winner(1, 0, 6, 0.1))]).unwrap();
        let proposals = vec![
            Mutation::Absorb { id: 0, winner: winner(2, 1, 6, 0.1) },
            spawn(winner(2, 2, 6, 0.8)),
        ];
        let resolved = lm.resolve_overlaps(proposals, &set);
        assert!(matches!(resolved[0], Mutation::Suppress { id: 0 }));
        assert!(matches!(resolved[1], Mutation::Spawn { .. }));

        let applied = set.apply(2, resolved).unwrap();
        assert_eq!(applied.missed, vec![0]);
        assert_eq!(set.get(0).unwrap().observation_count(), 1);
    }

    #[test]
    fn suppressed_event_without_later_observations_is_dropped() {
        let lm = LifecycleManager::new(&params());
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(winner(1, 0, 6, 1.0)), spawn(winner(1, 40, 6, 1.0))]).unwrap();
        set.apply(1, lm.review(&set)).unwrap();
        set.apply(2, vec![Mutation::Suppress { id: 0 }, Mutation::Suppress { id: 1 }]).unwrap();
        set.apply(3, vec![Mutation::Absorb { id: 1, winner: winner(3, 41, 6, 1.0) }]).unwrap();

        let event = set.get(0).unwrap();
        assert_eq!(event.classification(), Classification::Interesting);
        assert!(!lm.keep_on_expiry(event, Classification::Interesting));
        assert!(lm.keep_on_expiry(set.get(1).unwrap(), Classification::Interesting));

        let applied = set.apply(3, lm.expire_all(&set)).unwrap();
        assert_eq!(applied.discarded, vec![0]);
        assert_eq!(applied.finalized, vec![1]);
    }

    #[test]
    fn disjoint_boxes_are_untouched() {
        let lm = LifecycleManager::new(&params());
        let proposals = vec![spawn(winner(1, 0, 4, 0.2)), spawn(winner(1, 50, 4, 0.9))];
        assert_eq!(lm.resolve_overlaps(proposals, &EventSet::new()).len(), 2);
    }
}
