// THEORY:
// The `EventSet` is the authoritative arena of every event in a run. It is
// partitioned into exactly two subsets, `live` and `finalized`, and an event is
// always in one of them and never both.
//
// Key architectural principles:
// 1.  **Single Mutation Entry Point**: Components never touch events directly.
//     The tracker and the lifecycle manager *propose* `Mutation`s, and
//     `EventSet::apply` commits them. Everything else gets shared references.
// 2.  **Identifiers Are Never Reused**: `next_id` only grows. Discarded events are
//     dropped from the arena, but their ids stay burnt.
// 3.  **Finalized Means Frozen**: `Expire { keep: true }` moves an event to the
//     finalized subset where it is retained for reporting only. Region pixel
//     lists are released on the way, so a finalized event costs a few numbers
//     per observation.

use crate::core_modules::event::{Classification, Event, EventId, MotionModel};
use crate::core_modules::winner::Winner;
use crate::error::{EventError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// A proposed change to the event set.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Start a new `Candidate` event from an unmatched winner.
    Spawn { winner: Winner, motion: MotionModel },
    /// Extend a live event with a matched winner.
    Absorb { id: EventId, winner: Winner },
    /// Record a live frame without a match.
    Miss { id: EventId },
    /// Record a live frame whose match lost an overlap to a more interesting winner.
    Suppress { id: EventId },
    Classify { id: EventId, classification: Classification, score: f64 },
    /// Move a live event to `Expired`. `keep == false` drops it without a report.
    Expire { id: EventId, keep: bool },
}

/// Event ids touched by one `apply` call, per mutation kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AppliedFrame {
    pub spawned: Vec<EventId>,
    pub absorbed: Vec<EventId>,
    pub missed: Vec<EventId>,
    pub reclassified: Vec<EventId>,
    pub finalized: Vec<EventId>,
    pub discarded: Vec<EventId>,
}

impl AppliedFrame {
    /// True for events that received an observation in this frame.
    pub fn observed(&self, id: EventId) -> bool {
        self.spawned.contains(&id) || self.absorbed.contains(&id)
    }

    pub fn merge(&mut self, other: AppliedFrame) {
        self.spawned.extend(other.spawned);
        self.absorbed.extend(other.absorbed);
        self.missed.extend(other.missed);
        self.reclassified.extend(other.reclassified);
        self.finalized.extend(other.finalized);
        self.discarded.extend(other.discarded);
    }
}

/// All events of a run, live and finalized.
#[derive(Debug, Default, Clone)]
pub struct EventSet {
    live: BTreeMap<EventId, Event>,
    finalized: BTreeMap<EventId, Event>,
    next_id: EventId,
}

impl EventSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live events in id order.
    pub fn live(&self) -> impl Iterator<Item = &Event> {
        self.live.values()
    }

    /// Finalized (reported) events in id order.
    pub fn finalized(&self) -> impl Iterator<Item = &Event> {
        self.finalized.values()
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.live.get(&id).or_else(|| self.finalized.get(&id))
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn finalized_len(&self) -> usize {
        self.finalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.finalized.is_empty()
    }

    /// Number of ids handed out so far, discarded events included.
    pub fn ids_issued(&self) -> u64 {
        self.next_id
    }

    /// Commits a batch of mutations in order.
    ///
    /// Fails on a mutation that names an unknown or already finalized event, or
    /// that would break frame ordering. Mutations before the failing one stay
    /// applied.
    pub fn apply(&mut self, frame: u32, mutations: Vec<Mutation>) -> Result<AppliedFrame> {
        let mut applied = AppliedFrame::default();

        for mutation in mutations {
            match mutation {
                Mutation::Spawn { winner, motion } => {
                    let id = self.next_id;
                    self.next_id += 1;
                    debug!(frame, event = id, "spawned candidate event");
                    self.live.insert(id, Event::new(id, winner, motion));
                    applied.spawned.push(id);
                }
                Mutation::Absorb { id, winner } => {
                    self.live_mut(frame, id)?.absorb(winner)?;
                    applied.absorbed.push(id);
                }
                Mutation::Miss { id } => {
                    self.live_mut(frame, id)?.miss(frame)?;
                    applied.missed.push(id);
                }
                Mutation::Suppress { id } => {
                    self.live_mut(frame, id)?.suppress(frame)?;
                    debug!(frame, event = id, "observation suppressed by an overlap");
                    applied.missed.push(id);
                }
                Mutation::Classify { id, classification, score } => {
                    let event = self.live_mut(frame, id)?;
                    if event.classification() != classification {
                        debug!(frame, event = id, from = %event.classification(), to = %classification, "event reclassified");
                    }
                    event.classify(frame, classification, score)?;
                    applied.reclassified.push(id);
                }
                Mutation::Expire { id, keep } => {
                    let mut event = self.live.remove(&id).ok_or_else(|| unknown(frame, id))?;
                    event.expire(frame)?;
                    if keep {
                        event.release_pixels();
                        debug!(frame, event = id, class = %event.classification(), frames = event.span(), "event finalized");
                        self.finalized.insert(id, event);
                        applied.finalized.push(id);
                    } else {
                        debug!(frame, event = id, "event discarded");
                        applied.discarded.push(id);
                    }
                }
            }
        }

        Ok(applied)
    }

    fn live_mut(&mut self, frame: u32, id: EventId) -> Result<&mut Event> {
        self.live.get_mut(&id).ok_or_else(|| unknown(frame, id))
    }
}

fn unknown(frame: u32, id: EventId) -> EventError {
    EventError::DataQuality {
        frame,
        reason: format!("event {id} is not live"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::geometry::Vector2D;
    use crate::core_modules::region::Region;
    use crate::core_modules::winner::AttentionPoint;

    fn winner(frame: u32, x: u32) -> Winner {
        let px: Vec<(u32, u32, u8)> = (0..4).map(|i| (x + i, 5, 90u8)).collect();
        let point = AttentionPoint {
            position: Vector2D::new(x as f64, 5.0),
            saliency: 0.5,
            rank: 0,
        };
        Winner::new(point, Region::from_pixels(&px).unwrap(), frame)
    }

    fn spawn(frame: u32, x: u32) -> Mutation {
        let w = winner(frame, x);
        let motion = MotionModel::Fixed(w.region().centroid);
        Mutation::Spawn { winner: w, motion }
    }

    #[test]
    fn ids_are_unique_and_never_reused() {
        let mut set = EventSet::new();
        let a = set.apply(1, vec![spawn(1, 0), spawn(1, 20)]).unwrap();
        assert_eq!(a.spawned, vec![0, 1]);

        set.apply(1, vec![Mutation::Expire { id: 0, keep: false }]).unwrap();
        let b = set.apply(2, vec![spawn(2, 40)]).unwrap();
        assert_eq!(b.spawned, vec![2]);
        assert_eq!(set.ids_issued(), 3);
        assert!(set.get(0).is_none());
    }

    #[test]
    fn live_and_finalized_are_disjoint() {
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(1, 0), spawn(1, 20)]).unwrap();
        let applied = set
            .apply(1, vec![Mutation::Expire { id: 1, keep: true }])
            .unwrap();
        assert_eq!(applied.finalized, vec![1]);
        assert_eq!(set.live().map(Event::id).collect::<Vec<_>>(), vec![0]);
        assert_eq!(set.finalized().map(Event::id).collect::<Vec<_>>(), vec![1]);
        assert!(set.get(1).is_some_and(|e| !e.is_live()));
    }

    #[test]
    fn finalized_events_reject_further_mutation() {
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(1, 0)]).unwrap();
        set.apply(1, vec![Mutation::Expire { id: 0, keep: true }]).unwrap();
        assert!(set.apply(2, vec![Mutation::Miss { id: 0 }]).is_err());
        assert!(set
            .apply(2, vec![Mutation::Absorb { id: 0, winner: winner(2, 1) }])
            .is_err());
        assert_eq!(set.finalized_len(), 1);
    }

    #[test]
    fn absorb_and_miss_update_the_event() {
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(1, 0)]).unwrap();
        set.apply(2, vec![Mutation::Miss { id: 0 }]).unwrap();
        assert_eq!(set.get(0).unwrap().no_match_count(), 1);
        let applied = set
            .apply(3, vec![Mutation::Absorb { id: 0, winner: winner(3, 2) }])
            .unwrap();
        assert!(applied.observed(0));
        let e = set.get(0).unwrap();
        assert_eq!(e.no_match_count(), 0);
        assert_eq!((e.first_frame(), e.last_frame()), (1, 3));
    }

    #[test]
    fn suppression_holds_until_the_next_observation() {
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(1, 0)]).unwrap();
        let applied = set.apply(2, vec![Mutation::Suppress { id: 0 }]).unwrap();
        assert_eq!(applied.missed, vec![0]);
        let e = set.get(0).unwrap();
        assert_eq!(e.no_match_count(), 1);
        assert!(e.suppressed_since_last_observation());

        set.apply(3, vec![Mutation::Absorb { id: 0, winner: winner(3, 1) }])
            .unwrap();
        assert!(!set.get(0).unwrap().suppressed_since_last_observation());
    }

    #[test]
    fn finalizing_releases_region_pixels() {
        let mut set = EventSet::new();
        set.apply(1, vec![spawn(1, 0)]).unwrap();
        set.apply(2, vec![Mutation::Absorb { id: 0, winner: winner(2, 1) }])
            .unwrap();
        assert_eq!(set.get(0).unwrap().last_winner().region().pixels.len(), 4);

        set.apply(2, vec![Mutation::Expire { id: 0, keep: true }]).unwrap();
        let e = set.get(0).unwrap();
        assert!(e.winners().iter().all(|w| w.region().pixels.is_empty()));
        assert!(e.template().is_empty());
        assert_eq!(e.last_winner().region().area, 4);
        assert!((e.mean_area() - 4.0).abs() < 1e-12);
    }
}
