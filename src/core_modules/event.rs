// THEORY:
// An `Event` is the complete, historical record of a single object's journey
// through the video. Where a `Winner` is a snapshot in one frame, an `Event`
// adds memory: every winner it absorbed, in frame order, plus the motion state
// used to predict where the object will be next.
//
// Key architectural principles:
// 1.  **Arena Ownership**: Events live inside the `EventSet` and are addressed by
//     `EventId`. Nothing outside the set holds a mutable reference to an event;
//     the mutating methods here are crate-private and only `EventSet::apply`
//     calls them.
// 2.  **One Motion Model per Run**: The closed `MotionModel` enum carries the
//     prediction state for the configured tracking mode. `peek` is pure, so the
//     association engine can score candidates against it in parallel. The
//     committed outcome (seen or missed) is what advances it.
// 3.  **Terminal Expiry**: Once an event is `Expired` it is frozen. Its history
//     is kept for reporting and nothing may extend it.

use crate::config::{DetectionParameters, TrackingMode};
use crate::core_modules::geometry::{BoundingBox, Vector2D};
use crate::core_modules::hough::ShapeTemplate;
use crate::core_modules::kalman::KalmanTracker2D;
use crate::core_modules::winner::Winner;
use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type EventId = u64;

/// Classification of an event while it is still accumulating observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Candidate,
    Interesting,
    Boring,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Candidate => "Candidate",
            Classification::Interesting => "Interesting",
            Classification::Boring => "Boring",
        })
    }
}

/// Lifecycle state. `Expired` remembers the last classification it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventState {
    Candidate,
    Interesting,
    Boring,
    Expired(Classification),
}

impl EventState {
    pub fn classification(&self) -> Classification {
        match *self {
            EventState::Candidate => Classification::Candidate,
            EventState::Interesting => Classification::Interesting,
            EventState::Boring => Classification::Boring,
            EventState::Expired(c) => c,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, EventState::Expired(_))
    }
}

impl From<Classification> for EventState {
    fn from(c: Classification) -> Self {
        match c {
            Classification::Candidate => EventState::Candidate,
            Classification::Interesting => EventState::Interesting,
            Classification::Boring => EventState::Boring,
        }
    }
}

/// Prediction state of an event, chosen by the tracking mode.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionModel {
    /// Predicts the last observed centroid.
    Fixed(Vector2D),
    /// Extrapolates the last displacement.
    ConstantVelocity { position: Vector2D, velocity: Vector2D },
    Kalman(KalmanTracker2D),
}

impl MotionModel {
    pub fn for_mode(params: &DetectionParameters, position: Vector2D) -> Self {
        match params.tracking_mode {
            TrackingMode::KalmanFilter | TrackingMode::KalmanFilterHough => MotionModel::Kalman(
                KalmanTracker2D::new(position, params.x_kalman, params.y_kalman),
            ),
            TrackingMode::Hough => MotionModel::ConstantVelocity {
                position,
                velocity: Vector2D::default(),
            },
            TrackingMode::None
            | TrackingMode::NearestNeighbor
            | TrackingMode::NearestNeighborHough => MotionModel::Fixed(position),
        }
    }

    /// Position expected in the next frame. Does not advance the model.
    pub fn peek(&self) -> Vector2D {
        match self {
            MotionModel::Fixed(p) => *p,
            MotionModel::ConstantVelocity { position, velocity } => *position + *velocity,
            MotionModel::Kalman(kf) => kf.peek(),
        }
    }

    /// Advance one frame in which the event was not seen.
    pub fn coast(&mut self) {
        match self {
            MotionModel::Fixed(_) => {}
            MotionModel::ConstantVelocity { position, velocity } => *position += *velocity,
            MotionModel::Kalman(kf) => kf.coast(),
        }
    }

    /// Advance one frame in which the event was seen at `measurement`.
    pub fn observe(&mut self, measurement: Vector2D) {
        match self {
            MotionModel::Fixed(p) => *p = measurement,
            MotionModel::ConstantVelocity { position, velocity } => {
                let predicted = *position + *velocity;
                *velocity += measurement - predicted;
                *position = measurement;
            }
            MotionModel::Kalman(kf) => kf.observe(measurement),
        }
    }
}

/// A tracked object across a span of frames.
#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    /// Absorbed winners in strictly increasing frame order. Never empty.
    winners: Vec<Winner>,
    motion: MotionModel,
    state: EventState,
    /// Consecutive live frames without a match.
    no_match: u32,
    interestingness: f64,
    /// Shape of the most recent region, used by Hough matching.
    template: ShapeTemplate,
    /// Frame of the latest overlap suppression.
    suppressed_at: Option<u32>,
}

impl Event {
    /// `motion` must already be seeded at the winner's centroid.
    pub(crate) fn new(id: EventId, winner: Winner, motion: MotionModel) -> Self {
        let template = ShapeTemplate::from_region(winner.region());
        let interestingness = winner.score();
        Self {
            id,
            winners: vec![winner],
            motion,
            state: EventState::Candidate,
            no_match: 0,
            interestingness,
            template,
            suppressed_at: None,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn classification(&self) -> Classification {
        self.state.classification()
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_expired()
    }

    pub fn winners(&self) -> &[Winner] {
        &self.winners
    }

    pub fn observation_count(&self) -> usize {
        self.winners.len()
    }

    pub fn last_winner(&self) -> &Winner {
        // `winners` is created non-empty and only ever grows.
        &self.winners[self.winners.len() - 1]
    }

    pub fn first_frame(&self) -> u32 {
        self.winners[0].frame_num()
    }

    pub fn last_frame(&self) -> u32 {
        self.last_winner().frame_num()
    }

    /// Frames from first to last observation, both inclusive.
    pub fn span(&self) -> u32 {
        self.last_frame() - self.first_frame() + 1
    }

    pub fn no_match_count(&self) -> u32 {
        self.no_match
    }

    pub fn interestingness(&self) -> f64 {
        self.interestingness
    }

    /// Bounding box of the most recent observation.
    pub fn bounding_box(&self) -> BoundingBox {
        self.last_winner().region().bounding_box
    }

    pub fn predicted_position(&self) -> Vector2D {
        self.motion.peek()
    }

    pub fn motion(&self) -> &MotionModel {
        &self.motion
    }

    pub fn template(&self) -> &ShapeTemplate {
        &self.template
    }

    /// True when an overlap suppressed this event and nothing was absorbed since.
    pub fn suppressed_since_last_observation(&self) -> bool {
        self.suppressed_at.is_some_and(|frame| frame > self.last_frame())
    }

    pub fn mean_area(&self) -> f64 {
        self.winners.iter().map(|w| w.region().area as f64).sum::<f64>() / self.winners.len() as f64
    }

    fn ensure_live(&self, frame: u32) -> Result<()> {
        if self.state.is_expired() {
            return Err(EventError::DataQuality {
                frame,
                reason: format!("event {} is expired and cannot change", self.id),
            });
        }
        Ok(())
    }

    pub(crate) fn absorb(&mut self, winner: Winner) -> Result<()> {
        self.ensure_live(winner.frame_num())?;
        if winner.frame_num() <= self.last_frame() {
            return Err(EventError::DataQuality {
                frame: winner.frame_num(),
                reason: format!(
                    "event {} already observed up to frame {}",
                    self.id,
                    self.last_frame()
                ),
            });
        }
        self.motion.observe(winner.region().centroid);
        self.template = ShapeTemplate::from_region(winner.region());
        self.no_match = 0;
        self.winners.push(winner);
        Ok(())
    }

    pub(crate) fn miss(&mut self, frame: u32) -> Result<()> {
        self.ensure_live(frame)?;
        self.no_match += 1;
        self.motion.coast();
        Ok(())
    }

    /// A miss caused by losing an overlap to a more interesting winner.
    pub(crate) fn suppress(&mut self, frame: u32) -> Result<()> {
        self.miss(frame)?;
        self.suppressed_at = Some(frame);
        Ok(())
    }

    pub(crate) fn classify(&mut self, frame: u32, classification: Classification, score: f64) -> Result<()> {
        self.ensure_live(frame)?;
        self.state = classification.into();
        self.interestingness = score;
        Ok(())
    }

    pub(crate) fn expire(&mut self, frame: u32) -> Result<()> {
        self.ensure_live(frame)?;
        self.state = EventState::Expired(self.state.classification());
        Ok(())
    }

    /// Drops per-pixel region data once the event is final. Every report is
    /// built from boxes, centroids and moments.
    pub(crate) fn release_pixels(&mut self) {
        for winner in &mut self.winners {
            winner.release_pixels();
        }
        self.template = ShapeTemplate::default();
    }
}
