// THEORY:
// The `pipeline` module is the top-level, synchronous API of the event engine.
// It wires the full stack together behind one call per frame: hand it the frame
// and the detections the segmenter produced, get back a report of what changed.
//
// Key architectural principles:
// 1.  **Strict Frame Order**: Frame n+1 is never associated before frame n's
//     lifecycle transitions are committed. `process_frame` runs every stage to
//     completion and rejects frames that arrive out of order.
// 2.  **Validated Once**: The configuration is validated and its area bounds are
//     resolved in the constructor. No frame is processed under a bad config.
// 3.  **Staged Processing**: Each frame goes through the same stages in the same
//     order. Winner formation, association, overlap suppression, commit,
//     lifecycle review, commit.

use crate::config::DetectionParameters;
use crate::core_modules::event::{Event, EventId};
use crate::core_modules::event_set::{AppliedFrame, EventSet};
use crate::core_modules::image_data::ImageData;
use crate::core_modules::lifecycle::{InterestScorer, LifecycleManager};
use crate::core_modules::tracker::Tracker;
use crate::core_modules::winner::{Detection, form_winners};
use crate::error::{EventError, Result};
use tracing::{debug, info, warn};

/// What happened in one processed frame.
#[derive(Debug)]
pub struct ActivityData {
    pub frame_num: u32,
    /// Winners that reached association.
    pub winners: usize,
    /// Detections dropped as malformed.
    pub rejected: Vec<EventError>,
    /// Detections dropped by area bounds or the per-frame cap.
    pub filtered: usize,
    /// Event ids touched this frame.
    pub applied: AppliedFrame,
    /// Snapshots of the events finalized this frame.
    pub finalized: Vec<Event>,
}

/// The primary output of the engine for a single frame.
#[derive(Debug)]
pub enum FrameReport {
    /// The frame was below the minimum intensity deviation and was ignored.
    Skipped { frame_num: u32, std_dev: f64 },
    NoActivity { frame_num: u32 },
    Activity(ActivityData),
}

impl FrameReport {
    pub fn frame_num(&self) -> u32 {
        match self {
            FrameReport::Skipped { frame_num, .. } | FrameReport::NoActivity { frame_num } => *frame_num,
            FrameReport::Activity(data) => data.frame_num,
        }
    }

    pub fn finalized(&self) -> &[Event] {
        match self {
            FrameReport::Activity(data) => &data.finalized,
            _ => &[],
        }
    }
}

/// Running totals for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStatistics {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub winners: u64,
    pub rejected: u64,
    pub filtered: u64,
    pub events_finalized: u64,
    pub events_discarded: u64,
}

/// The synchronous, frame-sequential event engine.
#[derive(Debug)]
pub struct EventPipeline {
    params: DetectionParameters,
    frame_width: u32,
    frame_height: u32,
    tracker: Tracker,
    lifecycle: LifecycleManager,
    events: EventSet,
    last_frame: Option<u32>,
    stats: RunStatistics,
}

impl EventPipeline {
    /// Validates `params` and resolves its area bounds for frames of the given size.
    pub fn new(params: &DetectionParameters, frame_width: u32, frame_height: u32) -> Result<Self> {
        params.validate()?;
        if frame_width == 0 || frame_height == 0 {
            return Err(EventError::Configuration(format!(
                "frame size {frame_width}x{frame_height} is empty"
            )));
        }
        let params = params.with_resolved_areas(frame_width, frame_height);
        info!(
            mode = %params.tracking_mode,
            min_area = params.min_event_area,
            max_area = params.max_event_area,
            width = frame_width,
            height = frame_height,
            "event pipeline configured"
        );
        Ok(Self {
            tracker: Tracker::new(&params),
            lifecycle: LifecycleManager::new(&params),
            params,
            frame_width,
            frame_height,
            events: EventSet::new(),
            last_frame: None,
            stats: RunStatistics::default(),
        })
    }

    /// Replaces the default interestingness scorer.
    pub fn with_scorer(mut self, scorer: Box<dyn InterestScorer>) -> Self {
        self.lifecycle = self.lifecycle.with_scorer(scorer);
        self
    }

    /// The configuration in effect, with resolved area bounds.
    pub fn params(&self) -> &DetectionParameters {
        &self.params
    }

    pub fn events(&self) -> &EventSet {
        &self.events
    }

    pub fn statistics(&self) -> RunStatistics {
        self.stats
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.last_frame
    }

    /// Runs one frame through every stage.
    pub fn process_frame(&mut self, frame: &ImageData, detections: Vec<Detection>) -> Result<FrameReport> {
        let frame_num = frame.frame_num;

        // --- 1. Ordering & Frame Checks ---
        if let Some(last) = self.last_frame {
            if frame_num <= last {
                return Err(EventError::DataQuality {
                    frame: frame_num,
                    reason: format!("frame arrived after frame {last}"),
                });
            }
        }
        if (frame.width(), frame.height()) != (self.frame_width, self.frame_height) {
            return Err(EventError::DataQuality {
                frame: frame_num,
                reason: format!(
                    "frame is {}x{}, expected {}x{}",
                    frame.width(),
                    frame.height(),
                    self.frame_width,
                    self.frame_height
                ),
            });
        }
        self.last_frame = Some(frame_num);

        if self.params.min_std_dev > 0.0 {
            let std_dev = frame.intensity_std_dev();
            if std_dev < self.params.min_std_dev {
                debug!(frame = frame_num, std_dev, "frame below minimum deviation, skipped");
                self.stats.frames_skipped += 1;
                return Ok(FrameReport::Skipped { frame_num, std_dev });
            }
        }

        // --- 2. Winner Formation ---
        let formed = form_winners(
            frame_num,
            detections,
            self.params.min_event_area,
            self.params.max_event_area,
            self.params.max_winners_per_frame,
        );
        let winner_count = formed.winners.len();

        // --- 3. Association ---
        let mut applied = if self.params.remove_overlapping_detections {
            let proposals = self.tracker.propose(formed.winners, &self.events);
            let proposals = self.lifecycle.resolve_overlaps(proposals, &self.events);
            self.events.apply(frame_num, proposals)?
        } else {
            self.tracker.associate(frame_num, formed.winners, &mut self.events)?
        };

        // --- 4. Lifecycle Review ---
        let transitions = self.lifecycle.review(&self.events);
        applied.merge(self.events.apply(frame_num, transitions)?);

        // --- 5. Reporting ---
        let finalized = self.snapshots(&applied.finalized);
        self.stats.frames_processed += 1;
        self.stats.winners += winner_count as u64;
        self.stats.rejected += formed.rejected.len() as u64;
        self.stats.filtered += formed.filtered as u64;
        self.stats.events_finalized += applied.finalized.len() as u64;
        self.stats.events_discarded += applied.discarded.len() as u64;

        debug!(
            frame = frame_num,
            winners = winner_count,
            spawned = applied.spawned.len(),
            absorbed = applied.absorbed.len(),
            missed = applied.missed.len(),
            finalized = applied.finalized.len(),
            live = self.events.live_len(),
            "frame processed"
        );

        let quiet = winner_count == 0
            && formed.rejected.is_empty()
            && applied.finalized.is_empty()
            && applied.discarded.is_empty();
        if quiet {
            return Ok(FrameReport::NoActivity { frame_num });
        }
        Ok(FrameReport::Activity(ActivityData {
            frame_num,
            winners: winner_count,
            rejected: formed.rejected,
            filtered: formed.filtered,
            applied,
            finalized,
        }))
    }

    /// Expires every live event and returns the ones that are reported.
    pub fn finish(&mut self) -> Result<(AppliedFrame, Vec<Event>)> {
        let frame = self.last_frame.unwrap_or(0);
        let live = self.events.live_len();
        let mutations = self.lifecycle.expire_all(&self.events);
        let applied = self.events.apply(frame, mutations)?;
        let finalized = self.snapshots(&applied.finalized);
        self.stats.events_finalized += applied.finalized.len() as u64;
        self.stats.events_discarded += applied.discarded.len() as u64;
        if live > 0 {
            warn!(live, reported = finalized.len(), "expired events still live at end of run");
        }
        info!(
            frames = self.stats.frames_processed,
            skipped = self.stats.frames_skipped,
            finalized = self.stats.events_finalized,
            "run finished"
        );
        Ok((applied, finalized))
    }

    fn snapshots(&self, ids: &[EventId]) -> Vec<Event> {
        ids.iter().filter_map(|id| self.events.get(*id)).cloned().collect()
    }
}
