// THEORY:
// The `reporting` module is the sink for finalized events. The engine hands it
// immutable snapshots; it never reaches back into the live event set.
//
// Key architectural principles:
// 1.  **Per-Event Output As Events Finalize**: Clips and descriptor files are
//     written the moment an event is recorded, so an aborted run still leaves
//     everything finalized so far on disk.
// 2.  **Run-Level Output On Flush**: The event-set document, summary, property
//     table and positions file describe the whole run and are written by `flush`.
// 3.  **Clips Are Captured Early**: A clip needs the frame an observation came
//     from, which is long gone when the event finalizes. Crops are taken as
//     observations arrive and held until the event is recorded or discarded.
// 4.  **I/O Is Fatal**: Every write failure surfaces as `FatalIo` (or `Image` for
//     encoder failures).

pub mod clips;
pub mod event_document;
pub mod features_file;
pub mod property_table;
pub mod summary;

use crate::config::TrackingMode;
use crate::core_modules::event::{Event, EventId};
use crate::core_modules::event_set::{AppliedFrame, EventSet};
use crate::core_modules::features::FeatureDescriptor;
use crate::core_modules::image_data::ImageData;
use crate::core_modules::property_vector::PropertyVectorSet;
use crate::error::{EventError, Result};
use crate::pipeline::RunStatistics;
use clips::{Clip, ClipSelection};
use event_document::{EventSetDocument, write_event_set};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const EVENT_SET_FILE: &str = "events.json";
pub const SUMMARY_FILE: &str = "summary.txt";
pub const PROPERTY_FILE: &str = "properties.txt";
pub const POSITIONS_FILE: &str = "positions.txt";

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub clips: ClipSelection,
    /// Pixels added around each clip.
    pub pad_events: u32,
}

impl ReportConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            clips: ClipSelection::None,
            pad_events: 0,
        }
    }
}

/// Descriptor status of a reported event.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOutcome {
    NotRequested,
    Available(FeatureDescriptor),
    Unavailable(String),
}

/// A finalized event snapshot together with its descriptor outcome.
#[derive(Debug, Clone)]
pub struct FinalizedEvent {
    pub event: Event,
    pub features: FeatureOutcome,
}

/// Files written by `Reporter::flush`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub event_set: PathBuf,
    pub summary: PathBuf,
    pub properties: PathBuf,
    pub positions: PathBuf,
}

#[derive(Debug)]
pub struct Reporter {
    config: ReportConfig,
    pending_clips: HashMap<EventId, Vec<Clip>>,
    reported: Vec<FinalizedEvent>,
}

impl Reporter {
    pub fn new(config: ReportConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.output_dir).map_err(|e| EventError::io(&config.output_dir, e))?;
        Ok(Self {
            config,
            pending_clips: HashMap::new(),
            reported: Vec::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn reported(&self) -> &[FinalizedEvent] {
        &self.reported
    }

    /// Crops the observations made in `frame` for every selected event, and
    /// drops held clips of discarded events.
    pub fn capture_clips(&mut self, frame: &ImageData, events: &EventSet, applied: &AppliedFrame) {
        self.discard_clips(&applied.discarded);
        if self.config.clips == ClipSelection::None {
            return;
        }
        for &id in applied.spawned.iter().chain(&applied.absorbed) {
            if !self.config.clips.includes(id) {
                continue;
            }
            let Some(event) = events.get(id) else {
                continue;
            };
            let bbox = event.last_winner().region().bounding_box;
            if let Some(clip) = Clip::crop(frame.frame_num, &frame.img, &bbox, self.config.pad_events) {
                self.pending_clips.entry(id).or_default().push(clip);
            }
        }
    }

    pub fn discard_clips(&mut self, ids: &[EventId]) {
        for id in ids {
            self.pending_clips.remove(id);
        }
    }

    /// Writes the per-event output of one finalized event and keeps it for `flush`.
    pub fn record(&mut self, finalized: FinalizedEvent) -> Result<()> {
        let id = finalized.event.id();
        if let Some(clips) = self.pending_clips.remove(&id) {
            let written = clips::write_clips(&self.config.output_dir, id, &clips)?;
            info!(event = id, clips = written.len(), "event clips written");
        }
        match &finalized.features {
            FeatureOutcome::Available(descriptor) => {
                let path = self.config.output_dir.join(format!("event{id}.dat"));
                features_file::write_features(&path, descriptor)?;
            }
            FeatureOutcome::Unavailable(reason) => {
                warn!(event = id, reason = %reason, "descriptor unavailable");
            }
            FeatureOutcome::NotRequested => {}
        }
        self.reported.push(finalized);
        Ok(())
    }

    /// Writes the run-level reports for everything recorded so far.
    pub fn flush(&self, tracking_mode: TrackingMode, stats: &RunStatistics) -> Result<ReportPaths> {
        let dir = &self.config.output_dir;
        let mut events: Vec<&Event> = self.reported.iter().map(|f| &f.event).collect();
        events.sort_by_key(|e| e.id());

        let paths = ReportPaths {
            event_set: dir.join(EVENT_SET_FILE),
            summary: dir.join(SUMMARY_FILE),
            properties: dir.join(PROPERTY_FILE),
            positions: dir.join(POSITIONS_FILE),
        };

        let document = EventSetDocument::new(tracking_mode, stats.frames_processed, events.iter().copied());
        write_event_set(&paths.event_set, &document)?;
        write_text(&paths.summary, |w| summary::write_summary(w, events.iter().copied(), stats))?;
        write_text(&paths.positions, |w| summary::write_positions(w, events.iter().copied()))?;
        PropertyVectorSet::from_events(events.iter().copied()).save(&paths.properties)?;

        info!(dir = %dir.display(), events = events.len(), "reports flushed");
        Ok(paths)
    }
}

fn write_text(path: &Path, body: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>) -> Result<()> {
    let file = File::create(path).map_err(|e| EventError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    body(&mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| EventError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::event::MotionModel;
    use crate::core_modules::event_set::Mutation;
    use crate::core_modules::geometry::Vector2D;
    use crate::core_modules::region::Region;
    use crate::core_modules::winner::{AttentionPoint, Winner};
    use image::{Rgb, RgbImage};

    fn winner(frame: u32) -> Winner {
        let px: Vec<(u32, u32, u8)> = (0..9).map(|i| (10 + i % 3, 10 + i / 3, 200)).collect();
        let point = AttentionPoint {
            position: Vector2D::new(11.0, 11.0),
            saliency: 1.0,
            rank: 0,
        };
        Winner::new(point, Region::from_pixels(&px).unwrap(), frame)
    }

    fn frame(n: u32) -> ImageData {
        ImageData::new(n, RgbImage::from_pixel(32, 32, Rgb([9, 9, 9])))
    }

    #[test]
    fn clips_are_held_until_the_event_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReportConfig::new(dir.path());
        config.clips = ClipSelection::All;
        config.pad_events = 2;
        let mut reporter = Reporter::new(config).unwrap();

        let mut set = EventSet::new();
        let w = winner(1);
        let motion = MotionModel::Fixed(w.region().centroid);
        let applied = set.apply(1, vec![Mutation::Spawn { winner: w, motion }]).unwrap();
        reporter.capture_clips(&frame(1), &set, &applied);
        let applied = set.apply(2, vec![Mutation::Absorb { id: 0, winner: winner(2) }]).unwrap();
        reporter.capture_clips(&frame(2), &set, &applied);
        assert!(!dir.path().join("event0_frame1.png").exists());

        reporter
            .record(FinalizedEvent {
                event: set.get(0).unwrap().clone(),
                features: FeatureOutcome::Unavailable("too small".into()),
            })
            .unwrap();
        assert!(dir.path().join("event0_frame1.png").exists());
        assert!(dir.path().join("event0_frame2.png").exists());
        assert!(!dir.path().join("event0.dat").exists());
    }

    #[test]
    fn discarded_events_leave_no_clips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReportConfig::new(dir.path());
        config.clips = ClipSelection::All;
        let mut reporter = Reporter::new(config).unwrap();

        let mut set = EventSet::new();
        let w = winner(1);
        let motion = MotionModel::Fixed(w.region().centroid);
        let applied = set.apply(1, vec![Mutation::Spawn { winner: w, motion }]).unwrap();
        reporter.capture_clips(&frame(1), &set, &applied);
        let applied = set.apply(2, vec![Mutation::Expire { id: 0, keep: false }]).unwrap();
        reporter.capture_clips(&frame(2), &set, &applied);
        assert!(reporter.pending_clips.is_empty());
    }

    #[test]
    fn flush_writes_every_run_level_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = Reporter::new(ReportConfig::new(dir.path().join("nested"))).unwrap();
        let mut set = EventSet::new();
        let w = winner(4);
        let motion = MotionModel::Fixed(w.region().centroid);
        set.apply(4, vec![Mutation::Spawn { winner: w, motion }]).unwrap();
        reporter
            .record(FinalizedEvent {
                event: set.get(0).unwrap().clone(),
                features: FeatureOutcome::NotRequested,
            })
            .unwrap();

        let paths = reporter.flush(TrackingMode::NearestNeighbor, &RunStatistics::default()).unwrap();
        for p in [&paths.event_set, &paths.summary, &paths.properties, &paths.positions] {
            assert!(p.exists(), "{}", p.display());
        }
        let properties = PropertyVectorSet::load(&paths.properties).unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties.vectors[0].area, 9.0);
    }
}
