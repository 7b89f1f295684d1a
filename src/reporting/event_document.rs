// THEORY:
// The event-set document is the machine-readable record of a run: one record
// per finalized event, each carrying its full observation history. It is plain
// JSON so downstream tooling can load it without this crate, and it can be read
// back here for re-analysis and for tests.

use crate::config::TrackingMode;
use crate::core_modules::event::{Classification, Event, EventId};
use crate::core_modules::geometry::BoundingBox;
use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// One observation of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub frame: u32,
    pub x: f64,
    pub y: f64,
    pub bounding_box: BoundingBox,
    pub area: u32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub start_frame: u32,
    pub end_frame: u32,
    pub classification: Classification,
    pub interestingness: f64,
    pub observations: Vec<ObservationRecord>,
}

impl EventRecord {
    pub fn from_event(event: &Event) -> Self {
        let observations = event
            .winners()
            .iter()
            .map(|w| ObservationRecord {
                frame: w.frame_num(),
                x: w.region().centroid.x,
                y: w.region().centroid.y,
                bounding_box: w.region().bounding_box,
                area: w.region().area,
                score: w.score(),
            })
            .collect();
        Self {
            id: event.id(),
            start_frame: event.first_frame(),
            end_frame: event.last_frame(),
            classification: event.classification(),
            interestingness: event.interestingness(),
            observations,
        }
    }
}

/// The whole run, events in id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSetDocument {
    pub tracking_mode: TrackingMode,
    pub frames_processed: u64,
    pub events: Vec<EventRecord>,
}

impl EventSetDocument {
    pub fn new<'a>(tracking_mode: TrackingMode, frames_processed: u64, events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut events: Vec<EventRecord> = events.into_iter().map(EventRecord::from_event).collect();
        events.sort_by_key(|e| e.id);
        Self {
            tracking_mode,
            frames_processed,
            events,
        }
    }
}

pub fn write_event_set(path: &Path, document: &EventSetDocument) -> Result<()> {
    let file = File::create(path).map_err(|e| EventError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, document)?;
    writer.flush().map_err(|e| EventError::io(path, e))?;
    info!(path = %path.display(), events = document.events.len(), "event set written");
    Ok(())
}

pub fn read_event_set(path: &Path) -> Result<EventSetDocument> {
    let file = File::open(path).map_err(|e| EventError::io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::event::MotionModel;
    use crate::core_modules::event_set::{EventSet, Mutation};
    use crate::core_modules::geometry::Vector2D;
    use crate::core_modules::region::Region;
    use crate::core_modules::winner::{AttentionPoint, Winner};

    fn winner(frame: u32, x: u32) -> Winner {
        let px: Vec<(u32, u32, u8)> = (0..4).map(|i| (x + i % 2, 5 + i / 2, 90)).collect();
        let point = AttentionPoint {
            position: Vector2D::new(x as f64, 5.0),
            saliency: 0.7,
            rank: 0,
        };
        Winner::new(point, Region::from_pixels(&px).unwrap(), frame)
    }

    #[test]
    fn records_keep_the_observation_history() {
        let mut set = EventSet::new();
        let first = winner(3, 10);
        let motion = MotionModel::Fixed(first.region().centroid);
        set.apply(3, vec![Mutation::Spawn { winner: first, motion }]).unwrap();
        set.apply(5, vec![Mutation::Absorb { id: 0, winner: winner(5, 12) }]).unwrap();

        let record = EventRecord::from_event(set.get(0).unwrap());
        assert_eq!((record.start_frame, record.end_frame), (3, 5));
        assert_eq!(record.observations.len(), 2);
        assert_eq!(record.observations[1].x, 12.5);
        assert_eq!(record.observations[1].area, 4);
    }

    #[test]
    fn document_survives_a_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let mut set = EventSet::new();
        let first = winner(1, 20);
        let motion = MotionModel::Fixed(first.region().centroid);
        set.apply(1, vec![Mutation::Spawn { winner: first, motion }]).unwrap();

        let doc = EventSetDocument::new(TrackingMode::Hough, 7, set.live());
        write_event_set(&path, &doc).unwrap();
        assert_eq!(read_event_set(&path).unwrap(), doc);
    }

    #[test]
    fn missing_document_is_a_fatal_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_event_set(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, EventError::FatalIo { .. }));
        assert!(err.is_fatal());
    }
}
