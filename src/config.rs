// THEORY:
// `DetectionParameters` is the single, immutable configuration object for a run.
// It is built once (defaults, a named preset, or a JSON file), validated once by
// the pipeline constructor, and then handed by reference to every component.
// Nothing in the engine looks options up by name at runtime.
//
// The presets mirror the camera platforms the engine is tuned for (benthic
// sleds, midwater vehicles, stationary time-lapse rigs, ...). They only differ
// in the values they pick; the schema is the same for all of them.

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const MAX_PAD_EVENTS: u32 = 200;
const FOA_RADIUS_DIVISOR: f64 = 12.0;
const MIN_AREA_FOA_FACTOR: f64 = 0.01;
const MAX_AREA_FOA_FACTOR: f64 = 8.0;

/// The closed set of association strategies, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingMode {
    None,
    NearestNeighbor,
    Hough,
    KalmanFilter,
    NearestNeighborHough,
    KalmanFilterHough,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::NearestNeighbor => "NearestNeighbor",
            Self::Hough => "Hough",
            Self::KalmanFilter => "KalmanFilter",
            Self::NearestNeighborHough => "NearestNeighborHough",
            Self::KalmanFilterHough => "KalmanFilterHough",
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingMode {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "None" => Ok(Self::None),
            "NearestNeighbor" => Ok(Self::NearestNeighbor),
            "Hough" => Ok(Self::Hough),
            "KalmanFilter" => Ok(Self::KalmanFilter),
            "NearestNeighborHough" => Ok(Self::NearestNeighborHough),
            "KalmanFilterHough" => Ok(Self::KalmanFilterHough),
            other => Err(EventError::Configuration(format!(
                "unknown tracking mode '{other}'"
            ))),
        }
    }
}

/// Noise pair for the motion filter of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanParameters {
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl Default for KalmanParameters {
    fn default() -> Self {
        Self {
            process_noise: 0.1,
            measurement_noise: 0.0,
        }
    }
}

impl FromStr for KalmanParameters {
    type Err = EventError;

    /// Parses the `"process,measurement"` form, e.g. `"0.1,20.0"`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return Err(EventError::Configuration(format!(
                "expected 'process,measurement' noise pair, got '{s}'"
            )));
        }
        let parse = |v: &str| {
            v.parse::<f64>().map_err(|_| {
                EventError::Configuration(format!("'{v}' is not a valid noise value"))
            })
        };
        Ok(Self {
            process_noise: parse(parts[0])?,
            measurement_noise: parse(parts[1])?,
        })
    }
}

/// Configuration for the event engine, supplied once at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParameters {
    pub tracking_mode: TrackingMode,
    pub x_kalman: KalmanParameters,
    pub y_kalman: KalmanParameters,
    /// Minimum region area in pixels. `0` derives it from the frame size.
    pub min_event_area: u32,
    /// Maximum region area in pixels. `0` derives it from the frame size.
    pub max_event_area: u32,
    /// Events shorter than this are never reported.
    pub min_event_frames: u32,
    /// `None` means unlimited.
    pub max_event_frames: Option<u32>,
    /// Consecutive misses tolerated before an event expires.
    pub event_expiration_frames: u32,
    pub remove_overlapping_detections: bool,
    pub save_boring_events: bool,
    /// Frames whose luma standard deviation falls below this are skipped. `0` disables.
    pub min_std_dev: f64,
    /// Most salient winners kept per frame.
    pub max_winners_per_frame: usize,
    /// Maximum centroid distance (pixels) for a prediction-based match.
    pub gating_radius: f64,
    /// Size in pixels of one translation bin in the Hough accumulator.
    pub hough_bin_size: f64,
    /// Fraction of an event's shape that must vote for the same bin.
    pub hough_min_vote_fraction: f64,
    /// Bounding-box overlap (fraction of the smaller box) treated as a duplicate.
    pub overlap_threshold: f64,
    /// Minimum interestingness score for an event to be `Interesting`.
    pub interesting_threshold: f64,
    /// Pixel margin around the bounding box of saved event clips.
    pub pad_events: u32,
    pub save_event_features: bool,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            tracking_mode: TrackingMode::KalmanFilter,
            x_kalman: KalmanParameters::default(),
            y_kalman: KalmanParameters::default(),
            min_event_area: 0,
            max_event_area: 0,
            min_event_frames: 1,
            max_event_frames: None,
            event_expiration_frames: 0,
            remove_overlapping_detections: true,
            save_boring_events: false,
            min_std_dev: 0.0,
            max_winners_per_frame: 20,
            gating_radius: 30.0,
            hough_bin_size: 4.0,
            hough_min_vote_fraction: 0.5,
            overlap_threshold: 0.5,
            interesting_threshold: 0.0,
            pad_events: 0,
            save_event_features: false,
        }
    }
}

impl DetectionParameters {
    /// Moving camera traversing the sea floor.
    pub fn benthic_video() -> Self {
        Self {
            tracking_mode: TrackingMode::Hough,
            min_event_frames: 1,
            ..Self::default()
        }
    }

    /// Moving camera in the midwater column.
    pub fn midwater_video() -> Self {
        Self {
            tracking_mode: TrackingMode::KalmanFilterHough,
            x_kalman: KalmanParameters { process_noise: 0.1, measurement_noise: 10.0 },
            y_kalman: KalmanParameters { process_noise: 0.1, measurement_noise: 10.0 },
            ..Self::default()
        }
    }

    /// Stationary low-light camera with intermittent subjects.
    pub fn eye_in_the_sea_video() -> Self {
        Self {
            tracking_mode: TrackingMode::KalmanFilter,
            save_boring_events: true,
            max_event_area: 30_000,
            min_std_dev: 10.0,
            event_expiration_frames: 3,
            max_winners_per_frame: 15,
            ..Self::default()
        }
    }

    /// Camera mounted on a benthic tool sled with shadowing.
    pub fn tool_sled_video() -> Self {
        Self {
            tracking_mode: TrackingMode::KalmanFilterHough,
            x_kalman: KalmanParameters { process_noise: 0.1, measurement_noise: 20.0 },
            y_kalman: KalmanParameters { process_noise: 0.1, measurement_noise: 20.0 },
            ..Self::default()
        }
    }

    /// Independent stills assembled into a mosaic; nothing is tracked.
    pub fn mosaic_stills() -> Self {
        Self {
            tracking_mode: TrackingMode::None,
            max_event_frames: Some(1),
            min_event_frames: 1,
            remove_overlapping_detections: false,
            save_boring_events: true,
            pad_events: 75,
            max_winners_per_frame: 50,
            ..Self::default()
        }
    }

    /// Stationary time-lapse camera.
    pub fn time_lapse_stills() -> Self {
        Self {
            tracking_mode: TrackingMode::NearestNeighbor,
            save_boring_events: true,
            max_winners_per_frame: 30,
            ..Self::default()
        }
    }

    /// Loads parameters from a JSON file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| EventError::io(path, e))?;
        let params: Self = serde_json::from_str(&contents)?;
        params.validate()?;
        Ok(params)
    }

    /// Rejects out-of-range or mutually inconsistent values.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EventError::Configuration(msg));

        for (axis, k) in [("x", &self.x_kalman), ("y", &self.y_kalman)] {
            if !(k.process_noise >= 0.0) || !(k.measurement_noise >= 0.0) {
                return fail(format!("{axis} Kalman noise values must be non-negative"));
            }
        }
        if self.min_event_area > 0
            && self.max_event_area > 0
            && self.min_event_area > self.max_event_area
        {
            return fail(format!(
                "min event area {} exceeds max event area {}",
                self.min_event_area, self.max_event_area
            ));
        }
        if self.min_event_frames == 0 {
            return fail("min event frames must be at least 1".into());
        }
        if let Some(max) = self.max_event_frames {
            if max < self.min_event_frames {
                return fail(format!(
                    "max event frames {max} is below min event frames {}",
                    self.min_event_frames
                ));
            }
        }
        if self.pad_events > MAX_PAD_EVENTS {
            return fail(format!("event pad {} is above {MAX_PAD_EVENTS}", self.pad_events));
        }
        if !(self.gating_radius > 0.0) {
            return fail("gating radius must be positive".into());
        }
        if !(self.hough_bin_size > 0.0) {
            return fail("Hough bin size must be positive".into());
        }
        if !(self.hough_min_vote_fraction > 0.0 && self.hough_min_vote_fraction <= 1.0) {
            return fail("Hough vote fraction must be in (0, 1]".into());
        }
        if !(0.0..=1.0).contains(&self.overlap_threshold) {
            return fail("overlap threshold must be in [0, 1]".into());
        }
        if !(self.min_std_dev >= 0.0) {
            return fail("min std dev must be non-negative".into());
        }
        if self.max_winners_per_frame == 0 {
            return fail("max winners per frame must be at least 1".into());
        }
        Ok(())
    }

    /// Area bounds with the `0` placeholders resolved against the frame size.
    pub fn resolve_area_bounds(&self, width: u32, height: u32) -> (u32, u32) {
        let frame_area = width as f64 * height as f64;
        let foa_radius = width.max(height) as f64 / FOA_RADIUS_DIVISOR;
        let foa_area = std::f64::consts::PI * foa_radius * foa_radius;

        let min_area = if self.min_event_area > 0 {
            self.min_event_area
        } else {
            (foa_area * MIN_AREA_FOA_FACTOR).round().max(1.0) as u32
        };
        let max_area = if self.max_event_area > 0 {
            self.max_event_area
        } else {
            (foa_area * MAX_AREA_FOA_FACTOR).min(frame_area).round() as u32
        };
        (min_area, max_area.max(min_area))
    }

    pub(crate) fn with_resolved_areas(&self, width: u32, height: u32) -> Self {
        let (min_event_area, max_event_area) = self.resolve_area_bounds(width, height);
        Self {
            min_event_area,
            max_event_area,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let p = DetectionParameters::default();
        assert_eq!(p.tracking_mode, TrackingMode::KalmanFilter);
        assert_eq!(p.x_kalman, KalmanParameters { process_noise: 0.1, measurement_noise: 0.0 });
        assert_eq!(p.min_event_frames, 1);
        assert_eq!(p.max_event_frames, None);
        assert_eq!(p.event_expiration_frames, 0);
        assert!(p.remove_overlapping_detections);
        assert!(!p.save_boring_events);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn tracking_mode_round_trips_through_its_name() {
        for mode in [
            TrackingMode::None,
            TrackingMode::NearestNeighbor,
            TrackingMode::Hough,
            TrackingMode::KalmanFilter,
            TrackingMode::NearestNeighborHough,
            TrackingMode::KalmanFilterHough,
        ] {
            assert_eq!(mode.to_string().parse::<TrackingMode>().unwrap(), mode);
        }
        assert!("Particle".parse::<TrackingMode>().is_err());
    }

    #[test]
    fn kalman_parameters_parse_noise_pair() {
        let k: KalmanParameters = "0.1, 20.0".parse().unwrap();
        assert_eq!(k.process_noise, 0.1);
        assert_eq!(k.measurement_noise, 20.0);
        assert!("0.1".parse::<KalmanParameters>().is_err());
        assert!("a,b".parse::<KalmanParameters>().is_err());
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        let mut p = DetectionParameters::default();
        p.min_event_area = 500;
        p.max_event_area = 100;
        assert!(matches!(p.validate(), Err(EventError::Configuration(_))));

        let mut p = DetectionParameters::default();
        p.min_event_frames = 4;
        p.max_event_frames = Some(2);
        assert!(p.validate().is_err());

        let mut p = DetectionParameters::default();
        p.x_kalman.process_noise = -1.0;
        assert!(p.validate().is_err());

        let mut p = DetectionParameters::default();
        p.pad_events = 500;
        assert!(p.validate().is_err());
    }

    #[test]
    fn zero_area_bounds_derive_from_frame_size() {
        let p = DetectionParameters::default();
        let (min, max) = p.resolve_area_bounds(960, 540);
        assert!(min >= 1);
        assert!(max > min);
        assert!(max <= 960 * 540);

        let p = DetectionParameters {
            min_event_area: 25,
            max_event_area: 400,
            ..DetectionParameters::default()
        };
        assert_eq!(p.resolve_area_bounds(960, 540), (25, 400));
    }

    #[test]
    fn presets_are_valid() {
        for p in [
            DetectionParameters::benthic_video(),
            DetectionParameters::midwater_video(),
            DetectionParameters::eye_in_the_sea_video(),
            DetectionParameters::tool_sled_video(),
            DetectionParameters::mosaic_stills(),
            DetectionParameters::time_lapse_stills(),
        ] {
            assert!(p.validate().is_ok(), "{p:?}");
        }
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{ "tracking_mode": "NearestNeighbor", "gating_radius": 5.0 }"#;
        let p: DetectionParameters = serde_json::from_str(json).unwrap();
        assert_eq!(p.tracking_mode, TrackingMode::NearestNeighbor);
        assert_eq!(p.gating_radius, 5.0);
        assert_eq!(p.min_event_frames, 1);
    }
}
