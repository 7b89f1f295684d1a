// THEORY:
// A `PropertyVector` is the fixed-schema numeric summary of a finalized event,
// computed once when it is reported and immutable afterwards. Shape and area
// columns are averaged over every observation; the intensity range spans all
// observations. Orientation is axial, so it is averaged on the doubled angle.
// The column order is part of the report format.

use crate::core_modules::event::{Event, EventId};
use crate::core_modules::region::Region;

pub const COLUMN_NAMES: [&str; 13] = [
    "id",
    "interestingness",
    "area",
    "Uxx",
    "Uyy",
    "Uxy",
    "major_axis",
    "minor_axis",
    "elongation",
    "orientation",
    "max_intensity",
    "min_intensity",
    "avg_intensity",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyVector {
    pub id: EventId,
    pub interestingness: f64,
    /// Mean region area over the observations, in pixels.
    pub area: f64,
    pub uxx: f64,
    pub uyy: f64,
    pub uxy: f64,
    pub major_axis: f64,
    pub minor_axis: f64,
    pub elongation: f64,
    /// Degrees.
    pub orientation: f64,
    pub max_intensity: f64,
    pub min_intensity: f64,
    pub avg_intensity: f64,
}

impl PropertyVector {
    pub fn from_event(event: &Event) -> Self {
        let winners = event.winners();
        let mean = |f: fn(&Region) -> f64| winners.iter().map(|w| f(w.region())).sum::<f64>() / winners.len() as f64;

        Self {
            id: event.id(),
            interestingness: event.interestingness(),
            area: mean(|r| r.area as f64),
            uxx: mean(|r| r.moments.uxx),
            uyy: mean(|r| r.moments.uyy),
            uxy: mean(|r| r.moments.uxy),
            major_axis: mean(|r| r.moments.major_axis()),
            minor_axis: mean(|r| r.moments.minor_axis()),
            elongation: mean(|r| r.moments.elongation()),
            orientation: mean_orientation(winners.iter().map(|w| w.region())),
            max_intensity: winners
                .iter()
                .map(|w| w.region().intensity.max)
                .fold(f64::MIN, f64::max),
            min_intensity: winners
                .iter()
                .map(|w| w.region().intensity.min)
                .fold(f64::MAX, f64::min),
            avg_intensity: mean(|r| r.intensity.mean),
        }
    }

    pub fn to_array(&self) -> [f64; 13] {
        [
            self.id as f64,
            self.interestingness,
            self.area,
            self.uxx,
            self.uyy,
            self.uxy,
            self.major_axis,
            self.minor_axis,
            self.elongation,
            self.orientation,
            self.max_intensity,
            self.min_intensity,
            self.avg_intensity,
        ]
    }

    pub fn from_array(values: [f64; 13]) -> Self {
        Self {
            id: values[0] as EventId,
            interestingness: values[1],
            area: values[2],
            uxx: values[3],
            uyy: values[4],
            uxy: values[5],
            major_axis: values[6],
            minor_axis: values[7],
            elongation: values[8],
            orientation: values[9],
            max_intensity: values[10],
            min_intensity: values[11],
            avg_intensity: values[12],
        }
    }
}

/// Circular mean of major-axis orientations, in degrees within (-90, 90].
fn mean_orientation<'a>(regions: impl Iterator<Item = &'a Region>) -> f64 {
    let (sin, cos) = regions
        .map(|r| (2.0 * r.moments.orientation().to_radians()).sin_cos())
        .fold((0.0, 0.0), |(s, c), (ds, dc)| (s + ds, c + dc));
    (0.5 * sin.atan2(cos)).to_degrees()
}

/// Property vectors of a run, in event-id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyVectorSet {
    pub vectors: Vec<PropertyVector>,
}

impl PropertyVectorSet {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut vectors: Vec<PropertyVector> = events.into_iter().map(PropertyVector::from_event).collect();
        vectors.sort_by_key(|v| v.id);
        Self { vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}
