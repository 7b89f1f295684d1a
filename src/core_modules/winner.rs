// THEORY:
// A `Winner` is one attention point observed in one frame, fused with the region
// the segmenter found around it. Winner formation is the first noise filter of
// the engine: degenerate regions are rejected as data-quality problems, and
// regions outside the configured area bounds are dropped before they can ever
// seed or extend an event. It is a pure function of its inputs.

use crate::core_modules::geometry::Vector2D;
use crate::core_modules::region::Region;
use crate::error::{EventError, Result};
use tracing::{debug, warn};

/// A point of interest reported by the saliency stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttentionPoint {
    pub position: Vector2D,
    /// Saliency map value at the point.
    pub saliency: f64,
    /// Rank of the point within its frame (0 = first winner).
    pub rank: u32,
}

/// An attention point plus the segmentation result for it.
/// `region == None` means the segmenter found no object.
#[derive(Debug, Clone)]
pub struct Detection {
    pub point: AttentionPoint,
    pub region: Option<Region>,
}

/// One attention point fused with its segmented region, in one frame.
#[derive(Debug, Clone)]
pub struct Winner {
    frame_num: u32,
    point: AttentionPoint,
    region: Region,
    score: Option<f64>,
}

impl Winner {
    pub fn new(point: AttentionPoint, region: Region, frame_num: u32) -> Self {
        Self {
            frame_num,
            point,
            region,
            score: None,
        }
    }

    pub fn frame_num(&self) -> u32 {
        self.frame_num
    }

    pub fn point(&self) -> &AttentionPoint {
        &self.point
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub(crate) fn release_pixels(&mut self) {
        self.region.pixels = Vec::new();
    }

    /// Interestingness of the winner; the saliency value until a score is assigned.
    pub fn score(&self) -> f64 {
        self.score.unwrap_or(self.point.saliency)
    }

    /// Assigns the interestingness score. A winner can be scored only once.
    pub fn set_score(&mut self, score: f64) -> Result<()> {
        if self.score.is_some() {
            return Err(EventError::DataQuality {
                frame: self.frame_num,
                reason: "winner score assigned twice".to_string(),
            });
        }
        if !score.is_finite() {
            return Err(EventError::DataQuality {
                frame: self.frame_num,
                reason: format!("winner score {score} is not finite"),
            });
        }
        self.score = Some(score);
        Ok(())
    }
}

/// Outcome of winner formation for one frame.
#[derive(Debug, Default)]
pub struct FormedWinners {
    pub winners: Vec<Winner>,
    /// Detections rejected as malformed.
    pub rejected: Vec<EventError>,
    /// Detections dropped by the area bounds or the per-frame cap.
    pub filtered: usize,
}

/// Pairs each attention point with its region and applies the ingestion filters.
///
/// `min_area` and `max_area` are inclusive. At most `max_winners` of the most
/// salient detections are kept.
pub fn form_winners(
    frame_num: u32,
    detections: Vec<Detection>,
    min_area: u32,
    max_area: u32,
    max_winners: usize,
) -> FormedWinners {
    let mut out = FormedWinners::default();
    let mut candidates: Vec<Winner> = Vec::with_capacity(detections.len());

    for detection in detections {
        let Some(region) = detection.region else {
            continue;
        };
        if !detection.point.position.is_finite() || !detection.point.saliency.is_finite() {
            let err = EventError::DataQuality {
                frame: frame_num,
                reason: "attention point is not finite".to_string(),
            };
            warn!(frame = frame_num, error = %err, "rejecting detection");
            out.rejected.push(err);
            continue;
        }
        if let Err(err) = region.validate(frame_num) {
            warn!(frame = frame_num, error = %err, "rejecting detection");
            out.rejected.push(err);
            continue;
        }
        if region.area < min_area || region.area > max_area {
            debug!(frame = frame_num, area = region.area, min_area, max_area, "region outside area bounds");
            out.filtered += 1;
            continue;
        }
        candidates.push(Winner::new(detection.point, region, frame_num));
    }

    if candidates.len() > max_winners {
        candidates.sort_by(|a, b| {
            b.point
                .saliency
                .total_cmp(&a.point.saliency)
                .then(a.point.rank.cmp(&b.point.rank))
        });
        out.filtered += candidates.len() - max_winners;
        candidates.truncate(max_winners);
    }

    out.winners = candidates;
    out
}
