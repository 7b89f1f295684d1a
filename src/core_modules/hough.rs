// THEORY:
// Shape-based matching through a voting transform. An event's most recent
// region is kept as a template of pixel offsets around its centroid. Every pixel
// of a candidate region then votes, for every template offset, for the
// translation that would put the template there. Votes are binned on a coarse
// translation grid limited to a window around the event's predicted position.
//
// A strong, single peak means the candidate region has (mostly) the same shape
// as the event, shifted by the peak's translation. This holds up where pure
// centroid distance fails: objects with a small number of dominant
// configurations (laser spots, paired lights) whose centroids jump around while
// the shape stays put.
//
// Each template offset casts at most one vote per bin, so the peak count divided
// by the template size is the fraction of the event's shape that agrees on the
// translation.

use crate::core_modules::geometry::Vector2D;
use crate::core_modules::region::Region;
use std::collections::{HashMap, HashSet};

const MAX_TEMPLATE_POINTS: usize = 64;
const MAX_CANDIDATE_POINTS: usize = 4096;

/// Pixel offsets of a region around its centroid, subsampled to a fixed budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeTemplate {
    offsets: Vec<Vector2D>,
}

impl ShapeTemplate {
    pub fn from_region(region: &Region) -> Self {
        let stride = region.pixels.len().div_ceil(MAX_TEMPLATE_POINTS).max(1);
        let offsets = region
            .pixels
            .iter()
            .step_by(stride)
            .map(|&(x, y)| Vector2D::new(x as f64, y as f64) - region.centroid)
            .collect();
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Best translation found for a template inside a candidate region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughPeak {
    /// Translated template centroid.
    pub center: Vector2D,
    /// Fraction of the template agreeing on the translation, in [0, 1].
    pub vote_fraction: f64,
}

/// Voting transform over the translation space around a prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughMatcher {
    pub bin_size: f64,
    pub min_vote_fraction: f64,
    pub search_radius: f64,
}

impl HoughMatcher {
    /// Returns the accumulator peak if it reaches the configured vote fraction.
    pub fn best_peak(
        &self,
        template: &ShapeTemplate,
        predicted: Vector2D,
        candidate: &Region,
    ) -> Option<HoughPeak> {
        if template.is_empty() || candidate.pixels.is_empty() {
            return None;
        }
        let stride = candidate.pixels.len().div_ceil(MAX_CANDIDATE_POINTS).max(1);
        let mut accumulator: HashMap<(i64, i64), u32> = HashMap::new();
        let mut bins_for_offset: HashSet<(i64, i64)> = HashSet::new();

        for offset in &template.offsets {
            bins_for_offset.clear();
            for &(x, y) in candidate.pixels.iter().step_by(stride) {
                let center = Vector2D::new(x as f64, y as f64) - *offset;
                if center.distance(&predicted) > self.search_radius {
                    continue;
                }
                bins_for_offset.insert(self.bin_of(center));
            }
            for bin in bins_for_offset.iter() {
                *accumulator.entry(*bin).or_insert(0) += 1;
            }
        }

        // Ties go to the bin nearest the prediction, then to the smaller bin index.
        let (bin, votes) = accumulator.into_iter().max_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| {
                    self.bin_center(b.0)
                        .distance(&predicted)
                        .total_cmp(&self.bin_center(a.0).distance(&predicted))
                })
                .then_with(|| b.0.cmp(&a.0))
        })?;

        let vote_fraction = (votes as f64 / template.len() as f64).min(1.0);
        (vote_fraction >= self.min_vote_fraction).then(|| HoughPeak {
            center: self.bin_center(bin),
            vote_fraction,
        })
    }

    fn bin_of(&self, p: Vector2D) -> (i64, i64) {
        (
            (p.x / self.bin_size).floor() as i64,
            (p.y / self.bin_size).floor() as i64,
        )
    }

    fn bin_center(&self, bin: (i64, i64)) -> Vector2D {
        Vector2D::new(
            (bin.0 as f64 + 0.5) * self.bin_size,
            (bin.1 as f64 + 0.5) * self.bin_size,
        )
    }
}
