// THEORY:
// A `Region` is the segmented foreground blob that accompanies an attention
// point. It is a "dumb" data container: a single, connected set of pixels in one
// frame together with the summary statistics the engine relies on (bounding box,
// area, centroid, second-order moments, intensity range). It has no memory of
// earlier frames; persistence is the job of `Event`.
//
// The segmentation algorithm that produced the region is irrelevant here. Any
// segmenter only has to deliver the pixel set; the statistics are always derived
// the same way, in pixel units, so they stay comparable across a run.
//
// `region_builder` is the reference segmenter used by the example runner and the
// tests: a 4-connected region grown from the attention point over a binary
// foreground mask.

use crate::core_modules::geometry::{BoundingBox, Vector2D};
use crate::error::{EventError, Result};

/// Central second-order moments of a region, in pixels squared.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapeMoments {
    pub uxx: f64,
    pub uyy: f64,
    pub uxy: f64,
}

impl ShapeMoments {
    fn eigenvalues(&self) -> (f64, f64) {
        let mean = (self.uxx + self.uyy) / 2.0;
        let spread = (((self.uxx - self.uyy) / 2.0).powi(2) + self.uxy.powi(2)).sqrt();
        (mean + spread, (mean - spread).max(0.0))
    }

    /// Full length of the major axis of the equivalent ellipse.
    pub fn major_axis(&self) -> f64 {
        4.0 * self.eigenvalues().0.sqrt()
    }

    /// Full length of the minor axis of the equivalent ellipse.
    pub fn minor_axis(&self) -> f64 {
        4.0 * self.eigenvalues().1.sqrt()
    }

    /// Major over minor axis; a one-pixel-wide region reports its major axis.
    pub fn elongation(&self) -> f64 {
        let minor = self.minor_axis();
        if minor > 0.0 { self.major_axis() / minor } else { self.major_axis() }
    }

    /// Orientation of the major axis in degrees, in (-90, 90].
    pub fn orientation(&self) -> f64 {
        (0.5 * (2.0 * self.uxy).atan2(self.uxx - self.uyy)).to_degrees()
    }
}

/// Minimum, maximum and mean intensity over the region's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntensityStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// A single, connected foreground object detected in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// The inclusive rectangle enclosing every pixel of the region.
    pub bounding_box: BoundingBox,
    /// Image coordinates of every pixel in the region.
    pub pixels: Vec<(u32, u32)>,
    /// Number of pixels.
    pub area: u32,
    pub centroid: Vector2D,
    pub moments: ShapeMoments,
    pub intensity: IntensityStats,
}

impl Region {
    /// Aggregates a pixel set (`x`, `y`, intensity) into a region.
    /// Returns `None` for an empty set, which is how segmenters signal "no object".
    pub fn from_pixels(samples: &[(u32, u32, u8)]) -> Option<Region> {
        let first = samples.first()?;
        let n = samples.len() as f64;

        let mut min_x = first.0;
        let mut min_y = first.1;
        let mut max_x = first.0;
        let mut max_y = first.1;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut min_i = u8::MAX;
        let mut max_i = u8::MIN;
        let mut sum_i = 0.0;

        for &(x, y, i) in samples {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            sum_x += x as f64;
            sum_y += y as f64;
            min_i = min_i.min(i);
            max_i = max_i.max(i);
            sum_i += i as f64;
        }

        let centroid = Vector2D::new(sum_x / n, sum_y / n);
        let mut moments = ShapeMoments::default();
        for &(x, y, _) in samples {
            let dx = x as f64 - centroid.x;
            let dy = y as f64 - centroid.y;
            moments.uxx += dx * dx;
            moments.uyy += dy * dy;
            moments.uxy += dx * dy;
        }
        moments.uxx /= n;
        moments.uyy /= n;
        moments.uxy /= n;

        Some(Region {
            bounding_box: BoundingBox::new(min_x, min_y, max_x, max_y),
            pixels: samples.iter().map(|&(x, y, _)| (x, y)).collect(),
            area: samples.len() as u32,
            centroid,
            moments,
            intensity: IntensityStats {
                min: min_i as f64,
                max: max_i as f64,
                mean: sum_i / n,
            },
        })
    }

    /// Rejects degenerate regions before they reach matching.
    pub fn validate(&self, frame: u32) -> Result<()> {
        let reject = |reason: &str| {
            Err(EventError::DataQuality {
                frame,
                reason: reason.to_string(),
            })
        };
        if self.area == 0 {
            return reject("region has non-positive area");
        }
        if !self.centroid.is_finite() {
            return reject("region centroid is not finite");
        }
        let m = &self.moments;
        if !(m.uxx.is_finite() && m.uyy.is_finite() && m.uxy.is_finite()) {
            return reject("region moments are not finite");
        }
        Ok(())
    }
}

pub mod region_builder {
    use super::*;
    use image::GrayImage;

    /// Grows the 4-connected foreground region containing `seed`.
    ///
    /// `foreground` is a binary mask (non-zero = object); `intensity` supplies the
    /// per-pixel values used for the intensity statistics and must have the same
    /// dimensions. Returns `None` when the seed is background or out of bounds.
    pub fn grow_from_seed(
        foreground: &GrayImage,
        intensity: &GrayImage,
        seed: (u32, u32),
    ) -> Option<Region> {
        let (width, height) = foreground.dimensions();
        if seed.0 >= width || seed.1 >= height || intensity.dimensions() != (width, height) {
            return None;
        }
        if foreground.get_pixel(seed.0, seed.1)[0] == 0 {
            return None;
        }

        let mut visited = vec![false; (width * height) as usize];
        let mut stack = vec![seed];
        let mut samples: Vec<(u32, u32, u8)> = Vec::new();
        visited[(seed.1 * width + seed.0) as usize] = true;

        while let Some((x, y)) = stack.pop() {
            samples.push((x, y, intensity.get_pixel(x, y)[0]));

            // Only the 4 direct neighbours, not the diagonals.
            for (dx, dy) in [(0i64, 1i64), (0, -1), (1, 0), (-1, 0)] {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                    continue;
                }
                let (nx, ny) = (nx as u32, ny as u32);
                let idx = (ny * width + nx) as usize;
                if !visited[idx] && foreground.get_pixel(nx, ny)[0] != 0 {
                    visited[idx] = true;
                    stack.push((nx, ny));
                }
            }
        }

        Region::from_pixels(&samples)
    }
}
