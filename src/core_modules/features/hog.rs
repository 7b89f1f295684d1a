// Histogram-of-gradients machinery shared by the appearance (HOG) and motion
// boundary (MBH) descriptors. Both reduce to the same steps: a per-pixel
// gradient field, orientation histograms over a grid of cells, and L2
// normalisation over overlapping 2x2 blocks of cells.

use image::{GrayImage, RgbImage};
use std::f64::consts::PI;

pub const ORIENTATION_BINS: usize = 9;
const NORM_EPSILON: f64 = 1e-6;

/// Per-pixel gradient magnitude and unsigned orientation in [0, pi).
#[derive(Debug, Clone, PartialEq)]
pub struct GradientField {
    pub width: u32,
    pub height: u32,
    pub magnitude: Vec<f64>,
    pub orientation: Vec<f64>,
}

impl GradientField {
    fn from_fn(width: u32, height: u32, mut gradient_at: impl FnMut(u32, u32) -> (f64, f64)) -> Self {
        let n = (width * height) as usize;
        let mut magnitude = Vec::with_capacity(n);
        let mut orientation = Vec::with_capacity(n);
        for y in 0..height {
            for x in 0..width {
                let (gx, gy) = gradient_at(x, y);
                magnitude.push((gx * gx + gy * gy).sqrt());
                orientation.push(gy.atan2(gx).rem_euclid(PI));
            }
        }
        Self { width, height, magnitude, orientation }
    }
}

/// Central differences with clamped borders.
fn central_difference(width: u32, height: u32, x: u32, y: u32, sample: impl Fn(u32, u32) -> f64) -> (f64, f64) {
    let xl = x.saturating_sub(1);
    let xr = (x + 1).min(width - 1);
    let yu = y.saturating_sub(1);
    let yd = (y + 1).min(height - 1);
    let gx = sample(xr, y) - sample(xl, y);
    let gy = sample(x, yd) - sample(x, yu);
    (gx, gy)
}

/// Gradients of a colour crop. Each pixel takes the channel with the largest
/// magnitude. Pixels outside `mask` (when given) get zero magnitude.
pub fn color_gradients(crop: &RgbImage, mask: Option<&GrayImage>) -> GradientField {
    let (w, h) = crop.dimensions();
    GradientField::from_fn(w, h, |x, y| {
        if mask.is_some_and(|m| m.get_pixel(x, y)[0] == 0) {
            return (0.0, 0.0);
        }
        let mut best = (0.0, 0.0);
        let mut best_mag = -1.0;
        for c in 0..3 {
            let g = central_difference(w, h, x, y, |sx, sy| crop.get_pixel(sx, sy)[c] as f64);
            let mag = g.0 * g.0 + g.1 * g.1;
            if mag > best_mag {
                best_mag = mag;
                best = g;
            }
        }
        best
    })
}

/// Gradients of a row-major scalar field, e.g. one component of optical flow.
pub fn scalar_gradients(values: &[f64], width: u32, height: u32) -> GradientField {
    GradientField::from_fn(width, height, |x, y| {
        central_difference(width, height, x, y, |sx, sy| values[(sy * width + sx) as usize])
    })
}

/// Length of the descriptor produced by [`histogram`] for a `cells` x `cells` grid.
pub fn descriptor_len(cells: u32) -> usize {
    let blocks = cells.saturating_sub(1) as usize;
    blocks * blocks * 4 * ORIENTATION_BINS
}

/// Orientation histograms over a `cells` x `cells` grid, grouped into
/// overlapping 2x2 blocks.
///
/// With `snap`, each pixel votes its full magnitude into the nearest bin;
/// otherwise the vote is split linearly between the two neighbouring bins.
/// With `normalize`, every block is scaled to unit L2 norm.
pub fn histogram(field: &GradientField, cells: u32, snap: bool, normalize: bool) -> Vec<f64> {
    let cells = cells.max(2);
    let bin_width = PI / ORIENTATION_BINS as f64;
    let mut cell_hist = vec![[0.0f64; ORIENTATION_BINS]; (cells * cells) as usize];

    for y in 0..field.height {
        let cy = (y * cells / field.height).min(cells - 1);
        for x in 0..field.width {
            let cx = (x * cells / field.width).min(cells - 1);
            let idx = (y * field.width + x) as usize;
            let mag = field.magnitude[idx];
            if mag == 0.0 {
                continue;
            }
            let hist = &mut cell_hist[(cy * cells + cx) as usize];
            let pos = field.orientation[idx] / bin_width;
            if snap {
                let bin = (pos.round() as usize) % ORIENTATION_BINS;
                hist[bin] += mag;
            } else {
                // Bin centres sit at (b + 0.5) * bin_width.
                let shifted = pos - 0.5;
                let lower = shifted.floor();
                let frac = shifted - lower;
                let lo = (lower as i64).rem_euclid(ORIENTATION_BINS as i64) as usize;
                let hi = (lo + 1) % ORIENTATION_BINS;
                hist[lo] += mag * (1.0 - frac);
                hist[hi] += mag * frac;
            }
        }
    }

    let mut out = Vec::with_capacity(descriptor_len(cells));
    for by in 0..cells - 1 {
        for bx in 0..cells - 1 {
            let start = out.len();
            for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                out.extend_from_slice(&cell_hist[((by + dy) * cells + bx + dx) as usize]);
            }
            if normalize {
                let block = &mut out[start..];
                let norm = (block.iter().map(|v| v * v).sum::<f64>() + NORM_EPSILON * NORM_EPSILON).sqrt();
                for v in block.iter_mut() {
                    *v /= norm;
                }
            }
        }
    }
    out
}
