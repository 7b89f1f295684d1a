// Dense Lucas-Kanade optical flow between two equally sized luminance crops.
// Each pixel solves the 2x2 normal equations over a 5x5 window; windows without
// enough texture (singular structure tensor) report zero motion.

use nalgebra::{Matrix2, Vector2};

const HALF_WINDOW: i64 = 2;
const MIN_DETERMINANT: f64 = 1e-6;

/// Per-pixel motion vectors, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    pub width: u32,
    pub height: u32,
    /// Horizontal motion in pixels per frame.
    pub u: Vec<f64>,
    /// Vertical motion in pixels per frame.
    pub v: Vec<f64>,
}

impl FlowField {
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width * height) as usize;
        Self {
            width,
            height,
            u: vec![0.0; n],
            v: vec![0.0; n],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> (f64, f64) {
        let idx = (y * self.width + x) as usize;
        (self.u[idx], self.v[idx])
    }

    /// Direction of motion in degrees, counter-clockwise from +x.
    pub fn direction(&self, x: u32, y: u32) -> f64 {
        let (u, v) = self.get(x, y);
        v.atan2(u).to_degrees()
    }

    pub fn length(&self, x: u32, y: u32) -> f64 {
        let (u, v) = self.get(x, y);
        (u * u + v * v).sqrt()
    }
}

/// Lucas-Kanade flow from `prev` to `curr`, both row-major `width` x `height`.
pub fn lucas_kanade(prev: &[f64], curr: &[f64], width: u32, height: u32) -> FlowField {
    let mut flow = FlowField::new(width, height);
    if width == 0 || height == 0 {
        return flow;
    }
    let (w, h) = (width as i64, height as i64);
    let at = |img: &[f64], x: i64, y: i64| img[(y.clamp(0, h - 1) * w + x.clamp(0, w - 1)) as usize];

    let n = (width * height) as usize;
    let mut ix = vec![0.0; n];
    let mut iy = vec![0.0; n];
    let mut it = vec![0.0; n];
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            // Spatial gradients averaged over both frames.
            ix[idx] = ((at(curr, x + 1, y) - at(curr, x - 1, y)) + (at(prev, x + 1, y) - at(prev, x - 1, y))) / 4.0;
            iy[idx] = ((at(curr, x, y + 1) - at(curr, x, y - 1)) + (at(prev, x, y + 1) - at(prev, x, y - 1))) / 4.0;
            it[idx] = curr[idx] - prev[idx];
        }
    }

    for y in 0..h {
        for x in 0..w {
            let (mut sxx, mut sxy, mut syy, mut sxt, mut syt) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for wy in (y - HALF_WINDOW).max(0)..=(y + HALF_WINDOW).min(h - 1) {
                for wx in (x - HALF_WINDOW).max(0)..=(x + HALF_WINDOW).min(w - 1) {
                    let k = (wy * w + wx) as usize;
                    sxx += ix[k] * ix[k];
                    sxy += ix[k] * iy[k];
                    syy += iy[k] * iy[k];
                    sxt += ix[k] * it[k];
                    syt += iy[k] * it[k];
                }
            }
            let tensor = Matrix2::new(sxx, sxy, sxy, syy);
            if tensor.determinant().abs() < MIN_DETERMINANT {
                continue;
            }
            if let Some(inv) = tensor.try_inverse() {
                let motion = inv * Vector2::new(-sxt, -syt);
                let idx = (y * w + x) as usize;
                flow.u[idx] = motion[0];
                flow.v[idx] = motion[1];
            }
        }
    }
    flow
}
