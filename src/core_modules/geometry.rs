// THEORY:
// Plane geometry shared by the tracker, the lifecycle manager and the reporting
// sink. `Vector2D` carries positions, predictions and velocities in pixel units.
// `BoundingBox` is the inclusive pixel rectangle of a region: a box from
// (3, 4) to (3, 4) covers exactly one pixel.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};

const COLLINEAR_EPSILON: f64 = 1e-9;

/// A vector (or point) in the image plane, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2D {
    pub x: f64,
    pub y: f64,
}

impl Vector2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn cross(&self, other: &Vector2D) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Scales the vector to unit length and returns its previous length.
    /// A zero vector is left untouched.
    pub fn normalize(&mut self) -> f64 {
        let len = self.length();
        if len > COLLINEAR_EPSILON {
            self.x /= len;
            self.y /= len;
        }
        len
    }

    pub fn distance(&self, other: &Vector2D) -> f64 {
        (*self - *other).length()
    }

    /// Angle between the two vectors, in degrees.
    pub fn angle(&self, other: &Vector2D) -> f64 {
        let denom = self.length() * other.length();
        if denom < COLLINEAR_EPSILON {
            return 0.0;
        }
        (self.dot(other) / denom).clamp(-1.0, 1.0).acos().to_degrees()
    }

    pub fn is_zero(&self) -> bool {
        self.x.abs() < COLLINEAR_EPSILON && self.y.abs() < COLLINEAR_EPSILON
    }
}

impl Add for Vector2D {
    type Output = Vector2D;
    fn add(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;
    fn sub(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl AddAssign for Vector2D {
    fn add_assign(&mut self, rhs: Vector2D) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl SubAssign for Vector2D {
    fn sub_assign(&mut self, rhs: Vector2D) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f64> for Vector2D {
    type Output = Vector2D;
    fn mul(self, rhs: f64) -> Vector2D {
        Vector2D::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Vector2D {
    type Output = Vector2D;
    fn div(self, rhs: f64) -> Vector2D {
        Vector2D::new(self.x / rhs, self.y / rhs)
    }
}

/// Inclusive pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    pub fn width(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top + 1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn center(&self) -> Vector2D {
        Vector2D::new(
            (self.left as f64 + self.right as f64) / 2.0,
            (self.top as f64 + self.bottom as f64) / 2.0,
        )
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);
        (left <= right && top <= bottom).then(|| BoundingBox { left, top, right, bottom })
    }

    /// Intersection area as a fraction of the smaller of the two boxes.
    pub fn overlap_fraction(&self, other: &BoundingBox) -> f64 {
        match self.intersection(other) {
            Some(inter) => inter.area() as f64 / self.area().min(other.area()) as f64,
            None => 0.0,
        }
    }

    /// Grows the box by `pad` pixels on every side, clamped to a frame of the given size.
    pub fn padded(&self, pad: u32, frame_width: u32, frame_height: u32) -> BoundingBox {
        let max_x = frame_width.saturating_sub(1);
        let max_y = frame_height.saturating_sub(1);
        BoundingBox {
            left: self.left.saturating_sub(pad).min(max_x),
            top: self.top.saturating_sub(pad).min(max_y),
            right: self.right.saturating_add(pad).min(max_x),
            bottom: self.bottom.saturating_add(pad).min(max_y),
        }
    }

    /// Clamps the box to a frame of the given size. `None` if it lies entirely outside.
    pub fn clamped(&self, frame_width: u32, frame_height: u32) -> Option<BoundingBox> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        self.intersection(&BoundingBox::new(0, 0, frame_width - 1, frame_height - 1))
    }
}
