// THEORY:
// Constant-velocity Kalman predictor, one independent filter per image axis.
// Each axis carries a [position, velocity] state with a 2x2 covariance. A frame
// in which the event is seen runs predict + correct; a frame in which it is
// missed runs predict only, so the estimate coasts along its last velocity.
//
// `peek` returns the one-step prediction without touching the state. The
// association engine scores candidates against it and only the committed
// outcome (seen or missed) advances the filter.

use crate::config::KalmanParameters;
use crate::core_modules::geometry::Vector2D;
use nalgebra::{Matrix2, RowVector2, Vector2};

const INITIAL_VELOCITY_VARIANCE: f64 = 100.0;
const MIN_INNOVATION_VARIANCE: f64 = 1e-9;

/// A 1-D constant-velocity Kalman filter.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisKalman {
    state: Vector2<f64>,
    covariance: Matrix2<f64>,
    process_noise: f64,
    measurement_noise: f64,
}

impl AxisKalman {
    pub fn new(position: f64, params: KalmanParameters) -> Self {
        Self {
            state: Vector2::new(position, 0.0),
            covariance: Matrix2::new(
                params.measurement_noise,
                0.0,
                0.0,
                INITIAL_VELOCITY_VARIANCE,
            ),
            process_noise: params.process_noise,
            measurement_noise: params.measurement_noise,
        }
    }

    fn transition() -> Matrix2<f64> {
        Matrix2::new(1.0, 1.0, 0.0, 1.0)
    }

    pub fn position(&self) -> f64 {
        self.state[0]
    }

    pub fn velocity(&self) -> f64 {
        self.state[1]
    }

    /// Predicted position for the next frame.
    pub fn peek(&self) -> f64 {
        (Self::transition() * self.state)[0]
    }

    pub fn predict(&mut self) {
        let f = Self::transition();
        self.state = f * self.state;
        self.covariance =
            f * self.covariance * f.transpose() + Matrix2::identity() * self.process_noise;
    }

    pub fn correct(&mut self, measurement: f64) {
        let h = RowVector2::new(1.0, 0.0);
        let innovation = measurement - (h * self.state)[0];
        let s = ((h * self.covariance * h.transpose())[0] + self.measurement_noise)
            .max(MIN_INNOVATION_VARIANCE);
        let gain: Vector2<f64> = self.covariance * h.transpose() / s;
        self.state += gain * innovation;
        self.covariance = (Matrix2::identity() - gain * h) * self.covariance;
    }
}

/// Independent x/y filters tracking an event's centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanTracker2D {
    x: AxisKalman,
    y: AxisKalman,
}

impl KalmanTracker2D {
    pub fn new(position: Vector2D, x_params: KalmanParameters, y_params: KalmanParameters) -> Self {
        Self {
            x: AxisKalman::new(position.x, x_params),
            y: AxisKalman::new(position.y, y_params),
        }
    }

    pub fn peek(&self) -> Vector2D {
        Vector2D::new(self.x.peek(), self.y.peek())
    }

    pub fn position(&self) -> Vector2D {
        Vector2D::new(self.x.position(), self.y.position())
    }

    pub fn velocity(&self) -> Vector2D {
        Vector2D::new(self.x.velocity(), self.y.velocity())
    }

    /// Advance one frame without a measurement.
    pub fn coast(&mut self) {
        self.x.predict();
        self.y.predict();
    }

    /// Advance one frame and fold in a measured position.
    pub fn observe(&mut self, measurement: Vector2D) {
        self.coast();
        self.x.correct(measurement.x);
        self.y.correct(measurement.y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(q: f64, r: f64) -> KalmanParameters {
        KalmanParameters {
            process_noise: q,
            measurement_noise: r,
        }
    }

    #[test]
    fn converges_on_constant_velocity_path() {
        let velocity = Vector2D::new(2.0, 1.0);
        let start = Vector2D::new(10.0, 10.0);
        let mut kf = KalmanTracker2D::new(start, params(0.1, 0.0), params(0.1, 0.0));

        for t in 1..=3 {
            kf.observe(start + velocity * t as f64);
        }
        let truth = start + velocity * 4.0;
        assert!(kf.peek().distance(&truth) < 0.05, "{:?} vs {:?}", kf.peek(), truth);
    }

    #[test]
    fn coasting_extrapolates_last_velocity() {
        let mut kf = KalmanTracker2D::new(Vector2D::new(0.0, 0.0), params(0.1, 0.0), params(0.1, 0.0));
        for t in 1..=5 {
            kf.observe(Vector2D::new(3.0 * t as f64, 0.0));
        }
        let before = kf.position();
        kf.coast();
        let after = kf.position();
        assert!((after.x - before.x - 3.0).abs() < 0.1);
    }

    #[test]
    fn peek_does_not_mutate() {
        let kf = KalmanTracker2D::new(Vector2D::new(4.0, 5.0), params(0.1, 1.0), params(0.1, 1.0));
        let copy = kf.clone();
        let _ = kf.peek();
        assert_eq!(kf, copy);
    }

    #[test]
    fn zero_noise_does_not_divide_by_zero() {
        let mut kf = KalmanTracker2D::new(Vector2D::new(1.0, 1.0), params(0.0, 0.0), params(0.0, 0.0));
        kf.observe(Vector2D::new(2.0, 2.0));
        kf.observe(Vector2D::new(3.0, 3.0));
        assert!(kf.peek().is_finite());
    }
}
