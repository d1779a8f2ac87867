//! Kalman filtering for storm cell motion
//!
//! Constant-velocity filter over position and size. The state is
//! `[x, y, area, vx, vy, varea]`; only `(x, y, area)` is observed.

use crate::config::TrackingConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// State vector size: [x, y, area, vx, vy, varea]
pub const STATE_SIZE: usize = 6;
/// Measurement vector size: [x, y, area]
pub const MEASUREMENT_SIZE: usize = 3;

/// Added to the innovation covariance diagonal when it is not invertible
const REGULARIZATION: f64 = 1e-3;
const SINGULAR_EPSILON: f64 = 1e-12;

type StateMatrix = [[f64; STATE_SIZE]; STATE_SIZE];
type MeasurementMatrix = [[f64; MEASUREMENT_SIZE]; MEASUREMENT_SIZE];

/// How an update was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Correction {
    /// Standard Kalman correction
    Applied,
    /// Innovation covariance was singular and had to be regularized
    Regularized,
    /// No finite correction was possible; the predicted state was kept
    Skipped,
}

/// Kalman filter tracking (x, y, area) with velocity estimation
#[derive(Debug, Clone)]
pub struct KalmanTracker {
    /// State vector [x, y, area, vx, vy, varea]
    state: [f64; STATE_SIZE],
    /// Error covariance matrix
    covariance: StateMatrix,
    /// Process noise scale (Q = q * I)
    process_noise: f64,
    /// Measurement noise scale (R = r * I)
    measurement_noise: f64,
    /// Initial covariance scale (P0 = p * I)
    initial_covariance: f64,
    /// Frame interval in minutes
    dt: f64,
    initialized: bool,
    update_count: u64,
}

impl KalmanTracker {
    /// Create a new, uninitialized tracker
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            state: [0.0; STATE_SIZE],
            covariance: scaled_identity(config.initial_covariance),
            process_noise: config.process_noise,
            measurement_noise: config.measurement_noise,
            initial_covariance: config.initial_covariance,
            dt: config.frame_interval_minutes as f64,
            initialized: false,
            update_count: 0,
        }
    }

    /// Create a tracker initialized at the given observation
    pub fn from_observation(observation: [f64; MEASUREMENT_SIZE], config: &TrackingConfig) -> Self {
        let mut tracker = Self::new(config);
        tracker.initialize(observation);
        tracker
    }

    /// Initialize with a measurement; velocities start at zero
    pub fn initialize(&mut self, observation: [f64; MEASUREMENT_SIZE]) {
        let [x, y, area] = observation;
        self.state = [x, y, area, 0.0, 0.0, 0.0];
        self.covariance = scaled_identity(self.initial_covariance);
        self.initialized = true;
        self.update_count = 0;
        trace!("Kalman filter initialized at ({}, {}, {})", x, y, area);
    }

    /// Advance the state one frame interval and return predicted (x, y, area)
    pub fn predict(&mut self) -> [f64; MEASUREMENT_SIZE] {
        if !self.initialized {
            return [0.0; MEASUREMENT_SIZE];
        }

        // x' = F x
        for i in 0..MEASUREMENT_SIZE {
            self.state[i] += self.state[i + MEASUREMENT_SIZE] * self.dt;
        }

        // P = F P F' + Q
        let f = self.transition_matrix();
        let fp = mat_mul(&f, &self.covariance);
        let fpft = mat_mul(&fp, &transpose(&f));
        for i in 0..STATE_SIZE {
            for j in 0..STATE_SIZE {
                self.covariance[i][j] = fpft[i][j];
            }
            self.covariance[i][i] += self.process_noise;
        }

        trace!(
            "Predicted ({:.1}, {:.1}, {:.1})",
            self.state[0], self.state[1], self.state[2]
        );
        self.observed()
    }

    /// Correct the state with an observed (x, y, area)
    pub fn update(&mut self, observation: [f64; MEASUREMENT_SIZE]) -> Correction {
        if !self.initialized {
            self.initialize(observation);
            return Correction::Applied;
        }

        // Residual: y = z - H x
        let mut residual = [0.0; MEASUREMENT_SIZE];
        for i in 0..MEASUREMENT_SIZE {
            residual[i] = observation[i] - self.state[i];
        }

        // Innovation covariance: S = H P H' + R
        let mut s: MeasurementMatrix = [[0.0; MEASUREMENT_SIZE]; MEASUREMENT_SIZE];
        for i in 0..MEASUREMENT_SIZE {
            for j in 0..MEASUREMENT_SIZE {
                s[i][j] = self.covariance[i][j];
            }
            s[i][i] += self.measurement_noise;
        }

        let (s_inv, mut correction) = match invert3(&s) {
            Some(inv) => (inv, Correction::Applied),
            None => {
                for (i, row) in s.iter_mut().enumerate() {
                    row[i] += REGULARIZATION;
                }
                match invert3(&s) {
                    Some(inv) => {
                        debug!("Innovation covariance singular, regularized");
                        (inv, Correction::Regularized)
                    }
                    None => {
                        debug!("Innovation covariance degenerate, skipping correction");
                        return Correction::Skipped;
                    }
                }
            }
        };

        // Kalman gain: K = P H' S^-1 (6x3)
        let mut gain = [[0.0; MEASUREMENT_SIZE]; STATE_SIZE];
        for i in 0..STATE_SIZE {
            for j in 0..MEASUREMENT_SIZE {
                for k in 0..MEASUREMENT_SIZE {
                    gain[i][j] += self.covariance[i][k] * s_inv[k][j];
                }
            }
        }

        // x = x + K y
        let mut state = self.state;
        for i in 0..STATE_SIZE {
            for j in 0..MEASUREMENT_SIZE {
                state[i] += gain[i][j] * residual[j];
            }
        }

        // P = (I - K H) P
        let mut i_kh = scaled_identity(1.0);
        for i in 0..STATE_SIZE {
            for j in 0..MEASUREMENT_SIZE {
                i_kh[i][j] -= gain[i][j];
            }
        }
        let covariance = mat_mul(&i_kh, &self.covariance);

        let finite = state.iter().all(|v| v.is_finite())
            && covariance.iter().flatten().all(|v| v.is_finite());
        if !finite {
            debug!("Correction produced non-finite values, keeping predicted state");
            correction = Correction::Skipped;
        } else {
            self.state = state;
            self.covariance = covariance;
            self.update_count += 1;
        }

        trace!(
            "Updated ({:.1}, {:.1}, {:.1}), velocity ({:.2}, {:.2}, {:.2})",
            self.state[0], self.state[1], self.state[2], self.state[3], self.state[4], self.state[5]
        );
        correction
    }

    /// Current (x, y, area) estimate
    pub fn observed(&self) -> [f64; MEASUREMENT_SIZE] {
        [self.state[0], self.state[1], self.state[2]]
    }

    /// Current (vx, vy, varea) estimate, per minute
    pub fn velocity(&self) -> [f64; MEASUREMENT_SIZE] {
        [self.state[3], self.state[4], self.state[5]]
    }

    pub fn state(&self) -> &[f64; STATE_SIZE] {
        &self.state
    }

    pub fn covariance(&self) -> &StateMatrix {
        &self.covariance
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of corrections applied since initialization
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Constant-velocity transition matrix
    fn transition_matrix(&self) -> StateMatrix {
        let mut f = scaled_identity(1.0);
        for i in 0..MEASUREMENT_SIZE {
            f[i][i + MEASUREMENT_SIZE] = self.dt;
        }
        f
    }
}

impl Default for KalmanTracker {
    fn default() -> Self {
        Self::new(&TrackingConfig::default())
    }
}

fn scaled_identity(scale: f64) -> StateMatrix {
    let mut m = [[0.0; STATE_SIZE]; STATE_SIZE];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = scale;
    }
    m
}

fn mat_mul(a: &StateMatrix, b: &StateMatrix) -> StateMatrix {
    let mut out = [[0.0; STATE_SIZE]; STATE_SIZE];
    for i in 0..STATE_SIZE {
        for j in 0..STATE_SIZE {
            for k in 0..STATE_SIZE {
                out[i][j] += a[i][k] * b[k][j];
            }
        }
    }
    out
}

fn transpose(m: &StateMatrix) -> StateMatrix {
    let mut out = [[0.0; STATE_SIZE]; STATE_SIZE];
    for i in 0..STATE_SIZE {
        for j in 0..STATE_SIZE {
            out[j][i] = m[i][j];
        }
    }
    out
}

/// Inverse of a 3x3 matrix by cofactors, `None` if singular or non-finite
fn invert3(m: &MeasurementMatrix) -> Option<MeasurementMatrix> {
    let c00 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
    let c01 = m[1][2] * m[2][0] - m[1][0] * m[2][2];
    let c02 = m[1][0] * m[2][1] - m[1][1] * m[2][0];

    let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
    if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let inverse = [
        [
            c00 * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            c01 * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            c02 * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ];

    inverse.iter().flatten().all(|v| v.is_finite()).then_some(inverse)
}

// ============================================================================
// TESTS
// ============================================================================
