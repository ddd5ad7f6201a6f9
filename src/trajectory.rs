//! Precomputed sinusoidal trajectory.
//!
//! The whole path is generated once at startup and handed to the control loop
//! as an ordered slice. `x` sweeps the domain linearly while `y` and `z` trace
//! a sine/cosine pair, so the tool head follows a helix-like path projected on
//! the Y/Z plane.

use crate::error::{CncError, CncResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One planned position, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Position in the trajectory, starting at 0
    pub index: usize,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

/// Parametric definition of the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryParams {
    /// Amplitude of the Y/Z waves
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    /// Number of full periods over the domain
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    /// Number of waypoints
    #[serde(default = "default_num_points")]
    pub num_points: usize,
    /// First x value
    #[serde(default)]
    pub x_start: f64,
    /// Last x value, also the normalisation length of the waves
    #[serde(default = "default_x_end")]
    pub x_end: f64,
}

fn default_amplitude() -> f64 {
    10.0
}

fn default_frequency() -> f64 {
    10.0
}

fn default_num_points() -> usize {
    100
}

fn default_x_end() -> f64 {
    100.0
}

impl Default for TrajectoryParams {
    fn default() -> Self {
        Self {
            amplitude: default_amplitude(),
            frequency: default_frequency(),
            num_points: default_num_points(),
            x_start: 0.0,
            x_end: default_x_end(),
        }
    }
}

impl TrajectoryParams {
    /// Check the generator preconditions.
    ///
    /// # Errors
    ///
    /// `CncError::Configuration` when `num_points` is zero, `x_end` is zero or
    /// any parameter is not finite.
    pub fn validate(&self) -> CncResult<()> {
        if self.num_points == 0 {
            return Err(CncError::Configuration(
                "Trajectory 'num_points' must be >= 1".to_string(),
            ));
        }
        if self.x_end == 0.0 {
            return Err(CncError::Configuration(
                "Trajectory 'x_end' must be non-zero".to_string(),
            ));
        }
        let fields = [
            ("amplitude", self.amplitude),
            ("frequency", self.frequency),
            ("x_start", self.x_start),
            ("x_end", self.x_end),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(CncError::Configuration(format!(
                    "Trajectory '{}' must be finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Generate every waypoint of the trajectory.
    ///
    /// Callers are expected to have run [`TrajectoryParams::validate`]; with
    /// `num_points == 0` the result is simply empty.
    pub fn generate(&self) -> Vec<Waypoint> {
        linspace(self.x_start, self.x_end, self.num_points)
            .into_iter()
            .enumerate()
            .map(|(index, x)| {
                let phase = 2.0 * PI * self.frequency * (x / self.x_end);
                Waypoint {
                    index,
                    x,
                    y: self.amplitude * phase.sin(),
                    z: self.amplitude * phase.cos(),
                }
            })
            .collect()
    }
}

/// `n` evenly spaced values over `[start, end]`, both ends included exactly.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
            values[n - 1] = end;
            values
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) {
        assert!(
            (a - b).abs() <= 1e-9,
            "expected {:.12}, got {:.12} (|diff|={:.3e})",
            b,
            a,
            (a - b).abs()
        );
    }

    #[test]
    fn test_generates_requested_count() {
        for n in [1, 2, 3, 17, 100, 1000] {
            let params = TrajectoryParams {
                num_points: n,
                ..Default::default()
            };
            assert_eq!(params.generate().len(), n);
        }
    }

    #[test]
    fn test_x_is_linearly_spaced() {
        let params = TrajectoryParams {
            num_points: 11,
            x_start: -5.0,
            x_end: 20.0,
            ..Default::default()
        };
        let waypoints = params.generate();
        assert_eq!(waypoints[0].x, -5.0);
        assert_eq!(waypoints[10].x, 20.0);
        for (i, w) in waypoints.iter().enumerate() {
            assert_eq!(w.index, i);
            approx_eq(w.x, -5.0 + 2.5 * i as f64);
        }
    }

    #[test]
    fn test_single_point_sits_at_start() {
        let params = TrajectoryParams {
            num_points: 1,
            x_start: 3.0,
            ..Default::default()
        };
        let waypoints = params.generate();
        assert_eq!(waypoints.len(), 1);
        assert_eq!(waypoints[0].x, 3.0);
    }

    #[test]
    fn test_reference_waveform() {
        let waypoints = TrajectoryParams::default().generate();
        assert_eq!(waypoints.len(), 100);

        let first = waypoints[0];
        assert_eq!(first.x, 0.0);
        approx_eq(first.y, 0.0);
        approx_eq(first.z, 10.0);

        // x = 25 is not on the 100-point grid, so evaluate it directly.
        let quarter = TrajectoryParams {
            num_points: 5,
            ..Default::default()
        }
        .generate();
        assert_eq!(quarter[1].x, 25.0);
        assert!(quarter[1].y.abs() < 1e-9);
        approx_eq(quarter[1].z, -10.0);

        let last = waypoints[99];
        assert_eq!(last.x, 100.0);
        approx_eq(last.z, 10.0);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let params = TrajectoryParams::default();
        assert_eq!(params.generate(), params.generate());
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let zero = TrajectoryParams {
            num_points: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        assert!(zero.generate().is_empty());

        let no_span = TrajectoryParams {
            x_end: 0.0,
            ..Default::default()
        };
        assert!(no_span.validate().is_err());

        let nan = TrajectoryParams {
            amplitude: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());

        TrajectoryParams::default().validate().unwrap();
    }
}
