//! Motion command encoding.
//!
//! Every waypoint becomes a pair of linear moves: the primary machine follows
//! the trajectory as planned, the mirrored machine follows it reflected on Y
//! and Z. Both share the same X and feed rate so the pair stays in lock-step.
//!
//! The wire form is a single ASCII line the controllers accept:
//!
//! ```text
//! G001 X12.50 Y-3.00 Z9.54 F500\n
//! ```
//!
//! Coordinates always carry exactly two decimals. The controllers parse this
//! grammar literally, so the format must not drift.

use crate::trajectory::Waypoint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which machine a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineRole {
    /// Follows the trajectory unchanged
    Primary,
    /// Follows the trajectory with Y and Z negated
    Mirrored,
}

impl fmt::Display for MachineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineRole::Primary => write!(f, "primary"),
            MachineRole::Mirrored => write!(f, "mirrored"),
        }
    }
}

/// One linear move for one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    /// Target machine
    pub target: MachineRole,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
    /// Feed rate
    pub feed_rate: f64,
}

impl MotionCommand {
    /// Render the command as a newline-terminated line using `code` as the
    /// motion word.
    pub fn to_line(&self, code: &str) -> String {
        format!(
            "{} X{:.2} Y{:.2} Z{:.2} F{}\n",
            code, self.x, self.y, self.z, self.feed_rate
        )
    }
}

/// Builds the command pair for each waypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEncoder {
    code: String,
    feed_rate: f64,
}

impl MotionEncoder {
    /// Create an encoder emitting `code` moves at `feed_rate`.
    pub fn new(code: impl Into<String>, feed_rate: f64) -> Self {
        Self {
            code: code.into(),
            feed_rate,
        }
    }

    /// Motion word prefixed to every line.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Feed rate attached to every command.
    pub fn feed_rate(&self) -> f64 {
        self.feed_rate
    }

    /// Primary and mirrored commands for one waypoint, in that order.
    pub fn commands(&self, waypoint: &Waypoint) -> [MotionCommand; 2] {
        [
            MotionCommand {
                target: MachineRole::Primary,
                x: waypoint.x,
                y: waypoint.y,
                z: waypoint.z,
                feed_rate: self.feed_rate,
            },
            MotionCommand {
                target: MachineRole::Mirrored,
                x: waypoint.x,
                y: -waypoint.y,
                z: -waypoint.z,
                feed_rate: self.feed_rate,
            },
        ]
    }

    /// Encoded wire lines for one waypoint, primary first.
    pub fn encode(&self, waypoint: &Waypoint) -> [String; 2] {
        let [primary, mirrored] = self.commands(waypoint);
        [primary.to_line(&self.code), mirrored.to_line(&self.code)]
    }
}

impl Default for MotionEncoder {
    fn default() -> Self {
        Self::new("G001", 500.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::TrajectoryParams;

    fn waypoint(x: f64, y: f64, z: f64) -> Waypoint {
        Waypoint { index: 0, x, y, z }
    }

    #[test]
    fn test_mirrored_negates_y_and_z() {
        let encoder = MotionEncoder::default();
        for w in TrajectoryParams::default().generate() {
            let [primary, mirrored] = encoder.commands(&w);
            assert_eq!(primary.target, MachineRole::Primary);
            assert_eq!(mirrored.target, MachineRole::Mirrored);
            assert_eq!(primary.x, w.x);
            assert_eq!(mirrored.x, w.x);
            assert_eq!(primary.y, w.y);
            assert_eq!(primary.z, w.z);
            assert_eq!(mirrored.y, -primary.y);
            assert_eq!(mirrored.z, -primary.z);
            assert_eq!(primary.feed_rate, mirrored.feed_rate);
        }
    }

    #[test]
    fn test_wire_format() {
        let encoder = MotionEncoder::default();
        let [first, second] = encoder.encode(&waypoint(12.5, -3.0, 9.5432));
        assert_eq!(first, "G001 X12.50 Y-3.00 Z9.54 F500\n");
        assert_eq!(second, "G001 X12.50 Y3.00 Z-9.54 F500\n");
    }

    #[test]
    fn test_first_reference_waypoint() {
        let encoder = MotionEncoder::default();
        let w = TrajectoryParams::default().generate()[0];
        let [first, second] = encoder.encode(&w);
        assert_eq!(first, "G001 X0.00 Y0.00 Z10.00 F500\n");
        assert_eq!(second, "G001 X0.00 Y-0.00 Z-10.00 F500\n");
    }

    #[test]
    fn test_custom_code_and_fractional_feed() {
        let encoder = MotionEncoder::new("G1", 250.5);
        let [line, _] = encoder.encode(&waypoint(1.0, 2.0, 3.0));
        assert_eq!(line, "G1 X1.00 Y2.00 Z3.00 F250.5\n");
        assert_eq!(encoder.code(), "G1");
        assert_eq!(encoder.feed_rate(), 250.5);
    }

    #[test]
    fn test_rounding_to_two_decimals() {
        let encoder = MotionEncoder::default();
        let [primary, mirrored] = encoder.encode(&waypoint(0.006, 1.23456, -7.899));
        assert_eq!(primary, "G001 X0.01 Y1.23 Z-7.90 F500\n");
        assert_eq!(mirrored, "G001 X0.01 Y-1.23 Z7.90 F500\n");
    }
}
