//! Position feedback parsing.
//!
//! A controller answers each move with one line of comma separated numbers,
//! normally the live `X,Y,Z` position. Replies can be missing, truncated or
//! garbled; none of that may stop the run. [`parse_response`] reports what it
//! found and [`reading_or_invalid`] folds every failure into an invalid
//! reading so the record sequence keeps one row per waypoint.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field separator of a reply line.
pub const FIELD_DELIMITER: char = ',';

/// Fields a reply needs before it counts as a position.
pub const MIN_FIELDS: usize = 3;

/// Index of the field surfaced as the machine's representative value (Y).
pub const REPRESENTATIVE_FIELD: usize = 1;

/// A reply field that is not a number.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Field {index} of reply is not a number: '{token}'")]
pub struct ParseError {
    /// Zero-based field position
    pub index: usize,
    /// Offending text, trimmed
    pub token: String,
}

/// Parsed feedback from one machine for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReading {
    /// Every parsed field, in reply order
    pub values: Vec<f64>,
    /// False when the reply was missing, short or malformed
    pub valid: bool,
}

impl PositionReading {
    /// Reading for a channel that produced nothing usable.
    pub fn invalid() -> Self {
        Self {
            values: Vec::new(),
            valid: false,
        }
    }

    /// The Y position, or NaN when the reading is invalid.
    pub fn representative(&self) -> f64 {
        if !self.valid {
            return f64::NAN;
        }
        self.values
            .get(REPRESENTATIVE_FIELD)
            .copied()
            .unwrap_or(f64::NAN)
    }
}

/// Parse a raw reply line.
///
/// Empty replies and replies with fewer than [`MIN_FIELDS`] numbers yield an
/// invalid reading. The parsed numbers of a short reply are kept in `values`
/// for diagnostics but never surface as the representative value.
///
/// # Errors
///
/// Returns [`ParseError`] when any field is not a floating-point number.
pub fn parse_response(raw: &str) -> Result<PositionReading, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(PositionReading::invalid());
    }

    let values = raw
        .split(FIELD_DELIMITER)
        .enumerate()
        .map(|(index, field)| {
            let token = field.trim();
            token.parse::<f64>().map_err(|_| ParseError {
                index,
                token: token.to_string(),
            })
        })
        .collect::<Result<Vec<f64>, ParseError>>()?;

    let valid = values.len() >= MIN_FIELDS;
    Ok(PositionReading { values, valid })
}

/// Turn an optional reply into a reading, never failing.
///
/// `None` means the channel timed out. Malformed replies are logged and
/// reported as invalid.
pub fn reading_or_invalid(channel: &str, reply: Option<&str>) -> PositionReading {
    let Some(raw) = reply else {
        tracing::warn!(channel, "No reply within timeout");
        return PositionReading::invalid();
    };

    match parse_response(raw) {
        Ok(reading) => {
            if !reading.valid {
                tracing::warn!(
                    channel,
                    reply = raw,
                    fields = reading.values.len(),
                    "Reply too short to be a position"
                );
            }
            reading
        }
        Err(e) => {
            tracing::warn!(channel, reply = raw, error = %e, "Discarding malformed reply");
            PositionReading::invalid()
        }
    }
}
