//! Sample recording: one persisted row and one published event per waypoint.
//!
//! ```text
//! SampleRecord --> SampleRow --+--> SampleLog (CSV)        X,Y,Z,CNC1_Response,CNC2_Response
//!                              +--> SamplePublisher (topic) same five values
//! ```
//!
//! Both outputs receive every waypoint, including those where one or both
//! machines gave no usable reply; those carry NaN in the response columns.
//! Row order is the only index into which physical position a sample belongs
//! to, so a slot is never skipped.

pub mod csv_log;
pub mod publisher;

pub use csv_log::CsvLog;
pub use publisher::{BroadcastPublisher, SampleEvent, SamplePublisher};

use crate::error::CncResult;
use crate::parser::PositionReading;
use crate::trajectory::Waypoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Column names of the persisted log, in order.
pub const LOG_HEADER: [&str; 5] = ["X", "Y", "Z", "CNC1_Response", "CNC2_Response"];

/// Combined planned position and feedback of both machines for one waypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Planned position
    pub waypoint: Waypoint,
    /// Feedback from the primary machine
    pub reading1: PositionReading,
    /// Feedback from the mirrored machine
    pub reading2: PositionReading,
}

/// Flat five-value form of a record, shared by the log and the event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    /// Planned X
    #[serde(rename = "X")]
    pub x: f64,
    /// Planned Y
    #[serde(rename = "Y")]
    pub y: f64,
    /// Planned Z
    #[serde(rename = "Z")]
    pub z: f64,
    /// Representative value from the primary machine, NaN when invalid
    #[serde(rename = "CNC1_Response")]
    pub cnc1_response: f64,
    /// Representative value from the mirrored machine, NaN when invalid
    #[serde(rename = "CNC2_Response")]
    pub cnc2_response: f64,
}

impl SampleRow {
    /// Values in column order.
    pub fn values(&self) -> [f64; 5] {
        [
            self.x,
            self.y,
            self.z,
            self.cnc1_response,
            self.cnc2_response,
        ]
    }
}

impl From<&SampleRecord> for SampleRow {
    fn from(record: &SampleRecord) -> Self {
        Self {
            x: record.waypoint.x,
            y: record.waypoint.y,
            z: record.waypoint.z,
            cnc1_response: record.reading1.representative(),
            cnc2_response: record.reading2.representative(),
        }
    }
}

/// Durable, append-only destination for sample rows.
#[async_trait]
pub trait SampleLog: Send {
    /// Create the destination and write the header.
    async fn open(&mut self) -> CncResult<()>;

    /// Append one row and make it durable before returning.
    async fn append(&mut self, row: &SampleRow) -> CncResult<()>;

    /// Flush and release the destination. Closing a closed log is a no-op.
    async fn close(&mut self) -> CncResult<()>;

    /// True between `open` and `close`.
    fn is_open(&self) -> bool;
}

/// Persists and publishes each record.
pub struct SampleRecorder {
    log: Box<dyn SampleLog>,
    publisher: Box<dyn SamplePublisher>,
    recorded: usize,
}

impl SampleRecorder {
    /// Combine a log and a publisher.
    pub fn new(log: Box<dyn SampleLog>, publisher: Box<dyn SamplePublisher>) -> Self {
        Self {
            log,
            publisher,
            recorded: 0,
        }
    }

    /// Open the log.
    ///
    /// # Errors
    ///
    /// Propagates the log's open failure.
    pub async fn open(&mut self) -> CncResult<()> {
        self.log.open().await
    }

    /// Persist then publish one record.
    ///
    /// The row is durable before the event goes out, so a subscriber never
    /// sees a sample the log does not have.
    ///
    /// # Errors
    ///
    /// Propagates log write and publish failures.
    pub async fn record(&mut self, record: &SampleRecord) -> CncResult<()> {
        let row = SampleRow::from(record);
        self.log.append(&row).await?;
        self.recorded += 1;
        self.publisher.publish(record.waypoint.index, &row).await
    }

    /// Close the log.
    ///
    /// # Errors
    ///
    /// Propagates the log's flush failure.
    pub async fn close(&mut self) -> CncResult<()> {
        self.log.close().await
    }

    /// Whether the log is currently open.
    pub fn is_open(&self) -> bool {
        self.log.is_open()
    }

    /// Rows durably appended to the log so far, including one whose
    /// publish failed.
    pub fn recorded(&self) -> usize {
        self.recorded
    }
}
