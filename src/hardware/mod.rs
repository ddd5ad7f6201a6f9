//! Line-oriented links to the machines.
//!
//! [`LineChannel`] is the seam between the control loop and the transport.
//! [`SerialChannel`] drives a real RS-232/USB-serial port; [`MockChannel`]
//! simulates a controller in-process for tests and dry runs.
//!
//! A channel is exclusively owned by the control loop for the whole run. It is
//! opened once, used strictly sequentially and closed once, so implementations
//! need no internal locking beyond what the transport itself requires.

pub mod mock;
pub mod serial;

pub use mock::MockChannel;
pub use serial::SerialChannel;

use crate::error::CncResult;
use async_trait::async_trait;
use std::time::Duration;

/// A bidirectional, newline-delimited text link to one machine.
#[async_trait]
pub trait LineChannel: Send {
    /// Identifier used in logs and errors.
    fn id(&self) -> &str;

    /// True between a successful `open` and `close`.
    fn is_open(&self) -> bool;

    /// Acquire the underlying handle.
    ///
    /// # Errors
    ///
    /// `CncError::ChannelOpen` if the transport cannot be opened.
    async fn open(&mut self) -> CncResult<()>;

    /// Write one already-terminated command line and flush it.
    ///
    /// Unread input is discarded first, so the next reply belongs to this
    /// command.
    ///
    /// # Errors
    ///
    /// `CncError::ChannelNotOpen` when closed, `CncError::ChannelSend` when the
    /// write fails.
    async fn send(&mut self, line: &str) -> CncResult<()>;

    /// Wait up to `timeout` for one reply line.
    ///
    /// Returns the trimmed line, or `None` when nothing complete arrived in
    /// time. A timeout is an expected outcome, not an error.
    ///
    /// # Errors
    ///
    /// `CncError::ChannelNotOpen` when closed, `CncError::ChannelRead` when the
    /// transport reports a fault.
    async fn receive_line(&mut self, timeout: Duration) -> CncResult<Option<String>>;

    /// Release the underlying handle. Closing a closed channel is a no-op.
    ///
    /// # Errors
    ///
    /// Implementation specific; the handle is considered released either way.
    async fn close(&mut self) -> CncResult<()>;
}
