//! Custom error types for the controller.
//!
//! `CncError` is the single error type that crosses module boundaries. Only two
//! families ever reach the operator: configuration problems, which are caught
//! before any hardware is touched, and I/O faults on a channel or the sample
//! log, which abort the run after every opened resource has been released.
//!
//! Per-sample anomalies (a machine that stays silent, a garbled reply) are not
//! errors at this level. They are absorbed into the record as invalid readings,
//! see [`crate::parser`].

use thiserror::Error;

/// Convenience alias for results using the controller error type.
pub type CncResult<T> = std::result::Result<T, CncError>;

/// Errors surfaced by the controller.
#[derive(Error, Debug)]
pub enum CncError {
    /// Configuration sources could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A channel could not be opened.
    #[error("Failed to open channel '{channel}': {reason}")]
    ChannelOpen {
        /// Channel identifier
        channel: String,
        /// Underlying cause
        reason: String,
    },

    /// Writing a command to a channel failed.
    #[error("Failed to send on channel '{channel}': {reason}")]
    ChannelSend {
        /// Channel identifier
        channel: String,
        /// Underlying cause
        reason: String,
    },

    /// The channel was used while closed.
    #[error("Channel '{0}' is not open")]
    ChannelNotOpen(String),

    /// Reading from a channel failed for a reason other than a timeout.
    #[error("Failed to read from channel '{channel}': {reason}")]
    ChannelRead {
        /// Channel identifier
        channel: String,
        /// Underlying cause
        reason: String,
    },

    /// The sample log file could not be created.
    #[error("Failed to create sample log at '{}': {source}", .path.display())]
    LogOpen {
        /// Log destination
        path: std::path::PathBuf,
        /// Underlying cause
        source: std::io::Error,
    },

    /// The sample log was used while closed.
    #[error("Sample log is not open")]
    LogNotOpen,

    /// A row could not be appended to the sample log.
    #[error("Sample log error: {0}")]
    LogWrite(#[from] csv::Error),

    /// The run was stopped by the shutdown signal.
    #[error("Run cancelled after {completed} samples")]
    Cancelled {
        /// Number of samples fully recorded before cancellation
        completed: usize,
    },

    /// One or more resources failed to close.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<CncError>),
}

impl CncError {
    /// True for faults that originate on a serial channel.
    pub fn is_channel_fault(&self) -> bool {
        matches!(
            self,
            CncError::ChannelOpen { .. }
                | CncError::ChannelSend { .. }
                | CncError::ChannelNotOpen(_)
                | CncError::ChannelRead { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CncError::ChannelSend {
            channel: "cnc1".to_string(),
            reason: "broken pipe".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to send on channel 'cnc1': broken pipe"
        );
        assert!(err.is_channel_fault());
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = CncError::ShutdownFailed(vec![
            CncError::ChannelNotOpen("cnc2".into()),
            CncError::Configuration("bad".into()),
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
        assert!(!err.is_channel_fault());
    }

    #[test]
    fn test_cancelled_reports_progress() {
        let err = CncError::Cancelled { completed: 7 };
        assert_eq!(err.to_string(), "Run cancelled after 7 samples");
    }
}
