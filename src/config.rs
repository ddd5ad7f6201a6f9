//! Configuration loading using Figment.
//!
//! Settings are layered, lowest precedence first:
//! 1. built-in defaults (the values the rig was commissioned with)
//! 2. an optional TOML file
//! 3. environment variables prefixed with `CNC_SYNC_`, nested keys split on `__`
//!
//! ```text
//! CNC_SYNC_TRAJECTORY__NUM_POINTS=250
//! CNC_SYNC_CHANNELS__MIRRORED__PORT=/dev/ttyUSB1
//! CNC_SYNC_MOTION__PACING=250ms
//! ```
//!
//! Everything here is read once at startup. [`Settings::validate`] rejects
//! anything the control loop cannot run with, so a bad file fails before any
//! port is opened.

use crate::error::{CncError, CncResult};
use crate::trajectory::TrajectoryParams;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CNC_SYNC_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial links to both machines
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Parametric trajectory definition
    #[serde(default)]
    pub trajectory: TrajectoryParams,
    /// Motion command and pacing settings
    #[serde(default)]
    pub motion: MotionConfig,
    /// Sample log destination
    #[serde(default)]
    pub storage: StorageConfig,
    /// Publish topic settings
    #[serde(default)]
    pub publisher: PublisherConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, used in log output
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub json_logs: bool,
}

/// One serial link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Identifier used in logs and errors (e.g. "cnc1")
    pub id: String,
    /// Serial port path (e.g. "/dev/ttyACM0", "COM3")
    pub port: String,
}

/// Both serial links and their shared line settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Machine that follows the trajectory as-is
    #[serde(default = "default_primary_channel")]
    pub primary: ChannelConfig,
    /// Machine that follows the trajectory mirrored on Y and Z
    #[serde(default = "default_mirrored_channel")]
    pub mirrored: ChannelConfig,
    /// Shared baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Maximum wait for one reply line
    #[serde(default = "default_response_timeout", with = "humantime_serde")]
    pub response_timeout: Duration,
    /// Wait after opening both ports before the first command
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
}

/// Motion command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Motion code prefix of every command line
    #[serde(default = "default_motion_code")]
    pub code: String,
    /// Feed rate sent with every command
    #[serde(default = "default_feed_rate")]
    pub feed_rate: f64,
    /// Delay after each sample so the machines can execute the move
    #[serde(default = "default_pacing", with = "humantime_serde")]
    pub pacing: Duration,
}

/// Sample log configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// CSV file the samples are written to
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

/// Publish topic configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Topic name stamped on every event
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Broadcast buffer depth
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "cnc_sync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_primary_channel() -> ChannelConfig {
    ChannelConfig {
        id: "cnc1".to_string(),
        port: "/dev/ttyACM0".to_string(),
    }
}

fn default_mirrored_channel() -> ChannelConfig {
    ChannelConfig {
        id: "cnc2".to_string(),
        port: "/dev/ttyACM1".to_string(),
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_motion_code() -> String {
    "G001".to_string()
}

fn default_feed_rate() -> f64 {
    500.0
}

fn default_pacing() -> Duration {
    Duration::from_millis(100)
}

fn default_log_path() -> PathBuf {
    PathBuf::from("CNC_Waveform_data.csv")
}

fn default_topic() -> String {
    "cnc_positions".to_string()
}

fn default_capacity() -> usize {
    1024
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_channel(),
            mirrored: default_mirrored_channel(),
            baud_rate: default_baud_rate(),
            response_timeout: default_response_timeout(),
            settle_delay: default_settle_delay(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            code: default_motion_code(),
            feed_rate: default_feed_rate(),
            pacing: default_pacing(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            capacity: default_capacity(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            channels: ChannelsConfig::default(),
            trajectory: TrajectoryParams::default(),
            motion: MotionConfig::default(),
            storage: StorageConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load settings from defaults, an optional TOML file and the environment.
    ///
    /// An explicitly named file must exist. The result is not validated yet:
    /// callers apply their own overrides first, then call [`Settings::validate`].
    ///
    /// # Errors
    ///
    /// Returns `CncError::Config` if a source cannot be parsed and
    /// `CncError::Configuration` if the file is missing.
    pub fn load(path: Option<&Path>) -> CncResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(CncError::Configuration(format!(
                    "Config file '{}' does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns `CncError::Configuration` with a descriptive message for the
    /// first invalid value found.
    pub fn validate(&self) -> CncResult<()> {
        let log_level = self.application.log_level.trim();
        if log_level.is_empty() || EnvFilter::try_new(log_level).is_err() {
            return Err(CncError::Configuration(format!(
                "Invalid log_level '{}'. Expected a level (trace, debug, info, warn, error) \
                 or a filter directive such as 'cnc_sync=debug'",
                self.application.log_level
            )));
        }

        self.trajectory.validate()?;

        for channel in [&self.channels.primary, &self.channels.mirrored] {
            if channel.id.trim().is_empty() {
                return Err(CncError::Configuration(
                    "Channel id cannot be empty".to_string(),
                ));
            }
            if channel.port.trim().is_empty() {
                return Err(CncError::Configuration(format!(
                    "Channel '{}': 'port' cannot be empty",
                    channel.id
                )));
            }
        }
        if self.channels.primary.id == self.channels.mirrored.id {
            return Err(CncError::Configuration(format!(
                "Duplicate channel id: '{}'",
                self.channels.primary.id
            )));
        }
        if self.channels.primary.port == self.channels.mirrored.port {
            return Err(CncError::Configuration(format!(
                "Both channels use port '{}'",
                self.channels.primary.port
            )));
        }
        if self.channels.baud_rate == 0 {
            return Err(CncError::Configuration(
                "'baud_rate' must be > 0".to_string(),
            ));
        }
        if self.channels.response_timeout.is_zero() {
            return Err(CncError::Configuration(
                "'response_timeout' must be > 0".to_string(),
            ));
        }

        if self.motion.code.trim().is_empty() || self.motion.code.contains(char::is_whitespace) {
            return Err(CncError::Configuration(format!(
                "Invalid motion code '{}'",
                self.motion.code
            )));
        }
        if !self.motion.feed_rate.is_finite() || self.motion.feed_rate <= 0.0 {
            return Err(CncError::Configuration(format!(
                "'feed_rate' must be a positive number, got {}",
                self.motion.feed_rate
            )));
        }

        if self.storage.path.as_os_str().is_empty() {
            return Err(CncError::Configuration(
                "Storage 'path' cannot be empty".to_string(),
            ));
        }
        if self.publisher.topic.trim().is_empty() {
            return Err(CncError::Configuration(
                "Publisher 'topic' cannot be empty".to_string(),
            ));
        }
        if self.publisher.capacity == 0 {
            return Err(CncError::Configuration(
                "Publisher 'capacity' must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
