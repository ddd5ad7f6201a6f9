//! Core library for the cnc_sync controller.
//!
//! Drives two CNC machines in lock-step along a precomputed trajectory: the
//! second machine mirrors the first on Y and Z. Each sample sends one move to
//! each machine over its own serial link, collects both position replies,
//! appends one CSV row and publishes one event.
//!
//! - [`trajectory`]: waypoint generation
//! - [`motion`]: waypoint to wire command encoding
//! - [`hardware`]: serial and simulated channels
//! - [`parser`]: reply parsing into position readings
//! - [`recorder`]: CSV log and event publishing
//! - [`control`]: the sequential control loop
//! - [`config`], [`error`], [`logging`], [`app`]: ambient plumbing

pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod motion;
pub mod parser;
pub mod recorder;
pub mod trajectory;

pub use config::Settings;
pub use control::{ControlLoop, LoopOptions, RunState, RunSummary, ShutdownSignal};
pub use error::{CncError, CncResult};
