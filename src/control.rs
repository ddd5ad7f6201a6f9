//! Lock-step control loop.
//!
//! One iteration is one physical round trip with both machines:
//!
//! ```text
//! encode -> send cnc1 -> send cnc2 -> receive cnc1 -> receive cnc2
//!        -> parse both -> record (log, then publish) -> pace
//! ```
//!
//! Iterations never overlap. Record `i` is persisted and published before the
//! command for `i + 1` is encoded, which keeps the log row order aligned with
//! the commanded X positions.
//!
//! # State machine
//!
//! ```text
//! Idle --run()--> Running --all waypoints--> Completed
//!                    |
//!                    +--send/log failure, cancellation--> Aborted
//! ```
//!
//! Channels and the log are opened on entry to `Running` and released on every
//! exit path, each exactly once. A silent or garbled machine never ends a run;
//! it only produces invalid readings.

use crate::config::Settings;
use crate::error::{CncError, CncResult};
use crate::hardware::LineChannel;
use crate::motion::MotionEncoder;
use crate::parser::reading_or_invalid;
use crate::recorder::{SampleRecord, SampleRecorder};
use crate::trajectory::Waypoint;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`ControlLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Nothing opened yet
    Idle,
    /// Resources open, waypoints being processed
    Running,
    /// Every waypoint recorded and all resources closed
    Completed,
    /// Stopped early by a fault or cancellation; resources closed
    Aborted,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Final state
    pub state: RunState,
    /// Records persisted and published
    pub records: usize,
    /// Samples where the primary machine gave no usable reading
    pub invalid_primary: usize,
    /// Samples where the mirrored machine gave no usable reading
    pub invalid_mirrored: usize,
}

/// Cooperative stop request, checked at the top of every iteration.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Create a signal and the sender that triggers it with `send(true)`.
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    /// Whether a stop has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once a stop is requested. Pends forever if the sender is gone.
    pub async fn triggered(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Timing and encoding knobs of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOptions {
    /// Builds the wire commands
    pub encoder: MotionEncoder,
    /// Maximum wait for each reply
    pub response_timeout: Duration,
    /// Wait after opening the channels before the first command
    pub settle_delay: Duration,
    /// Wait between consecutive samples
    pub pacing: Duration,
}

impl LoopOptions {
    /// Options taken from validated settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            encoder: MotionEncoder::new(settings.motion.code.clone(), settings.motion.feed_rate),
            response_timeout: settings.channels.response_timeout,
            settle_delay: settings.channels.settle_delay,
            pacing: settings.motion.pacing,
        }
    }
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Drives both machines through a trajectory.
pub struct ControlLoop {
    primary: Box<dyn LineChannel>,
    mirrored: Box<dyn LineChannel>,
    recorder: SampleRecorder,
    options: LoopOptions,
    state: RunState,
    invalid_primary: usize,
    invalid_mirrored: usize,
}

impl ControlLoop {
    /// Assemble a loop from unopened resources. The loop takes ownership of
    /// both channels and the recorder for the rest of their lives.
    pub fn new(
        primary: Box<dyn LineChannel>,
        mirrored: Box<dyn LineChannel>,
        recorder: SampleRecorder,
        options: LoopOptions,
    ) -> Self {
        Self {
            primary,
            mirrored,
            recorder,
            options,
            state: RunState::Idle,
            invalid_primary: 0,
            invalid_mirrored: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Records persisted so far; after an abort, the durable prefix length.
    pub fn records_written(&self) -> usize {
        self.recorder.recorded()
    }

    /// Execute the whole trajectory.
    ///
    /// A loop runs at most once.
    ///
    /// # Errors
    ///
    /// Channel open/send failures, log failures and cancellation abort the
    /// run. Every opened resource is closed before the error is returned.
    pub async fn run(
        &mut self,
        waypoints: &[Waypoint],
        mut shutdown: ShutdownSignal,
    ) -> CncResult<RunSummary> {
        if self.state != RunState::Idle {
            return Err(CncError::Configuration(format!(
                "Control loop cannot run from state {:?}",
                self.state
            )));
        }

        info!(samples = waypoints.len(), "Starting run");
        let outcome = match self.open_all().await {
            Ok(()) => {
                self.state = RunState::Running;
                self.run_waypoints(waypoints, &mut shutdown).await
            }
            Err(e) => Err(e),
        };
        let cleanup = self.close_all().await;

        match (outcome, cleanup) {
            (Ok(()), Ok(())) => {
                self.state = RunState::Completed;
                let summary = self.summary();
                info!(
                    records = summary.records,
                    invalid_primary = summary.invalid_primary,
                    invalid_mirrored = summary.invalid_mirrored,
                    "Run completed"
                );
                Ok(summary)
            }
            (Ok(()), Err(e)) => {
                self.state = RunState::Aborted;
                error!(error = %e, "Run aborted while releasing resources");
                Err(e)
            }
            (Err(e), cleanup) => {
                self.state = RunState::Aborted;
                if let Err(cleanup_err) = cleanup {
                    error!(error = %cleanup_err, "Cleanup after abort also failed");
                }
                error!(
                    error = %e,
                    records = self.recorder.recorded(),
                    "Run aborted"
                );
                Err(e)
            }
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            state: self.state,
            records: self.recorder.recorded(),
            invalid_primary: self.invalid_primary,
            invalid_mirrored: self.invalid_mirrored,
        }
    }

    async fn open_all(&mut self) -> CncResult<()> {
        self.primary.open().await?;
        self.mirrored.open().await?;
        self.recorder.open().await?;
        info!(
            primary = self.primary.id(),
            mirrored = self.mirrored.id(),
            "Channels and sample log open"
        );
        Ok(())
    }

    /// Close whatever is open. Every resource gets its close call even when
    /// an earlier one fails.
    async fn close_all(&mut self) -> CncResult<()> {
        let mut errors = Vec::new();

        if self.recorder.is_open() {
            if let Err(e) = self.recorder.close().await {
                errors.push(e);
            }
        }
        for channel in [&mut self.primary, &mut self.mirrored] {
            if channel.is_open() {
                if let Err(e) = channel.close().await {
                    errors.push(e);
                }
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CncError::ShutdownFailed(errors)),
        }
    }

    async fn run_waypoints(
        &mut self,
        waypoints: &[Waypoint],
        shutdown: &mut ShutdownSignal,
    ) -> CncResult<()> {
        pause(self.options.settle_delay, shutdown).await;

        for (position, waypoint) in waypoints.iter().enumerate() {
            if shutdown.is_triggered() {
                warn!(completed = position, "Shutdown requested, stopping run");
                return Err(CncError::Cancelled {
                    completed: self.recorder.recorded(),
                });
            }

            self.step(waypoint).await?;

            if position + 1 < waypoints.len() {
                pause(self.options.pacing, shutdown).await;
            }
        }
        Ok(())
    }

    async fn step(&mut self, waypoint: &Waypoint) -> CncResult<()> {
        let [command1, command2] = self.options.encoder.encode(waypoint);

        self.primary.send(&command1).await?;
        self.mirrored.send(&command2).await?;

        let timeout = self.options.response_timeout;
        let reply1 = receive(&mut *self.primary, timeout).await;
        let reply2 = receive(&mut *self.mirrored, timeout).await;

        debug!(
            index = waypoint.index,
            response1 = reply1.as_deref().unwrap_or(""),
            response2 = reply2.as_deref().unwrap_or(""),
            "Responses received"
        );

        let reading1 = reading_or_invalid(self.primary.id(), reply1.as_deref());
        let reading2 = reading_or_invalid(self.mirrored.id(), reply2.as_deref());
        if !reading1.valid {
            self.invalid_primary += 1;
        }
        if !reading2.valid {
            self.invalid_mirrored += 1;
        }

        self.recorder
            .record(&SampleRecord {
                waypoint: *waypoint,
                reading1,
                reading2,
            })
            .await
    }
}

/// Wait for one reply. Transport read faults count as no reply.
async fn receive(channel: &mut dyn LineChannel, timeout: Duration) -> Option<String> {
    match channel.receive_line(timeout).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(channel = channel.id(), error = %e, "Read failed, treating as no reply");
            None
        }
    }
}

/// Sleep for `duration`, returning early if a stop is requested.
async fn pause(duration: Duration, shutdown: &mut ShutdownSignal) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.triggered() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockChannel;
    use crate::recorder::{BroadcastPublisher, CsvLog};
    use crate::trajectory::TrajectoryParams;

    fn fast_options() -> LoopOptions {
        LoopOptions {
            response_timeout: Duration::from_millis(5),
            settle_delay: Duration::ZERO,
            pacing: Duration::ZERO,
            ..LoopOptions::default()
        }
    }

    #[test]
    fn test_default_options_follow_default_settings() {
        let options = LoopOptions::default();
        assert_eq!(options.encoder, MotionEncoder::default());
        assert_eq!(options.response_timeout, Duration::from_secs(1));
        assert_eq!(options.settle_delay, Duration::from_secs(2));
        assert_eq!(options.pacing, Duration::from_millis(100));
    }

    fn build(
        dir: &std::path::Path,
        primary: &MockChannel,
        mirrored: &MockChannel,
    ) -> ControlLoop {
        let recorder = SampleRecorder::new(
            Box::new(CsvLog::new(dir.join("log.csv"))),
            Box::new(BroadcastPublisher::new("cnc_positions", 64)),
        );
        ControlLoop::new(
            Box::new(primary.clone()),
            Box::new(mirrored.clone()),
            recorder,
            fast_options(),
        )
    }

    fn waypoints(n: usize) -> Vec<Waypoint> {
        TrajectoryParams {
            num_points: n,
            ..Default::default()
        }
        .generate()
    }

    #[tokio::test]
    async fn test_completed_run_closes_everything_once() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MockChannel::echo("cnc1");
        let mirrored = MockChannel::echo("cnc2");
        let mut control = build(dir.path(), &primary, &mirrored);
        assert_eq!(control.state(), RunState::Idle);

        let summary = control
            .run(&waypoints(10), ShutdownSignal::never())
            .await
            .unwrap();

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.records, 10);
        assert_eq!(summary.invalid_primary, 0);
        assert_eq!(summary.invalid_mirrored, 0);
        for channel in [&primary, &mirrored] {
            assert!(!channel.is_open());
            assert_eq!(channel.open_count(), 1);
            assert_eq!(channel.close_count(), 1);
            assert_eq!(channel.sent_lines().len(), 10);
        }
    }

    #[tokio::test]
    async fn test_commands_are_mirrored_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MockChannel::echo("cnc1");
        let mirrored = MockChannel::echo("cnc2");
        let mut control = build(dir.path(), &primary, &mirrored);
        control
            .run(&waypoints(2), ShutdownSignal::never())
            .await
            .unwrap();

        assert_eq!(primary.sent_lines()[0], "G001 X0.00 Y0.00 Z10.00 F500\n");
        assert_eq!(mirrored.sent_lines()[0], "G001 X0.00 Y-0.00 Z-10.00 F500\n");
    }

    #[tokio::test]
    async fn test_run_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MockChannel::echo("cnc1");
        let mirrored = MockChannel::echo("cnc2");
        let mut control = build(dir.path(), &primary, &mirrored);
        control
            .run(&waypoints(1), ShutdownSignal::never())
            .await
            .unwrap();
        assert!(control
            .run(&waypoints(1), ShutdownSignal::never())
            .await
            .is_err());
        assert_eq!(control.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_open_failure_closes_opened_channel() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MockChannel::echo("cnc1");
        let mirrored = MockChannel::echo("cnc2").with_open_failure();
        let mut control = build(dir.path(), &primary, &mirrored);

        let err = control
            .run(&waypoints(3), ShutdownSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, CncError::ChannelOpen { .. }));
        assert_eq!(control.state(), RunState::Aborted);
        assert_eq!(primary.close_count(), 1);
        assert!(!primary.is_open());
        assert_eq!(mirrored.close_count(), 0);
        assert!(primary.sent_lines().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MockChannel::echo("cnc1");
        let mirrored = MockChannel::echo("cnc2");
        let mut control = build(dir.path(), &primary, &mirrored);

        let (tx, signal) = ShutdownSignal::new();
        tx.send(true).unwrap();
        let err = control.run(&waypoints(5), signal).await.unwrap_err();

        assert!(matches!(err, CncError::Cancelled { completed: 0 }));
        assert_eq!(control.state(), RunState::Aborted);
        assert_eq!(primary.close_count(), 1);
        assert_eq!(mirrored.close_count(), 1);
    }

    #[tokio::test]
    async fn test_pause_returns_early_on_shutdown() {
        let (tx, mut signal) = ShutdownSignal::new();
        tx.send(true).unwrap();
        let start = std::time::Instant::now();
        pause(Duration::from_secs(30), &mut signal).await;
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_never_signal_does_not_fire() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        let fired = tokio::time::timeout(Duration::from_millis(20), signal.triggered()).await;
        assert!(fired.is_err());
    }
}
