//! Simulated controller channel.
//!
//! Provides an in-process stand-in for a CNC controller so the full control
//! loop can run without hardware. It offers:
//! - Echo mode: replies with the commanded `X,Y,Z` of each move
//! - Scripted replies, including silent slots that behave like timeouts
//! - Failure injection on open or on the n-th send
//! - Call logging and open/close counters for test verification
//!
//! Clones share state, so a test can keep one handle while the control loop
//! owns another.

use super::LineChannel;
use crate::error::{CncError, CncResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How the simulated controller answers.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyMode {
    /// Answer every move with its commanded position
    Echo,
    /// Never answer; every receive times out
    Silent,
    /// Answer from a fixed script, one entry per receive. `None` entries and
    /// an exhausted script behave like a timeout.
    Scripted(VecDeque<Option<String>>),
}

#[derive(Debug)]
struct MockState {
    mode: ReplyMode,
    open: bool,
    open_count: usize,
    close_count: usize,
    sends: usize,
    sent: Vec<String>,
    pending: VecDeque<String>,
    fail_open: bool,
    fail_send_at: Option<usize>,
}

/// In-process controller simulation
///
/// # Example
///
/// ```
/// use cnc_sync::hardware::MockChannel;
///
/// let channel = MockChannel::echo("cnc1");
/// let probe = channel.clone();
/// assert!(!probe.is_open());
/// assert_eq!(probe.close_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockChannel {
    id: String,
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    /// Create a channel with the given reply behaviour.
    pub fn new(id: impl Into<String>, mode: ReplyMode) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(MockState {
                mode,
                open: false,
                open_count: 0,
                close_count: 0,
                sends: 0,
                sent: Vec::new(),
                pending: VecDeque::new(),
                fail_open: false,
                fail_send_at: None,
            })),
        }
    }

    /// A controller that reports back every commanded position.
    pub fn echo(id: impl Into<String>) -> Self {
        Self::new(id, ReplyMode::Echo)
    }

    /// A controller that never answers.
    pub fn silent(id: impl Into<String>) -> Self {
        Self::new(id, ReplyMode::Silent)
    }

    /// A controller answering from `replies`, one per receive.
    pub fn scripted<I, S>(id: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let script = replies.into_iter().map(|r| r.map(Into::into)).collect();
        Self::new(id, ReplyMode::Scripted(script))
    }

    /// Make `open` fail.
    pub fn with_open_failure(self) -> Self {
        self.state().fail_open = true;
        self
    }

    /// Make the send with zero-based position `n` fail, and every send after it.
    pub fn with_send_failure_at(self, n: usize) -> Self {
        self.state().fail_send_at = Some(n);
        self
    }

    /// Whether the channel is currently open.
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.state().open_count
    }

    /// Number of close calls that released an open channel.
    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    /// Every line successfully sent, in order.
    pub fn sent_lines(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the counters from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Extract `X,Y,Z` from a motion line such as `G001 X1.00 Y2.00 Z3.00 F500`.
fn echo_position(line: &str) -> Option<String> {
    let mut axes: [Option<&str>; 3] = [None; 3];
    for word in line.split_whitespace() {
        let slot = match word.chars().next()? {
            'X' => 0,
            'Y' => 1,
            'Z' => 2,
            _ => continue,
        };
        axes[slot] = Some(&word[1..]);
    }
    let [x, y, z] = axes;
    Some(format!("{},{},{}", x?, y?, z?))
}

#[async_trait]
impl LineChannel for MockChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        MockChannel::is_open(self)
    }

    async fn open(&mut self) -> CncResult<()> {
        let mut state = self.state();
        if state.fail_open {
            return Err(CncError::ChannelOpen {
                channel: self.id.clone(),
                reason: "Injected failure".to_string(),
            });
        }
        if !state.open {
            state.open = true;
            state.open_count += 1;
        }
        Ok(())
    }

    async fn send(&mut self, line: &str) -> CncResult<()> {
        let mut state = self.state();
        if !state.open {
            return Err(CncError::ChannelNotOpen(self.id.clone()));
        }

        let position = state.sends;
        state.sends += 1;
        if state.fail_send_at.is_some_and(|n| position >= n) {
            return Err(CncError::ChannelSend {
                channel: self.id.clone(),
                reason: "Injected failure".to_string(),
            });
        }

        state.sent.push(line.to_string());
        state.pending.clear();
        if state.mode == ReplyMode::Echo {
            if let Some(reply) = echo_position(line) {
                state.pending.push_back(reply);
            }
        }
        Ok(())
    }

    async fn receive_line(&mut self, _timeout: Duration) -> CncResult<Option<String>> {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.open {
            return Err(CncError::ChannelNotOpen(self.id.clone()));
        }

        let reply = match &mut state.mode {
            ReplyMode::Echo => state.pending.pop_front(),
            ReplyMode::Silent => None,
            ReplyMode::Scripted(script) => script.pop_front().flatten(),
        };
        Ok(reply.map(|r| r.trim().to_string()))
    }

    async fn close(&mut self) -> CncResult<()> {
        let mut state = self.state();
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_mock_channel_open_close() {
        let mut channel = MockChannel::silent("cnc1");
        let probe = channel.clone();
        assert!(!probe.is_open());

        channel.open().await.unwrap();
        assert!(probe.is_open());
        assert_eq!(probe.open_count(), 1);

        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(!probe.is_open());
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_echo_replies_with_commanded_position() {
        let mut channel = MockChannel::echo("cnc1");
        channel.open().await.unwrap();
        channel
            .send("G001 X12.50 Y-3.00 Z9.54 F500\n")
            .await
            .unwrap();
        let reply = channel.receive_line(TIMEOUT).await.unwrap();
        assert_eq!(reply.as_deref(), Some("12.50,-3.00,9.54"));
        assert_eq!(channel.receive_line(TIMEOUT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let mut channel = MockChannel::scripted("cnc2", [Some("1,2,3"), None, Some(" 4,5,6\r")]);
        channel.open().await.unwrap();
        assert_eq!(
            channel.receive_line(TIMEOUT).await.unwrap().as_deref(),
            Some("1,2,3")
        );
        assert_eq!(channel.receive_line(TIMEOUT).await.unwrap(), None);
        assert_eq!(
            channel.receive_line(TIMEOUT).await.unwrap().as_deref(),
            Some("4,5,6")
        );
        // Exhausted script behaves like a timeout
        assert_eq!(channel.receive_line(TIMEOUT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_failure_injection() {
        let mut channel = MockChannel::echo("cnc1").with_send_failure_at(1);
        channel.open().await.unwrap();
        channel.send("G001 X0 Y0 Z0 F1\n").await.unwrap();
        let err = channel.send("G001 X1 Y1 Z1 F1\n").await.unwrap_err();
        assert!(matches!(err, CncError::ChannelSend { .. }));
        assert_eq!(channel.sent_lines().len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_injection() {
        let mut channel = MockChannel::echo("cnc1").with_open_failure();
        assert!(channel.open().await.is_err());
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_io_requires_open_channel() {
        let mut channel = MockChannel::echo("cnc1");
        assert!(matches!(
            channel.send("G001 X0 Y0 Z0 F1\n").await,
            Err(CncError::ChannelNotOpen(_))
        ));
        assert!(matches!(
            channel.receive_line(TIMEOUT).await,
            Err(CncError::ChannelNotOpen(_))
        ));
    }

    #[test]
    fn test_echo_position_requires_all_axes() {
        assert_eq!(echo_position("G001 X1 Y2 Z3 F5").as_deref(), Some("1,2,3"));
        assert_eq!(echo_position("G001 X1 Y2 F5"), None);
    }

    #[tokio::test]
    async fn test_send_discards_unread_reply() {
        let mut channel = MockChannel::echo("cnc1");
        channel.open().await.unwrap();
        channel.send("G001 X1.00 Y2.00 Z3.00 F500\n").await.unwrap();
        channel.send("G001 X4.00 Y5.00 Z6.00 F500\n").await.unwrap();

        let reply = channel.receive_line(TIMEOUT).await.unwrap();
        assert_eq!(reply.as_deref(), Some("4.00,5.00,6.00"));
        assert_eq!(channel.receive_line(TIMEOUT).await.unwrap(), None);
    }
}
