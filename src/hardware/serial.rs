//! RS-232 / USB-serial channel backed by the serialport crate.

use super::LineChannel;
use crate::error::{CncError, CncResult};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use log::debug;
#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Granularity of the blocking reads while waiting for a reply.
///
/// The overall deadline is enforced on top of this, so a reply wait overshoots
/// its timeout by at most one poll interval.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Serial link to one controller
///
/// Wraps the serialport crate. Blocking port I/O runs on Tokio's blocking
/// thread pool so the async runtime is never stalled by a slow machine.
pub struct SerialChannel {
    /// Channel identifier (e.g. "cnc1")
    id: String,

    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// The open port (behind Arc<Mutex> so blocking tasks can borrow it)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialChannel {
    /// Create an unopened channel.
    ///
    /// # Arguments
    /// * `id` - Identifier used in logs and errors
    /// * `port_name` - Serial port path (e.g., "/dev/ttyACM0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 115200)
    pub fn new(id: impl Into<String>, port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            id: id.into(),
            port_name: port_name.into(),
            baud_rate,
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Port path this channel talks to.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> CncResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| CncError::ChannelNotOpen(self.id.clone()))
    }
}

#[async_trait]
impl LineChannel for SerialChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }

    async fn open(&mut self) -> CncResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.is_some() {
                return Ok(());
            }

            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(POLL_INTERVAL)
                .open()
                .map_err(|e| CncError::ChannelOpen {
                    channel: self.id.clone(),
                    reason: format!(
                        "'{}' at {} baud: {}",
                        self.port_name, self.baud_rate, e
                    ),
                })?;

            // Stale bytes from before the run would be taken as the first reply.
            if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
                debug!("[{}] Could not clear input buffer: {}", self.id, e);
            }

            self.port = Some(Arc::new(Mutex::new(port)));
            debug!(
                "[{}] Serial port '{}' opened at {} baud",
                self.id, self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(CncError::ChannelOpen {
                channel: self.id.clone(),
                reason: "Serial support not enabled. Rebuild with --features instrument_serial"
                    .to_string(),
            })
        }
    }

    async fn send(&mut self, line: &str) -> CncResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let id = self.id.clone();
            let bytes = line.as_bytes().to_vec();

            let stale_id = id.clone();

            // Execute blocking serial I/O on dedicated thread
            let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                // The tail of a reply that missed its deadline must not be
                // read as the answer to this command.
                if let Err(e) = port_guard.clear(serialport::ClearBuffer::Input) {
                    debug!("[{}] Could not clear input buffer: {}", stale_id, e);
                }
                port_guard.write_all(&bytes)?;
                port_guard.flush()
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    debug!("[{}] Sent: {}", id, line.trim_end());
                    Ok(())
                }
                Ok(Err(e)) => Err(CncError::ChannelSend {
                    channel: id,
                    reason: e.to_string(),
                }),
                Err(e) => Err(CncError::ChannelSend {
                    channel: id,
                    reason: format!("Serial I/O task failed: {}", e),
                }),
            }
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = line;
            Err(CncError::ChannelNotOpen(self.id.clone()))
        }
    }

    async fn receive_line(&mut self, timeout: Duration) -> CncResult<Option<String>> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let id = self.id.clone();

            // Execute blocking serial I/O on dedicated thread
            let result = tokio::task::spawn_blocking(move || -> Result<Option<String>, String> {
                use std::io::Read;

                let mut port_guard = port.blocking_lock();
                let mut response: Vec<u8> = Vec::new();
                let mut buffer = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > timeout {
                        if !response.is_empty() {
                            debug!(
                                "[{}] Dropping partial reply after {:?}: {:?}",
                                id,
                                timeout,
                                String::from_utf8_lossy(&response)
                            );
                        }
                        return Ok(None);
                    }

                    match port_guard.read(&mut buffer) {
                        Ok(0) => return Err("Unexpected EOF".to_string()),
                        Ok(_) => {
                            if buffer[0] == b'\n' {
                                break;
                            }
                            response.push(buffer[0]);
                        }
                        // Port timeout is shorter than our overall timeout
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => return Err(e.to_string()),
                    }
                }

                let line = String::from_utf8_lossy(&response).trim().to_string();
                debug!("[{}] Received: {}", id, line);
                Ok(Some(line))
            })
            .await;

            match result {
                Ok(Ok(line)) => Ok(line),
                Ok(Err(reason)) => Err(CncError::ChannelRead {
                    channel: self.id.clone(),
                    reason,
                }),
                Err(e) => Err(CncError::ChannelRead {
                    channel: self.id.clone(),
                    reason: format!("Serial I/O task failed: {}", e),
                }),
            }
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = timeout;
            Err(CncError::ChannelNotOpen(self.id.clone()))
        }
    }

    async fn close(&mut self) -> CncResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("[{}] Serial port '{}' closed", self.id, self.port_name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_channel_creation() {
        let channel = SerialChannel::new("cnc1", "/dev/ttyACM0", 115200);
        assert_eq!(channel.id(), "cnc1");
        assert_eq!(channel.port_name(), "/dev/ttyACM0");
        assert_eq!(channel.baud_rate(), 115200);
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let mut channel = SerialChannel::new("cnc2", "/dev/ttyACM1", 115200);
        let err = channel.send("G001 X0.00 Y0.00 Z0.00 F500\n").await.unwrap_err();
        assert!(matches!(err, CncError::ChannelNotOpen(ref id) if id == "cnc2"));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut channel = SerialChannel::new("cnc1", "/dev/definitely-not-a-port", 115200);
        let err = channel.open().await.unwrap_err();
        assert!(matches!(err, CncError::ChannelOpen { .. }));
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut channel = SerialChannel::new("cnc1", "/dev/ttyACM0", 115200);
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(!channel.is_open());
    }
}
