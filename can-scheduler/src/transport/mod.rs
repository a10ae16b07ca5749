//! Bus transport
//!
//! The scheduler only needs two things from a bus: start sending a frame
//! periodically, and swap the bytes of a running periodic send. Those are the
//! [`Transport`] and [`TransmitHandle`] traits.
//!
//! [`CyclicTransport`] implements both on top of any [`FrameSink`] (something
//! that can put a single frame on the wire) with one timer thread per handle.

mod cyclic;
#[cfg(feature = "socketcan")]
mod socketcan_sink;

pub use cyclic::{CyclicTask, CyclicTransport};
#[cfg(feature = "socketcan")]
pub use socketcan_sink::SocketCanSink;

use crate::types::{CanFrame, Result, SchedulerError, Timestamp};
use serde::Serialize;
use std::time::Duration;

/// Counters of a periodic send
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransmitStats {
    /// Frames successfully handed to the sink
    pub frames_sent: u64,
    /// Sends the sink rejected
    pub send_failures: u64,
    /// Time of the last successful send
    pub last_sent: Option<Timestamp>,
}

/// An active periodic send
pub trait TransmitHandle: Send + Sync {
    /// Replace the bytes sent on every following tick. The cadence is untouched.
    fn replace_payload(&self, payload: &[u8]) -> Result<()>;

    /// Stop sending. Calling it again is a no-op.
    fn stop(&self);

    /// True until `stop` has been called
    fn is_active(&self) -> bool;

    /// Counters of this periodic send
    fn stats(&self) -> TransmitStats;
}

/// A bus that can send frames periodically
pub trait Transport: Send + Sync {
    /// Start sending `frame` every `interval` until the handle is stopped
    fn start_periodic(&self, frame: CanFrame, interval: Duration) -> Result<Box<dyn TransmitHandle>>;
}

/// Something that can put one frame on the bus
pub trait FrameSink: Send + Sync + 'static {
    /// Send a single frame
    fn send(&self, frame: &CanFrame) -> Result<()>;
}

/// Sink that only logs frames, for running without a bus
#[derive(Debug, Clone)]
pub struct LogSink {
    channel: String,
}

impl LogSink {
    /// Create a logging sink; `channel` is only used as a label
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

impl FrameSink for LogSink {
    fn send(&self, frame: &CanFrame) -> Result<()> {
        log::debug!("{} TX {}", self.channel, frame);
        Ok(())
    }
}

/// Reject payloads the frame kind cannot carry
pub(crate) fn check_payload(frame: &CanFrame, payload: &[u8]) -> Result<()> {
    if payload.len() > frame.max_payload() {
        return Err(SchedulerError::Transport(format!(
            "payload of {} bytes exceeds the {} byte limit of frame 0x{:X}",
            payload.len(),
            frame.max_payload(),
            frame.can_id
        )));
    }
    Ok(())
}
