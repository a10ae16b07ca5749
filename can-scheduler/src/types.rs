//! Core types for the CAN scheduler library
//!
//! This module defines the frame type handed to the transport and the error
//! taxonomy shared by the codec, the transport layer and the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the scheduler
pub type Timestamp = DateTime<Utc>;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Maximum payload of a classic CAN frame
pub const CLASSIC_MAX_PAYLOAD: usize = 8;

/// Maximum payload of a CAN-FD frame
pub const FD_MAX_PAYLOAD: usize = 64;

/// A CAN frame ready to be put on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Frame data bytes (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// True if this is a CAN-FD frame
    pub is_fd: bool,
}

impl CanFrame {
    /// Create a classic frame with a standard identifier
    pub fn new(can_id: u32, data: Vec<u8>) -> Self {
        Self {
            can_id,
            data,
            is_extended: false,
            is_fd: false,
        }
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// Largest payload this frame kind can carry
    pub fn max_payload(&self) -> usize {
        if self.is_fd {
            FD_MAX_PAYLOAD
        } else {
            CLASSIC_MAX_PAYLOAD
        }
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "{:08X}", self.can_id)?;
        } else {
            write!(f, "{:03X}", self.can_id)?;
        }
        write!(f, " [{}]", self.data.len())?;
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Errors that can occur while scheduling messages
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Unknown signal {signal} in message {message}")]
    UnknownSignal { message: String, signal: String },

    #[error("Value {value} is not representable by signal {signal} in message {message}")]
    Encoding {
        message: String,
        signal: String,
        value: f64,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Message already scheduled: {0}")]
    AlreadyScheduled(String),

    #[error("Scheduler has been shut down")]
    ShutDown,

    #[error("Failed to parse DBC file: {0}")]
    DbcParse(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Map a poisoned lock into an internal error
    pub(crate) fn poisoned<T>(err: std::sync::PoisonError<T>) -> Self {
        SchedulerError::Internal(format!("lock poisoned: {}", err))
    }
}
