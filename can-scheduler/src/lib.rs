//! CAN Scheduler Library
//!
//! Keeps a set of named CAN messages transmitting at their cycle times while
//! individual signal values inside them are changed at any moment, without
//! stopping or restarting the periodic transmission.
//!
//! # Architecture
//!
//! - [`SignalDatabase`] holds the static message layouts (loaded from DBC)
//! - [`codec`] packs physical signal values into frame payloads and back
//! - [`transport`] abstracts the bus: start a periodic send, swap its payload
//! - [`CanScheduler`] activates messages on first use and republishes their
//!   payload on every signal update
//!
//! The library does NOT:
//! - Decode received frames
//! - Persist scheduler state
//! - Stop individual messages (everything stops on shutdown)
//!
//! # Example Usage
//!
//! ```no_run
//! use can_scheduler::transport::{CyclicTransport, LogSink};
//! use can_scheduler::{CanScheduler, SignalDatabase};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let mut db = SignalDatabase::new();
//! db.add_dbc(Path::new("STM_BUS.dbc")).unwrap();
//!
//! let transport = Arc::new(CyclicTransport::new(LogSink::new("vcan0")));
//! let scheduler = CanScheduler::new(Arc::new(db), transport);
//!
//! // First update starts WHEEL_ANGLE transmitting every cycle
//! scheduler.update("WHEEL_ANGLE", "Wheel_Angle", 30.0).unwrap();
//!
//! scheduler.shutdown();
//! ```

// Public modules
pub mod codec;
pub mod config;
pub mod scheduler;
pub mod signals;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use codec::{SignalCodec, SignalValues};
pub use config::SchedulerConfig;
pub use scheduler::{CanScheduler, EntryRef, EntrySnapshot};
pub use signals::{DatabaseStats, MessageLayout, SignalDatabase, SignalLayout};
pub use transport::{TransmitHandle, TransmitStats, Transport};
pub use types::{CanFrame, Result, SchedulerError, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
