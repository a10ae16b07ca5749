//! Message database and DBC parser
//!
//! This module contains the DBC parser and the name-keyed message database
//! the scheduler resolves message layouts from.

pub mod dbc;
pub mod database;

// Re-export key types for convenience
pub use database::{
    ByteOrder, DatabaseStats, MessageLayout, MultiplexerInfo, SignalDatabase, SignalLayout,
    ValueType,
};
