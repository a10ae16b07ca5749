//! Message database
//!
//! Holds the static layout of every message the scheduler may transmit, keyed
//! by message name. Layouts are loaded once and shared read-only with the
//! scheduler through `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

/// A complete CAN message layout
#[derive(Debug, Clone, PartialEq)]
pub struct MessageLayout {
    /// CAN message ID (without the DBC extended-id flag)
    pub id: u32,
    /// Message name
    pub name: String,
    /// Payload size in bytes
    pub size: usize,
    /// True if the frame uses a 29-bit identifier
    pub is_extended: bool,
    /// True if the frame is sent as CAN-FD
    pub is_fd: bool,
    /// Declared cycle time in milliseconds (None if not declared)
    pub cycle_time_ms: Option<u64>,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// All signals in this message, in declaration order
    pub signals: Vec<SignalLayout>,
    /// Multiplexer signal name (if multiplexed)
    pub multiplexer_signal: Option<String>,
}

impl MessageLayout {
    /// Find a signal by name
    pub fn signal(&self, name: &str) -> Option<&SignalLayout> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// True if this message has multiplexed signals
    pub fn is_multiplexed(&self) -> bool {
        self.multiplexer_signal.is_some()
    }
}

/// A CAN signal layout
#[derive(Debug, Clone, PartialEq)]
pub struct SignalLayout {
    /// Signal name
    pub name: String,
    /// Start bit in the CAN frame (DBC numbering)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order of the packed value
    pub byte_order: ByteOrder,
    /// Value type (signed/unsigned)
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "deg", "V")
    pub unit: Option<String>,
    /// Physical value transmitted before the first update (None if not declared)
    pub initial: Option<f64>,
    /// Multiplexer info (None if not multiplexed)
    pub multiplexer_info: Option<MultiplexerInfo>,
}

impl SignalLayout {
    /// Initial physical value, 0 when the layout declares none
    pub fn initial_value(&self) -> f64 {
        self.initial.unwrap_or(0.0)
    }

    /// True if the declared `[min, max]` is meaningful
    pub fn has_declared_range(&self) -> bool {
        self.min < self.max
    }
}

/// Byte order for signal packing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// Multiplexer information for multiplexed signals
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplexerInfo {
    /// Name of the multiplexer signal that controls this signal
    pub multiplexer_signal: String,
    /// Multiplexer value(s) for which this signal is active
    pub multiplexer_values: Vec<u64>,
}

/// The message database
#[derive(Debug, Default)]
pub struct SignalDatabase {
    /// Layouts by message name
    messages: HashMap<String, Arc<MessageLayout>>,

    /// Message name lookup by CAN ID
    id_lookup: HashMap<u32, String>,
}

impl SignalDatabase {
    /// Create a new empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a DBC file and add its layouts to the database
    pub fn add_dbc(&mut self, path: &std::path::Path) -> crate::types::Result<()> {
        log::info!("Loading DBC file: {:?}", path);

        let messages = crate::signals::dbc::parse_dbc_file(path)?;
        for message in messages {
            self.add_message(message);
        }

        log::info!("DBC file loaded successfully: {:?}", path);
        Ok(())
    }

    /// Parse DBC content already in memory and add its layouts
    pub fn add_dbc_str(&mut self, content: &str) -> crate::types::Result<()> {
        for message in crate::signals::dbc::parse_dbc_str(content, "<memory>")? {
            self.add_message(message);
        }
        Ok(())
    }

    /// Add a message layout to the database. A later layout with the same
    /// name replaces the earlier one.
    pub fn add_message(&mut self, message: MessageLayout) {
        if let Some(previous) = self.messages.get(&message.name) {
            log::warn!(
                "Message '{}' defined twice (0x{:X} and 0x{:X}), keeping the last one",
                message.name,
                previous.id,
                message.id
            );
            self.id_lookup.remove(&previous.id);
        }

        self.id_lookup.insert(message.id, message.name.clone());
        self.messages.insert(message.name.clone(), Arc::new(message));
    }

    /// Look up a message layout by name
    pub fn lookup(&self, name: &str) -> Option<Arc<MessageLayout>> {
        self.messages.get(name).cloned()
    }

    /// Look up a message layout by CAN ID
    pub fn lookup_id(&self, can_id: u32) -> Option<Arc<MessageLayout>> {
        self.id_lookup
            .get(&can_id)
            .and_then(|name| self.lookup(name))
    }

    /// All message names, sorted
    pub fn message_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.messages.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|msg| msg.signals.len()).sum(),
        }
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of message layouts
    pub num_messages: usize,
    /// Total number of signal layouts
    pub num_signals: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Single signed 8-bit signal with a declared range of -45..45
    pub(crate) fn wheel_angle_layout() -> MessageLayout {
        MessageLayout {
            id: 0x100,
            name: "WHEEL_ANGLE".to_string(),
            size: 1,
            is_extended: false,
            is_fd: false,
            cycle_time_ms: Some(100),
            sender: Some("HMI".to_string()),
            signals: vec![SignalLayout {
                name: "Wheel_Angle".to_string(),
                start_bit: 0,
                length: 8,
                byte_order: ByteOrder::LittleEndian,
                value_type: ValueType::Signed,
                factor: 1.0,
                offset: 0.0,
                min: -45.0,
                max: 45.0,
                unit: Some("deg".to_string()),
                initial: None,
                multiplexer_info: None,
            }],
            multiplexer_signal: None,
        }
    }

    #[test]
    fn test_empty_database() {
        let db = SignalDatabase::new();
        let stats = db.stats();
        assert_eq!(stats.num_messages, 0);
        assert_eq!(stats.num_signals, 0);
        assert!(db.lookup("WHEEL_ANGLE").is_none());
    }

    #[test]
    fn test_add_message() {
        let mut db = SignalDatabase::new();
        db.add_message(wheel_angle_layout());

        let stats = db.stats();
        assert_eq!(stats.num_messages, 1);
        assert_eq!(stats.num_signals, 1);

        let msg = db.lookup("WHEEL_ANGLE").unwrap();
        assert_eq!(msg.id, 0x100);
        assert_eq!(msg.signals[0].name, "Wheel_Angle");
        assert_eq!(msg.signal("Wheel_Angle").unwrap().initial_value(), 0.0);

        let by_id = db.lookup_id(0x100).unwrap();
        assert_eq!(by_id.name, "WHEEL_ANGLE");
    }

    #[test]
    fn test_duplicate_name_keeps_last() {
        let mut db = SignalDatabase::new();
        db.add_message(wheel_angle_layout());

        let mut replacement = wheel_angle_layout();
        replacement.id = 0x200;
        db.add_message(replacement);

        assert_eq!(db.stats().num_messages, 1);
        assert_eq!(db.lookup("WHEEL_ANGLE").unwrap().id, 0x200);
        assert!(db.lookup_id(0x100).is_none());
        assert_eq!(db.message_names(), vec!["WHEEL_ANGLE".to_string()]);
    }
}
