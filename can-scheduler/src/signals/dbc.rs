//! DBC file parser
//!
//! Parses Vector DBC files and converts them into message layouts. Besides the
//! signal bit layout this picks up the attributes the scheduler cares about:
//! `GenMsgCycleTime`, `GenSigStartValue` and `VFrameFormat`.

use crate::signals::database::{
    ByteOrder, MessageLayout, MultiplexerInfo, SignalLayout, ValueType,
};
use crate::types::{SchedulerError, Result, CLASSIC_MAX_PAYLOAD};
use can_dbc::{AttributeValue, AttributeValuedForObjectType, MessageId};
use std::collections::HashMap;
use std::path::Path;

const CYCLE_TIME_ATTRIBUTE: &str = "GenMsgCycleTime";
const START_VALUE_ATTRIBUTE: &str = "GenSigStartValue";
const FRAME_FORMAT_ATTRIBUTE: &str = "VFrameFormat";

/// DBC marks 29-bit identifiers by setting bit 31
const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Parse a DBC file and return message layouts
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageLayout>> {
    log::info!("Parsing DBC file: {:?}", path);

    // Read the DBC file as bytes first (handle non-UTF8 encodings)
    let bytes = std::fs::read(path).map_err(|e| {
        SchedulerError::DbcParse(format!("Failed to read file {:?}: {}", path, e))
    })?;

    let dbc_content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(err) => {
            // Latin-1 maps every byte to the code point of the same value
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let source_filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc");

    let messages = parse_dbc_str(&dbc_content, source_filename)?;

    log::info!("Parsed {} messages from {:?}", messages.len(), path);

    Ok(messages)
}

/// Parse DBC content and return message layouts
pub fn parse_dbc_str(content: &str, source: &str) -> Result<Vec<MessageLayout>> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        SchedulerError::DbcParse(format!("Failed to parse DBC {}: {:?}", source, e))
    })?;

    let attributes = Attributes::collect(&dbc);

    dbc.messages()
        .iter()
        .map(|dbc_msg| convert_message(dbc_msg, &attributes))
        .collect()
}

/// Attribute values relevant to transmission, indexed by raw message id
#[derive(Default)]
struct Attributes {
    default_cycle_time: Option<u64>,
    default_start_value: Option<f64>,
    default_frame_format: Option<String>,
    cycle_times: HashMap<u32, u64>,
    frame_formats: HashMap<u32, String>,
    start_values: HashMap<(u32, String), f64>,
}

impl Attributes {
    fn collect(dbc: &can_dbc::DBC) -> Self {
        let mut attrs = Attributes::default();

        for default in dbc.attribute_defaults() {
            match default.attribute_name().as_str() {
                CYCLE_TIME_ATTRIBUTE => {
                    attrs.default_cycle_time =
                        attribute_as_f64(default.attribute_value()).map(|v| v as u64);
                }
                START_VALUE_ATTRIBUTE => {
                    attrs.default_start_value = attribute_as_f64(default.attribute_value());
                }
                FRAME_FORMAT_ATTRIBUTE => {
                    attrs.default_frame_format = attribute_as_string(default.attribute_value());
                }
                _ => {}
            }
        }

        for value in dbc.attribute_values() {
            let name = value.attribute_name().as_str();
            match (name, value.attribute_value()) {
                (
                    CYCLE_TIME_ATTRIBUTE,
                    AttributeValuedForObjectType::MessageDefinitionAttributeValue(id, Some(v)),
                ) => {
                    if let Some(ms) = attribute_as_f64(v) {
                        attrs.cycle_times.insert(raw_id(id), ms as u64);
                    }
                }
                (
                    FRAME_FORMAT_ATTRIBUTE,
                    AttributeValuedForObjectType::MessageDefinitionAttributeValue(id, Some(v)),
                ) => {
                    if let Some(format) = attribute_as_string(v) {
                        attrs.frame_formats.insert(raw_id(id), format);
                    }
                }
                (
                    START_VALUE_ATTRIBUTE,
                    AttributeValuedForObjectType::SignalAttributeValue(id, signal, v),
                ) => {
                    if let Some(raw) = attribute_as_f64(v) {
                        attrs.start_values.insert((raw_id(id), signal.clone()), raw);
                    }
                }
                _ => {}
            }
        }

        attrs
    }
}

fn raw_id(id: &MessageId) -> u32 {
    id.0
}

fn attribute_as_f64(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::AttributeValueU64(v) => Some(*v as f64),
        AttributeValue::AttributeValueI64(v) => Some(*v as f64),
        AttributeValue::AttributeValueF64(v) => Some(*v),
        AttributeValue::AttributeValueCharString(s) => s.trim().parse().ok(),
    }
}

fn attribute_as_string(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::AttributeValueCharString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Convert a can-dbc message to our MessageLayout
fn convert_message(dbc_msg: &can_dbc::Message, attrs: &Attributes) -> Result<MessageLayout> {
    let raw = raw_id(dbc_msg.message_id());
    let is_extended = raw & EXTENDED_ID_FLAG != 0;
    let size = *dbc_msg.message_size() as usize;

    // First pass: identify multiplexer signal
    let multiplexer_signal_name = dbc_msg
        .signals()
        .iter()
        .find(|sig| {
            matches!(
                sig.multiplexer_indicator(),
                can_dbc::MultiplexIndicator::Multiplexor
                    | can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(_)
            )
        })
        .map(|sig| sig.name().to_string());

    // Second pass: convert all signals
    let mut signals = Vec::with_capacity(dbc_msg.signals().len());
    for dbc_sig in dbc_msg.signals() {
        let start_raw = attrs
            .start_values
            .get(&(raw, dbc_sig.name().to_string()))
            .copied()
            .or(attrs.default_start_value);
        signals.push(convert_signal(
            dbc_msg.message_name(),
            dbc_sig,
            multiplexer_signal_name.as_deref(),
            start_raw,
        )?);
    }

    let frame_format = attrs
        .frame_formats
        .get(&raw)
        .or(attrs.default_frame_format.as_ref());
    let is_fd = size > CLASSIC_MAX_PAYLOAD
        || frame_format.is_some_and(|f| f.to_ascii_uppercase().contains("FD"));

    Ok(MessageLayout {
        id: raw & !EXTENDED_ID_FLAG,
        name: dbc_msg.message_name().to_string(),
        size,
        is_extended,
        is_fd,
        cycle_time_ms: attrs
            .cycle_times
            .get(&raw)
            .copied()
            .or(attrs.default_cycle_time)
            .filter(|ms| *ms > 0),
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        signals,
        multiplexer_signal: multiplexer_signal_name,
    })
}

/// Convert a can-dbc signal to our SignalLayout
fn convert_signal(
    message_name: &str,
    dbc_sig: &can_dbc::Signal,
    multiplexer_signal_name: Option<&str>,
    start_raw: Option<f64>,
) -> Result<SignalLayout> {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let length = *dbc_sig.signal_size();
    if length == 0 || length > 64 {
        return Err(SchedulerError::DbcParse(format!(
            "Signal '{}' in '{}' has unsupported length {}",
            dbc_sig.name(),
            message_name,
            length
        )));
    }

    let multiplexer_info = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::MultiplexedSignal(switch_value)
        | can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(switch_value) => {
            Some(MultiplexerInfo {
                multiplexer_signal: multiplexer_signal_name
                    .ok_or_else(|| {
                        SchedulerError::DbcParse(format!(
                            "Multiplexed signal '{}' but no multiplexer found",
                            dbc_sig.name()
                        ))
                    })?
                    .to_string(),
                multiplexer_values: vec![switch_value],
            })
        }
        _ => None,
    };

    let factor = *dbc_sig.factor();
    let offset = *dbc_sig.offset();

    Ok(SignalLayout {
        name: dbc_sig.name().to_string(),
        start_bit: *dbc_sig.start_bit() as u16,
        length: length as u16,
        byte_order,
        value_type,
        factor,
        offset,
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        // GenSigStartValue is a raw value
        initial: start_raw.map(|raw| raw * factor + offset),
        multiplexer_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const STM_BUS: &str = r#"
VERSION ""

NS_ :
    NS_DESC_
    CM_
    BA_DEF_
    BA_
    VAL_
    BA_DEF_DEF_

BS_:

BU_: HMI STM

BO_ 256 WHEEL_ANGLE: 1 HMI
 SG_ Wheel_Angle : 0|8@1- (1,0) [-45|45] "deg" STM

BO_ 2147484160 SPEED_KMH: 8 HMI
 SG_ Speed_Kmh : 7|16@0+ (0.1,0) [0|250] "km/h" STM
 SG_ Gear : 16|4@1+ (1,0) [0|0] "" STM

BA_DEF_ BO_ "GenMsgCycleTime" INT 0 10000;
BA_DEF_ SG_ "GenSigStartValue" INT 0 65535;
BA_DEF_DEF_ "GenMsgCycleTime" 0;
BA_DEF_DEF_ "GenSigStartValue" 0;
BA_ "GenMsgCycleTime" BO_ 2147484160 20;
BA_ "GenSigStartValue" SG_ 2147484160 Speed_Kmh 300;
"#;

    #[test]
    fn test_parse_simple_dbc() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(STM_BUS.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let messages = parse_dbc_file(temp_file.path()).unwrap();
        assert_eq!(messages.len(), 2);

        let wheel = messages.iter().find(|m| m.name == "WHEEL_ANGLE").unwrap();
        assert_eq!(wheel.id, 0x100);
        assert_eq!(wheel.size, 1);
        assert!(!wheel.is_extended);
        assert!(!wheel.is_fd);
        assert_eq!(wheel.sender, Some("HMI".to_string()));
        // Attribute default of 0 means "not declared"
        assert_eq!(wheel.cycle_time_ms, None);

        let sig = &wheel.signals[0];
        assert_eq!(sig.name, "Wheel_Angle");
        assert_eq!(sig.start_bit, 0);
        assert_eq!(sig.length, 8);
        assert_eq!(sig.byte_order, ByteOrder::LittleEndian);
        assert_eq!(sig.value_type, ValueType::Signed);
        assert_eq!(sig.min, -45.0);
        assert_eq!(sig.max, 45.0);
        assert_eq!(sig.unit, Some("deg".to_string()));
        assert_eq!(sig.initial_value(), 0.0);
    }

    #[test]
    fn test_extended_id_and_attributes() {
        let messages = parse_dbc_str(STM_BUS, "stm_bus.dbc").unwrap();
        let speed = messages.iter().find(|m| m.name == "SPEED_KMH").unwrap();

        assert!(speed.is_extended);
        assert_eq!(speed.id, 0x200);
        assert_eq!(speed.cycle_time_ms, Some(20));

        let sig = speed.signal("Speed_Kmh").unwrap();
        assert_eq!(sig.byte_order, ByteOrder::BigEndian);
        assert!((sig.initial_value() - 30.0).abs() < 1e-9);

        // Falls back to the attribute default
        assert_eq!(speed.signal("Gear").unwrap().initial_value(), 0.0);
    }

    #[test]
    fn test_parse_multiplexed_signals() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 512 MultiplexedMsg: 8 ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ SignalA m0 : 8|16@1+ (1,0) [0|100] "%" ECU1
 SG_ SignalB m1 : 8|16@1+ (0.1,0) [0|1000] "mV" ECU1
"#;

        let messages = parse_dbc_str(dbc_content, "mux.dbc").unwrap();
        assert_eq!(messages.len(), 1);

        let msg = &messages[0];
        assert!(msg.is_multiplexed());
        assert_eq!(msg.multiplexer_signal, Some("Mode".to_string()));

        let sig_b = msg.signal("SignalB").unwrap();
        let mux = sig_b.multiplexer_info.as_ref().unwrap();
        assert_eq!(mux.multiplexer_signal, "Mode");
        assert_eq!(mux.multiplexer_values, vec![1]);
    }

    #[test]
    fn test_parse_garbage_fails() {
        let result = parse_dbc_str("this is not a dbc", "broken.dbc");
        assert!(matches!(result, Err(SchedulerError::DbcParse(_))));
    }

    #[test]
    fn test_missing_file_fails() {
        let result = parse_dbc_file(Path::new("/nonexistent/bus.dbc"));
        assert!(matches!(result, Err(SchedulerError::DbcParse(_))));
    }
}
