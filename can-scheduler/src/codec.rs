//! Signal codec
//!
//! Packs physical signal values into a frame payload and unpacks them again.
//! Handles bit placement, endianness, two's complement, multiplexing and the
//! physical <-> raw conversion (factor and offset).
//!
//! Encoding validates every value against the range its bit width can carry
//! and, unless disabled, against the `[min, max]` declared in the layout.

use crate::signals::database::{ByteOrder, MessageLayout, SignalLayout, ValueType};
use crate::types::{Result, SchedulerError};
use serde::Serialize;
use std::collections::BTreeMap;

/// Widest signal the codec packs, in bits
const MAX_SIGNAL_LENGTH: usize = 64;

/// Current physical value of every signal of one message.
///
/// The key set is fixed at construction from the message layout; `set` never
/// adds a signal the layout does not declare.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SignalValues {
    values: BTreeMap<String, f64>,
}

impl SignalValues {
    /// Build the initial values declared by a layout (0 where none is declared)
    pub fn from_layout(layout: &MessageLayout) -> Self {
        Self {
            values: layout
                .signals
                .iter()
                .map(|s| (s.name.clone(), s.initial_value()))
                .collect(),
        }
    }

    /// Current value of a signal
    pub fn get(&self, signal: &str) -> Option<f64> {
        self.values.get(signal).copied()
    }

    /// Replace the value of a declared signal, returning the previous value.
    ///
    /// Returns `None` and changes nothing if the signal is not declared.
    pub fn set(&mut self, signal: &str, value: f64) -> Option<f64> {
        self.values
            .get_mut(signal)
            .map(|slot| std::mem::replace(slot, value))
    }

    /// True if the signal is declared for this message
    pub fn contains(&self, signal: &str) -> bool {
        self.values.contains_key(signal)
    }

    /// Iterate over (signal, value) pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Number of signals
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the message declares no signals
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

/// Encode with default settings (declared ranges enforced)
pub fn encode(layout: &MessageLayout, values: &SignalValues) -> Result<Vec<u8>> {
    SignalCodec::default().encode(layout, values)
}

/// Decode with default settings
pub fn decode(layout: &MessageLayout, data: &[u8]) -> Result<SignalValues> {
    SignalCodec::default().decode(layout, data)
}

/// Signal codec - converts between physical values and frame payloads
#[derive(Debug, Clone, Copy)]
pub struct SignalCodec {
    enforce_declared_ranges: bool,
}

impl Default for SignalCodec {
    fn default() -> Self {
        Self {
            enforce_declared_ranges: true,
        }
    }
}

impl SignalCodec {
    /// Create a codec; `enforce_declared_ranges` adds the layout's `[min, max]`
    /// on top of the bit-width check
    pub fn new(enforce_declared_ranges: bool) -> Self {
        Self {
            enforce_declared_ranges,
        }
    }

    /// Encode all signal values into a payload of `layout.size` bytes
    pub fn encode(&self, layout: &MessageLayout, values: &SignalValues) -> Result<Vec<u8>> {
        let mut data = vec![0u8; layout.size];

        let mux_value = self.multiplexer_raw(layout, values)?;

        for signal in &layout.signals {
            Self::check_fits(layout, signal, data.len())?;

            // Unselected signals are still validated, only their bits stay out
            let value = values
                .get(&signal.name)
                .unwrap_or_else(|| signal.initial_value());
            let raw = self.to_raw(layout, signal, value)?;

            if !Self::is_active(signal, mux_value) {
                continue;
            }

            let start_bit = signal.start_bit as usize;
            let length = signal.length as usize;
            match signal.byte_order {
                ByteOrder::LittleEndian => Self::insert_little_endian(&mut data, start_bit, length, raw),
                ByteOrder::BigEndian => Self::insert_big_endian(&mut data, start_bit, length, raw),
            }
        }

        Ok(data)
    }

    /// Decode a payload back into physical values.
    ///
    /// Signals not selected by the current multiplexer value keep their
    /// initial value.
    pub fn decode(&self, layout: &MessageLayout, data: &[u8]) -> Result<SignalValues> {
        let mut values = SignalValues::from_layout(layout);

        let mut mux_value = None;
        if let Some(mux_name) = &layout.multiplexer_signal {
            if let Some(mux_signal) = layout.signal(mux_name) {
                let raw = Self::extract_signal_value(layout, data, mux_signal)?;
                mux_value = Some(raw as u64);
            }
        }

        for signal in &layout.signals {
            if !Self::is_active(signal, mux_value) {
                continue;
            }
            let raw = Self::extract_signal_value(layout, data, signal)?;
            let physical = signal.offset + signal.factor * (raw as f64);
            values.set(&signal.name, physical);
        }

        Ok(values)
    }

    /// Physical range representable by a signal's bit width, ordered low to high
    pub fn representable_range(signal: &SignalLayout) -> (f64, f64) {
        let (raw_min, raw_max) = Self::raw_range(signal);
        let a = signal.offset + signal.factor * raw_min as f64;
        let b = signal.offset + signal.factor * raw_max as f64;
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Raw multiplexer value derived from the current multiplexor signal value
    fn multiplexer_raw(&self, layout: &MessageLayout, values: &SignalValues) -> Result<Option<u64>> {
        let Some(mux_name) = &layout.multiplexer_signal else {
            return Ok(None);
        };
        let Some(mux_signal) = layout.signal(mux_name) else {
            return Ok(None);
        };
        Self::check_fits(layout, mux_signal, layout.size)?;
        let value = values
            .get(mux_name)
            .unwrap_or_else(|| mux_signal.initial_value());
        let raw = self.to_raw(layout, mux_signal, value)?;
        Ok(Some(raw as u64))
    }

    fn is_active(signal: &SignalLayout, mux_value: Option<u64>) -> bool {
        match (&signal.multiplexer_info, mux_value) {
            (None, _) => true,
            (Some(info), Some(current)) => info.multiplexer_values.contains(&current),
            (Some(_), None) => false,
        }
    }

    /// Convert a physical value to its raw integer, validating the range
    fn to_raw(&self, layout: &MessageLayout, signal: &SignalLayout, value: f64) -> Result<i128> {
        let out_of_range = || SchedulerError::Encoding {
            message: layout.name.clone(),
            signal: signal.name.clone(),
            value,
        };

        if !value.is_finite() || signal.factor == 0.0 || !signal.factor.is_finite() {
            return Err(out_of_range());
        }

        if self.enforce_declared_ranges
            && signal.has_declared_range()
            && (value < signal.min || value > signal.max)
        {
            return Err(out_of_range());
        }

        let raw = ((value - signal.offset) / signal.factor).round();

        // Bounds are powers of two, exact as f64 even for 64-bit fields
        let (raw_min, raw_max) = Self::raw_range(signal);
        if raw < raw_min as f64 || raw >= (raw_max + 1) as f64 {
            return Err(out_of_range());
        }

        Ok(raw as i128)
    }

    /// Raw integer range of a signal's bit width.
    ///
    /// Lengths outside 1..=64 are rejected by `check_fits`; they are clamped
    /// here so the range stays computable.
    fn raw_range(signal: &SignalLayout) -> (i128, i128) {
        let length = u32::from(signal.length).clamp(1, MAX_SIGNAL_LENGTH as u32);
        match signal.value_type {
            ValueType::Unsigned => (0, (1i128 << length) - 1),
            ValueType::Signed => (-(1i128 << (length - 1)), (1i128 << (length - 1)) - 1),
        }
    }

    /// Signal length must be 1..=64 bits and the highest bit index it touches
    /// must lie inside the payload
    fn check_fits(layout: &MessageLayout, signal: &SignalLayout, len: usize) -> Result<()> {
        if signal.length == 0 || signal.length as usize > MAX_SIGNAL_LENGTH {
            return Err(SchedulerError::InvalidData(format!(
                "Signal '{}' in '{}' has unsupported length {} bits",
                signal.name, layout.name, signal.length
            )));
        }

        let required_bytes = Self::required_bytes(signal);
        if required_bytes > len {
            return Err(SchedulerError::InvalidData(format!(
                "Signal '{}' in '{}' requires {} bytes but payload only has {} bytes",
                signal.name, layout.name, required_bytes, len
            )));
        }
        Ok(())
    }

    fn required_bytes(signal: &SignalLayout) -> usize {
        let start_bit = signal.start_bit as usize;
        let length = signal.length as usize;
        match signal.byte_order {
            ByteOrder::LittleEndian => (start_bit + length + 7) / 8,
            ByteOrder::BigEndian => {
                // Walk the sawtooth from the MSB to find the LSB position
                let msb_byte = start_bit / 8;
                let bits_in_first = start_bit % 8 + 1;
                if length <= bits_in_first {
                    msb_byte + 1
                } else {
                    msb_byte + 1 + (length - bits_in_first + 7) / 8
                }
            }
        }
    }

    /// Insert signal bits with little-endian (Intel) byte order
    ///
    /// The start bit is the LSB; bit `n` of the payload is bit `n % 8` of byte `n / 8`.
    fn insert_little_endian(data: &mut [u8], start_bit: usize, length: usize, raw: i128) {
        let bits = raw as u128;
        for i in 0..length {
            let bit_pos = start_bit + i;
            let bit_value = ((bits >> i) & 0x01) as u8;
            data[bit_pos / 8] |= bit_value << (bit_pos % 8);
        }
    }

    /// Insert signal bits with big-endian (Motorola) byte order
    ///
    /// The start bit is the MSB. Within a byte the position walks down towards
    /// bit 0, then continues at bit 7 of the next byte.
    fn insert_big_endian(data: &mut [u8], start_bit: usize, length: usize, raw: i128) {
        let bits = raw as u128;
        let mut bit_pos = start_bit;
        for i in 0..length {
            let bit_value = ((bits >> (length - 1 - i)) & 0x01) as u8;
            data[bit_pos / 8] |= bit_value << (bit_pos % 8);
            bit_pos = Self::next_motorola_bit(bit_pos);
        }
    }

    fn next_motorola_bit(bit_pos: usize) -> usize {
        if bit_pos % 8 == 0 {
            bit_pos + 15
        } else {
            bit_pos - 1
        }
    }

    /// Extract the raw signal value from frame data
    fn extract_signal_value(layout: &MessageLayout, data: &[u8], signal: &SignalLayout) -> Result<i128> {
        Self::check_fits(layout, signal, data.len())?;

        let start_bit = signal.start_bit as usize;
        let length = signal.length as usize;

        let raw_value = match signal.byte_order {
            ByteOrder::LittleEndian => Self::extract_little_endian(data, start_bit, length),
            ByteOrder::BigEndian => Self::extract_big_endian(data, start_bit, length),
        };

        Ok(match signal.value_type {
            ValueType::Unsigned => i128::from(raw_value),
            ValueType::Signed => i128::from(Self::sign_extend(raw_value, length)),
        })
    }

    fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;

        for i in 0..length {
            let bit_pos = start_bit + i;
            let bit_value = (data[bit_pos / 8] >> (bit_pos % 8)) & 0x01;
            result |= (bit_value as u64) << i;
        }

        result
    }

    fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;
        let mut bit_pos = start_bit;

        for i in 0..length {
            let bit_value = (data[bit_pos / 8] >> (bit_pos % 8)) & 0x01;
            result |= (bit_value as u64) << (length - 1 - i);
            bit_pos = Self::next_motorola_bit(bit_pos);
        }

        result
    }

    /// Sign-extend a value from N bits to 64 bits
    fn sign_extend(value: u64, bit_length: usize) -> i64 {
        if bit_length >= 64 {
            return value as i64;
        }

        let sign_bit = 1u64 << (bit_length - 1);
        if (value & sign_bit) != 0 {
            let mask = !0u64 << bit_length;
            (value | mask) as i64
        } else {
            value as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::database::tests::wheel_angle_layout;
    use crate::signals::database::MultiplexerInfo;

    fn signal(name: &str, start_bit: u16, length: u16, byte_order: ByteOrder, value_type: ValueType) -> SignalLayout {
        SignalLayout {
            name: name.to_string(),
            start_bit,
            length,
            byte_order,
            value_type,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: None,
            initial: None,
            multiplexer_info: None,
        }
    }

    fn layout(size: usize, signals: Vec<SignalLayout>) -> MessageLayout {
        MessageLayout {
            id: 0x321,
            name: "TEST_MSG".to_string(),
            size,
            is_extended: false,
            is_fd: false,
            cycle_time_ms: None,
            sender: None,
            signals,
            multiplexer_signal: None,
        }
    }

    #[test]
    fn test_extract_little_endian_cross_byte() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(SignalCodec::extract_little_endian(&data, 0, 8), 0xAB);
        assert_eq!(SignalCodec::extract_little_endian(&data, 0, 16), 0xCDAB);
    }

    #[test]
    fn test_extract_big_endian() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(SignalCodec::extract_big_endian(&data, 7, 8), 0xAB);
        assert_eq!(SignalCodec::extract_big_endian(&data, 7, 16), 0xABCD);
        // MSB at bit 3 of byte 0, continuing into the top of byte 1
        assert_eq!(SignalCodec::extract_big_endian(&data, 3, 8), 0xBC);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(SignalCodec::sign_extend(0x7F, 8), 127);
        assert_eq!(SignalCodec::sign_extend(0xFF, 8), -1);
        assert_eq!(SignalCodec::sign_extend(0x8000, 16), -32768);
    }

    #[test]
    fn test_encode_wheel_angle() {
        let layout = wheel_angle_layout();
        let mut values = SignalValues::from_layout(&layout);

        assert_eq!(encode(&layout, &values).unwrap(), vec![0x00]);

        values.set("Wheel_Angle", 30.0);
        assert_eq!(encode(&layout, &values).unwrap(), vec![30]);

        values.set("Wheel_Angle", -30.0);
        assert_eq!(encode(&layout, &values).unwrap(), vec![0xE2]);
    }

    #[test]
    fn test_declared_range_enforced() {
        let layout = wheel_angle_layout();
        let mut values = SignalValues::from_layout(&layout);
        values.set("Wheel_Angle", 46.0);

        match encode(&layout, &values) {
            Err(SchedulerError::Encoding { message, signal, value }) => {
                assert_eq!(message, "WHEEL_ANGLE");
                assert_eq!(signal, "Wheel_Angle");
                assert_eq!(value, 46.0);
            }
            other => panic!("expected encoding error, got {:?}", other),
        }

        // Still fits the 8-bit field once declared ranges are ignored
        let lenient = SignalCodec::new(false);
        assert_eq!(lenient.encode(&layout, &values).unwrap(), vec![46]);
    }

    #[test]
    fn test_bit_width_range_enforced() {
        let layout = layout(1, vec![signal("Counter", 0, 4, ByteOrder::LittleEndian, ValueType::Unsigned)]);
        let mut values = SignalValues::from_layout(&layout);

        values.set("Counter", 15.0);
        assert_eq!(encode(&layout, &values).unwrap(), vec![0x0F]);

        values.set("Counter", 16.0);
        assert!(matches!(encode(&layout, &values), Err(SchedulerError::Encoding { .. })));

        values.set("Counter", -1.0);
        assert!(matches!(encode(&layout, &values), Err(SchedulerError::Encoding { .. })));

        values.set("Counter", f64::NAN);
        assert!(matches!(encode(&layout, &values), Err(SchedulerError::Encoding { .. })));
    }

    #[test]
    fn test_big_endian_encode() {
        let mut speed = signal("Speed", 7, 16, ByteOrder::BigEndian, ValueType::Unsigned);
        speed.factor = 0.5;
        let layout = layout(2, vec![speed]);
        let mut values = SignalValues::from_layout(&layout);

        values.set("Speed", 0x1234 as f64 * 0.5);
        assert_eq!(encode(&layout, &values).unwrap(), vec![0x12, 0x34]);
    }

    #[test]
    fn test_round_trip_mixed_layout() {
        let mut temp = signal("Temp", 8, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        temp.offset = -40.0;
        let mut torque = signal("Torque", 23, 12, ByteOrder::BigEndian, ValueType::Signed);
        torque.factor = 0.25;
        let layout = layout(
            4,
            vec![
                signal("Flag", 0, 1, ByteOrder::LittleEndian, ValueType::Unsigned),
                temp,
                torque,
            ],
        );

        let mut values = SignalValues::from_layout(&layout);
        values.set("Flag", 1.0);
        values.set("Temp", -12.0);
        values.set("Torque", -100.75);

        let data = encode(&layout, &values).unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(decode(&layout, &data).unwrap(), values);
    }

    #[test]
    fn test_representable_range() {
        let mut sig = signal("S", 0, 8, ByteOrder::LittleEndian, ValueType::Signed);
        assert_eq!(SignalCodec::representable_range(&sig), (-128.0, 127.0));

        sig.factor = -0.5;
        sig.value_type = ValueType::Unsigned;
        assert_eq!(SignalCodec::representable_range(&sig), (-127.5, 0.0));
    }

    #[test]
    fn test_signal_outside_payload() {
        let layout = layout(1, vec![signal("Wide", 4, 8, ByteOrder::LittleEndian, ValueType::Unsigned)]);
        let values = SignalValues::from_layout(&layout);
        assert!(matches!(encode(&layout, &values), Err(SchedulerError::InvalidData(_))));
        assert!(matches!(decode(&layout, &[0x00]), Err(SchedulerError::InvalidData(_))));
    }

    #[test]
    fn test_multiplexed_encode() {
        let mux = signal("Mode", 0, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        let mut sig_a = signal("SignalA", 8, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        sig_a.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".to_string(),
            multiplexer_values: vec![0],
        });
        let mut sig_b = signal("SignalB", 8, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        sig_b.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".to_string(),
            multiplexer_values: vec![1],
        });
        let mut layout = layout(2, vec![mux, sig_a, sig_b]);
        layout.multiplexer_signal = Some("Mode".to_string());

        let mut values = SignalValues::from_layout(&layout);
        values.set("SignalA", 0x11 as f64);
        values.set("SignalB", 0x22 as f64);
        assert_eq!(encode(&layout, &values).unwrap(), vec![0x00, 0x11]);

        values.set("Mode", 1.0);
        let data = encode(&layout, &values).unwrap();
        assert_eq!(data, vec![0x01, 0x22]);

        let decoded = decode(&layout, &data).unwrap();
        assert_eq!(decoded.get("SignalB"), Some(0x22 as f64));
        // Not selected by mode 1, so left at its initial value
        assert_eq!(decoded.get("SignalA"), Some(0.0));
    }

    #[test]
    fn test_bit_width_boundaries_round_trip() {
        let cases = [
            // (length, value type, lowest, highest exact f64, first rejected above, first rejected below)
            (8, ValueType::Signed, -128.0, 127.0, 128.0, -129.0),
            (64, ValueType::Unsigned, 0.0, 18446744073709549568.0, 18446744073709551616.0, -1.0),
            (64, ValueType::Signed, -9223372036854775808.0, 9223372036854774784.0, 9223372036854775808.0, -9223372036854777856.0),
        ];

        for (length, value_type, lowest, highest, above, below) in cases {
            let layout = layout(8, vec![signal("Big", 0, length, ByteOrder::LittleEndian, value_type)]);
            let mut values = SignalValues::from_layout(&layout);

            for value in [lowest, highest] {
                values.set("Big", value);
                let data = encode(&layout, &values).unwrap();
                assert_eq!(decode(&layout, &data).unwrap().get("Big"), Some(value), "{} bits", length);
            }

            for value in [above, below] {
                values.set("Big", value);
                assert!(
                    matches!(encode(&layout, &values), Err(SchedulerError::Encoding { .. })),
                    "{} accepted for {} bits",
                    value,
                    length
                );
            }
        }
    }

    #[test]
    fn test_unsigned_64_bit_high_values_decode_positive() {
        let layout = layout(8, vec![signal("Big", 0, 64, ByteOrder::LittleEndian, ValueType::Unsigned)]);
        let mut values = SignalValues::from_layout(&layout);
        values.set("Big", 9.3e18);

        let data = encode(&layout, &values).unwrap();
        assert_eq!(decode(&layout, &data).unwrap().get("Big"), Some(9.3e18));

        // 2^64 - 1 rounds up to 2^64 as f64, one past the field
        values.set("Big", 18446744073709551615.0);
        assert!(matches!(encode(&layout, &values), Err(SchedulerError::Encoding { .. })));
    }

    #[test]
    fn test_unsupported_signal_length() {
        for length in [0, 65, 200] {
            let layout = layout(32, vec![signal("Odd", 0, length, ByteOrder::LittleEndian, ValueType::Signed)]);
            let values = SignalValues::from_layout(&layout);

            assert!(matches!(encode(&layout, &values), Err(SchedulerError::InvalidData(_))));
            assert!(matches!(decode(&layout, &[0u8; 32]), Err(SchedulerError::InvalidData(_))));
            // Still computable for display purposes
            let (low, high) = SignalCodec::representable_range(&layout.signals[0]);
            assert!(low < high);
        }
    }

    #[test]
    fn test_unselected_multiplexed_signal_is_validated() {
        let mux = signal("Mode", 0, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        let mut sig_b = signal("SignalB", 8, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        sig_b.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".to_string(),
            multiplexer_values: vec![1],
        });
        let mut layout = layout(2, vec![mux, sig_b]);
        layout.multiplexer_signal = Some("Mode".to_string());

        let mut values = SignalValues::from_layout(&layout);
        values.set("SignalB", 100000.0);
        match encode(&layout, &values) {
            Err(SchedulerError::Encoding { signal, value, .. }) => {
                assert_eq!(signal, "SignalB");
                assert_eq!(value, 100000.0);
            }
            other => panic!("expected encoding error, got {:?}", other),
        }
    }

    #[test]
    fn test_signal_values_closed_key_set() {
        let layout = wheel_angle_layout();
        let mut values = SignalValues::from_layout(&layout);

        assert_eq!(values.len(), 1);
        assert!(values.contains("Wheel_Angle"));
        assert_eq!(values.set("Wheel_Speed", 1.0), None);
        assert!(!values.contains("Wheel_Speed"));
        assert_eq!(values.set("Wheel_Angle", 5.0), Some(0.0));
        assert_eq!(values.iter().collect::<Vec<_>>(), vec![("Wheel_Angle", 5.0)]);
    }
}
