//! Primitive wire encodings shared by every packet codec: variable-length
//! integers, length-prefixed UTF-8 strings and binary blobs, and
//! width-parameterized packet identifiers.

use crate::error::{MqttError, Result};
use crate::packet_id::IdWidth;
use bytes::{Buf, BufMut, Bytes};

/// Largest value a 4-byte variable-length integer can carry.
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Encodes a variable-length integer (1-4 bytes, little-endian base 128).
/// Always emits the minimum-length form.
pub fn encode_variable_int<B: BufMut>(buf: &mut B, mut value: u32) -> Result<()> {
    if value > MAX_REMAINING_LENGTH {
        return Err(MqttError::MalformedPacket(format!(
            "Variable integer {value} exceeds maximum {MAX_REMAINING_LENGTH}"
        )));
    }

    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Decodes a variable-length integer, rejecting a fourth continuation byte.
pub fn decode_variable_int<B: Buf>(buf: &mut B) -> Result<u32> {
    let mut value: u32 = 0;
    let mut multiplier: u32 = 1;

    for _ in 0..4 {
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "Truncated variable integer".to_string(),
            ));
        }
        let byte = buf.get_u8();
        value += u32::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }

    Err(MqttError::MalformedPacket(
        "Variable integer continuation past 4 bytes".to_string(),
    ))
}

/// Number of bytes `encode_variable_int` emits for `value`.
#[must_use]
pub fn variable_int_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

fn is_forbidden_char(c: char) -> bool {
    // MQTT 1.5.4: U+0000 and the C0/C1 control ranges must not appear.
    c == '\u{0000}' || ('\u{0001}'..='\u{001F}').contains(&c) || ('\u{007F}'..='\u{009F}').contains(&c)
}

/// Encodes a UTF-8 string with a 2-byte big-endian length prefix.
pub fn encode_string<B: BufMut>(buf: &mut B, s: &str) -> Result<()> {
    if s.len() > usize::from(u16::MAX) {
        return Err(MqttError::StringTooLong(s.len()));
    }
    if s.chars().any(is_forbidden_char) {
        return Err(MqttError::MalformedPacket(
            "String contains forbidden control characters".to_string(),
        ));
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Decodes a length-prefixed UTF-8 string, validating the byte content.
pub fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(
            "Truncated string length".to_string(),
        ));
    }
    let len = usize::from(buf.get_u16());
    if buf.remaining() < len {
        return Err(MqttError::MalformedPacket(format!(
            "String length {len} exceeds remaining {}",
            buf.remaining()
        )));
    }

    let raw = buf.copy_to_bytes(len);
    let s = std::str::from_utf8(&raw)
        .map_err(|_| MqttError::MalformedPacket("Invalid UTF-8 in string".to_string()))?;
    if s.chars().any(is_forbidden_char) {
        return Err(MqttError::MalformedPacket(
            "String contains forbidden control characters".to_string(),
        ));
    }
    Ok(s.to_string())
}

/// Byte length of an encoded string (prefix included).
#[must_use]
pub fn string_len(s: &str) -> usize {
    2 + s.len()
}

/// Encodes binary data with a 2-byte big-endian length prefix. Content is
/// opaque, no validation.
pub fn encode_binary<B: BufMut>(buf: &mut B, data: &[u8]) -> Result<()> {
    if data.len() > usize::from(u16::MAX) {
        return Err(MqttError::StringTooLong(data.len()));
    }
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Decodes a length-prefixed binary blob.
pub fn decode_binary<B: Buf>(buf: &mut B) -> Result<Bytes> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(
            "Truncated binary length".to_string(),
        ));
    }
    let len = usize::from(buf.get_u16());
    if buf.remaining() < len {
        return Err(MqttError::MalformedPacket(format!(
            "Binary length {len} exceeds remaining {}",
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Byte length of an encoded binary blob (prefix included).
#[must_use]
pub fn binary_len(data: &[u8]) -> usize {
    2 + data.len()
}

/// Encodes a packet identifier at the instantiated width.
pub fn encode_packet_id<B: BufMut>(buf: &mut B, id: u32, width: IdWidth) -> Result<()> {
    if id == 0 || id > width.max_id() {
        return Err(MqttError::MalformedPacket(format!(
            "Packet id {id} out of range for {width:?}"
        )));
    }
    match width {
        IdWidth::Standard => buf.put_u16(id as u16),
        IdWidth::Extended => buf.put_u32(id),
    }
    Ok(())
}

/// Decodes a packet identifier at the instantiated width. Zero is rejected.
pub fn decode_packet_id<B: Buf>(buf: &mut B, width: IdWidth) -> Result<u32> {
    if buf.remaining() < width.bytes() {
        return Err(MqttError::MalformedPacket(
            "Truncated packet identifier".to_string(),
        ));
    }
    let id = match width {
        IdWidth::Standard => u32::from(buf.get_u16()),
        IdWidth::Extended => buf.get_u32(),
    };
    if id == 0 {
        return Err(MqttError::MalformedPacket(
            "Packet identifier must not be zero".to_string(),
        ));
    }
    Ok(id)
}
