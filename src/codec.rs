//! Framing and hex decoding for the motor controller wire format.
//!
//! Commands look like `:<letter><axis><hex>\r`. Multi-byte values travel as
//! hex digit pairs with the least significant byte first, so `0x12ABCD` is
//! written `CDAB12`. An odd trailing digit is the most significant nibble.

use std::fmt::Write as _;

use crate::axis::{AxisStatus, MotionState};
use crate::constants::{END_CHAR, ERROR_CHAR, START_CHAR_IN, START_CHAR_OUT};
use crate::error::{FirmwareError, Result, SyntaError};
use crate::types::{AxisId, Capabilities};

/// Maximum number of hex digits in a parameter
pub const MAX_WIDTH: usize = 6;

/// Format `value` as `width` hex digits, low byte first.
pub fn encode_parameter(value: u32, width: usize) -> Result<String> {
    if width > MAX_WIDTH {
        return Err(SyntaError::BadParameter(format!(
            "parameter width {width} exceeds {MAX_WIDTH} digits"
        )));
    }
    if (value as u64) >> (4 * width) != 0 {
        return Err(SyntaError::BadParameter(format!(
            "value {value:#X} does not fit in {width} hex digits"
        )));
    }

    let mut digits = String::with_capacity(width);
    let mut rest = value;
    for _ in 0..width / 2 {
        let _ = write!(digits, "{:02X}", rest & 0xFF);
        rest >>= 8;
    }
    if width % 2 == 1 {
        let _ = write!(digits, "{:X}", rest & 0xF);
    }
    Ok(digits)
}

/// Build a complete command frame.
pub fn encode(axis: AxisId, command: char, parameter: u32, width: usize) -> Result<String> {
    let digits = encode_parameter(parameter, width)?;
    Ok(format!(
        "{}{}{}{}{}",
        START_CHAR_OUT as char,
        command,
        axis.as_char(),
        digits,
        END_CHAR as char
    ))
}

fn hex_nibble(digit: u8) -> Result<u32> {
    (digit as char)
        .to_digit(16)
        .ok_or_else(|| SyntaError::InvalidData(format!("invalid hex digit {:?}", digit as char)))
}

/// Reassemble little-endian hex digits into an integer.
pub fn decode_hex(digits: &str) -> Result<u32> {
    let bytes = digits.as_bytes();
    if bytes.is_empty() {
        return Err(SyntaError::InvalidData("empty value".to_string()));
    }
    if bytes.len() > 8 {
        return Err(SyntaError::InvalidData(format!("value too long: {digits}")));
    }

    let mut result = 0u32;
    for (i, pair) in bytes.chunks(2).enumerate() {
        let byte = pair
            .iter()
            .try_fold(0u32, |acc, digit| Ok::<_, SyntaError>((acc << 4) | hex_nibble(*digit)?))?;
        result |= byte << (8 * i);
    }
    Ok(result)
}

/// Split a raw response into its body, turning `!` responses into errors.
///
/// The terminator may or may not still be attached.
pub fn response_body(raw: &[u8]) -> Result<&str> {
    let raw = raw.strip_suffix(&[END_CHAR]).unwrap_or(raw);
    let (marker, body) = raw
        .split_first()
        .ok_or_else(|| SyntaError::InvalidData("empty response".to_string()))?;
    let body = std::str::from_utf8(body)
        .map_err(|_| SyntaError::InvalidData(format!("non-ASCII response {raw:02X?}")))?;

    match *marker {
        START_CHAR_IN => Ok(body),
        ERROR_CHAR => Err(decode_error(body).into()),
        other => Err(SyntaError::InvalidData(format!(
            "unexpected response marker {:?}",
            other as char
        ))),
    }
}

/// Map the body of a `!` response to a firmware error.
pub fn decode_error(body: &str) -> FirmwareError {
    let code = body
        .bytes()
        .next()
        .and_then(|digit| hex_nibble(digit).ok())
        .map(|code| code as u8)
        .unwrap_or(0xF);
    FirmwareError::from_code(code)
}

/// Decode a numeric response such as `=CDAB12\r`.
pub fn decode_bcd(raw: &[u8]) -> Result<u32> {
    let body = response_body(raw)?;
    if body.is_empty() {
        return Err(SyntaError::InvalidData(
            "numeric response carries no value".to_string(),
        ));
    }
    decode_hex(body)
}

fn text_nibbles(body: &str, count: usize) -> Result<Vec<u32>> {
    if body.len() < count {
        return Err(SyntaError::InvalidData(format!(
            "expected at least {count} digits, got {body:?}"
        )));
    }
    body.bytes().take(count).map(hex_nibble).collect()
}

/// Decode the three digit body of an `f` response.
///
/// Digit 1: bit0 slew (1) / goto (0), bit1 reverse, bit2 high speed.
/// Digit 2: bit0 running. Digit 3: bit0 initialized.
pub fn decode_status(body: &str) -> Result<AxisStatus> {
    let nibbles = text_nibbles(body, 3)?;
    let (mode, run, init) = (nibbles[0], nibbles[1], nibbles[2]);

    let forward = mode & 0x2 == 0;
    let high_speed = mode & 0x4 != 0;
    let motion = if run & 0x1 == 0 {
        MotionState::Stopped
    } else if mode & 0x1 != 0 {
        MotionState::Slewing { forward, high_speed }
    } else {
        MotionState::SlewingTo { forward, high_speed }
    };

    Ok(AxisStatus::new(motion, init & 0x1 != 0))
}

/// Decode the body of a `q` capability inquiry; digit `i` fills bits `4i..4i+3`.
pub fn decode_capabilities(body: &str) -> Result<Capabilities> {
    let count = body.len().min(4);
    let bits = text_nibbles(body, count)?
        .into_iter()
        .enumerate()
        .fold(0u32, |acc, (i, nibble)| acc | (nibble << (4 * i)));
    Ok(Capabilities::from_bits_truncate(bits as u16))
}
