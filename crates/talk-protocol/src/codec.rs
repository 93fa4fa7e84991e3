//! Single-frame encode / decode.

use bytes::Bytes;
use talk_core::{Element, ElementKind};

use crate::error::{DecodeError, EncodeError};

/// Terminator byte ending every frame.
///
/// serde_json escapes control characters inside strings, so an encoded record
/// never contains a raw `0x00`.
pub const FRAME_DELIMITER: u8 = 0x00;

/// Encodes an element as a JSON record without the terminator.
///
/// Fails for a non-finite timestamp, which has no JSON number form.
pub fn encode_record(element: &Element) -> Result<Vec<u8>, EncodeError> {
    let secs = element.timestamp().as_secs_f64();
    if !secs.is_finite() {
        return Err(EncodeError::NonFiniteTimestamp(secs));
    }
    Ok(serde_json::to_vec(element)?)
}

/// Encodes an element as a complete, terminated frame.
pub fn encode(element: &Element) -> Result<Bytes, EncodeError> {
    let mut frame = encode_record(element)?;
    frame.push(FRAME_DELIMITER);
    Ok(Bytes::from(frame))
}

/// Decodes one frame, with or without its trailing terminator.
///
/// The discriminator is checked before the payload so that an unknown
/// element type is reported as such rather than as a generic parse failure.
pub fn decode(data: &[u8]) -> Result<Element, DecodeError> {
    let record = data.strip_suffix(&[FRAME_DELIMITER]).unwrap_or(data);
    let text = std::str::from_utf8(record)?;
    let value: serde_json::Value = serde_json::from_str(text)?;

    match value.get(Element::KIND_FIELD) {
        None => return Err(DecodeError::MissingKind),
        Some(serde_json::Value::String(tag)) => {
            if ElementKind::from_tag(tag).is_none() {
                return Err(DecodeError::UnknownKind(tag.clone()));
            }
        }
        Some(other) => return Err(DecodeError::UnknownKind(other.to_string())),
    }

    Ok(serde_json::from_value(value)?)
}
