use serde::Serialize;

use super::TufError;

/// Encode a value the way it is signed: JSON with every object's keys
///  sorted and no insignificant whitespace.
///
/// Going through `serde_json::Value` sorts keys, since its map type is
///  ordered when `preserve_order` is off. Signatures are always computed and
///  checked over this form, never over the bytes a client happened to send.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, TufError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}
