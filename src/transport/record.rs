//! Datagram framing helpers.

use super::TransportError;

/// Split a raw datagram into `(type_byte, body)`. A record needs the type
/// byte plus at least one body byte.
pub fn parse_record(payload: &[u8]) -> Result<(u8, &[u8]), TransportError> {
    if payload.len() < 2 {
        return Err(TransportError::RecordTooShort);
    }
    Ok((payload[0], &payload[1..]))
}

/// Split a decrypted body into `(session_id, rest)` at `session_id_len`.
pub fn split_session_id(
    payload: &[u8],
    session_id_len: usize,
) -> Result<(&[u8], &[u8]), TransportError> {
    if payload.len() < session_id_len {
        return Err(TransportError::InvalidPayloadSize);
    }
    Ok(payload.split_at(session_id_len))
}
