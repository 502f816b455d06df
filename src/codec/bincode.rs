//! Binary codec backed by bincode.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Action, CodecError, GameCodec, GameState, Handshake, Ping, Pong, WireCodec};

/// Bincode implementation of [`WireCodec`] and [`GameCodec`].
#[derive(Clone, Copy, Default)]
pub struct BincodeCodec;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    ::bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ::bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

impl WireCodec for BincodeCodec {
    fn marshal_handshake(&self, record: &Handshake) -> Result<Vec<u8>, CodecError> {
        encode(record)
    }

    fn unmarshal_handshake(&self, bytes: &[u8]) -> Result<Handshake, CodecError> {
        decode(bytes)
    }

    fn marshal_ping(&self, record: &Ping) -> Result<Vec<u8>, CodecError> {
        encode(record)
    }

    fn unmarshal_ping(&self, bytes: &[u8]) -> Result<Ping, CodecError> {
        decode(bytes)
    }

    fn marshal_pong(&self, record: &Pong) -> Result<Vec<u8>, CodecError> {
        encode(record)
    }

    fn unmarshal_pong(&self, bytes: &[u8]) -> Result<Pong, CodecError> {
        decode(bytes)
    }
}

impl GameCodec for BincodeCodec {
    fn marshal_game_state(&self, state: &GameState) -> Result<Vec<u8>, CodecError> {
        encode(state)
    }

    fn unmarshal_game_state(&self, bytes: &[u8]) -> Result<GameState, CodecError> {
        decode(bytes)
    }

    fn marshal_action(&self, action: &Action) -> Result<Vec<u8>, CodecError> {
        encode(action)
    }

    fn unmarshal_action(&self, bytes: &[u8]) -> Result<Action, CodecError> {
        decode(bytes)
    }
}
