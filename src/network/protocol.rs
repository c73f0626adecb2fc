//! Protocol Messages
//!
//! Wire format for replicated field updates. JSON for debugging ease,
//! bincode for the loopback bus. On the wire a missing target effect is
//! `-1`; inside the crate it is `None`.

use serde::{Serialize, Deserialize};

use crate::handshake::peer::{EffectId, PeerId};
use crate::handshake::replicated::{FieldUpdate, FieldValue};

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encoding or decoding failed.
    #[error("Binary codec error: {0}")]
    Binary(#[from] bincode::Error),

    /// Current effect must be a valid index.
    #[error("Invalid current effect index {0}")]
    InvalidEffect(i32),

    /// Blend outside [0, 1] or not a number.
    #[error("Invalid blend fraction {0}")]
    InvalidBlend(f32),

    /// Effect index too large for the wire.
    #[error("Effect index {0} does not fit the wire format")]
    EffectOutOfRange(u32),
}

/// Field payload as sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireField {
    /// Current effect index
    CurrentEffect(i32),
    /// Target effect index, -1 for none
    TargetEffect(i32),
    /// Blend fraction
    BlendFraction(f32),
}

/// One replicated field update on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldMessage {
    /// Writer peer id.
    pub writer: u64,
    /// Writer's tick.
    pub tick: u64,
    /// Writer's per-field sequence number.
    pub seq: u64,
    /// Field and value.
    pub field: WireField,
}

impl TryFrom<&FieldUpdate> for FieldMessage {
    type Error = ProtocolError;

    fn try_from(update: &FieldUpdate) -> Result<Self, Self::Error> {
        let wire = |effect: EffectId| effect.try_to_wire().ok_or(ProtocolError::EffectOutOfRange(effect.0));
        let field = match update.value {
            FieldValue::CurrentEffect(effect) => WireField::CurrentEffect(wire(effect)?),
            FieldValue::TargetEffect(Some(effect)) => WireField::TargetEffect(wire(effect)?),
            FieldValue::TargetEffect(None) => WireField::TargetEffect(-1),
            FieldValue::BlendFraction(blend) => WireField::BlendFraction(blend),
        };
        Ok(Self {
            writer: update.writer.get(),
            tick: update.tick,
            seq: update.seq,
            field,
        })
    }
}

impl TryFrom<FieldMessage> for FieldUpdate {
    type Error = ProtocolError;

    fn try_from(msg: FieldMessage) -> Result<Self, Self::Error> {
        let value = match msg.field {
            WireField::CurrentEffect(raw) => {
                FieldValue::CurrentEffect(EffectId::from_wire(raw).ok_or(ProtocolError::InvalidEffect(raw))?)
            }
            WireField::TargetEffect(raw) => FieldValue::TargetEffect(EffectId::from_wire(raw)),
            WireField::BlendFraction(blend) => {
                if !(0.0..=1.0).contains(&blend) {
                    return Err(ProtocolError::InvalidBlend(blend));
                }
                FieldValue::BlendFraction(blend)
            }
        };
        Ok(FieldUpdate {
            writer: PeerId::new(msg.writer),
            tick: msg.tick,
            seq: msg.seq,
            value,
        })
    }
}

impl FieldMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Encode an update for the binary wire.
pub fn encode_update(update: &FieldUpdate) -> Result<Vec<u8>, ProtocolError> {
    FieldMessage::try_from(update)?.to_bytes()
}

/// Decode and validate an update from the binary wire.
pub fn decode_update(data: &[u8]) -> Result<FieldUpdate, ProtocolError> {
    FieldUpdate::try_from(FieldMessage::from_bytes(data)?)
}
