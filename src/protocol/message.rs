//! Typed message union and boundary decoding.
//!
//! # Format
//!
//! ```json
//! { "apiType": "state-sync", "respData": { ... } }
//! { "apiType": "fields-valt-changed", "data": { ... } }
//! ```
//!
//! Background-originated messages carry `respData`; page-originated ones
//! carry `data`. Decoding happens once at the boundary, after which handlers
//! match on [`Message`] variants.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::background::AggregatedState;
use crate::error::{Error, Result};

use super::api::ApiType;
use super::position::{
    EraseRequest, FieldFound, FrameCommand, HeightUpdate, Identify, PositionMessage,
    SelectorBoxData,
};
use super::state::{LeechState, StateSlice, ValtState, VaultItem};

// ============================================================================
// Message
// ============================================================================

/// Every application message, tagged by `apiType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "apiType")]
pub enum Message {
    /// Full aggregated state for the trusted UI.
    #[serde(rename = "state-init")]
    StateInit {
        /// The snapshot.
        #[serde(rename = "respData")]
        resp_data: Box<AggregatedState>,
    },

    /// Hostname-scoped slice for top/field peers.
    #[serde(rename = "state-sync")]
    StateSync {
        /// The slice.
        #[serde(rename = "respData")]
        resp_data: StateSlice,
    },

    /// Overlay state for the active tab.
    #[serde(rename = "leech-state")]
    LeechState {
        /// The overlay state.
        #[serde(rename = "respData")]
        resp_data: LeechState,
    },

    /// Top-frame handshake.
    #[serde(rename = "identify")]
    Identify {
        /// Handshake payload.
        data: Identify,
    },

    /// Fill the login fields with an item.
    #[serde(rename = "fill-fields")]
    FillFields {
        /// Credential to fill.
        #[serde(rename = "respData")]
        resp_data: VaultItem,
    },

    /// Field-pair values changed.
    #[serde(rename = "fields-valt-changed")]
    FieldsValtChanged {
        /// Value snapshot.
        data: ValtState,
    },

    /// Value snapshot forwarded to top/leech peers.
    #[serde(rename = "valt-changed-notify")]
    ValtChangedNotify {
        /// Value snapshot.
        #[serde(rename = "respData")]
        resp_data: ValtState,
    },

    /// Login form discovered.
    #[serde(rename = "field-found")]
    FieldFound {
        /// Discovery notice.
        data: FieldFound,
    },

    /// Draw the overlay.
    #[serde(rename = "selector-draw")]
    SelectorDraw {
        /// Geometry and size.
        data: SelectorBoxData,
    },

    /// Toggle the overlay.
    #[serde(rename = "selector-toggle")]
    SelectorToggle {
        /// Geometry and size.
        data: SelectorBoxData,
    },

    /// Erase the overlay unless pinned.
    #[serde(rename = "selector-erase")]
    SelectorErase {
        /// Erase details.
        #[serde(default)]
        data: EraseRequest,
    },

    /// Erase the overlay unconditionally.
    #[serde(rename = "selector-erase-force")]
    SelectorEraseForce {
        /// Erase details.
        #[serde(default)]
        data: EraseRequest,
    },

    /// Value snapshot for the overlay.
    #[serde(rename = "selector-up-valt")]
    SelectorUpValt {
        /// Value snapshot.
        data: ValtState,
    },

    /// Draw or resize the overlay.
    #[serde(rename = "selector-up-draw")]
    SelectorUpDraw {
        /// Geometry and size.
        data: SelectorBoxData,
    },

    /// Overlay height/pin update.
    #[serde(rename = "selector-up-height")]
    SelectorUpHeight {
        /// New height and pin flag.
        data: HeightUpdate,
    },
}

impl Message {
    /// Returns the discriminator.
    #[must_use]
    pub const fn api_type(&self) -> ApiType {
        match self {
            Self::StateInit { .. } => ApiType::StateInit,
            Self::StateSync { .. } => ApiType::StateSync,
            Self::LeechState { .. } => ApiType::LeechState,
            Self::Identify { .. } => ApiType::Identify,
            Self::FillFields { .. } => ApiType::FillFields,
            Self::FieldsValtChanged { .. } => ApiType::FieldsValtChanged,
            Self::ValtChangedNotify { .. } => ApiType::ValtChangedNotify,
            Self::FieldFound { .. } => ApiType::FieldFound,
            Self::SelectorDraw { .. } => ApiType::SelectorDraw,
            Self::SelectorToggle { .. } => ApiType::SelectorToggle,
            Self::SelectorErase { .. } => ApiType::SelectorErase,
            Self::SelectorEraseForce { .. } => ApiType::SelectorEraseForce,
            Self::SelectorUpValt { .. } => ApiType::SelectorUpValt,
            Self::SelectorUpDraw { .. } => ApiType::SelectorUpDraw,
            Self::SelectorUpHeight { .. } => ApiType::SelectorUpHeight,
        }
    }

    /// Creates a state-sync message.
    #[inline]
    #[must_use]
    pub fn state_sync(slice: StateSlice) -> Self {
        Self::StateSync { resp_data: slice }
    }

    /// Creates an erase message.
    #[must_use]
    pub fn erase(force: bool, from: impl Into<String>) -> Self {
        let data = EraseRequest {
            force,
            from: Some(from.into()),
        };
        if force {
            Self::SelectorEraseForce { data }
        } else {
            Self::SelectorErase { data }
        }
    }

    /// Decodes a message at a context boundary.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the value has no string `apiType`
    /// - [`Error::UnknownApiType`] if `apiType` is not in the known set
    /// - [`Error::MalformedMessage`] if the payload does not decode
    pub fn decode(value: Value) -> Result<Self> {
        let api_type = value
            .get("apiType")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("message has no apiType"))?;

        let Some(api) = ApiType::parse(api_type) else {
            return Err(Error::unknown_api_type(api_type));
        };

        serde_json::from_value(value).map_err(|e| Error::malformed(api.as_str(), e.to_string()))
    }

    /// Encodes the message to its wire value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ============================================================================
// FrameMessage
// ============================================================================

/// Anything a document may receive through `window.postMessage`.
///
/// Host pages post arbitrary data on the same channel, so decoding is
/// lenient: unrecognized values are ignored rather than reported.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameMessage {
    /// Application message.
    Api(Message),
    /// Position report from a field frame.
    Position(PositionMessage),
    /// Viewport relay from the top frame.
    Command(FrameCommand),
}

impl FrameMessage {
    /// Decodes a posted value, returning `None` for foreign traffic.
    #[must_use]
    pub fn decode(value: Value) -> Option<Self> {
        if value.get("apiType").is_some() {
            return match Message::decode(value) {
                Ok(message) => Some(Self::Api(message)),
                Err(e) => {
                    trace!(error = %e, "Ignoring undecodable frame message");
                    None
                }
            };
        }

        if value.get("posterId").is_some() {
            return serde_json::from_value(value).ok().map(Self::Position);
        }

        if value.get("token").is_some() && value.get("command").is_some() {
            return serde_json::from_value(value).ok().map(Self::Command);
        }

        None
    }

    /// Encodes the message to its posted value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<Value> {
        match self {
            Self::Api(message) => message.encode(),
            Self::Position(position) => Ok(serde_json::to_value(position)?),
            Self::Command(command) => Ok(serde_json::to_value(command)?),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::ActiveField;

    #[test]
    fn test_state_sync_wire() {
        let message = Message::state_sync(StateSlice::locked());
        let value = message.encode().expect("encode");
        assert_eq!(value["apiType"], "state-sync");
        assert_eq!(value["respData"]["isUnlocked"], false);
        assert_eq!(value["respData"]["matchedNum"], 0);
    }

    #[test]
    fn test_decode_valt_changed() {
        let value = json!({
            "apiType": "fields-valt-changed",
            "data": {
                "activedField": "password",
                "hostname": "example.com",
                "username": "alice",
                "password": "pw"
            }
        });

        let message = Message::decode(value).expect("decode");
        let Message::FieldsValtChanged { data } = message else {
            panic!("unexpected variant");
        };
        assert_eq!(data.actived_field, ActiveField::Password);
        assert_eq!(data.username, "alice");
    }

    #[test]
    fn test_decode_unknown_api_type() {
        let err = Message::decode(json!({ "apiType": "bogus", "data": {} })).unwrap_err();
        assert!(matches!(err, Error::UnknownApiType { .. }));
        assert!(err.is_protocol_fault());
    }

    #[test]
    fn test_decode_missing_api_type() {
        let err = Message::decode(json!({ "hostname": "example.com" })).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_decode_malformed_payload() {
        let err = Message::decode(json!({ "apiType": "fill-fields", "respData": 3 })).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn test_erase_default_payload() {
        let message = Message::decode(json!({ "apiType": "selector-erase" })).expect("decode");
        assert_eq!(message.api_type(), ApiType::SelectorErase);
    }

    #[test]
    fn test_erase_constructor_picks_variant() {
        assert_eq!(
            Message::erase(true, "test").api_type(),
            ApiType::SelectorEraseForce
        );
        assert_eq!(Message::erase(false, "test").api_type(), ApiType::SelectorErase);
    }

    #[test]
    fn test_frame_message_decode_variants() {
        let command = json!({
            "token": "__bpfield_a",
            "command": "resize",
            "from": "BPTopCtx_b"
        });
        assert!(matches!(
            FrameMessage::decode(command),
            Some(FrameMessage::Command(_))
        ));

        let api = json!({ "apiType": "selector-erase-force", "data": { "force": true } });
        assert!(matches!(FrameMessage::decode(api), Some(FrameMessage::Api(_))));

        assert_eq!(FrameMessage::decode(json!({ "foo": 1 })), None);
        assert_eq!(FrameMessage::decode(json!("page noise")), None);
    }
}
