//! HMR wire protocol shared by the dev server and the client runtime.
//!
//! Frames are JSON text objects discriminated by a `type` field:
//!
//! ```text
//! server -> client   {"type":"update","url":"/src/app.js"}
//! server -> client   {"type":"reload"}
//! client -> server   {"type":"hotAccept","id":"/src/app.js"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HmrMessage {
    /// A module changed on disk
    Update { url: String },

    /// Force a full reload
    Reload,

    /// A running module instance called `accept()`
    HotAccept { id: String },

    /// Any `type` this side does not understand
    #[serde(other, skip_serializing)]
    Unknown,
}

impl HmrMessage {
    pub fn update(url: impl Into<String>) -> Self {
        HmrMessage::Update { url: url.into() }
    }

    pub fn hot_accept(id: impl Into<String>) -> Self {
        HmrMessage::HotAccept { id: id.into() }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HmrMessage::Update { .. } => "update",
            HmrMessage::Reload => "reload",
            HmrMessage::HotAccept { .. } => "hotAccept",
            HmrMessage::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            HmrMessage::update("/a.js").to_json().unwrap(),
            r#"{"type":"update","url":"/a.js"}"#
        );
        assert_eq!(HmrMessage::Reload.to_json().unwrap(), r#"{"type":"reload"}"#);
        assert_eq!(
            HmrMessage::hot_accept("/a.js").to_json().unwrap(),
            r#"{"type":"hotAccept","id":"/a.js"}"#
        );
    }

    #[test]
    fn test_parse_inbound() {
        let msg = HmrMessage::from_json(r#"{"type":"hotAccept","id":"/b.js"}"#).unwrap();
        assert_eq!(msg, HmrMessage::hot_accept("/b.js"));

        let msg = HmrMessage::from_json(r#"{"url":"/c.js","type":"update","extra":1}"#).unwrap();
        assert_eq!(msg, HmrMessage::update("/c.js"));
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg = HmrMessage::from_json(r#"{"type":"connected","at":12}"#).unwrap();
        assert_eq!(msg, HmrMessage::Unknown);
        assert_eq!(msg.kind(), "unknown");
    }

    #[test]
    fn test_malformed_frames() {
        assert!(HmrMessage::from_json("not json").is_err());
        assert!(HmrMessage::from_json(r#"{"type":"update"}"#).is_err());
        assert!(HmrMessage::from_json(r#"{"id":"/a.js"}"#).is_err());
    }
}
