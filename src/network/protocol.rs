//! JSON control messages carried in text frames

use serde::{Deserialize, Serialize};

/// Messages the client sends as text frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage<'a> {
    Auth { token: &'a str },
}

impl ClientMessage<'_> {
    pub fn to_json(&self) -> String {
        // Serializing a borrowed string into JSON cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Messages the server sends as text frames
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Transcript or status line for the user
    Text { content: String },
    Error {
        #[serde(default, alias = "detail")]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// How the server answered the auth request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Accepted,
    Rejected(String),
    Malformed(String),
}

/// Any JSON object is an answer; only `"type": "error"` is a rejection.
pub fn classify_auth_reply(text: &str) -> AuthReply {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return AuthReply::Malformed(e.to_string()),
    };
    let Some(object) = value.as_object() else {
        return AuthReply::Malformed("auth reply is not a JSON object".to_string());
    };

    if object.get("type").and_then(|t| t.as_str()) == Some("error") {
        let reason = object
            .get("message")
            .or_else(|| object.get("detail"))
            .and_then(|m| m.as_str())
            .unwrap_or("authentication rejected")
            .to_string();
        AuthReply::Rejected(reason)
    } else {
        AuthReply::Accepted
    }
}
