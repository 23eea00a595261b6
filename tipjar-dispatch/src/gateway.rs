//! Outbound messaging gateway contract and the actions sent through it.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tipjar_core::GatewayError;

// ============================================================================
// ADDRESSING
// ============================================================================

/// A chat on the external platform. Also the key for admission control.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn chat(chat_id: i64) -> Self {
        Self(chat_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for Destination {
    fn from(chat_id: i64) -> Self {
        Self::chat(chat_id)
    }
}

impl From<&str> for Destination {
    fn from(chat: &str) -> Self {
        Self(chat.to_string())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message that already exists on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat: Destination,
    pub message_id: i64,
}

impl MessageRef {
    pub fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat: Destination::chat(chat_id),
            message_id,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat, self.message_id)
    }
}

// ============================================================================
// CONTENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Markdown,
    Html,
}

/// Message body plus rendering options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    /// Deliver without a notification.
    #[serde(default)]
    pub silent: bool,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: None,
            silent: false,
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self::text(text).with_parse_mode(ParseMode::Markdown)
    }

    pub fn with_parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

/// The external platform's messaging primitives.
///
/// Implementations report failures as [`GatewayError`]; the dispatcher
/// decides what to do with them.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn forward(&self, to: &Destination, message: &MessageRef)
        -> Result<MessageRef, GatewayError>;

    async fn send(&self, to: &Destination, content: &Content) -> Result<MessageRef, GatewayError>;

    /// Reply in the chat of `to`, quoting it.
    async fn reply(&self, to: &MessageRef, content: &Content) -> Result<MessageRef, GatewayError>;

    async fn edit(&self, message: &MessageRef, content: &Content)
        -> Result<MessageRef, GatewayError>;

    async fn delete(&self, message: &MessageRef) -> Result<(), GatewayError>;
}

// ============================================================================
// ACTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Forward,
    Send,
    Reply,
    Edit,
    Delete,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Send => "send",
            Self::Reply => "reply",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound interaction: what to do, where, and with what payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    Forward { to: Destination, message: MessageRef },
    Send { to: Destination, content: Content },
    Reply { to: MessageRef, content: Content },
    Edit { message: MessageRef, content: Content },
    Delete { message: MessageRef },
}

impl OutboundAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Forward { .. } => ActionKind::Forward,
            Self::Send { .. } => ActionKind::Send,
            Self::Reply { .. } => ActionKind::Reply,
            Self::Edit { .. } => ActionKind::Edit,
            Self::Delete { .. } => ActionKind::Delete,
        }
    }

    /// Destination whose bucket must admit this action.
    ///
    /// `None` for edits and deletes, which touch existing messages and are
    /// not rate limited.
    pub fn admission_key(&self) -> Option<&Destination> {
        match self {
            Self::Forward { to, .. } | Self::Send { to, .. } => Some(to),
            Self::Reply { to, .. } => Some(&to.chat),
            Self::Edit { .. } | Self::Delete { .. } => None,
        }
    }

    /// Where the action lands, for logging.
    pub fn target(&self) -> String {
        match self {
            Self::Forward { to, .. } | Self::Send { to, .. } => to.to_string(),
            Self::Reply { to, .. } => to.chat.to_string(),
            Self::Edit { message, .. } | Self::Delete { message } => message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_keys() {
        let chat = Destination::chat(-100);
        let original = MessageRef::new(7, 1);

        let forward = OutboundAction::Forward {
            to: chat.clone(),
            message: original.clone(),
        };
        assert_eq!(forward.admission_key(), Some(&chat));

        let reply = OutboundAction::Reply {
            to: original.clone(),
            content: "hi".into(),
        };
        assert_eq!(reply.admission_key(), Some(&Destination::chat(7)));

        let edit = OutboundAction::Edit {
            message: original.clone(),
            content: "hi".into(),
        };
        assert_eq!(edit.admission_key(), None);
        assert_eq!(edit.kind(), ActionKind::Edit);

        let delete = OutboundAction::Delete { message: original };
        assert_eq!(delete.admission_key(), None);
        assert_eq!(delete.target(), "7/1");
    }

    #[test]
    fn test_content_builders() {
        let content = Content::markdown("*hi*").silent();
        assert_eq!(content.parse_mode, Some(ParseMode::Markdown));
        assert!(content.silent);

        let json = serde_json::to_string(&Content::text("plain")).expect("serializes");
        assert_eq!(json, r#"{"text":"plain","silent":false}"#);
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::chat(42).to_string(), "42");
        assert_eq!(Destination::from("@channel").as_str(), "@channel");
        assert_eq!(ActionKind::Reply.to_string(), "reply");
    }
}
