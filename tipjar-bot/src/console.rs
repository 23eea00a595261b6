//! Messaging gateway that writes outbound actions to stdout.
//!
//! One JSON object per line, so a local run can be piped into other tools.

use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tipjar_core::GatewayError;
use tipjar_dispatch::{ActionKind, Content, Destination, MessageRef, MessagingGateway};

#[derive(Debug, Serialize)]
struct ConsoleLine<'a> {
    action: &'static str,
    chat: &'a Destination,
    message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a Content>,
}

#[derive(Debug, Default)]
pub struct ConsoleGateway {
    last_message_id: AtomicI64,
}

impl ConsoleGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.last_message_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, kind: ActionKind, line: &ConsoleLine<'_>) -> Result<(), GatewayError> {
        let encoded = serde_json::to_string(line).map_err(|e| GatewayError::Rejected {
            action: kind.to_string(),
            target: line.chat.to_string(),
            reason: e.to_string(),
        })?;

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", encoded).map_err(|e| GatewayError::Unavailable {
            reason: format!("stdout: {}", e),
        })?;

        tracing::debug!(action = %kind, chat = %line.chat, message_id = line.message_id, "Console output");
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for ConsoleGateway {
    async fn forward(
        &self,
        to: &Destination,
        message: &MessageRef,
    ) -> Result<MessageRef, GatewayError> {
        let sent = MessageRef {
            chat: to.clone(),
            message_id: self.next_id(),
        };
        self.emit(
            ActionKind::Forward,
            &ConsoleLine {
                action: ActionKind::Forward.as_str(),
                chat: to,
                message_id: sent.message_id,
                source_message_id: Some(message.message_id),
                content: None,
            },
        )?;
        Ok(sent)
    }

    async fn send(&self, to: &Destination, content: &Content) -> Result<MessageRef, GatewayError> {
        let sent = MessageRef {
            chat: to.clone(),
            message_id: self.next_id(),
        };
        self.emit(
            ActionKind::Send,
            &ConsoleLine {
                action: ActionKind::Send.as_str(),
                chat: to,
                message_id: sent.message_id,
                source_message_id: None,
                content: Some(content),
            },
        )?;
        Ok(sent)
    }

    async fn reply(&self, to: &MessageRef, content: &Content) -> Result<MessageRef, GatewayError> {
        let sent = MessageRef {
            chat: to.chat.clone(),
            message_id: self.next_id(),
        };
        self.emit(
            ActionKind::Reply,
            &ConsoleLine {
                action: ActionKind::Reply.as_str(),
                chat: &to.chat,
                message_id: sent.message_id,
                source_message_id: Some(to.message_id),
                content: Some(content),
            },
        )?;
        Ok(sent)
    }

    async fn edit(
        &self,
        message: &MessageRef,
        content: &Content,
    ) -> Result<MessageRef, GatewayError> {
        self.emit(
            ActionKind::Edit,
            &ConsoleLine {
                action: ActionKind::Edit.as_str(),
                chat: &message.chat,
                message_id: message.message_id,
                source_message_id: None,
                content: Some(content),
            },
        )?;
        Ok(message.clone())
    }

    async fn delete(&self, message: &MessageRef) -> Result<(), GatewayError> {
        self.emit(
            ActionKind::Delete,
            &ConsoleLine {
                action: ActionKind::Delete.as_str(),
                chat: &message.chat,
                message_id: message.message_id,
                source_message_id: None,
                content: None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_ids_increase() {
        let gateway = ConsoleGateway::new();
        let chat = Destination::chat(1);

        let first = gateway
            .send(&chat, &Content::text("one"))
            .await
            .expect("stdout writable");
        let second = gateway
            .reply(&first, &Content::text("two"))
            .await
            .expect("stdout writable");

        assert_eq!(first.message_id, 1);
        assert_eq!(second.message_id, 2);
        assert_eq!(second.chat, chat);
    }

    #[test]
    fn test_line_encoding() {
        let chat = Destination::chat(5);
        let content = Content::text("hi");
        let line = ConsoleLine {
            action: "reply",
            chat: &chat,
            message_id: 3,
            source_message_id: Some(1),
            content: Some(&content),
        };
        let encoded = serde_json::to_string(&line).expect("serializes");
        assert_eq!(
            encoded,
            r#"{"action":"reply","chat":"5","message_id":3,"source_message_id":1,"content":{"text":"hi","silent":false}}"#
        );
    }
}
