//! Inbound events and the commands the bot answers.
//!
//! Events arrive as JSON objects, one per line:
//!
//! ```json
//! {"chat_id": -100, "message_id": 7, "from": {"id": 42, "username": "alice", "first_name": "Alice"}, "text": "/start"}
//! ```
//!
//! Every event resolves its sender first, which keeps cached and stored
//! profiles in step with what the platform reports.

use serde::Deserialize;
use tipjar_core::{AccountError, AccountRecord, ExternalIdentity, WalletRef};
use tipjar_dispatch::{Content, MessageRef, MessagingGateway};
use tipjar_storage::{RecordStore, Unresolved};

use crate::bootstrap::TipBot;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub message_id: i64,
    pub from: ExternalIdentity,
    #[serde(default)]
    pub text: String,
}

impl InboundEvent {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn message(&self) -> MessageRef {
        MessageRef::new(self.chat_id, self.message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a wallet for the sender if they have none.
    Start,
    /// Show the sender's wallet.
    Wallet,
    /// Check whether a handle has a usable account.
    Whois(String),
    Other,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let mut words = text.split_whitespace();
        // Commands may be addressed as `/start@tipjar_bot`.
        let head = words
            .next()
            .map(|w| w.split('@').next().unwrap_or(w))
            .unwrap_or_default();
        match head {
            "/start" => Self::Start,
            "/wallet" | "/balance" => Self::Wallet,
            "/whois" => match words.next() {
                Some(handle) => Self::Whois(handle.to_string()),
                None => Self::Other,
            },
            _ => Self::Other,
        }
    }
}

/// Deterministic wallet reference for a new account.
fn new_wallet(record: &AccountRecord) -> WalletRef {
    WalletRef::new(format!("wallet-{}", record.identity_key))
}

/// Answer one inbound event. Returns the reply, if one was delivered.
pub async fn handle_event<S, G>(bot: &TipBot<S, G>, event: &InboundEvent) -> Option<MessageRef>
where
    S: RecordStore + 'static,
    G: MessagingGateway,
{
    let command = Command::parse(&event.text);
    tracing::debug!(
        user = %event.from.display_str(),
        chat_id = event.chat_id,
        command = ?command,
        "Inbound event"
    );

    let resolved = bot.accounts().resolve(&event.from).await;
    let text = match (command, resolved) {
        (Command::Other, _) => return None,
        (Command::Whois(handle), _) => whois(bot, &handle).await,
        (_, Err(Unresolved { error, .. })) if error.is_store() => {
            "Accounts are unavailable right now. Try again later.".to_string()
        }
        (Command::Start, Ok(record)) => {
            format!("You already have a wallet: {}", wallet_label(&record))
        }
        (Command::Start, Err(Unresolved { record, .. })) => {
            let wallet = new_wallet(&record);
            match bot.accounts().update_record(record.with_wallet(wallet)).await {
                Ok(created) => format!("Wallet created: {}", wallet_label(&created)),
                Err(e) => {
                    tracing::error!(user = %event.from.display_str(), error = %e, "Failed to create wallet");
                    "Could not create your wallet right now. Try again later.".to_string()
                }
            }
        }
        (Command::Wallet, Ok(record)) => format!("Your wallet: {}", wallet_label(&record)),
        (Command::Wallet, Err(_)) => "You have no wallet yet. Send /start to create one.".to_string(),
    };

    bot.outbound()
        .reply(&event.message(), Content::text(text))
        .await
}

async fn whois<S, G>(bot: &TipBot<S, G>, handle: &str) -> String
where
    S: RecordStore + 'static,
    G: MessagingGateway,
{
    let label = format!("@{}", handle.trim_start_matches('@'));
    match bot.accounts().lookup_by_handle(handle).await {
        Ok(record) => format!("{} has a wallet: {}", label, wallet_label(&record)),
        Err(AccountError::RecordNotFound { .. }) => format!("{} has not used the bot yet.", label),
        Err(AccountError::IncompleteRecord { .. }) => format!("{} has no wallet yet.", label),
        Err(AccountError::Store { .. }) => {
            "Accounts are unavailable right now. Try again later.".to_string()
        }
    }
}

fn wallet_label(record: &AccountRecord) -> String {
    record
        .wallet
        .as_ref()
        .map(|w| w.to_string())
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("/start"), Command::Start);
        assert_eq!(Command::parse("/start@tipjar_bot"), Command::Start);
        assert_eq!(Command::parse("/balance"), Command::Wallet);
        assert_eq!(
            Command::parse("/whois @alice"),
            Command::Whois("@alice".to_string())
        );
        assert_eq!(Command::parse("/whois"), Command::Other);
        assert_eq!(Command::parse("hello"), Command::Other);
        assert_eq!(Command::parse(""), Command::Other);
    }

    #[test]
    fn test_event_parse() {
        let event = InboundEvent::parse(
            r#"{"chat_id": -100, "message_id": 7, "from": {"id": 42, "username": "alice", "first_name": "Alice"}, "text": "/start"}"#,
        )
        .expect("valid event");
        assert_eq!(event.from.id, 42);
        assert_eq!(event.from.profile.username.as_deref(), Some("alice"));
        assert_eq!(event.message(), MessageRef::new(-100, 7));
    }

    #[test]
    fn test_event_without_text() {
        let event = InboundEvent::parse(r#"{"chat_id": 1, "message_id": 2, "from": {"id": 3}}"#)
            .expect("valid event");
        assert!(event.text.is_empty());
    }
}
