//! TIPJAR Test Utilities
//!
//! Shared test infrastructure for the TIPJAR workspace:
//! - A recording messaging gateway with failure injection
//! - Proptest generators for identities and account records
//! - Fixtures for the common scenarios
//! - Assertions and a polling helper for background effects

// Re-export the instrumented store from its source crate
pub use tipjar_storage::{InMemoryRecordStore, StoreCallCounts};

// Re-export core types for convenience
pub use tipjar_core::{
    AccountError, AccountRecord, ExternalIdentity, ExternalProfile, GatewayError, IdentityKey,
    WalletRef,
};
pub use tipjar_dispatch::{ActionKind, Content, Destination, MessageRef, MessagingGateway};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ============================================================================
// RECORDING GATEWAY
// ============================================================================

/// One call received by [`RecordingGateway`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: ActionKind,
    /// Chat the call landed in.
    pub chat: Destination,
    pub text: Option<String>,
    pub at: Instant,
}

/// Messaging gateway that records every call and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<RecordedCall>>,
    next_message_id: AtomicI64,
    failing: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway that rejects every call.
    pub fn failing() -> Self {
        let gateway = Self::default();
        gateway.set_failing(true);
        gateway
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.calls().iter().filter(|c| c.kind == kind).count()
    }

    pub fn calls_to(&self, chat: &Destination) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| &c.chat == chat)
            .collect()
    }

    fn record(
        &self,
        kind: ActionKind,
        chat: &Destination,
        text: Option<&str>,
    ) -> Result<(), GatewayError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                kind,
                chat: chat.clone(),
                text: text.map(str::to_string),
                at: Instant::now(),
            });
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                action: kind.to_string(),
                target: chat.to_string(),
                reason: "recording gateway set to fail".to_string(),
            });
        }
        Ok(())
    }

    fn new_message(&self, chat: &Destination) -> MessageRef {
        MessageRef {
            chat: chat.clone(),
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn forward(
        &self,
        to: &Destination,
        _message: &MessageRef,
    ) -> Result<MessageRef, GatewayError> {
        self.record(ActionKind::Forward, to, None)?;
        Ok(self.new_message(to))
    }

    async fn send(&self, to: &Destination, content: &Content) -> Result<MessageRef, GatewayError> {
        self.record(ActionKind::Send, to, Some(&content.text))?;
        Ok(self.new_message(to))
    }

    async fn reply(&self, to: &MessageRef, content: &Content) -> Result<MessageRef, GatewayError> {
        self.record(ActionKind::Reply, &to.chat, Some(&content.text))?;
        Ok(self.new_message(&to.chat))
    }

    async fn edit(
        &self,
        message: &MessageRef,
        content: &Content,
    ) -> Result<MessageRef, GatewayError> {
        self.record(ActionKind::Edit, &message.chat, Some(&content.text))?;
        Ok(message.clone())
    }

    async fn delete(&self, message: &MessageRef) -> Result<(), GatewayError> {
        self.record(ActionKind::Delete, &message.chat, None)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TIPJAR types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a platform handle (no leading `@`).
    pub fn arb_handle() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{4,15}"
    }

    pub fn arb_language_code() -> impl Strategy<Value = String> {
        prop_oneof![Just("en"), Just("de"), Just("es"), Just("it"), Just("pt")]
            .prop_map(str::to_string)
    }

    pub fn arb_external_profile() -> impl Strategy<Value = ExternalProfile> {
        (
            proptest::option::of(arb_handle()),
            "[A-Z][a-z]{0,10}",
            proptest::option::of("[A-Z][a-z]{1,12}"),
            proptest::option::of(arb_language_code()),
            any::<bool>(),
        )
            .prop_map(
                |(username, first_name, last_name, language_code, is_bot)| ExternalProfile {
                    username,
                    first_name,
                    last_name,
                    language_code,
                    is_bot,
                },
            )
    }

    pub fn arb_external_identity() -> impl Strategy<Value = ExternalIdentity> {
        (1i64..10_000_000_000, arb_external_profile())
            .prop_map(|(id, profile)| ExternalIdentity { id, profile })
    }

    pub fn arb_wallet_ref() -> impl Strategy<Value = WalletRef> {
        "[a-f0-9]{32}".prop_map(WalletRef::new)
    }

    /// An account record that may or may not have a wallet.
    pub fn arb_account_record() -> impl Strategy<Value = AccountRecord> {
        (arb_external_identity(), proptest::option::of(arb_wallet_ref())).prop_map(
            |(identity, wallet)| {
                let mut record = AccountRecord::seed(identity);
                record.wallet = wallet;
                record
            },
        )
    }

    pub fn arb_complete_record() -> impl Strategy<Value = AccountRecord> {
        (arb_external_identity(), arb_wallet_ref())
            .prop_map(|(identity, wallet)| AccountRecord::seed(identity).with_wallet(wallet))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built identities and records for common scenarios.

    use super::*;

    /// `{id: 42, handle: "alice"}` with a full profile.
    pub fn alice() -> ExternalIdentity {
        ExternalIdentity::new(42)
            .with_username("alice")
            .with_name("Alice", Some("Liddell"))
            .with_language("en")
    }

    /// Only ID and handle, as carried by a mention.
    pub fn alice_shorthand() -> ExternalIdentity {
        ExternalIdentity::new(42).with_username("alice")
    }

    pub fn bob() -> ExternalIdentity {
        ExternalIdentity::new(7).with_username("bob").with_name("Bob", None)
    }

    pub fn complete_record(identity: ExternalIdentity, wallet: &str) -> AccountRecord {
        AccountRecord::seed(identity).with_wallet(WalletRef::new(wallet))
    }

    /// A store already holding `records`.
    pub fn store_with(records: impl IntoIterator<Item = AccountRecord>) -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new();
        for record in records {
            store.insert(record);
        }
        store
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on account errors.

    use super::*;

    #[track_caller]
    pub fn assert_not_found(error: &AccountError) {
        assert!(
            error.is_not_found(),
            "Expected RecordNotFound, got: {:?}",
            error
        );
    }

    #[track_caller]
    pub fn assert_incomplete(error: &AccountError) {
        assert!(
            error.is_incomplete(),
            "Expected IncompleteRecord, got: {:?}",
            error
        );
    }

    #[track_caller]
    pub fn assert_store_error(error: &AccountError) {
        assert!(error.is_store(), "Expected Store error, got: {:?}", error);
    }
}

// ============================================================================
// POLLING
// ============================================================================

/// Poll `check` every few milliseconds until it holds or `timeout` passes.
///
/// Returns whether the condition was met. Used for effects that happen on
/// background tasks, such as write-backs and cache population.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
