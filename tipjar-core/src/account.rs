//! Account record and external identity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// IDENTITY KEY
// ============================================================================

/// Primary key of an account record.
///
/// Always the decimal rendering of the external platform's numeric user ID,
/// so the same user maps to the same key no matter which event carried them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derive the key for an external numeric user ID.
    pub fn from_external_id(id: i64) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for IdentityKey {
    fn from(id: i64) -> Self {
        Self::from_external_id(id)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// EXTERNAL IDENTITY
// ============================================================================

/// Mutable attributes of an external user, as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExternalProfile {
    /// Public handle without the leading `@`.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    /// IETF language tag reported by the platform.
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// A user as seen on the external messaging platform.
///
/// Events may carry a shorthand identity (ID plus handle only). Such an
/// identity is still a valid lookup input, but it must never be written over
/// a fuller stored record as a side effect of a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: i64,
    #[serde(flatten)]
    pub profile: ExternalProfile,
}

impl ExternalIdentity {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            profile: ExternalProfile::default(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.profile.username = Some(username.into());
        self
    }

    pub fn with_name(mut self, first_name: impl Into<String>, last_name: Option<&str>) -> Self {
        self.profile.first_name = first_name.into();
        self.profile.last_name = last_name.map(str::to_string);
        self
    }

    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        self.profile.language_code = Some(language_code.into());
        self
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::from_external_id(self.id)
    }

    /// Human-readable label for logs: `@handle` when known, otherwise the
    /// full name followed by the numeric ID.
    pub fn display_str(&self) -> String {
        if let Some(username) = self.profile.username.as_deref().filter(|u| !u.is_empty()) {
            return format!("@{}", username);
        }
        let mut name = self.profile.first_name.clone();
        if let Some(last) = self.profile.last_name.as_deref().filter(|l| !l.is_empty()) {
            if !name.is_empty() {
                name.push(' ');
            }
            name.push_str(last);
        }
        if name.is_empty() {
            self.id.to_string()
        } else {
            format!("{} ({})", name, self.id)
        }
    }
}

// ============================================================================
// ACCOUNT RECORD
// ============================================================================

/// Opaque handle to a user's wallet state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletRef(String);

impl WalletRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One external-platform user mapped to internal state.
///
/// A record handed out by the reconciliation pipeline is a snapshot; callers
/// that want fresher data resolve again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub identity_key: IdentityKey,
    /// Snapshot of the external identity this record was last reconciled with.
    pub identity: ExternalIdentity,
    /// Absent until a wallet has been created; a record without one is
    /// incomplete.
    pub wallet: Option<WalletRef>,
    /// Set on every durable write; absent for records never persisted.
    pub updated_at: Option<Timestamp>,
}

impl AccountRecord {
    /// A record carrying nothing but the supplied identity.
    pub fn seed(identity: ExternalIdentity) -> Self {
        Self {
            identity_key: identity.identity_key(),
            identity,
            wallet: None,
            updated_at: None,
        }
    }

    pub fn with_wallet(mut self, wallet: WalletRef) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Whether the record has a usable wallet reference.
    pub fn is_complete(&self) -> bool {
        self.wallet.is_some()
    }

    pub fn handle(&self) -> Option<&str> {
        self.identity.profile.username.as_deref()
    }

    /// Stamp `updated_at` ahead of a durable write.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_is_decimal_id() {
        assert_eq!(IdentityKey::from_external_id(42).as_str(), "42");
        assert_eq!(IdentityKey::from(-100123).as_str(), "-100123");
        assert_eq!(ExternalIdentity::new(7).identity_key(), IdentityKey::from(7));
    }

    #[test]
    fn test_seed_is_incomplete() {
        let record = AccountRecord::seed(ExternalIdentity::new(42).with_username("alice"));
        assert_eq!(record.identity_key.as_str(), "42");
        assert!(!record.is_complete());
        assert!(record.updated_at.is_none());
        assert_eq!(record.handle(), Some("alice"));

        let record = record.with_wallet(WalletRef::new("w1"));
        assert!(record.is_complete());
    }

    #[test]
    fn test_display_str() {
        let with_handle = ExternalIdentity::new(1).with_username("alice");
        assert_eq!(with_handle.display_str(), "@alice");

        let full_name = ExternalIdentity::new(2).with_name("Bob", Some("Builder"));
        assert_eq!(full_name.display_str(), "Bob Builder (2)");

        let first_only = ExternalIdentity::new(3).with_name("Carol", None);
        assert_eq!(first_only.display_str(), "Carol (3)");

        assert_eq!(ExternalIdentity::new(4).display_str(), "4");
    }

    #[test]
    fn test_touch_sets_updated_at() {
        let mut record = AccountRecord::seed(ExternalIdentity::new(5));
        record.touch();
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_identity_json_is_flat() {
        let identity = ExternalIdentity::new(9)
            .with_username("dave")
            .with_language("de");
        let value = serde_json::to_value(&identity).expect("serialize identity");
        assert_eq!(value["id"], 9);
        assert_eq!(value["username"], "dave");
        assert_eq!(value["language_code"], "de");

        let parsed: ExternalIdentity =
            serde_json::from_str(r#"{"id": 9, "username": "dave"}"#).expect("parse shorthand");
        assert_eq!(parsed.profile.username.as_deref(), Some("dave"));
        assert!(parsed.profile.first_name.is_empty());
    }
}
