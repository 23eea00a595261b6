//! Drift detection between a stored profile and an observed one.
//!
//! Comparison is field-by-field over the attributes that matter for display
//! and locale, instead of deep equality over whatever the platform sends.

use crate::account::ExternalProfile;
use std::fmt;

/// A profile attribute that participates in drift detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Username,
    FirstName,
    LastName,
    LanguageCode,
    IsBot,
}

impl ProfileField {
    pub const ALL: [ProfileField; 5] = [
        ProfileField::Username,
        ProfileField::FirstName,
        ProfileField::LastName,
        ProfileField::LanguageCode,
        ProfileField::IsBot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileField::Username => "username",
            ProfileField::FirstName => "first_name",
            ProfileField::LastName => "last_name",
            ProfileField::LanguageCode => "language_code",
            ProfileField::IsBot => "is_bot",
        }
    }

    fn differs(self, stored: &ExternalProfile, observed: &ExternalProfile) -> bool {
        match self {
            ProfileField::Username => stored.username != observed.username,
            ProfileField::FirstName => stored.first_name != observed.first_name,
            ProfileField::LastName => stored.last_name != observed.last_name,
            ProfileField::LanguageCode => stored.language_code != observed.language_code,
            ProfileField::IsBot => stored.is_bot != observed.is_bot,
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields whose observed value differs from the stored snapshot.
pub fn changed_fields(stored: &ExternalProfile, observed: &ExternalProfile) -> Vec<ProfileField> {
    ProfileField::ALL
        .into_iter()
        .filter(|field| field.differs(stored, observed))
        .collect()
}

/// Whether the observed profile has drifted from the stored one.
pub fn profile_changed(stored: &ExternalProfile, observed: &ExternalProfile) -> bool {
    ProfileField::ALL
        .into_iter()
        .any(|field| field.differs(stored, observed))
}
