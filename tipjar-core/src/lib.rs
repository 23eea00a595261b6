//! TIPJAR Core - Account Types
//!
//! Pure data structures shared by every other crate: the account record and
//! the external identity it is keyed by, the profile comparator used for
//! drift detection, the error taxonomy, and configuration.
//!
//! This crate contains no I/O.

pub mod account;
pub mod config;
pub mod error;
pub mod profile;
pub mod shutdown;

pub use account::{AccountRecord, ExternalIdentity, ExternalProfile, IdentityKey, Timestamp, WalletRef};
pub use config::{CacheConfig, PermitConfig};
pub use error::{AccountError, AccountResult, ConfigError, GatewayError};
pub use profile::{changed_fields, profile_changed, ProfileField};
pub use shutdown::shutdown_requested;
