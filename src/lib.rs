//! One-time-password credential records.
//!
//! A [`Record`] wraps an [`Authenticator`] (TOTP, HOTP, Battle.net or Steam)
//! with a display name, creation time and behaviour flags. Records persist
//! to an element tree ([`Node`], XML on disk), export as `otpauth://` URIs
//! and deliver codes to the clipboard with a retry policy.

pub mod authenticator;
pub mod clipboard;
pub mod config;
pub mod crypto;
pub mod document;
pub mod error;
pub mod record;
pub mod uri;

pub use authenticator::{
    Authenticator, HashAlgorithm, OtpEngine, SecretKey, ServerClock, Variant, VariantKind,
};
pub use clipboard::{CopyOptions, CopyOutcome, ExchangeBuffer, SystemClipboard, copy_with_retry};
pub use config::Settings;
pub use crypto::{PasswordCodec, SecretCodec};
pub use document::Node;
pub use error::AuthError;
pub use record::{ListenerId, Property, Record, RecordChange, SyncOutcome};
pub use uri::to_uri;
