//! Cryptographic capabilities implemented by [`crate::KeyMaterial`].
//!
//! - [`CryptographicSignature`]: sign and verify
//! - [`CryptographicEncryption`]: wrap the content-encryption key per recipient and unwrap it
//!
//! The capabilities are independent traits; an operation picks the one it needs.

pub(crate) mod content;
mod encryption;
mod signature;

pub use content::ContentKey;
pub use encryption::{CryptographicEncryption, RecipientEntry};
pub use signature::CryptographicSignature;
