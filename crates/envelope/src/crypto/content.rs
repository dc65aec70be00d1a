//! Content-encryption key and the A256GCM content cipher.

use crate::error::Stage;
use crate::{EnvelopeError, EnvelopeResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

pub(crate) const KEY_LEN: usize = 32;
pub(crate) const IV_LEN: usize = 12;
pub(crate) const TAG_LEN: usize = 16;

/// One symmetric content-encryption key, generated per envelope.
#[derive(Clone)]
pub struct ContentKey(Zeroizing<[u8; KEY_LEN]>);

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey(<redacted>)")
    }
}

impl ContentKey {
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *key);
        Self(key)
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidKey`] unless `bytes` is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> EnvelopeResult<Self> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        if bytes.len() != KEY_LEN {
            return Err(EnvelopeError::InvalidKey(format!(
                "content key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Output of one AEAD seal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Sealed {
    pub(crate) iv: Vec<u8>,
    pub(crate) ciphertext: Vec<u8>,
    pub(crate) tag: Vec<u8>,
}

pub(crate) fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// AES-256-GCM under a fresh random IV.
pub(crate) fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> EnvelopeResult<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| EnvelopeError::InvalidKey("AES-256-GCM key must be 32 bytes".into()))?;
    let iv = random_iv();

    let mut ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EnvelopeError::malformed(Stage::Encrypt, "AES-GCM encryption failed"))?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

    Ok(Sealed {
        iv: iv.to_vec(),
        ciphertext,
        tag,
    })
}

/// Inverse of [`seal`]. Any authentication failure is reported as `VerificationFailed`.
pub(crate) fn open(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> EnvelopeResult<Vec<u8>> {
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(EnvelopeError::verification(
            Stage::Decrypt,
            "invalid IV or authentication tag length",
        ));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| EnvelopeError::InvalidKey("AES-256-GCM key must be 32 bytes".into()))?;

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: &combined,
                aad,
            },
        )
        .map_err(|_| {
            EnvelopeError::verification(Stage::Decrypt, "content authentication failed")
        })
}
