//! Encryption capability: per-recipient wrapping of the content-encryption key.
//!
//! Supported key-management algorithms:
//! - `RSA-OAEP-256`: the content key is encrypted directly to the recipient's RSA key
//! - `ECDH-ES+A256GCMKW`: an ephemeral X25519 agreement with the recipient key is expanded
//!   with HKDF-SHA256 (info = algorithm name, `0x00`, recipient kid) into a key-encryption key
//!   that seals the content key with AES-256-GCM; the entry carries the ephemeral public key,
//!   IV and tag
//!
//! Each recipient entry is produced and consumed independently of every other entry.

use crate::algorithms::{KeyFamily, KeyManagementAlgorithm};
use crate::b64;
use crate::crypto::content::{self, ContentKey, KEY_LEN};
use crate::error::Stage;
use crate::keys::{Jwk, KeyMaterial};
use crate::{EnvelopeError, EnvelopeResult};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rayon::prelude::*;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// One recipient's wrapped copy of the content key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientEntry {
    pub kid: String,
    pub algorithm: KeyManagementAlgorithm,
    pub encrypted_key: Vec<u8>,
    /// Ephemeral public key (ECDH only).
    pub epk: Option<Jwk>,
    /// Key-wrap IV (ECDH only).
    pub iv: Option<Vec<u8>>,
    /// Key-wrap authentication tag (ECDH only).
    pub tag: Option<Vec<u8>>,
}

/// Encrypt content keys for recipients and recover them.
pub trait CryptographicEncryption {
    /// Wrap `content_key` for every recipient, returning entries in input order.
    ///
    /// Recipients are processed in parallel; the first failure is returned.
    fn encrypt_for(
        recipients: &[Self],
        content_key: &ContentKey,
    ) -> EnvelopeResult<Vec<RecipientEntry>>
    where
        Self: Sized + Sync;

    /// Unwrap the content key from `entry` with the holder's private key.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::RecipientNotFound`] if `entry` is addressed to another key,
    /// [`EnvelopeError::KeyMissing`] if no private key is held, and
    /// [`EnvelopeError::UnwrapFailed`] if the entry does not open.
    fn decrypt(&self, entry: &RecipientEntry) -> EnvelopeResult<ContentKey>;
}

impl CryptographicEncryption for KeyMaterial {
    fn encrypt_for(
        recipients: &[Self],
        content_key: &ContentKey,
    ) -> EnvelopeResult<Vec<RecipientEntry>> {
        recipients
            .par_iter()
            .map(|recipient| recipient.wrap_content_key(content_key))
            .collect()
    }

    fn decrypt(&self, entry: &RecipientEntry) -> EnvelopeResult<ContentKey> {
        if entry.kid != self.key_id() {
            return Err(EnvelopeError::RecipientNotFound {
                kid: self.key_id().to_string(),
            });
        }
        let private = self.private_bytes()?;
        let unwrap_failed = |reason: &str| EnvelopeError::UnwrapFailed {
            kid: entry.kid.clone(),
            reason: reason.to_string(),
        };

        if self.family() != Some(entry.algorithm.family()) {
            return Err(unwrap_failed("key type does not match the entry algorithm"));
        }

        let content_key = match entry.algorithm {
            KeyManagementAlgorithm::RsaOaep256 => {
                let key = RsaPrivateKey::from_pkcs8_der(private)
                    .map_err(|_| unwrap_failed("RSA private key is not valid PKCS#8"))?;
                Zeroizing::new(
                    key.decrypt(Oaep::new::<Sha256>(), &entry.encrypted_key)
                        .map_err(|_| unwrap_failed("RSA-OAEP decryption failed"))?,
                )
            }
            KeyManagementAlgorithm::EcdhEsA256GcmKw => {
                let epk = entry
                    .epk
                    .as_ref()
                    .filter(|epk| epk.family() == Some(KeyFamily::X25519))
                    .ok_or_else(|| unwrap_failed("missing or invalid ephemeral key"))?;
                let (Some(iv), Some(tag)) = (&entry.iv, &entry.tag) else {
                    return Err(unwrap_failed("missing key-wrap IV or tag"));
                };
                let secret: [u8; 32] = private
                    .try_into()
                    .map_err(|_| unwrap_failed("X25519 secret must be 32 bytes"))?;
                let secret = x25519_dalek::StaticSecret::from(secret);
                let ephemeral = x25519_dalek::PublicKey::from(
                    epk.okp_key()
                        .map_err(|_| unwrap_failed("ephemeral key is not 32 bytes"))?,
                );
                let shared = secret.diffie_hellman(&ephemeral);
                if !shared.was_contributory() {
                    return Err(unwrap_failed("non-contributory key agreement"));
                }
                let kek = derive_kek(shared.as_bytes(), entry.algorithm, &entry.kid)?;
                Zeroizing::new(
                    content::open(kek.as_slice(), iv, &entry.encrypted_key, tag, entry.kid.as_bytes())
                        .map_err(|_| unwrap_failed("key-wrap authentication failed"))?,
                )
            }
        };

        ContentKey::from_slice(&content_key)
            .map_err(|_| unwrap_failed("unwrapped key has the wrong length"))
    }
}

impl KeyMaterial {
    fn wrap_content_key(&self, content_key: &ContentKey) -> EnvelopeResult<RecipientEntry> {
        let family = self.public_key().require_family()?;
        let algorithm = match self.algorithm() {
            Some(alg) => KeyManagementAlgorithm::from_jose(alg)
                .ok_or_else(|| EnvelopeError::unsupported(alg, Stage::Encrypt))?,
            None => KeyManagementAlgorithm::for_family(family)
                .ok_or_else(|| EnvelopeError::unsupported(family.kty(), Stage::Encrypt))?,
        };
        let kid = self.key_id().to_string();

        let entry = match algorithm {
            KeyManagementAlgorithm::RsaOaep256 => {
                let public = self.public_key().rsa_public_key()?;
                let encrypted_key = public
                    .encrypt(&mut OsRng, Oaep::new::<Sha256>(), content_key.as_bytes())
                    .map_err(|e| EnvelopeError::InvalidKey(format!("RSA-OAEP: {e}")))?;
                RecipientEntry {
                    kid,
                    algorithm,
                    encrypted_key,
                    epk: None,
                    iv: None,
                    tag: None,
                }
            }
            KeyManagementAlgorithm::EcdhEsA256GcmKw => {
                let recipient = x25519_dalek::PublicKey::from(self.public_key().okp_key()?);
                let ephemeral = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
                let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
                let shared = ephemeral.diffie_hellman(&recipient);
                if !shared.was_contributory() {
                    return Err(EnvelopeError::InvalidKey(format!(
                        "recipient key '{kid}' is a low-order point"
                    )));
                }
                let kek = derive_kek(shared.as_bytes(), algorithm, &kid)?;
                let sealed = content::seal(kek.as_slice(), content_key.as_bytes(), kid.as_bytes())?;
                RecipientEntry {
                    epk: Some(Jwk {
                        kty: KeyFamily::X25519.kty().to_string(),
                        crv: KeyFamily::X25519.crv().map(String::from),
                        x: Some(b64::encode_url(ephemeral_public.as_bytes())),
                        ..Jwk::default()
                    }),
                    kid,
                    algorithm,
                    encrypted_key: sealed.ciphertext,
                    iv: Some(sealed.iv),
                    tag: Some(sealed.tag),
                }
            }
        };

        tracing::debug!(kid = %entry.kid, alg = %algorithm, "wrapped content key");
        Ok(entry)
    }
}

fn derive_kek(
    shared_secret: &[u8],
    algorithm: KeyManagementAlgorithm,
    kid: &str,
) -> EnvelopeResult<Zeroizing<[u8; KEY_LEN]>> {
    let mut info = algorithm.as_str().as_bytes().to_vec();
    info.push(0);
    info.extend_from_slice(kid.as_bytes());

    let mut kek = Zeroizing::new([0u8; KEY_LEN]);
    Hkdf::<Sha256>::new(None, shared_secret)
        .expand(&info, &mut *kek)
        .map_err(|_| EnvelopeError::InvalidKey("HKDF output length is invalid".into()))?;
    Ok(kek)
}
