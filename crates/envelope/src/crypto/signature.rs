//! Signing capability.
//!
//! ECDSA signatures are raw fixed-size `r || s` (the JOSE and COSE wire form), RSA signatures
//! are PKCS#1 v1.5 and Ed25519 signatures are the 64-byte RFC 8032 encoding.

use crate::algorithms::SignatureAlgorithm;
use crate::error::Stage;
use crate::keys::{Jwk, KeyMaterial};
use crate::{EnvelopeError, EnvelopeResult};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::RsaPrivateKey;
use sha2::{Sha256, Sha384, Sha512};

/// Sign and verify byte strings.
pub trait CryptographicSignature {
    /// Sign `bytes` with the holder's private key.
    ///
    /// `alg` is checked before any key material is touched.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::AlgorithmUnsupported`] for unknown algorithms,
    /// [`EnvelopeError::KeyMissing`] when no private key is held, and
    /// [`EnvelopeError::InvalidKey`] when the key family cannot produce `alg`.
    fn sign(&self, bytes: &[u8], alg: &str) -> EnvelopeResult<Vec<u8>>;

    /// Verify `signature` over `bytes` with `public_key`, using the JWK's `alg`.
    ///
    /// Any malformed input yields `false`.
    fn verify(&self, bytes: &[u8], signature: &[u8], public_key: &Jwk) -> bool;
}

impl CryptographicSignature for KeyMaterial {
    fn sign(&self, bytes: &[u8], alg: &str) -> EnvelopeResult<Vec<u8>> {
        let algorithm = SignatureAlgorithm::from_jose(alg)
            .ok_or_else(|| EnvelopeError::unsupported(alg, Stage::Sign))?;
        let private = self.private_bytes()?;

        if self.family() != Some(algorithm.family()) {
            return Err(EnvelopeError::InvalidKey(format!(
                "key '{}' cannot produce {algorithm} signatures",
                self.key_id()
            )));
        }

        sign_with(algorithm, private, bytes)
    }

    fn verify(&self, bytes: &[u8], signature: &[u8], public_key: &Jwk) -> bool {
        let Some(algorithm) = public_key
            .alg
            .as_deref()
            .and_then(SignatureAlgorithm::from_jose)
        else {
            return false;
        };
        if public_key.family() != Some(algorithm.family()) {
            return false;
        }
        verify_with(algorithm, public_key, bytes, signature).unwrap_or(false)
    }
}

fn sign_with(
    algorithm: SignatureAlgorithm,
    private: &[u8],
    message: &[u8],
) -> EnvelopeResult<Vec<u8>> {
    let invalid = |e: String| EnvelopeError::InvalidKey(format!("{algorithm} signing key: {e}"));

    let signature = match algorithm {
        SignatureAlgorithm::Es256 => {
            let key = p256::ecdsa::SigningKey::from_slice(private)
                .map_err(|e| invalid(e.to_string()))?;
            let signature: p256::ecdsa::Signature = key.sign(message);
            signature.to_bytes().to_vec()
        }
        SignatureAlgorithm::Es384 => {
            let key = p384::ecdsa::SigningKey::from_slice(private)
                .map_err(|e| invalid(e.to_string()))?;
            let signature: p384::ecdsa::Signature = key.sign(message);
            signature.to_bytes().to_vec()
        }
        SignatureAlgorithm::Es512 => {
            let key = p521::ecdsa::SigningKey::from_slice(private)
                .map_err(|e| invalid(e.to_string()))?;
            let signature: p521::ecdsa::Signature = key.sign(message);
            signature.to_bytes().to_vec()
        }
        SignatureAlgorithm::Rs256 => {
            let key = rsa_private_key(private).map_err(invalid)?;
            rsa::pkcs1v15::SigningKey::<Sha256>::new(key)
                .sign(message)
                .to_vec()
        }
        SignatureAlgorithm::Rs384 => {
            let key = rsa_private_key(private).map_err(invalid)?;
            rsa::pkcs1v15::SigningKey::<Sha384>::new(key)
                .sign(message)
                .to_vec()
        }
        SignatureAlgorithm::Rs512 => {
            let key = rsa_private_key(private).map_err(invalid)?;
            rsa::pkcs1v15::SigningKey::<Sha512>::new(key)
                .sign(message)
                .to_vec()
        }
        SignatureAlgorithm::EdDsa => {
            let seed: [u8; 32] = private
                .try_into()
                .map_err(|_| invalid("expected a 32-byte seed".into()))?;
            let key = ed25519_dalek::SigningKey::from_bytes(&seed);
            let signature: ed25519_dalek::Signature = key.sign(message);
            signature.to_bytes().to_vec()
        }
    };

    Ok(signature)
}

fn rsa_private_key(private: &[u8]) -> Result<RsaPrivateKey, String> {
    RsaPrivateKey::from_pkcs8_der(private).map_err(|e| e.to_string())
}

fn verify_with(
    algorithm: SignatureAlgorithm,
    public_key: &Jwk,
    message: &[u8],
    signature: &[u8],
) -> EnvelopeResult<bool> {
    let verified = match algorithm {
        SignatureAlgorithm::Es256 => {
            let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(&public_key.sec1_point()?)
            else {
                return Ok(false);
            };
            p256::ecdsa::Signature::from_slice(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false)
        }
        SignatureAlgorithm::Es384 => {
            let Ok(key) = p384::ecdsa::VerifyingKey::from_sec1_bytes(&public_key.sec1_point()?)
            else {
                return Ok(false);
            };
            p384::ecdsa::Signature::from_slice(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false)
        }
        SignatureAlgorithm::Es512 => {
            let Ok(key) = p521::ecdsa::VerifyingKey::from_sec1_bytes(&public_key.sec1_point()?)
            else {
                return Ok(false);
            };
            p521::ecdsa::Signature::from_slice(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false)
        }
        SignatureAlgorithm::Rs256 => {
            let key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key.rsa_public_key()?);
            rsa::pkcs1v15::Signature::try_from(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false)
        }
        SignatureAlgorithm::Rs384 => {
            let key = rsa::pkcs1v15::VerifyingKey::<Sha384>::new(public_key.rsa_public_key()?);
            rsa::pkcs1v15::Signature::try_from(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false)
        }
        SignatureAlgorithm::Rs512 => {
            let key = rsa::pkcs1v15::VerifyingKey::<Sha512>::new(public_key.rsa_public_key()?);
            rsa::pkcs1v15::Signature::try_from(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false)
        }
        SignatureAlgorithm::EdDsa => {
            let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&public_key.okp_key()?) else {
                return Ok(false);
            };
            ed25519_dalek::Signature::from_slice(signature)
                .map(|sig| key.verify_strict(message, &sig).is_ok())
                .unwrap_or(false)
        }
    };

    Ok(verified)
}
