//! Key material and its JWK representation.
//!
//! A [`KeyMaterial`] is one cryptographic identity: a public JWK, its key id and, when the key is
//! owned locally, the private key bytes. Private bytes are held in a zeroizing buffer, are
//! redacted from `Debug`, and never appear in the JWK returned by [`KeyMaterial::public_key`].
//!
//! Private key encodings by family:
//! - EC P-256/P-384/P-521: raw big-endian scalar
//! - RSA: PKCS#8 DER
//! - Ed25519: 32-byte seed
//! - X25519: 32-byte static secret

use crate::algorithms::{KeyFamily, KeyManagementAlgorithm, SignatureAlgorithm};
use crate::b64;
use crate::constants::DEFAULT_RSA_BITS;
use crate::error::Stage;
use crate::{EnvelopeError, EnvelopeResult};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

/// JSON Web Key.
///
/// Only the members this workspace reads are modelled. `d` is accepted on import so that
/// private EC/OKP JWKs can be loaded, but [`KeyMaterial`] moves it out of the JWK immediately.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("d", &self.d.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl Jwk {
    pub fn family(&self) -> Option<KeyFamily> {
        KeyFamily::from_jwk_members(&self.kty, self.crv.as_deref())
    }

    /// Copy of this JWK without private members.
    pub fn public_view(&self) -> Jwk {
        Jwk {
            d: None,
            ..self.clone()
        }
    }

    /// RFC 7638 thumbprint (SHA-256, base64url).
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidKey`] for unsupported key types.
    pub fn thumbprint(&self) -> EnvelopeResult<String> {
        let members = match self.require_family()? {
            KeyFamily::EcP256 | KeyFamily::EcP384 | KeyFamily::EcP521 => serde_json::json!({
                "crv": self.crv,
                "kty": self.kty,
                "x": self.x,
                "y": self.y,
            }),
            KeyFamily::Rsa => serde_json::json!({
                "e": self.e,
                "kty": self.kty,
                "n": self.n,
            }),
            KeyFamily::Ed25519 | KeyFamily::X25519 => serde_json::json!({
                "crv": self.crv,
                "kty": self.kty,
                "x": self.x,
            }),
        };
        let bytes = serde_json::to_vec(&members).map_err(EnvelopeError::Serialization)?;
        Ok(b64::encode_url(&Sha256::digest(&bytes)))
    }

    pub(crate) fn require_family(&self) -> EnvelopeResult<KeyFamily> {
        self.family().ok_or_else(|| {
            EnvelopeError::InvalidKey(format!(
                "unsupported key type '{}' (curve: {})",
                self.kty,
                self.crv.as_deref().unwrap_or("none")
            ))
        })
    }

    fn member(&self, name: &str, value: &Option<String>) -> EnvelopeResult<Vec<u8>> {
        let text = value
            .as_deref()
            .ok_or_else(|| EnvelopeError::InvalidKey(format!("JWK is missing '{name}'")))?;
        b64::decode_url(text)
            .map_err(|e| EnvelopeError::InvalidKey(format!("JWK member '{name}': {e}")))
    }

    /// Uncompressed SEC1 point (`0x04 || x || y`) of an EC key.
    pub(crate) fn sec1_point(&self) -> EnvelopeResult<Vec<u8>> {
        let mut point = vec![0x04];
        point.extend(self.member("x", &self.x)?);
        point.extend(self.member("y", &self.y)?);
        Ok(point)
    }

    pub(crate) fn okp_key(&self) -> EnvelopeResult<[u8; 32]> {
        let bytes = self.member("x", &self.x)?;
        to_array32(&bytes)
    }

    pub(crate) fn rsa_public_key(&self) -> EnvelopeResult<RsaPublicKey> {
        let n = self.member("n", &self.n)?;
        let e = self.member("e", &self.e)?;
        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|e| EnvelopeError::InvalidKey(format!("RSA public key: {e}")))
    }

    fn same_public_key(&self, other: &Jwk) -> bool {
        self.kty == other.kty
            && self.crv == other.crv
            && self.x == other.x
            && self.y == other.y
            && self.n == other.n
            && self.e == other.e
    }

    fn validate_public_members(&self, family: KeyFamily) -> EnvelopeResult<()> {
        let invalid = |e: String| EnvelopeError::InvalidKey(format!("public key: {e}"));
        match family {
            KeyFamily::EcP256 => p256::PublicKey::from_sec1_bytes(&self.sec1_point()?)
                .map(|_| ())
                .map_err(|e| invalid(e.to_string())),
            KeyFamily::EcP384 => p384::PublicKey::from_sec1_bytes(&self.sec1_point()?)
                .map(|_| ())
                .map_err(|e| invalid(e.to_string())),
            KeyFamily::EcP521 => p521::PublicKey::from_sec1_bytes(&self.sec1_point()?)
                .map(|_| ())
                .map_err(|e| invalid(e.to_string())),
            KeyFamily::Rsa => self.rsa_public_key().map(|_| ()),
            KeyFamily::Ed25519 => ed25519_dalek::VerifyingKey::from_bytes(&self.okp_key()?)
                .map(|_| ())
                .map_err(|e| invalid(e.to_string())),
            KeyFamily::X25519 => self.okp_key().map(|_| ()),
        }
    }
}

/// One cryptographic identity.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    public_key: Jwk,
    private_key: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kid", &self.key_id())
            .field("alg", &self.algorithm())
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl KeyMaterial {
    /// Build key material from a public JWK and optional private key bytes.
    ///
    /// # Errors
    ///
    /// As for [`KeyMaterial::set_keys`].
    pub fn new(public_key: Jwk, private_key: Option<Vec<u8>>) -> EnvelopeResult<Self> {
        let mut material = Self::default();
        material.set_keys(public_key, private_key)?;
        Ok(material)
    }

    /// Public-only key material, for example a trusted signer or an invited recipient.
    pub fn from_public(public_key: Jwk) -> EnvelopeResult<Self> {
        Self::new(public_key.public_view(), None)
    }

    /// Replace both keys at once.
    ///
    /// The public JWK is validated, a private `d` member is moved out of it, the private key (if
    /// any) must derive the same public key, and a missing `kid` is filled with the JWK
    /// thumbprint. On any failure neither field changes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidKey`] if the JWK is unsupported or malformed, if its
    /// `alg` does not fit the key type, or if the private key does not match.
    pub fn set_keys(
        &mut self,
        public_key: Jwk,
        private_key: Option<Vec<u8>>,
    ) -> EnvelopeResult<()> {
        let (public_key, private_key) = validate_pair(public_key, private_key)?;
        self.public_key = public_key;
        self.private_key = private_key;
        Ok(())
    }

    /// Public view of the key; private members are always stripped.
    pub fn public_key(&self) -> Jwk {
        self.public_key.public_view()
    }

    /// The key id, or an empty string when no key is set.
    pub fn key_id(&self) -> &str {
        self.public_key.kid.as_deref().unwrap_or("")
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.public_key.alg.as_deref()
    }

    pub fn family(&self) -> Option<KeyFamily> {
        self.public_key.family()
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Raw private key bytes in the family encoding listed in the module docs.
    ///
    /// Intended for writing key files; the envelope pipeline never exports private keys.
    pub fn export_private_key(&self) -> Option<&[u8]> {
        self.private_key.as_ref().map(|bytes| bytes.as_slice())
    }

    pub(crate) fn private_bytes(&self) -> EnvelopeResult<&[u8]> {
        self.export_private_key()
            .ok_or_else(|| EnvelopeError::KeyMissing {
                kid: self.key_id().to_string(),
            })
    }

    /// Generate a fresh key for `alg` (a signature or key-management algorithm name).
    ///
    /// RSA keys use a 2048-bit modulus.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::AlgorithmUnsupported`] for unknown algorithms.
    pub fn generate(alg: &str) -> EnvelopeResult<Self> {
        Self::generate_rsa(alg, DEFAULT_RSA_BITS)
    }

    /// Generate a fresh key, using `rsa_bits` when `alg` is an RSA algorithm.
    pub fn generate_rsa(alg: &str, rsa_bits: usize) -> EnvelopeResult<Self> {
        let (family, key_use) = key_algorithm(alg)?;
        let private = generate_private(family, rsa_bits)?;
        Self::from_private(family, alg, key_use, private)
    }

    /// Import a PKCS#8 PEM private key (P-256 or RSA).
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidKey`] if the PEM does not hold a key of the family `alg`
    /// requires.
    pub fn from_pkcs8_pem(pem: &str, alg: &str) -> EnvelopeResult<Self> {
        let (family, key_use) = key_algorithm(alg)?;
        let invalid = |e: String| EnvelopeError::InvalidKey(format!("PKCS#8 private key: {e}"));
        let private = match family {
            KeyFamily::EcP256 => p256::SecretKey::from_pkcs8_pem(pem)
                .map_err(|e| invalid(e.to_string()))?
                .to_bytes()
                .to_vec(),
            KeyFamily::Rsa => RsaPrivateKey::from_pkcs8_pem(pem)
                .map_err(|e| invalid(e.to_string()))?
                .to_pkcs8_der()
                .map_err(|e| invalid(e.to_string()))?
                .as_bytes()
                .to_vec(),
            other => {
                return Err(EnvelopeError::InvalidKey(format!(
                    "PKCS#8 import is not supported for {other:?} keys"
                )))
            }
        };
        Self::from_private(family, alg, key_use, Zeroizing::new(private))
    }

    /// Attach an X.509 certificate (PEM or DER) as the JWK `x5c` chain.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::CertificateKeyMismatch`] if the certificate's subject public
    /// key is not this key.
    pub fn with_certificate(mut self, certificate: &[u8]) -> EnvelopeResult<Self> {
        let der = certificate_der(certificate)?;
        ensure_certificate_matches(&self.public_key, &der)?;
        self.public_key.x5c = Some(vec![b64::encode_standard(&der)]);
        Ok(self)
    }

    fn from_private(
        family: KeyFamily,
        alg: &str,
        key_use: &str,
        private: Zeroizing<Vec<u8>>,
    ) -> EnvelopeResult<Self> {
        let mut public = derive_public(family, &private)?;
        public.alg = Some(alg.to_string());
        public.key_use = Some(key_use.to_string());
        Self::new(public, Some(private.to_vec()))
    }
}

/// Check that the leaf certificate of an `x5c` chain carries `public`.
pub(crate) fn ensure_chain_matches(public: &Jwk, x5c: &[String]) -> EnvelopeResult<()> {
    let leaf = x5c.first().ok_or_else(|| {
        EnvelopeError::InvalidInput("x5c certificate chain is empty".into())
    })?;
    let der = b64::decode_standard(leaf)
        .map_err(|e| EnvelopeError::InvalidInput(format!("x5c is not base64: {e}")))?;
    ensure_certificate_matches(public, &der)
}

fn ensure_certificate_matches(public: &Jwk, der: &[u8]) -> EnvelopeResult<()> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| EnvelopeError::InvalidInput(format!("failed to parse certificate: {e}")))?;
    let subject_key: &[u8] = &cert.public_key().subject_public_key.data;

    let matches = match public.require_family()? {
        KeyFamily::EcP256 | KeyFamily::EcP384 | KeyFamily::EcP521 => {
            public.sec1_point()? == subject_key
        }
        KeyFamily::Rsa => match RsaPublicKey::from_pkcs1_der(subject_key) {
            Ok(certified) => certified == public.rsa_public_key()?,
            Err(_) => false,
        },
        KeyFamily::Ed25519 | KeyFamily::X25519 => public.okp_key()?.as_slice() == subject_key,
    };

    if matches {
        Ok(())
    } else {
        Err(EnvelopeError::CertificateKeyMismatch {
            kid: public.kid.clone().unwrap_or_default(),
        })
    }
}

fn certificate_der(bytes: &[u8]) -> EnvelopeResult<Vec<u8>> {
    const PEM_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";
    if bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER) {
        let (_, pem) = x509_parser::pem::parse_x509_pem(bytes)
            .map_err(|e| EnvelopeError::InvalidInput(format!("failed to parse PEM: {e}")))?;
        Ok(pem.contents.to_vec())
    } else {
        Ok(bytes.to_vec())
    }
}

fn key_algorithm(alg: &str) -> EnvelopeResult<(KeyFamily, &'static str)> {
    if let Some(algorithm) = SignatureAlgorithm::from_jose(alg) {
        return Ok((algorithm.family(), "sig"));
    }
    if let Some(algorithm) = KeyManagementAlgorithm::from_jose(alg) {
        return Ok((algorithm.family(), "enc"));
    }
    Err(EnvelopeError::unsupported(alg, Stage::Keys))
}

fn alg_fits_family(alg: &str, family: KeyFamily) -> bool {
    SignatureAlgorithm::from_jose(alg)
        .map(SignatureAlgorithm::family)
        .or_else(|| KeyManagementAlgorithm::from_jose(alg).map(KeyManagementAlgorithm::family))
        == Some(family)
}

type ValidatedPair = (Jwk, Option<Zeroizing<Vec<u8>>>);

fn validate_pair(mut public: Jwk, private: Option<Vec<u8>>) -> EnvelopeResult<ValidatedPair> {
    let family = public.require_family()?;

    if let Some(alg) = public.alg.as_deref() {
        if !alg_fits_family(alg, family) {
            return Err(EnvelopeError::InvalidKey(format!(
                "algorithm '{alg}' cannot be used with {} keys",
                public.kty
            )));
        }
    }

    let embedded = public.d.take().map(Zeroizing::new);
    let private = match (private, embedded) {
        (Some(bytes), _) => Some(Zeroizing::new(bytes)),
        (None, Some(_)) if family == KeyFamily::Rsa => {
            return Err(EnvelopeError::InvalidKey(
                "RSA private keys must be imported as PKCS#8".into(),
            ))
        }
        (None, Some(d)) => Some(Zeroizing::new(b64::decode_url(&d).map_err(|e| {
            EnvelopeError::InvalidKey(format!("JWK member 'd': {e}"))
        })?)),
        (None, None) => None,
    };

    public.validate_public_members(family)?;

    if let Some(bytes) = &private {
        let derived = derive_public(family, bytes)?;
        if !derived.same_public_key(&public) {
            return Err(EnvelopeError::InvalidKey(
                "private key does not match public key".into(),
            ));
        }
    }

    if public.kid.as_deref().map_or(true, |kid| kid.trim().is_empty()) {
        public.kid = Some(public.thumbprint()?);
    }

    Ok((public, private))
}

fn to_array32(bytes: &[u8]) -> EnvelopeResult<[u8; 32]> {
    bytes.try_into().map_err(|_| {
        EnvelopeError::InvalidKey(format!("expected 32 key bytes, got {}", bytes.len()))
    })
}

fn ec_jwk(family: KeyFamily, x: Option<&[u8]>, y: Option<&[u8]>) -> EnvelopeResult<Jwk> {
    let (Some(x), Some(y)) = (x, y) else {
        return Err(EnvelopeError::InvalidKey(
            "EC public key is the identity point".into(),
        ));
    };
    Ok(Jwk {
        kty: family.kty().to_string(),
        crv: family.crv().map(String::from),
        x: Some(b64::encode_url(x)),
        y: Some(b64::encode_url(y)),
        ..Jwk::default()
    })
}

fn okp_jwk(family: KeyFamily, x: &[u8]) -> Jwk {
    Jwk {
        kty: family.kty().to_string(),
        crv: family.crv().map(String::from),
        x: Some(b64::encode_url(x)),
        ..Jwk::default()
    }
}

/// Derive the public JWK members from private key bytes.
fn derive_public(family: KeyFamily, private: &[u8]) -> EnvelopeResult<Jwk> {
    let invalid = |e: String| EnvelopeError::InvalidKey(format!("private key: {e}"));
    match family {
        KeyFamily::EcP256 => {
            let secret = p256::SecretKey::from_slice(private).map_err(|e| invalid(e.to_string()))?;
            let point = secret.public_key().to_encoded_point(false);
            ec_jwk(
                family,
                point.x().map(|x| x.as_slice()),
                point.y().map(|y| y.as_slice()),
            )
        }
        KeyFamily::EcP384 => {
            let secret = p384::SecretKey::from_slice(private).map_err(|e| invalid(e.to_string()))?;
            let point = secret.public_key().to_encoded_point(false);
            ec_jwk(
                family,
                point.x().map(|x| x.as_slice()),
                point.y().map(|y| y.as_slice()),
            )
        }
        KeyFamily::EcP521 => {
            let secret = p521::SecretKey::from_slice(private).map_err(|e| invalid(e.to_string()))?;
            let point = secret.public_key().to_encoded_point(false);
            ec_jwk(
                family,
                point.x().map(|x| x.as_slice()),
                point.y().map(|y| y.as_slice()),
            )
        }
        KeyFamily::Rsa => {
            let key = RsaPrivateKey::from_pkcs8_der(private).map_err(|e| invalid(e.to_string()))?;
            Ok(Jwk {
                kty: family.kty().to_string(),
                n: Some(b64::encode_url(&key.n().to_bytes_be())),
                e: Some(b64::encode_url(&key.e().to_bytes_be())),
                ..Jwk::default()
            })
        }
        KeyFamily::Ed25519 => {
            let key = ed25519_dalek::SigningKey::from_bytes(&to_array32(private)?);
            Ok(okp_jwk(family, key.verifying_key().as_bytes()))
        }
        KeyFamily::X25519 => {
            let secret = x25519_dalek::StaticSecret::from(to_array32(private)?);
            let public = x25519_dalek::PublicKey::from(&secret);
            Ok(okp_jwk(family, public.as_bytes()))
        }
    }
}

fn generate_private(family: KeyFamily, rsa_bits: usize) -> EnvelopeResult<Zeroizing<Vec<u8>>> {
    let bytes = match family {
        KeyFamily::EcP256 => p256::SecretKey::random(&mut OsRng).to_bytes().to_vec(),
        KeyFamily::EcP384 => p384::SecretKey::random(&mut OsRng).to_bytes().to_vec(),
        KeyFamily::EcP521 => p521::SecretKey::random(&mut OsRng).to_bytes().to_vec(),
        KeyFamily::Rsa => {
            let invalid = |e: String| EnvelopeError::InvalidKey(format!("RSA generation: {e}"));
            RsaPrivateKey::new(&mut OsRng, rsa_bits)
                .map_err(|e| invalid(e.to_string()))?
                .to_pkcs8_der()
                .map_err(|e| invalid(e.to_string()))?
                .as_bytes()
                .to_vec()
        }
        KeyFamily::Ed25519 => ed25519_dalek::SigningKey::generate(&mut OsRng)
            .to_bytes()
            .to_vec(),
        KeyFamily::X25519 => x25519_dalek::StaticSecret::random_from_rng(OsRng)
            .to_bytes()
            .to_vec(),
    };
    Ok(Zeroizing::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_thumbprint_kid_and_no_private_members() {
        let key = KeyMaterial::generate("ES256").unwrap();

        let public = key.public_key();
        assert_eq!(public.kty, "EC");
        assert_eq!(public.crv.as_deref(), Some("P-256"));
        assert!(public.d.is_none());
        assert_eq!(key.key_id(), public.thumbprint().unwrap());
        assert_eq!(public.key_use.as_deref(), Some("sig"));
        assert!(key.has_private_key());
    }

    #[test]
    fn empty_material_has_empty_key_id() {
        let key = KeyMaterial::default();
        assert_eq!(key.key_id(), "");
        assert!(!key.has_private_key());
    }

    #[test]
    fn rfc7638_thumbprint_matches_reference_vector() {
        let jwk = Jwk {
            kty: "RSA".into(),
            n: Some(
                "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".into(),
            ),
            e: Some("AQAB".into()),
            ..Jwk::default()
        };
        assert_eq!(
            jwk.thumbprint().unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn private_d_member_is_moved_out_of_the_jwk() {
        let generated = KeyMaterial::generate("EdDSA").unwrap();
        let mut jwk = generated.public_key();
        jwk.d = Some(b64::encode_url(generated.export_private_key().unwrap()));

        let imported = KeyMaterial::new(jwk, None).unwrap();

        assert!(imported.has_private_key());
        assert!(imported.public_key().d.is_none());
        assert_eq!(imported.key_id(), generated.key_id());
    }

    #[test]
    fn set_keys_is_atomic_on_mismatch() {
        let mut key = KeyMaterial::generate("ES256").unwrap();
        let original_kid = key.key_id().to_string();
        let other = KeyMaterial::generate("ES256").unwrap();

        let private = key.export_private_key().map(|bytes| bytes.to_vec());

        let err = key.set_keys(other.public_key(), private).unwrap_err();

        assert!(matches!(err, EnvelopeError::InvalidKey(_)));
        assert_eq!(key.key_id(), original_kid);
        assert!(key.has_private_key());
    }

    #[test]
    fn rejects_algorithm_for_wrong_key_type() {
        let mut jwk = KeyMaterial::generate("ES256").unwrap().public_key();
        jwk.alg = Some("RS256".into());
        let err = KeyMaterial::from_public(jwk).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidKey(_)));
    }

    #[test]
    fn generate_rejects_unknown_algorithm() {
        let err = KeyMaterial::generate("HS256").unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::AlgorithmUnsupported { stage: Stage::Keys, .. }
        ));
    }

    #[test]
    fn debug_output_redacts_private_material() {
        let key = KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains(key.key_id()));
    }

    #[test]
    fn generates_every_curve_family() {
        for alg in ["ES384", "ES512", "EdDSA", "ECDH-ES+A256GCMKW"] {
            let key = KeyMaterial::generate(alg).unwrap();
            assert_eq!(key.algorithm(), Some(alg));
            assert!(!key.key_id().is_empty());
        }
    }

    #[test]
    fn generates_small_rsa_keys_for_tests() {
        let key = KeyMaterial::generate_rsa("RSA-OAEP-256", 1024).unwrap();
        assert_eq!(key.family(), Some(KeyFamily::Rsa));
        assert_eq!(key.public_key().key_use.as_deref(), Some("enc"));
    }
}
