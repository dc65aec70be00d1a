//! Algorithm registries.
//!
//! Each registry is a static table read in both directions: JOSE name to COSE identifier and
//! back. Unknown names and identifiers resolve to `None`; callers turn that into
//! `AlgorithmUnsupported` before any key material is touched.

use std::fmt;

/// Key families a [`crate::KeyMaterial`] can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    EcP256,
    EcP384,
    EcP521,
    Rsa,
    Ed25519,
    X25519,
}

/// `(family, kty, crv)`. RSA keys carry no curve.
const KEY_FAMILIES: &[(KeyFamily, &str, Option<&str>)] = &[
    (KeyFamily::EcP256, "EC", Some("P-256")),
    (KeyFamily::EcP384, "EC", Some("P-384")),
    (KeyFamily::EcP521, "EC", Some("P-521")),
    (KeyFamily::Rsa, "RSA", None),
    (KeyFamily::Ed25519, "OKP", Some("Ed25519")),
    (KeyFamily::X25519, "OKP", Some("X25519")),
];

impl KeyFamily {
    pub fn from_jwk_members(kty: &str, crv: Option<&str>) -> Option<Self> {
        KEY_FAMILIES
            .iter()
            .find(|(_, candidate_kty, candidate_crv)| {
                *candidate_kty == kty && (candidate_crv.is_none() || *candidate_crv == crv)
            })
            .map(|(family, _, _)| *family)
    }

    pub fn kty(self) -> &'static str {
        KEY_FAMILIES
            .iter()
            .find(|(family, _, _)| *family == self)
            .map(|(_, kty, _)| *kty)
            .unwrap_or_default()
    }

    pub fn crv(self) -> Option<&'static str> {
        KEY_FAMILIES
            .iter()
            .find(|(family, _, _)| *family == self)
            .and_then(|(_, _, crv)| *crv)
    }
}

/// Signature algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Es256,
    Es384,
    Es512,
    Rs256,
    Rs384,
    Rs512,
    EdDsa,
}

/// `(algorithm, JOSE name, COSE id, digest)`.
const SIGNATURE_ALGORITHMS: &[(SignatureAlgorithm, &str, i64, &str)] = &[
    (SignatureAlgorithm::Es256, "ES256", -7, "SHA-256"),
    (SignatureAlgorithm::Es384, "ES384", -35, "SHA-384"),
    (SignatureAlgorithm::Es512, "ES512", -36, "SHA-512"),
    (SignatureAlgorithm::EdDsa, "EdDSA", -8, "SHA-512"),
    (SignatureAlgorithm::Rs256, "RS256", -257, "SHA-256"),
    (SignatureAlgorithm::Rs384, "RS384", -258, "SHA-384"),
    (SignatureAlgorithm::Rs512, "RS512", -259, "SHA-512"),
];

impl SignatureAlgorithm {
    pub fn from_jose(name: &str) -> Option<Self> {
        SIGNATURE_ALGORITHMS
            .iter()
            .find(|(_, jose, _, _)| *jose == name)
            .map(|(alg, _, _, _)| *alg)
    }

    pub fn from_cose(id: i64) -> Option<Self> {
        SIGNATURE_ALGORITHMS
            .iter()
            .find(|(_, _, cose, _)| *cose == id)
            .map(|(alg, _, _, _)| *alg)
    }

    fn entry(self) -> (&'static str, i64, &'static str) {
        SIGNATURE_ALGORITHMS
            .iter()
            .find(|(alg, _, _, _)| *alg == self)
            .map(|(_, jose, cose, digest)| (*jose, *cose, *digest))
            .unwrap_or(("", 0, ""))
    }

    pub fn as_str(self) -> &'static str {
        self.entry().0
    }

    pub fn cose_id(self) -> i64 {
        self.entry().1
    }

    pub fn digest(self) -> &'static str {
        self.entry().2
    }

    pub fn family(self) -> KeyFamily {
        match self {
            Self::Es256 => KeyFamily::EcP256,
            Self::Es384 => KeyFamily::EcP384,
            Self::Es512 => KeyFamily::EcP521,
            Self::Rs256 | Self::Rs384 | Self::Rs512 => KeyFamily::Rsa,
            Self::EdDsa => KeyFamily::Ed25519,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-key management algorithms.
///
/// `ECDH-ES+A256GCMKW` has no registered COSE identifier; it uses a private-use value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyManagementAlgorithm {
    RsaOaep256,
    EcdhEsA256GcmKw,
}

/// `(algorithm, JOSE name, COSE id)`.
const KEY_MANAGEMENT_ALGORITHMS: &[(KeyManagementAlgorithm, &str, i64)] = &[
    (KeyManagementAlgorithm::RsaOaep256, "RSA-OAEP-256", -41),
    (
        KeyManagementAlgorithm::EcdhEsA256GcmKw,
        "ECDH-ES+A256GCMKW",
        -65537,
    ),
];

impl KeyManagementAlgorithm {
    pub fn from_jose(name: &str) -> Option<Self> {
        KEY_MANAGEMENT_ALGORITHMS
            .iter()
            .find(|(_, jose, _)| *jose == name)
            .map(|(alg, _, _)| *alg)
    }

    pub fn from_cose(id: i64) -> Option<Self> {
        KEY_MANAGEMENT_ALGORITHMS
            .iter()
            .find(|(_, _, cose)| *cose == id)
            .map(|(alg, _, _)| *alg)
    }

    pub fn as_str(self) -> &'static str {
        KEY_MANAGEMENT_ALGORITHMS
            .iter()
            .find(|(alg, _, _)| *alg == self)
            .map(|(_, jose, _)| *jose)
            .unwrap_or_default()
    }

    pub fn cose_id(self) -> i64 {
        KEY_MANAGEMENT_ALGORITHMS
            .iter()
            .find(|(alg, _, _)| *alg == self)
            .map(|(_, _, cose)| *cose)
            .unwrap_or_default()
    }

    pub fn family(self) -> KeyFamily {
        match self {
            Self::RsaOaep256 => KeyFamily::Rsa,
            Self::EcdhEsA256GcmKw => KeyFamily::X25519,
        }
    }

    /// Default key-management algorithm for a recipient key family.
    pub fn for_family(family: KeyFamily) -> Option<Self> {
        match family {
            KeyFamily::Rsa => Some(Self::RsaOaep256),
            KeyFamily::X25519 => Some(Self::EcdhEsA256GcmKw),
            _ => None,
        }
    }
}

impl fmt::Display for KeyManagementAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// COSE identifier of A256GCM.
pub const COSE_A256GCM: i64 = 3;
