//! Constants shared across the envelope pipeline.

/// Default size floor below which payloads are not compressed.
pub const DEFAULT_COMPRESSION_FLOOR: usize = 128;

/// Upper bound on inflated payload size.
pub const DEFAULT_MAX_INFLATED_SIZE: usize = 16 * 1024 * 1024;

/// Default RSA modulus size for generated keys.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// JOSE/COSE name for raw DEFLATE compression.
pub const ZIP_DEFLATE: &str = "DEF";

/// Content-encryption algorithm used for every encrypted layer.
pub const CONTENT_ENCRYPTION: &str = "A256GCM";

/// `alg` value of an unsigned JWS.
pub const ALG_NONE: &str = "none";

/// Default `typ` values per encoding.
pub const TYP_COMPACT: &str = "JWT";
pub const TYP_GENERAL: &str = "JOSE+JSON";

/// `cty` marking a nested signed object inside an encrypted layer.
pub const NESTED_COMPACT: &str = "JWT";
pub const NESTED_GENERAL: &str = "JOSE+JSON";
pub const NESTED_COSE: &str = "application/cose; cose-type=\"cose-sign1\"";

/// `crit` entries this implementation understands.
pub const UNDERSTOOD_CRITICAL: &[&str] = &["b64", "exp"];

// ============================================================================
// COSE
// ============================================================================

/// COSE structure kinds keyed by CBOR tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoseStructure {
    Sign,
    Sign1,
    Mac,
    Mac0,
    Encrypt,
    Encrypt0,
}

/// `(CBOR tag, structure)`.
pub const COSE_TAGS: &[(u64, CoseStructure)] = &[
    (98, CoseStructure::Sign),
    (18, CoseStructure::Sign1),
    (97, CoseStructure::Mac),
    (17, CoseStructure::Mac0),
    (96, CoseStructure::Encrypt),
    (16, CoseStructure::Encrypt0),
];

impl CoseStructure {
    pub fn from_tag(tag: u64) -> Option<Self> {
        COSE_TAGS
            .iter()
            .find(|(candidate, _)| *candidate == tag)
            .map(|(_, structure)| *structure)
    }

    pub fn tag(self) -> u64 {
        COSE_TAGS
            .iter()
            .find(|(_, structure)| *structure == self)
            .map(|(tag, _)| *tag)
            .unwrap_or_default()
    }
}

/// COSE common header labels.
pub const COSE_LABEL_ALG: i64 = 1;
pub const COSE_LABEL_CRIT: i64 = 2;
pub const COSE_LABEL_CONTENT_TYPE: i64 = 3;
pub const COSE_LABEL_KID: i64 = 4;
pub const COSE_LABEL_IV: i64 = 5;
pub const COSE_LABEL_CWT_CLAIMS: i64 = 15;
pub const COSE_LABEL_TYP: i64 = 16;
pub const COSE_LABEL_X5CHAIN: i64 = 33;
pub const COSE_LABEL_EPK: i64 = -1;
/// Private text label recording payload compression.
pub const COSE_LABEL_ZIP: &str = "zip";
/// Private text label carrying the key-wrap tag of a recipient.
pub const COSE_LABEL_WRAP_TAG: &str = "tag";

/// COSE_Key labels and values used for ephemeral X25519 keys.
pub const COSE_KEY_KTY: i64 = 1;
pub const COSE_KEY_CRV: i64 = -1;
pub const COSE_KEY_X: i64 = -2;
pub const COSE_KTY_OKP: i64 = 1;
pub const COSE_CRV_X25519: i64 = 4;

/// CWT claim names and their integer keys.
pub const CWT_CLAIM_KEYS: &[(&str, i64)] = &[
    ("iss", 1),
    ("sub", 2),
    ("aud", 3),
    ("exp", 4),
    ("nbf", 5),
    ("iat", 6),
    ("cti", 7),
];

pub fn cwt_claim_key(name: &str) -> Option<i64> {
    CWT_CLAIM_KEYS
        .iter()
        .find(|(claim, _)| *claim == name)
        .map(|(_, key)| *key)
}

pub fn cwt_claim_name(key: i64) -> Option<&'static str> {
    CWT_CLAIM_KEYS
        .iter()
        .find(|(_, candidate)| *candidate == key)
        .map(|(claim, _)| *claim)
}

// ============================================================================
// Environment variable names read by the CLI at startup
// ============================================================================

pub const ENV_COMPRESSION_FLOOR: &str = "VPR_COMPRESSION_FLOOR";
pub const ENV_DEFAULT_EXPIRY_SECS: &str = "VPR_DEFAULT_EXPIRY_SECS";
pub const ENV_ALLOW_PLAINTEXT: &str = "VPR_ALLOW_PLAINTEXT";
pub const ENV_EDDSA: &str = "VPR_EDDSA";
pub const ENV_SNIFF_COMPRESSION: &str = "VPR_SNIFF_COMPRESSION";
