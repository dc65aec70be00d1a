use std::fmt;

/// Pipeline stage an error was raised in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Keys,
    Canonicalize,
    Compress,
    Sign,
    Encrypt,
    Serialize,
    Parse,
    Header,
    Verify,
    Decrypt,
    Decompress,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Keys => "keys",
            Self::Canonicalize => "canonicalize",
            Self::Compress => "compress",
            Self::Sign => "sign",
            Self::Encrypt => "encrypt",
            Self::Serialize => "serialize",
            Self::Parse => "parse",
            Self::Header => "header",
            Self::Verify => "verify",
            Self::Decrypt => "decrypt",
            Self::Decompress => "decompress",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("no private key available (kid: '{kid}')")]
    KeyMissing { kid: String },

    #[error("unsupported algorithm '{alg}' at {stage} stage")]
    AlgorithmUnsupported { alg: String, stage: Stage },

    #[error("duplicate resource identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("role '{role}' is not permitted to {action}")]
    RoleViolation { role: String, action: String },

    #[error("verification failed at {stage} stage: {reason}")]
    VerificationFailed { stage: Stage, reason: String },

    #[error("failed to unwrap content key for kid '{kid}': {reason}")]
    UnwrapFailed { kid: String, reason: String },

    #[error("envelope has no entry for recipient kid '{kid}'")]
    RecipientNotFound { kid: String },

    #[error("envelope expired at {expired_at}")]
    EnvelopeExpired {
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("malformed envelope at {stage} stage: {reason}")]
    MalformedEnvelope { stage: Stage, reason: String },

    #[error("compression error: {0}")]
    CompressionError(String),

    #[error("certificate public key does not match key '{kid}'")]
    CertificateKeyMismatch { kid: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource error: {0}")]
    Resource(#[from] fhir::FhirError),

    #[error("failed to serialize: {0}")]
    Serialization(serde_json::Error),
}

impl EnvelopeError {
    pub(crate) fn verification(stage: Stage, reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            stage,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(stage: Stage, reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            stage,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(alg: impl Into<String>, stage: Stage) -> Self {
        Self::AlgorithmUnsupported {
            alg: alg.into(),
            stage,
        }
    }
}

pub type EnvelopeResult<T> = std::result::Result<T, EnvelopeError>;
