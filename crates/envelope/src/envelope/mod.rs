//! Envelope pipeline.
//!
//! Sealing runs a fixed sequence of stages:
//! - canonicalize the composition into a FHIR bundle
//! - compress (DEFLATE) above the configured floor
//! - sign, if a signer is given
//! - encrypt for every recipient under one content key
//! - serialize in the requested [`Encoding`]
//!
//! Opening reverses it and only rebuilds a [`Composition`] once every stage has validated.
//! A signed and encrypted envelope nests the signed object inside the encryption layer.
//!
//! ## Wire encodings
//!
//! | Encoding | Signed | Encrypted |
//! |---|---|---|
//! | `Compact` | JWS compact (3 segments) | JWE compact (5 segments, one recipient) |
//! | `General` | flattened JWS JSON | general JWE JSON |
//! | `Tagged` | COSE_Sign1 (tag 18) | COSE_Encrypt (tag 96) |

mod cose;
mod header;
mod jose;

pub use header::Claims;

use crate::access::{Access, Action};
use crate::algorithms::SignatureAlgorithm;
use crate::b64;
use crate::composition::Composition;
use crate::compression::{self, Compression};
use crate::config::EnvelopeConfig;
use crate::constants::{ALG_NONE, CONTENT_ENCRYPTION, TYP_COMPACT, TYP_GENERAL};
use crate::crypto::{
    content, ContentKey, CryptographicEncryption, CryptographicSignature, RecipientEntry,
};
use crate::error::Stage;
use crate::keys::{ensure_chain_matches, KeyMaterial};
use crate::transport::TransportMessage;
use crate::{EnvelopeError, EnvelopeResult};
use chrono::{DateTime, Duration, Utc};
use header::Header;
use std::fmt;
use vpr_types::ContentType;

/// Wire encoding of an envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    #[default]
    Compact,
    General,
    Tagged,
}

impl Encoding {
    pub const ALL: [Encoding; 3] = [Self::Compact, Self::General, Self::Tagged];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::General => "general",
            Self::Tagged => "tagged",
        }
    }

    /// `typ` stamped when the caller does not choose one.
    pub const fn default_typ(self) -> Option<&'static str> {
        match self {
            Self::Compact => Some(TYP_COMPACT),
            Self::General => Some(TYP_GENERAL),
            Self::Tagged => None,
        }
    }

    pub fn parse(input: &str) -> EnvelopeResult<Self> {
        let lowered = input.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|encoding| encoding.as_str() == lowered)
            .ok_or_else(|| EnvelopeError::InvalidInput(format!("unknown encoding '{input}'")))
    }

    fn codec(self) -> &'static dyn Codec {
        match self {
            Self::Compact => &jose::CompactCodec,
            Self::General => &jose::GeneralCodec,
            Self::Tagged => &cose::TaggedCodec,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protection level of an envelope, read from its outermost layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protection {
    Plain,
    Signed,
    Encrypted,
}

impl Protection {
    /// DIDComm media type for an envelope at this protection level.
    pub const fn media_type(self) -> ContentType {
        match self {
            Self::Plain => ContentType::DidcommPlain,
            Self::Signed => ContentType::DidcommSigned,
            Self::Encrypted => ContentType::DidcommEncrypted,
        }
    }
}

/// A sealed envelope in one of the three wire encodings.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Compact(String),
    General(serde_json::Value),
    Tagged(Vec<u8>),
}

impl Envelope {
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Compact(_) => Encoding::Compact,
            Self::General(_) => Encoding::General,
            Self::Tagged(_) => Encoding::Tagged,
        }
    }

    /// Read an envelope of unknown encoding.
    ///
    /// A leading CBOR tag byte selects `Tagged`, a leading `{` selects `General`, anything else
    /// is read as a compact token.
    pub fn from_bytes(bytes: &[u8]) -> EnvelopeResult<Self> {
        let encoding = match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            None => {
                return Err(EnvelopeError::malformed(Stage::Parse, "envelope is empty"));
            }
            Some(0xc0..=0xdb) => Encoding::Tagged,
            Some(b'{') => Encoding::General,
            Some(_) => Encoding::Compact,
        };
        Self::decode(encoding, bytes).map_err(|e| match e {
            EnvelopeError::VerificationFailed { reason, .. } => {
                EnvelopeError::malformed(Stage::Parse, reason)
            }
            other => other,
        })
    }

    /// Read bytes known to be in `encoding`.
    pub(crate) fn decode(encoding: Encoding, bytes: &[u8]) -> EnvelopeResult<Self> {
        let invalid = |reason: String| EnvelopeError::verification(Stage::Parse, reason);
        match encoding {
            Encoding::Compact => std::str::from_utf8(bytes)
                .map(|text| Self::Compact(text.trim().to_string()))
                .map_err(|_| invalid("compact envelope is not UTF-8".into())),
            Encoding::General => serde_json::from_slice(bytes)
                .map(Self::General)
                .map_err(|e| invalid(format!("general envelope is not JSON: {e}"))),
            Encoding::Tagged => Ok(Self::Tagged(bytes.to_vec())),
        }
    }

    pub fn to_bytes(&self) -> EnvelopeResult<Vec<u8>> {
        match self {
            Self::Compact(token) => Ok(token.as_bytes().to_vec()),
            Self::General(value) => serde_json::to_vec(value).map_err(EnvelopeError::Serialization),
            Self::Tagged(bytes) => Ok(bytes.clone()),
        }
    }

    /// Protection of the outermost layer, from structure alone. Nothing is verified.
    pub fn protection(&self) -> Protection {
        match self {
            Self::Compact(token) => {
                let segments: Vec<&str> = token.split('.').collect();
                match segments.as_slice() {
                    [_, _, _, _, _] => Protection::Encrypted,
                    [_, _, signature] if !signature.is_empty() => Protection::Signed,
                    _ => Protection::Plain,
                }
            }
            Self::General(value) => {
                if value.get("ciphertext").is_some() {
                    Protection::Encrypted
                } else if value.get("signatures").is_some()
                    || value
                        .get("signature")
                        .and_then(serde_json::Value::as_str)
                        .is_some_and(|signature| !signature.is_empty())
                {
                    Protection::Signed
                } else {
                    Protection::Plain
                }
            }
            Self::Tagged(bytes) => cose::protection(bytes),
        }
    }

    pub fn as_compact(&self) -> Option<&str> {
        match self {
            Self::Compact(token) => Some(token),
            _ => None,
        }
    }
}

/// When a sealed envelope stops being accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Expiration {
    /// The configured default expiry, or none if unset.
    #[default]
    Default,
    /// No `exp`, even when a default is configured.
    Never,
    At(DateTime<Utc>),
    In(Duration),
}

/// Options for one seal.
#[derive(Clone, Debug, Default)]
pub struct SealRequest<'a> {
    encoding: Encoding,
    signer: Option<(&'a KeyMaterial, String)>,
    recipients: &'a [KeyMaterial],
    compression: Compression,
    expiration: Expiration,
    content_type: Option<String>,
    typ: Option<String>,
    issuer: Option<String>,
    subject: Option<String>,
    audience: Option<String>,
}

impl<'a> SealRequest<'a> {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            ..Self::default()
        }
    }

    pub fn signed_by(mut self, key: &'a KeyMaterial, alg: impl Into<String>) -> Self {
        self.signer = Some((key, alg.into()));
        self
    }

    pub fn encrypted_for(mut self, recipients: &'a [KeyMaterial]) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn compressed(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn expires(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Override the payload content type (default `application/fhir+json`).
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn typ(mut self, typ: impl Into<String>) -> Self {
        self.typ = Some(typ.into());
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn claims(&self, now: DateTime<Utc>, default_expiry: Option<Duration>) -> Claims {
        let exp = match self.expiration {
            Expiration::Default => default_expiry.map(|lifetime| now + lifetime),
            Expiration::Never => None,
            Expiration::At(at) => Some(at),
            Expiration::In(lifetime) => Some(now + lifetime),
        };
        Claims {
            iss: self.issuer.clone(),
            sub: self.subject.clone(),
            aud: self.audience.clone(),
            exp: exp.map(|at| at.timestamp()),
            iat: Some(now.timestamp()),
            cti: Some(uuid::Uuid::new_v4().to_string()),
        }
    }
}

/// Options for one open.
#[derive(Clone, Debug, Default)]
pub struct OpenRequest<'a> {
    trusted: Vec<&'a KeyMaterial>,
    recipient: Option<&'a KeyMaterial>,
    require_signature: bool,
    at: Option<DateTime<Utc>>,
}

impl<'a> OpenRequest<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `key` to sign. Signers are matched by `kid`, and the header `alg` must equal the
    /// key's `alg`.
    pub fn trust(mut self, key: &'a KeyMaterial) -> Self {
        self.trusted.push(key);
        self
    }

    /// The caller's own key, used to unwrap the content key.
    pub fn recipient(mut self, key: &'a KeyMaterial) -> Self {
        self.recipient = Some(key);
        self
    }

    pub fn require_signature(mut self, required: bool) -> Self {
        self.require_signature = required;
        self
    }

    /// Evaluate expiry at `now` instead of the current time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.at = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.at.unwrap_or_else(Utc::now)
    }

    fn trusted_key(&self, kid: &str) -> Option<&'a KeyMaterial> {
        self.trusted.iter().copied().find(|key| key.key_id() == kid)
    }
}

/// Result of a successful open.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenedEnvelope {
    pub composition: Composition,
    pub claims: Claims,
    /// `kid` of the verified signer, if the envelope was signed.
    pub signed_by: Option<String>,
    pub content_type: ContentType,
    pub protection: Protection,
}

/// Seals and opens envelopes under one startup configuration.
#[derive(Clone, Debug, Default)]
pub struct EnvelopeService {
    config: EnvelopeConfig,
}

impl EnvelopeService {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Seal `composition`.
    ///
    /// # Errors
    ///
    /// - `RoleViolation` if the access is not allowed to seal
    /// - `AlgorithmUnsupported` for an unknown or disabled signature algorithm
    /// - `MalformedEnvelope` for an unsigned, unencrypted request without plaintext opt-in, or
    ///   a compact request with more than one recipient
    /// - key errors from signing or wrapping
    pub fn seal(
        &self,
        access: Access<'_>,
        composition: &Composition,
        request: &SealRequest<'_>,
    ) -> EnvelopeResult<Envelope> {
        access.require(Action::Seal)?;
        let payload = composition.canonical_bytes()?;
        let content_type = request
            .content_type
            .clone()
            .unwrap_or_else(|| ContentType::FhirJson.as_str().to_string());
        let typ = request
            .typ
            .clone()
            .or_else(|| request.encoding.default_typ().map(String::from));

        self.seal_bytes(payload, &content_type, &|_: Protection| typ.clone(), request)
    }

    /// Open `envelope` and rebuild its composition.
    ///
    /// A header naming an unknown or disabled signature algorithm fails with
    /// `VerificationFailed`, like any other change to signed bytes.
    pub fn open(
        &self,
        access: Access<'_>,
        envelope: &Envelope,
        request: &OpenRequest<'_>,
    ) -> EnvelopeResult<Composition> {
        self.open_detailed(access, envelope, request)
            .map(|opened| opened.composition)
    }

    /// As [`EnvelopeService::open`], also returning the verified claims and signer.
    pub fn open_detailed(
        &self,
        access: Access<'_>,
        envelope: &Envelope,
        request: &OpenRequest<'_>,
    ) -> EnvelopeResult<OpenedEnvelope> {
        access.require(Action::Open)?;
        let opened = self.open_bytes(envelope, request)?;
        if !opened.content_type.is_document() {
            return Err(EnvelopeError::malformed(
                Stage::Header,
                format!("content type '{}' is not a document", opened.content_type),
            ));
        }
        let composition = Composition::from_canonical_bytes(&opened.payload)?;
        tracing::debug!(
            encoding = %envelope.encoding(),
            resources = composition.len(),
            "opened envelope"
        );
        Ok(OpenedEnvelope {
            composition,
            claims: opened.claims,
            signed_by: opened.signed_by,
            content_type: opened.content_type,
            protection: envelope.protection(),
        })
    }

    /// Seal a transport message. `typ` follows the DIDComm media type of each layer.
    pub fn pack(
        &self,
        message: &TransportMessage,
        request: &SealRequest<'_>,
    ) -> EnvelopeResult<Envelope> {
        let payload = serde_json::to_vec(message).map_err(EnvelopeError::Serialization)?;
        self.seal_bytes(
            payload,
            ContentType::DidcommPlain.as_str(),
            &|protection: Protection| Some(protection.media_type().as_str().to_string()),
            request,
        )
    }

    /// Open a packed transport message. A message past its `expires_time` fails with
    /// `EnvelopeExpired`.
    pub fn unpack(
        &self,
        envelope: &Envelope,
        request: &OpenRequest<'_>,
    ) -> EnvelopeResult<TransportMessage> {
        let opened = self.open_bytes(envelope, request)?;
        if !matches!(
            opened.content_type,
            ContentType::DidcommPlain | ContentType::Json
        ) {
            return Err(EnvelopeError::malformed(
                Stage::Header,
                format!(
                    "content type '{}' is not a transport message",
                    opened.content_type
                ),
            ));
        }
        let message = TransportMessage::from_slice(&opened.payload)?;
        message.ensure_current(request.now())?;
        Ok(message)
    }

    fn signature_algorithm(&self, alg: &str, stage: Stage) -> EnvelopeResult<SignatureAlgorithm> {
        match SignatureAlgorithm::from_jose(alg) {
            Some(SignatureAlgorithm::EdDsa) if !self.config.edwards_curve_signatures() => {
                Err(EnvelopeError::unsupported(alg, stage))
            }
            Some(algorithm) => Ok(algorithm),
            None => Err(EnvelopeError::unsupported(alg, stage)),
        }
    }

    fn seal_bytes(
        &self,
        payload: Vec<u8>,
        content_type: &str,
        typ_for: &dyn Fn(Protection) -> Option<String>,
        request: &SealRequest<'_>,
    ) -> EnvelopeResult<Envelope> {
        let signer = request
            .signer
            .as_ref()
            .map(|(key, alg)| {
                self.signature_algorithm(alg, Stage::Sign)
                    .map(|algorithm| (*key, algorithm))
            })
            .transpose()?;
        let recipients = request.recipients;

        if signer.is_none() && recipients.is_empty() && !self.config.allow_plaintext() {
            return Err(EnvelopeError::malformed(
                Stage::Serialize,
                "envelope must be signed or encrypted unless plaintext is enabled",
            ));
        }
        if request.encoding == Encoding::Compact && recipients.len() > 1 {
            return Err(EnvelopeError::malformed(
                Stage::Serialize,
                format!(
                    "compact serialization carries one recipient, got {}",
                    recipients.len()
                ),
            ));
        }

        let codec = request.encoding.codec();
        let (payload, applied) =
            compression::compress(payload, request.compression, self.config.compression_floor())?;
        let claims = request.claims(Utc::now(), self.config.default_expiry());
        let zip = applied.header_value().map(String::from);

        let signed = match signer {
            Some((key, algorithm)) => {
                let header = Header {
                    alg: Some(algorithm.as_str().to_string()),
                    kid: Some(key.key_id().to_string()).filter(|kid| !kid.is_empty()),
                    typ: typ_for(Protection::Signed),
                    cty: Some(content_type.to_string()),
                    zip: zip.clone(),
                    x5c: key.public_key().x5c,
                    claims: claims.clone(),
                    ..Header::default()
                };
                let envelope = codec.sign(&header, &payload, key)?;
                tracing::debug!(
                    encoding = %request.encoding,
                    kid = %key.key_id(),
                    alg = %algorithm,
                    "signed payload"
                );
                Some(envelope)
            }
            None => None,
        };

        if recipients.is_empty() {
            return match signed {
                Some(envelope) => Ok(envelope),
                None => {
                    tracing::debug!(encoding = %request.encoding, "sealing plaintext envelope");
                    let header = Header {
                        alg: Some(ALG_NONE.to_string()),
                        typ: typ_for(Protection::Plain),
                        cty: Some(content_type.to_string()),
                        zip,
                        claims,
                        ..Header::default()
                    };
                    codec.unsigned(&header, &payload)
                }
            };
        }

        let (plaintext, cty, zip) = match &signed {
            Some(inner) => (inner.to_bytes()?, codec.nested_content_type(), None),
            None => (payload, content_type, zip),
        };
        let content_key = ContentKey::generate();
        let entries = KeyMaterial::encrypt_for(recipients, &content_key)?;
        let header = Header {
            enc: Some(CONTENT_ENCRYPTION.to_string()),
            typ: typ_for(Protection::Encrypted),
            cty: Some(cty.to_string()),
            zip,
            claims,
            ..Header::default()
        };
        let envelope = codec.encrypt(header, entries, &content_key, &plaintext)?;
        tracing::debug!(
            encoding = %request.encoding,
            recipients = recipients.len(),
            nested = signed.is_some(),
            "encrypted payload"
        );
        Ok(envelope)
    }

    fn open_bytes(
        &self,
        envelope: &Envelope,
        request: &OpenRequest<'_>,
    ) -> EnvelopeResult<OpenedPayload> {
        let result = self.open_layers(envelope, request);
        if let Err(err) = &result {
            tracing::warn!(encoding = %envelope.encoding(), error = %err, "failed to open envelope");
        }
        result
    }

    fn open_layers(
        &self,
        envelope: &Envelope,
        request: &OpenRequest<'_>,
    ) -> EnvelopeResult<OpenedPayload> {
        let codec = envelope.encoding().codec();
        let now = request.now();

        let (header, payload, signed_by) = match codec.parse(envelope)? {
            Layer::Signed(candidates) => {
                let (header, payload, kid) = self.verify(candidates, request)?;
                (header, payload, Some(kid))
            }
            Layer::Unsigned { header, payload } => {
                self.accept_unsigned(&header, request)?;
                header.claims.ensure_current(now)?;
                (header, payload, None)
            }
            Layer::Encrypted(layer) => {
                let (outer, plaintext) = self.decrypt(layer, request)?;
                if outer.cty.as_deref() == Some(codec.nested_content_type()) {
                    let inner = Envelope::decode(envelope.encoding(), &plaintext)?;
                    let Layer::Signed(candidates) = codec.parse(&inner)? else {
                        return Err(EnvelopeError::malformed(
                            Stage::Parse,
                            "nested content is not a signed object",
                        ));
                    };
                    let (header, payload, kid) = self.verify(candidates, request)?;
                    (header, payload, Some(kid))
                } else {
                    if request.require_signature {
                        return Err(EnvelopeError::verification(
                            Stage::Verify,
                            "envelope is encrypted but not signed",
                        ));
                    }
                    (outer, plaintext, None)
                }
            }
        };

        let applied = Compression::from_header(header.zip.as_deref())?;
        let payload = compression::decompress(
            payload,
            applied,
            self.config.sniff_compression(),
            self.config.max_inflated_size(),
        )?;

        let cty = header
            .cty
            .as_deref()
            .ok_or_else(|| EnvelopeError::malformed(Stage::Header, "missing content type"))?;
        let content_type = ContentType::negotiate(cty)
            .map_err(|e| EnvelopeError::malformed(Stage::Header, e.to_string()))?;

        Ok(OpenedPayload {
            payload,
            claims: header.claims,
            signed_by,
            content_type,
        })
    }

    /// Accept the first candidate signature that a trusted key verifies.
    fn verify(
        &self,
        candidates: Vec<SignedPart>,
        request: &OpenRequest<'_>,
    ) -> EnvelopeResult<(Header, Vec<u8>, String)> {
        let mut first_error = None;
        for candidate in candidates {
            match self.verify_one(&candidate, request) {
                Ok(kid) => {
                    candidate.header.claims.ensure_current(request.now())?;
                    tracing::debug!(kid = %kid, "signature verified");
                    return Ok((candidate.header, candidate.payload, kid));
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| {
            EnvelopeError::verification(Stage::Verify, "envelope carries no signatures")
        }))
    }

    fn verify_one(&self, part: &SignedPart, request: &OpenRequest<'_>) -> EnvelopeResult<String> {
        let header = &part.header;
        header.ensure_understood()?;

        let alg = header
            .alg
            .as_deref()
            .ok_or_else(|| EnvelopeError::verification(Stage::Header, "missing alg"))?;
        if alg == ALG_NONE {
            return Err(EnvelopeError::verification(
                Stage::Verify,
                "unsigned part among signatures",
            ));
        }
        let algorithm = self
            .signature_algorithm(alg, Stage::Verify)
            .map_err(|_| {
                EnvelopeError::verification(
                    Stage::Verify,
                    format!("header algorithm '{alg}' is not accepted"),
                )
            })?;

        let kid = header.kid.as_deref().unwrap_or_default();
        let key = request.trusted_key(kid).ok_or_else(|| {
            EnvelopeError::verification(Stage::Verify, format!("no trusted key for kid '{kid}'"))
        })?;
        if key.algorithm() != Some(algorithm.as_str()) {
            return Err(EnvelopeError::verification(
                Stage::Verify,
                format!("trusted key '{kid}' does not sign with {algorithm}"),
            ));
        }

        let public = key.public_key();
        if let Some(chain) = &header.x5c {
            ensure_chain_matches(&public, chain)?;
        }
        if !key.verify(&part.signing_input, &part.signature, &public) {
            return Err(EnvelopeError::verification(
                Stage::Verify,
                format!("signature by '{kid}' does not verify"),
            ));
        }
        Ok(kid.to_string())
    }

    fn accept_unsigned(&self, header: &Header, request: &OpenRequest<'_>) -> EnvelopeResult<()> {
        header.ensure_understood()?;
        if request.require_signature {
            return Err(EnvelopeError::verification(
                Stage::Verify,
                "envelope is not signed",
            ));
        }
        if !self.config.allow_plaintext() {
            return Err(EnvelopeError::malformed(
                Stage::Verify,
                "plaintext envelopes are not enabled",
            ));
        }
        Ok(())
    }

    fn decrypt(
        &self,
        layer: EncryptedPart,
        request: &OpenRequest<'_>,
    ) -> EnvelopeResult<(Header, Vec<u8>)> {
        layer.header.ensure_understood()?;
        match layer.header.enc.as_deref() {
            Some(CONTENT_ENCRYPTION) => {}
            Some(other) => return Err(EnvelopeError::unsupported(other, Stage::Decrypt)),
            None => return Err(EnvelopeError::verification(Stage::Header, "missing enc")),
        }

        let recipient = request.recipient.ok_or_else(|| EnvelopeError::KeyMissing {
            kid: layer
                .recipients
                .first()
                .map(|entry| entry.kid.clone())
                .unwrap_or_default(),
        })?;
        let entry = layer
            .recipients
            .iter()
            .find(|entry| entry.kid == recipient.key_id())
            .ok_or_else(|| EnvelopeError::RecipientNotFound {
                kid: recipient.key_id().to_string(),
            })?;
        let content_key = recipient.decrypt(entry)?;

        let plaintext = content::open(
            content_key.as_bytes(),
            &layer.iv,
            &layer.ciphertext,
            &layer.tag,
            &layer.aad,
        )?;
        layer.header.claims.ensure_current(request.now())?;
        tracing::debug!(kid = %recipient.key_id(), "decrypted payload");
        Ok((layer.header, plaintext))
    }
}

struct OpenedPayload {
    payload: Vec<u8>,
    claims: Claims,
    signed_by: Option<String>,
    content_type: ContentType,
}

// ============================================================================
// Codec seam
// ============================================================================

/// One signature over a payload, as found on the wire.
#[derive(Debug)]
pub(crate) struct SignedPart {
    pub(crate) header: Header,
    pub(crate) payload: Vec<u8>,
    pub(crate) signing_input: Vec<u8>,
    pub(crate) signature: Vec<u8>,
}

/// An encryption layer, as found on the wire.
#[derive(Debug)]
pub(crate) struct EncryptedPart {
    pub(crate) header: Header,
    pub(crate) aad: Vec<u8>,
    pub(crate) iv: Vec<u8>,
    pub(crate) ciphertext: Vec<u8>,
    pub(crate) tag: Vec<u8>,
    pub(crate) recipients: Vec<RecipientEntry>,
}

/// Outermost layer of a parsed envelope.
#[derive(Debug)]
pub(crate) enum Layer {
    Signed(Vec<SignedPart>),
    Unsigned { header: Header, payload: Vec<u8> },
    Encrypted(EncryptedPart),
}

/// Per-encoding serialisation of the three layer kinds.
pub(crate) trait Codec: Sync {
    /// `cty` marking a nested signed object inside an encryption layer.
    fn nested_content_type(&self) -> &'static str;

    fn sign(
        &self,
        header: &Header,
        payload: &[u8],
        signer: &KeyMaterial,
    ) -> EnvelopeResult<Envelope>;

    fn unsigned(&self, header: &Header, payload: &[u8]) -> EnvelopeResult<Envelope>;

    fn encrypt(
        &self,
        header: Header,
        entries: Vec<RecipientEntry>,
        content_key: &ContentKey,
        plaintext: &[u8],
    ) -> EnvelopeResult<Envelope>;

    fn parse(&self, envelope: &Envelope) -> EnvelopeResult<Layer>;
}

/// Decode a base64url member that sits inside a protected layer.
pub(crate) fn protected_segment(name: &str, text: &str) -> EnvelopeResult<Vec<u8>> {
    b64::decode_url(text).map_err(|_| {
        EnvelopeError::verification(Stage::Parse, format!("'{name}' is not base64url"))
    })
}
