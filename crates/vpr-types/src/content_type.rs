//! Payload-kind registry.
//!
//! Content types arrive from envelope headers (`cty`/`typ`, COSE label 3) and from transport
//! attachments (`media_type`). Encoders in the wild append profile parameters
//! (`application/fhir+json; fhirVersion=4.0`) or vendor prefixes, so negotiation is by
//! case-insensitive substring containment against a fixed needle per entry, never by exact
//! equality. Entries are checked in table order: specific needles come before generic ones.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContentTypeError {
    #[error("unrecognised content type: {0}")]
    Unrecognised(String),
}

/// A negotiated payload kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentType {
    FhirJson,
    FhirXml,
    SmartHealthCard,
    DigitalGreenCertificate,
    DidcommPlain,
    DidcommSigned,
    DidcommEncrypted,
    Jpeg,
    Png,
    Dicom,
    PlainText,
    Json,
}

/// `(kind, canonical media type, needle)` in negotiation order.
const REGISTRY: &[(ContentType, &str, &str)] = &[
    (ContentType::FhirJson, "application/fhir+json", "fhir+json"),
    (ContentType::FhirXml, "application/fhir+xml", "fhir+xml"),
    (
        ContentType::SmartHealthCard,
        "application/smart-health-card",
        "smart-health-card",
    ),
    (
        ContentType::DigitalGreenCertificate,
        "application/dgc+cbor",
        "dgc",
    ),
    (
        ContentType::DidcommEncrypted,
        "application/didcomm-encrypted+json",
        "didcomm-encrypted+json",
    ),
    (
        ContentType::DidcommSigned,
        "application/didcomm-signed+json",
        "didcomm-signed+json",
    ),
    (
        ContentType::DidcommPlain,
        "application/didcomm-plain+json",
        "didcomm-plain+json",
    ),
    (ContentType::Jpeg, "image/jpeg", "jpeg"),
    (ContentType::Png, "image/png", "image/png"),
    (ContentType::Dicom, "application/dicom", "dicom"),
    (ContentType::PlainText, "text/plain", "text/plain"),
    (ContentType::Json, "application/json", "json"),
];

impl ContentType {
    /// Negotiate a content type from a header or attachment value.
    ///
    /// # Errors
    ///
    /// Returns [`ContentTypeError::Unrecognised`] if no registry needle occurs in `value`.
    pub fn negotiate(value: &str) -> Result<Self, ContentTypeError> {
        let lowered = value.trim().to_ascii_lowercase();
        REGISTRY
            .iter()
            .find(|(_, _, needle)| lowered.contains(needle))
            .map(|(kind, _, _)| *kind)
            .ok_or_else(|| ContentTypeError::Unrecognised(value.to_string()))
    }

    /// Canonical media type string emitted by encoders.
    pub fn as_str(self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map(|(_, media, _)| *media)
            .unwrap_or("application/octet-stream")
    }

    /// True when `value` negotiates to this kind.
    pub fn matches(self, value: &str) -> bool {
        Self::negotiate(value).is_ok_and(|kind| kind == self)
    }

    pub fn is_didcomm(self) -> bool {
        matches!(
            self,
            Self::DidcommPlain | Self::DidcommSigned | Self::DidcommEncrypted
        )
    }

    /// Kinds that a composition payload may be carried as.
    pub fn is_document(self) -> bool {
        matches!(self, Self::FhirJson | Self::SmartHealthCard | Self::Json)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = ContentTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::negotiate(s)
    }
}
