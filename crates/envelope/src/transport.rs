//! DIDComm-style transport messages.
//!
//! A [`TransportMessage`] addresses a JSON body from one DID to others and may carry
//! [`Attachment`]s. Sealed envelopes ride in attachments: the general JSON form is embedded as
//! `json`, the compact and tagged forms as base64url. The attachment `media_type` records the
//! protection of the embedded envelope.
//!
//! Whole messages are sealed with [`crate::EnvelopeService::pack`] and opened with
//! [`crate::EnvelopeService::unpack`].

use crate::b64;
use crate::envelope::Envelope;
use crate::error::Stage;
use crate::{EnvelopeError, EnvelopeResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vpr_types::ContentType;

const DID_PREFIX: &str = "did:";

/// A transport message (DIDComm v2 plaintext message shape).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportMessage {
    pub id: String,

    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,

    /// Seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_time: Option<i64>,

    #[serde(default)]
    pub body: Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl TransportMessage {
    /// A message with a fresh id, stamped with the current time.
    pub fn new(message_type: impl Into<String>, body: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            from: None,
            to: Vec::new(),
            created_time: Some(Utc::now().timestamp()),
            expires_time: None,
            body,
            attachments: Vec::new(),
        }
    }

    /// Set the sender DID.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidInput`] if `did` is not a DID.
    pub fn from_did(mut self, did: impl Into<String>) -> EnvelopeResult<Self> {
        self.from = Some(require_did(did.into())?);
        Ok(self)
    }

    /// Add a recipient DID.
    pub fn to_did(mut self, did: impl Into<String>) -> EnvelopeResult<Self> {
        self.to.push(require_did(did.into())?);
        Ok(self)
    }

    pub fn expires_in(mut self, lifetime: Duration) -> Self {
        let created = self.created_time.unwrap_or_else(|| Utc::now().timestamp());
        self.expires_time = Some(created + lifetime.num_seconds());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn attachment(&self, id: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|attachment| attachment.id == id)
    }

    /// True once `expires_time` is at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_time
            .is_some_and(|expires| expires <= now.timestamp())
    }

    /// Fail with `EnvelopeExpired` once the message is past `expires_time`.
    pub fn ensure_current(&self, now: DateTime<Utc>) -> EnvelopeResult<()> {
        let Some(expires) = self.expires_time.filter(|_| self.is_expired(now)) else {
            return Ok(());
        };
        let expired_at = DateTime::from_timestamp(expires, 0).ok_or_else(|| {
            EnvelopeError::malformed(
                Stage::Parse,
                format!("expires_time {expires} is out of range"),
            )
        })?;
        tracing::warn!(id = %self.id, %expired_at, "transport message expired");
        Err(EnvelopeError::EnvelopeExpired { expired_at })
    }

    /// Parse and validate a message.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MalformedEnvelope`] with the JSON path of the first offending
    /// member, or if `from`/`to` are not DIDs.
    pub fn from_slice(bytes: &[u8]) -> EnvelopeResult<Self> {
        let deserializer = &mut serde_json::Deserializer::from_slice(bytes);
        let message: Self = serde_path_to_error::deserialize(deserializer).map_err(|e| {
            EnvelopeError::malformed(
                Stage::Parse,
                format!("transport message at '{}': {}", e.path(), e.inner()),
            )
        })?;

        if let Some(address) = message
            .from
            .iter()
            .chain(&message.to)
            .find(|address| !address.starts_with(DID_PREFIX))
        {
            return Err(EnvelopeError::malformed(
                Stage::Parse,
                format!("transport address '{address}' is not a DID"),
            ));
        }
        Ok(message)
    }

    pub fn to_vec(&self) -> EnvelopeResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(EnvelopeError::Serialization)
    }
}

/// One attachment of a transport message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Attachment {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    pub data: AttachmentData,
}

/// Attachment content. Exactly one representation is present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentData {
    Base64(Base64Data),
    Links(LinksData),
    Json(JsonData),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Base64Data {
    pub base64: String,
}

/// Content held elsewhere, identified by hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinksData {
    pub hash: String,
    pub links: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonData {
    pub json: Value,
}

impl Attachment {
    /// Embed a sealed envelope.
    pub fn from_envelope(envelope: &Envelope) -> EnvelopeResult<Self> {
        let data = match envelope {
            Envelope::General(value) => AttachmentData::Json(JsonData {
                json: value.clone(),
            }),
            other => AttachmentData::Base64(Base64Data {
                base64: b64::encode_url(&other.to_bytes()?),
            }),
        };
        let media_type = envelope.protection().media_type();
        tracing::debug!(
            encoding = %envelope.encoding(),
            media_type = %media_type,
            "attached envelope"
        );

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: None,
            media_type: Some(media_type.as_str().to_string()),
            data,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Recover an embedded envelope.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::InvalidInput`] for `links` attachments, or a media type that is not a
    ///   DIDComm type.
    /// - [`EnvelopeError::MalformedEnvelope`] if the content is not an envelope or its structure
    ///   disagrees with the declared media type.
    pub fn envelope(&self) -> EnvelopeResult<Envelope> {
        let declared = self
            .media_type
            .as_deref()
            .and_then(|media_type| ContentType::negotiate(media_type).ok())
            .filter(|kind| kind.is_didcomm())
            .ok_or_else(|| {
                EnvelopeError::InvalidInput(format!(
                    "attachment '{}' does not carry an envelope media type",
                    self.id
                ))
            })?;

        let envelope = match &self.data {
            AttachmentData::Json(JsonData { json }) => {
                if !json.is_object() {
                    return Err(EnvelopeError::malformed(
                        Stage::Parse,
                        "embedded general envelope must be a JSON object",
                    ));
                }
                Envelope::General(json.clone())
            }
            AttachmentData::Base64(Base64Data { base64 }) => {
                let bytes = b64::decode_url(base64).map_err(|_| {
                    EnvelopeError::malformed(Stage::Parse, "attachment data is not base64url")
                })?;
                Envelope::from_bytes(&bytes)?
            }
            AttachmentData::Links(_) => {
                return Err(EnvelopeError::InvalidInput(format!(
                    "attachment '{}' is held by reference",
                    self.id
                )))
            }
        };

        let actual = envelope.protection().media_type();
        if actual != declared {
            return Err(EnvelopeError::malformed(
                Stage::Parse,
                format!("attachment declares {declared} but carries {actual}"),
            ));
        }
        Ok(envelope)
    }
}

fn require_did(address: String) -> EnvelopeResult<String> {
    if address.starts_with(DID_PREFIX) {
        Ok(address)
    } else {
        Err(EnvelopeError::InvalidInput(format!(
            "'{address}' is not a DID"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_round_trips_through_json() {
        let message = TransportMessage::new("https://vpr.example/record/1.0/share", json!({"n": 1}))
            .from_did("did:example:alice")
            .unwrap()
            .to_did("did:example:bob")
            .unwrap()
            .expires_in(Duration::hours(1));

        let bytes = message.to_vec().unwrap();
        let parsed = TransportMessage::from_slice(&bytes).unwrap();

        assert_eq!(parsed, message);
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "https://vpr.example/record/1.0/share");
    }

    #[test]
    fn addresses_must_be_dids() {
        let message = TransportMessage::new("t", Value::Null);
        assert!(matches!(
            message.from_did("alice@example.org"),
            Err(EnvelopeError::InvalidInput(_))
        ));

        let bytes = br#"{"id":"1","type":"t","to":["bob"]}"#;
        assert!(matches!(
            TransportMessage::from_slice(bytes),
            Err(EnvelopeError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn parse_errors_name_the_path() {
        let bytes = br#"{"id":"1","type":"t","attachments":[{"id":"a","data":{"base64":"x","json":{}}}]}"#;
        let err = TransportMessage::from_slice(bytes).unwrap_err();
        let EnvelopeError::MalformedEnvelope { reason, .. } = err else {
            panic!("expected a malformed envelope error");
        };
        assert!(reason.contains("attachments[0]"), "{reason}");
    }

    #[test]
    fn attachment_data_has_exactly_one_form() {
        let parse = |json: &str| serde_json::from_str::<AttachmentData>(json);

        assert!(matches!(parse(r#"{"base64":"AA"}"#), Ok(AttachmentData::Base64(_))));
        assert!(matches!(
            parse(r#"{"hash":"h","links":["https://x"]}"#),
            Ok(AttachmentData::Links(_))
        ));
        assert!(matches!(parse(r#"{"json":{"a":1}}"#), Ok(AttachmentData::Json(_))));
        assert!(parse(r#"{"base64":"AA","json":{}}"#).is_err());
        assert!(parse(r#"{"links":["https://x"]}"#).is_err());
        assert!(parse("{}").is_err());
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let mut message = TransportMessage::new("t", Value::Null);
        message.expires_time = Some(1_700_000_000);
        let deadline = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        assert!(message.is_expired(deadline));
        assert!(!message.is_expired(deadline - Duration::seconds(1)));
    }

    #[test]
    fn expired_message_reports_its_deadline() {
        let mut message = TransportMessage::new("t", Value::Null);
        message.expires_time = Some(1_700_000_000);
        let deadline = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        assert!(message.ensure_current(deadline - Duration::seconds(1)).is_ok());
        let err = message.ensure_current(deadline).unwrap_err();
        assert!(
            matches!(err, EnvelopeError::EnvelopeExpired { expired_at } if expired_at == deadline),
            "{err}"
        );
        message.expires_time = None;
        assert!(message.ensure_current(deadline).is_ok());
    }

    #[test]
    fn links_attachment_is_not_an_envelope() {
        let attachment = Attachment {
            id: "a".into(),
            description: None,
            media_type: Some(ContentType::DidcommSigned.as_str().into()),
            data: AttachmentData::Links(LinksData {
                hash: "h".into(),
                links: vec!["https://example.org/x".into()],
            }),
        };
        assert!(matches!(
            attachment.envelope(),
            Err(EnvelopeError::InvalidInput(_))
        ));
    }

    #[test]
    fn non_didcomm_media_type_is_rejected() {
        let attachment = Attachment {
            id: "a".into(),
            description: None,
            media_type: Some("image/png".into()),
            data: AttachmentData::Base64(Base64Data { base64: "AA".into() }),
        };
        assert!(matches!(
            attachment.envelope(),
            Err(EnvelopeError::InvalidInput(_))
        ));
    }
}
