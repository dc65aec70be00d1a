//! Protected header and the claims carried in it.
//!
//! One [`Header`] model serves every encoding. JOSE encodings serialise it directly as JSON (the
//! claims are replicated into the header, as RFC 7519 section 5.3 allows); the COSE codec maps
//! it onto integer labels and puts the claims in a CWT claims map under label 15.

use crate::b64;
use crate::constants::{cwt_claim_key, cwt_claim_name, UNDERSTOOD_CRITICAL};
use crate::error::Stage;
use crate::keys::Jwk;
use crate::{EnvelopeError, EnvelopeResult};
use chrono::{DateTime, TimeZone, Utc};
use ciborium::value::{Integer, Value};
use serde::{Deserialize, Serialize};

/// Registered claims stamped at seal time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Expiry, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issue time, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Token id (`jti` in JOSE, `cti` in CWT).
    #[serde(rename = "jti", default, skip_serializing_if = "Option::is_none")]
    pub cti: Option<String>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Fail with `EnvelopeExpired` once `exp` is at or before `now`.
    pub(crate) fn ensure_current(&self, now: DateTime<Utc>) -> EnvelopeResult<()> {
        let Some(exp) = self.exp else {
            return Ok(());
        };
        if exp > now.timestamp() {
            return Ok(());
        }
        let expired_at = self.expires_at().ok_or_else(|| {
            EnvelopeError::malformed(Stage::Header, format!("exp {exp} is out of range"))
        })?;
        tracing::warn!(%expired_at, "envelope expired");
        Err(EnvelopeError::EnvelopeExpired { expired_at })
    }

    /// CWT claims map (integer keys).
    pub(crate) fn to_cwt(&self) -> Value {
        let mut entries = Vec::new();
        let mut text = |name: &str, value: &Option<String>| {
            if let (Some(key), Some(value)) = (cwt_claim_key(name), value) {
                entries.push((Value::Integer(key.into()), Value::Text(value.clone())));
            }
        };
        text("iss", &self.iss);
        text("sub", &self.sub);
        text("aud", &self.aud);

        for (name, value) in [("exp", self.exp), ("iat", self.iat)] {
            if let (Some(key), Some(value)) = (cwt_claim_key(name), value) {
                entries.push((Value::Integer(key.into()), Value::Integer(value.into())));
            }
        }
        if let (Some(key), Some(cti)) = (cwt_claim_key("cti"), &self.cti) {
            entries.push((Value::Integer(key.into()), Value::Bytes(cti.as_bytes().to_vec())));
        }
        Value::Map(entries)
    }

    pub(crate) fn from_cwt(value: &Value) -> EnvelopeResult<Self> {
        let invalid = |reason: String| EnvelopeError::verification(Stage::Header, reason);
        let Value::Map(entries) = value else {
            return Err(invalid("CWT claims must be a map".into()));
        };

        let mut claims = Claims::default();
        for (key, value) in entries {
            let Some(name) = integer(key).and_then(cwt_claim_name) else {
                continue;
            };
            match (name, value) {
                ("iss", Value::Text(text)) => claims.iss = Some(text.clone()),
                ("sub", Value::Text(text)) => claims.sub = Some(text.clone()),
                ("aud", Value::Text(text)) => claims.aud = Some(text.clone()),
                ("exp", Value::Integer(secs)) => claims.exp = Some(to_i64(*secs)?),
                ("iat", Value::Integer(secs)) => claims.iat = Some(to_i64(*secs)?),
                ("cti", Value::Bytes(bytes)) => {
                    claims.cti = Some(
                        String::from_utf8(bytes.clone())
                            .map_err(|_| invalid("cti is not UTF-8".into()))?,
                    )
                }
                ("nbf", _) => {}
                (name, _) => return Err(invalid(format!("claim '{name}' has the wrong type"))),
            }
        }
        Ok(claims)
    }
}

/// Header parameters understood by every codec.
///
/// Members this implementation does not model (`apu`, `apv`, `jwk`, `nonce`, `p2c`, `p2s`) are
/// ignored on input unless they are listed in `crit`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) alg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) enc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) typ: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) cty: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) zip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) kid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) crit: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) b64: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) x5c: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) epk: Option<Jwk>,

    /// Key-wrap IV (compact JWE only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) iv: Option<String>,

    /// Key-wrap tag (compact JWE only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tag: Option<String>,

    #[serde(flatten)]
    pub(crate) claims: Claims,
}

impl Header {
    /// base64url of the JSON header; this string is also the JWE AAD.
    pub(crate) fn encode(&self) -> EnvelopeResult<String> {
        let json = serde_json::to_vec(self).map_err(EnvelopeError::Serialization)?;
        Ok(b64::encode_url(&json))
    }

    /// Inverse of [`Header::encode`]. The segment sits inside a protected layer, so any decode
    /// failure is a verification failure.
    pub(crate) fn decode(segment: &str) -> EnvelopeResult<Self> {
        let json = b64::decode_url(segment).map_err(|_| {
            EnvelopeError::verification(Stage::Header, "protected header is not base64url")
        })?;
        serde_json::from_slice(&json).map_err(|e| {
            EnvelopeError::verification(Stage::Header, format!("protected header: {e}"))
        })
    }

    /// Reject `crit` entries this implementation does not process, and unencoded payloads.
    pub(crate) fn ensure_understood(&self) -> EnvelopeResult<()> {
        if self.b64 == Some(false) {
            return Err(EnvelopeError::malformed(
                Stage::Header,
                "unencoded payloads (b64: false) are not supported",
            ));
        }
        if let Some(unknown) = self
            .crit
            .iter()
            .flatten()
            .find(|name| !UNDERSTOOD_CRITICAL.contains(&name.as_str()))
        {
            return Err(EnvelopeError::malformed(
                Stage::Header,
                format!("critical header '{unknown}' is not understood"),
            ));
        }
        Ok(())
    }
}

pub(crate) fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(*i).ok(),
        _ => None,
    }
}

fn to_i64(value: Integer) -> EnvelopeResult<i64> {
    i64::try_from(value)
        .map_err(|_| EnvelopeError::verification(Stage::Header, "claim value is out of range"))
}
