//! JOSE codecs: compact JWS/JWE and the general (JSON) serialisation.

use super::header::Header;
use super::{protected_segment, Codec, EncryptedPart, Envelope, Layer, SignedPart};
use crate::algorithms::{KeyManagementAlgorithm, SignatureAlgorithm};
use crate::b64;
use crate::constants::{ALG_NONE, NESTED_COMPACT, NESTED_GENERAL};
use crate::crypto::{content, ContentKey, CryptographicSignature, RecipientEntry};
use crate::error::Stage;
use crate::keys::{Jwk, KeyMaterial};
use crate::{EnvelopeError, EnvelopeResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// Compact
// ============================================================================

pub(crate) struct CompactCodec;

impl Codec for CompactCodec {
    fn nested_content_type(&self) -> &'static str {
        NESTED_COMPACT
    }

    fn sign(
        &self,
        header: &Header,
        payload: &[u8],
        signer: &KeyMaterial,
    ) -> EnvelopeResult<Envelope> {
        let (protected, signature) = sign_segments(header, payload, signer)?;
        Ok(Envelope::Compact(format!(
            "{protected}.{}.{signature}",
            b64::encode_url(payload)
        )))
    }

    fn unsigned(&self, header: &Header, payload: &[u8]) -> EnvelopeResult<Envelope> {
        Ok(Envelope::Compact(format!(
            "{}.{}.",
            header.encode()?,
            b64::encode_url(payload)
        )))
    }

    fn encrypt(
        &self,
        mut header: Header,
        entries: Vec<RecipientEntry>,
        content_key: &ContentKey,
        plaintext: &[u8],
    ) -> EnvelopeResult<Envelope> {
        let [entry] = <[RecipientEntry; 1]>::try_from(entries).map_err(|entries| {
            EnvelopeError::malformed(
                Stage::Serialize,
                format!("compact JWE carries one recipient, got {}", entries.len()),
            )
        })?;

        header.alg = Some(entry.algorithm.as_str().to_string());
        header.kid = Some(entry.kid);
        header.epk = entry.epk;
        header.iv = entry.iv.as_deref().map(b64::encode_url);
        header.tag = entry.tag.as_deref().map(b64::encode_url);

        let protected = header.encode()?;
        let sealed = content::seal(content_key.as_bytes(), plaintext, protected.as_bytes())?;
        Ok(Envelope::Compact(format!(
            "{protected}.{}.{}.{}.{}",
            b64::encode_url(&entry.encrypted_key),
            b64::encode_url(&sealed.iv),
            b64::encode_url(&sealed.ciphertext),
            b64::encode_url(&sealed.tag),
        )))
    }

    fn parse(&self, envelope: &Envelope) -> EnvelopeResult<Layer> {
        let Envelope::Compact(token) = envelope else {
            return Err(wrong_encoding());
        };
        let segments: Vec<&str> = token.split('.').collect();

        match segments.as_slice() {
            [protected, payload, signature] => {
                let header = Header::decode(protected)?;
                let payload = protected_segment("payload", payload)?;
                if header.alg.as_deref() == Some(ALG_NONE) {
                    if !signature.is_empty() {
                        return Err(EnvelopeError::verification(
                            Stage::Verify,
                            "unsigned token carries a signature",
                        ));
                    }
                    return Ok(Layer::Unsigned { header, payload });
                }
                Ok(Layer::Signed(vec![SignedPart {
                    header,
                    payload,
                    signing_input: format!("{protected}.{}", segments[1]).into_bytes(),
                    signature: protected_segment("signature", signature)?,
                }]))
            }
            [protected, encrypted_key, iv, ciphertext, tag] => {
                let header = Header::decode(protected)?;
                let entry = RecipientEntry {
                    kid: header.kid.clone().unwrap_or_default(),
                    algorithm: key_management(header.alg.as_deref())?,
                    encrypted_key: protected_segment("encrypted_key", encrypted_key)?,
                    epk: header.epk.clone(),
                    iv: header
                        .iv
                        .as_deref()
                        .map(|iv| protected_segment("iv", iv))
                        .transpose()?,
                    tag: header
                        .tag
                        .as_deref()
                        .map(|tag| protected_segment("tag", tag))
                        .transpose()?,
                };
                Ok(Layer::Encrypted(EncryptedPart {
                    aad: protected.as_bytes().to_vec(),
                    iv: protected_segment("iv", iv)?,
                    ciphertext: protected_segment("ciphertext", ciphertext)?,
                    tag: protected_segment("tag", tag)?,
                    recipients: vec![entry],
                    header,
                }))
            }
            _ => Err(wrong_segment_count(&segments)),
        }
    }
}

/// A token with the wrong number of segments that still announces a signature algorithm was
/// a signed token that has been cut or extended.
fn wrong_segment_count(segments: &[&str]) -> EnvelopeError {
    let reason = format!("compact envelope has {} segments", segments.len());
    let announces_signature = segments
        .first()
        .and_then(|protected| Header::decode(protected).ok())
        .and_then(|header| header.alg)
        .is_some_and(|alg| SignatureAlgorithm::from_jose(&alg).is_some());
    if announces_signature {
        EnvelopeError::verification(Stage::Parse, reason)
    } else {
        EnvelopeError::malformed(Stage::Parse, reason)
    }
}

// ============================================================================
// General JSON
// ============================================================================

pub(crate) struct GeneralCodec;

impl Codec for GeneralCodec {
    fn nested_content_type(&self) -> &'static str {
        NESTED_GENERAL
    }

    fn sign(
        &self,
        header: &Header,
        payload: &[u8],
        signer: &KeyMaterial,
    ) -> EnvelopeResult<Envelope> {
        let (protected, signature) = sign_segments(header, payload, signer)?;
        to_envelope(&FlattenedJwsWire {
            protected,
            payload: b64::encode_url(payload),
            signature,
            header: None,
        })
    }

    fn unsigned(&self, header: &Header, payload: &[u8]) -> EnvelopeResult<Envelope> {
        to_envelope(&FlattenedJwsWire {
            protected: header.encode()?,
            payload: b64::encode_url(payload),
            signature: String::new(),
            header: None,
        })
    }

    fn encrypt(
        &self,
        header: Header,
        entries: Vec<RecipientEntry>,
        content_key: &ContentKey,
        plaintext: &[u8],
    ) -> EnvelopeResult<Envelope> {
        let protected = header.encode()?;
        let sealed = content::seal(content_key.as_bytes(), plaintext, protected.as_bytes())?;
        let recipients = entries
            .into_iter()
            .map(|entry| RecipientWire {
                encrypted_key: b64::encode_url(&entry.encrypted_key),
                header: RecipientHeaderWire {
                    alg: entry.algorithm.as_str().to_string(),
                    kid: entry.kid,
                    epk: entry.epk,
                    iv: entry.iv.as_deref().map(b64::encode_url),
                    tag: entry.tag.as_deref().map(b64::encode_url),
                },
            })
            .collect();

        to_envelope(&GeneralJweWire {
            protected,
            recipients,
            iv: b64::encode_url(&sealed.iv),
            ciphertext: b64::encode_url(&sealed.ciphertext),
            tag: b64::encode_url(&sealed.tag),
        })
    }

    fn parse(&self, envelope: &Envelope) -> EnvelopeResult<Layer> {
        let Envelope::General(value) = envelope else {
            return Err(wrong_encoding());
        };
        if !value.is_object() {
            return Err(EnvelopeError::malformed(
                Stage::Parse,
                "general envelope must be a JSON object",
            ));
        }

        if value.get("ciphertext").is_some() {
            let wire: GeneralJweWire = from_value(value)?;
            return parse_general_jwe(wire);
        }

        if value.get("signatures").is_some() {
            let wire: GeneralJwsWire = from_value(value)?;
            let payload = protected_segment("payload", &wire.payload)?;
            let parts = wire
                .signatures
                .iter()
                .map(|signature| {
                    signed_part(
                        &signature.protected,
                        signature.header.as_ref(),
                        &wire.payload,
                        payload.clone(),
                        &signature.signature,
                    )
                })
                .collect::<EnvelopeResult<Vec<_>>>()?;
            return Ok(Layer::Signed(parts));
        }

        let wire: FlattenedJwsWire = from_value(value)?;
        let header = Header::decode(&wire.protected)?;
        let payload = protected_segment("payload", &wire.payload)?;
        if header.alg.as_deref() == Some(ALG_NONE) {
            if !wire.signature.is_empty() {
                return Err(EnvelopeError::verification(
                    Stage::Verify,
                    "unsigned envelope carries a signature",
                ));
            }
            return Ok(Layer::Unsigned { header, payload });
        }
        Ok(Layer::Signed(vec![signed_part(
            &wire.protected,
            wire.header.as_ref(),
            &wire.payload,
            payload,
            &wire.signature,
        )?]))
    }
}

fn parse_general_jwe(wire: GeneralJweWire) -> EnvelopeResult<Layer> {
    let header = Header::decode(&wire.protected)?;
    let recipients = wire
        .recipients
        .into_iter()
        .map(|recipient| -> EnvelopeResult<RecipientEntry> {
            Ok(RecipientEntry {
                algorithm: key_management(Some(&recipient.header.alg))?,
                kid: recipient.header.kid,
                encrypted_key: protected_segment("encrypted_key", &recipient.encrypted_key)?,
                epk: recipient.header.epk,
                iv: recipient
                    .header
                    .iv
                    .as_deref()
                    .map(|iv| protected_segment("iv", iv))
                    .transpose()?,
                tag: recipient
                    .header
                    .tag
                    .as_deref()
                    .map(|tag| protected_segment("tag", tag))
                    .transpose()?,
            })
        })
        .collect::<EnvelopeResult<Vec<_>>>()?;

    Ok(Layer::Encrypted(EncryptedPart {
        header,
        aad: wire.protected.into_bytes(),
        iv: protected_segment("iv", &wire.iv)?,
        ciphertext: protected_segment("ciphertext", &wire.ciphertext)?,
        tag: protected_segment("tag", &wire.tag)?,
        recipients,
    }))
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Protected header and signature segments of a JWS.
fn sign_segments(
    header: &Header,
    payload: &[u8],
    signer: &KeyMaterial,
) -> EnvelopeResult<(String, String)> {
    let alg = header
        .alg
        .as_deref()
        .ok_or_else(|| EnvelopeError::malformed(Stage::Sign, "signed header has no alg"))?;
    let protected = header.encode()?;
    let signing_input = format!("{protected}.{}", b64::encode_url(payload));
    let signature = signer.sign(signing_input.as_bytes(), alg)?;
    Ok((protected, b64::encode_url(&signature)))
}

/// A general JWS signature. The unprotected header may only name the key when the protected
/// header does not.
fn signed_part(
    protected: &str,
    unprotected: Option<&UnprotectedHeaderWire>,
    encoded_payload: &str,
    payload: Vec<u8>,
    signature: &str,
) -> EnvelopeResult<SignedPart> {
    let mut header = Header::decode(protected)?;
    if header.kid.is_none() {
        header.kid = unprotected.and_then(|unprotected| unprotected.kid.clone());
    }
    Ok(SignedPart {
        header,
        payload,
        signing_input: format!("{protected}.{encoded_payload}").into_bytes(),
        signature: protected_segment("signature", signature)?,
    })
}

fn key_management(alg: Option<&str>) -> EnvelopeResult<KeyManagementAlgorithm> {
    let alg = alg.ok_or_else(|| EnvelopeError::verification(Stage::Header, "missing alg"))?;
    KeyManagementAlgorithm::from_jose(alg)
        .ok_or_else(|| EnvelopeError::unsupported(alg, Stage::Decrypt))
}

fn to_envelope<T: Serialize>(wire: &T) -> EnvelopeResult<Envelope> {
    serde_json::to_value(wire)
        .map(Envelope::General)
        .map_err(EnvelopeError::Serialization)
}

fn from_value<T: for<'de> Deserialize<'de>>(value: &serde_json::Value) -> EnvelopeResult<T> {
    serde_path_to_error::deserialize(value).map_err(|e| {
        EnvelopeError::malformed(Stage::Parse, format!("at {}: {}", e.path(), e.inner()))
    })
}

fn wrong_encoding() -> EnvelopeError {
    EnvelopeError::malformed(Stage::Parse, "envelope encoding does not match codec")
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlattenedJwsWire {
    protected: String,
    payload: String,
    signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    header: Option<UnprotectedHeaderWire>,
}

/// Unprotected JWS header. Only `kid` is read; other members are ignored.
#[derive(Serialize, Deserialize)]
struct UnprotectedHeaderWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneralJwsWire {
    payload: String,
    signatures: Vec<SignatureWire>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SignatureWire {
    protected: String,
    signature: String,
    #[serde(default)]
    header: Option<UnprotectedHeaderWire>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneralJweWire {
    protected: String,
    recipients: Vec<RecipientWire>,
    iv: String,
    ciphertext: String,
    tag: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipientWire {
    header: RecipientHeaderWire,
    encrypted_key: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipientHeaderWire {
    alg: String,
    kid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    epk: Option<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptographicEncryption;

    fn header(alg: &str) -> Header {
        Header {
            alg: Some(alg.into()),
            cty: Some("application/fhir+json".into()),
            ..Header::default()
        }
    }

    #[test]
    fn compact_jws_has_three_segments_and_verifies() {
        let key = KeyMaterial::generate("ES256").unwrap();
        let envelope = CompactCodec.sign(&header("ES256"), b"{}", &key).unwrap();

        let Layer::Signed(parts) = CompactCodec.parse(&envelope).unwrap() else {
            panic!("expected a signed layer");
        };
        let part = &parts[0];
        assert_eq!(part.payload, b"{}");
        assert!(key.verify(&part.signing_input, &part.signature, &key.public_key()));
    }

    #[test]
    fn unsigned_token_with_signature_is_rejected() {
        let envelope = CompactCodec.unsigned(&header(ALG_NONE), b"{}").unwrap();
        let Envelope::Compact(token) = envelope else {
            unreachable!()
        };

        let forged = Envelope::Compact(format!("{token}AAAA"));
        let err = CompactCodec.parse(&forged).unwrap_err();
        assert!(matches!(err, EnvelopeError::VerificationFailed { .. }));
    }

    #[test]
    fn truncated_signed_token_fails_verification() {
        let key = KeyMaterial::generate("ES256").unwrap();
        let Envelope::Compact(token) = CompactCodec.sign(&header("ES256"), b"{}", &key).unwrap()
        else {
            unreachable!()
        };
        let truncated: Vec<&str> = token.split('.').take(2).collect();

        let err = CompactCodec
            .parse(&Envelope::Compact(truncated.join(".")))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::VerificationFailed { .. }));

        let err = CompactCodec
            .parse(&Envelope::Compact("garbage".into()))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedEnvelope { .. }));
    }

    #[test]
    fn compact_jwe_protects_recipient_fields() {
        let key = KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap();
        let cek = ContentKey::generate();
        let entries = KeyMaterial::encrypt_for(std::slice::from_ref(&key), &cek).unwrap();

        let envelope = CompactCodec
            .encrypt(header("unused"), entries, &cek, b"secret")
            .unwrap();

        let Layer::Encrypted(layer) = CompactCodec.parse(&envelope).unwrap() else {
            panic!("expected an encrypted layer");
        };
        assert_eq!(layer.header.alg.as_deref(), Some("ECDH-ES+A256GCMKW"));
        assert_eq!(layer.recipients[0].kid, key.key_id());
        let recovered = key.decrypt(&layer.recipients[0]).unwrap();
        let plaintext = content::open(
            recovered.as_bytes(),
            &layer.iv,
            &layer.ciphertext,
            &layer.tag,
            &layer.aad,
        )
        .unwrap();
        assert_eq!(plaintext, b"secret");
    }

    #[test]
    fn general_jwe_lists_every_recipient() {
        let keys = vec![
            KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap(),
            KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap(),
        ];
        let cek = ContentKey::generate();
        let entries = KeyMaterial::encrypt_for(&keys, &cek).unwrap();
        let header = Header {
            enc: Some("A256GCM".into()),
            ..header("unused")
        };

        let envelope = GeneralCodec.encrypt(header, entries, &cek, b"secret").unwrap();

        let Envelope::General(value) = &envelope else {
            unreachable!()
        };
        assert_eq!(value["recipients"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["recipients"][1]["header"]["kid"], keys[1].key_id());
        assert!(matches!(
            GeneralCodec.parse(&envelope).unwrap(),
            Layer::Encrypted(_)
        ));
    }

    #[test]
    fn general_parse_accepts_signatures_array() {
        let key = KeyMaterial::generate("ES256").unwrap();
        let Envelope::General(flattened) = GeneralCodec.sign(&header("ES256"), b"{}", &key).unwrap()
        else {
            unreachable!()
        };
        let general = serde_json::json!({
            "payload": flattened["payload"],
            "signatures": [{
                "protected": flattened["protected"],
                "signature": flattened["signature"],
            }],
        });

        let Layer::Signed(parts) = GeneralCodec.parse(&Envelope::General(general)).unwrap() else {
            panic!("expected a signed layer");
        };
        assert_eq!(parts.len(), 1);
        assert!(key.verify(&parts[0].signing_input, &parts[0].signature, &key.public_key()));
    }

    #[test]
    fn unprotected_kid_names_the_signer_only_when_protected_header_does_not() {
        let key = KeyMaterial::generate("ES256").unwrap();
        let Envelope::General(flattened) = GeneralCodec.sign(&header("ES256"), b"{}", &key).unwrap()
        else {
            unreachable!()
        };
        let general = serde_json::json!({
            "payload": flattened["payload"],
            "signatures": [{
                "protected": flattened["protected"],
                "signature": flattened["signature"],
                "header": {"kid": "signer-1", "x5t": "ignored"},
            }],
        });
        let Layer::Signed(parts) = GeneralCodec.parse(&Envelope::General(general)).unwrap() else {
            panic!("expected a signed layer");
        };
        assert_eq!(parts[0].header.kid.as_deref(), Some("signer-1"));

        let with_kid = Header {
            kid: Some("protected-kid".into()),
            ..header("ES256")
        };
        let Envelope::General(mut flattened) = GeneralCodec.sign(&with_kid, b"{}", &key).unwrap()
        else {
            unreachable!()
        };
        flattened["header"] = serde_json::json!({"kid": "other"});
        let Layer::Signed(parts) = GeneralCodec.parse(&Envelope::General(flattened)).unwrap()
        else {
            panic!("expected a signed layer");
        };
        assert_eq!(parts[0].header.kid.as_deref(), Some("protected-kid"));
    }

    #[test]
    fn general_parse_rejects_unknown_members() {
        let value = serde_json::json!({
            "protected": "e30",
            "payload": "e30",
            "signature": "",
            "extra": true,
        });
        let err = GeneralCodec.parse(&Envelope::General(value)).unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedEnvelope { .. }));
    }
}
