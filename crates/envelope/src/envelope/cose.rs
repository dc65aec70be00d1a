//! COSE codec (RFC 9052) over `ciborium` values.
//!
//! - Signed: COSE_Sign1 (tag 18); COSE_Sign (tag 98) is accepted on input
//! - Encrypted: COSE_Encrypt (tag 96) with one recipient structure per key
//! - Plaintext: COSE_Sign1 with no `alg` and an empty signature
//!
//! Claims travel as a CWT claims map under header label 15, compression as the private text
//! label `"zip"`.

use super::header::{integer, Claims, Header};
use super::{Codec, EncryptedPart, Envelope, Layer, Protection, SignedPart};
use crate::algorithms::{KeyFamily, KeyManagementAlgorithm, SignatureAlgorithm, COSE_A256GCM};
use crate::b64;
use crate::constants::{
    CoseStructure, CONTENT_ENCRYPTION, COSE_CRV_X25519, COSE_KEY_CRV, COSE_KEY_KTY, COSE_KEY_X,
    COSE_KTY_OKP, COSE_LABEL_ALG, COSE_LABEL_CONTENT_TYPE, COSE_LABEL_CRIT, COSE_LABEL_CWT_CLAIMS,
    COSE_LABEL_EPK, COSE_LABEL_IV, COSE_LABEL_KID, COSE_LABEL_TYP, COSE_LABEL_WRAP_TAG,
    COSE_LABEL_X5CHAIN, COSE_LABEL_ZIP, NESTED_COSE,
};
use crate::crypto::{content, ContentKey, CryptographicSignature, RecipientEntry};
use crate::error::Stage;
use crate::keys::{Jwk, KeyMaterial};
use crate::{EnvelopeError, EnvelopeResult};
use ciborium::value::Value;

/// Integer labels this codec processes, and therefore accepts in `crit`.
const UNDERSTOOD_LABELS: &[i64] = &[
    COSE_LABEL_ALG,
    COSE_LABEL_CONTENT_TYPE,
    COSE_LABEL_KID,
    COSE_LABEL_CWT_CLAIMS,
    COSE_LABEL_TYP,
    COSE_LABEL_X5CHAIN,
];

pub(crate) struct TaggedCodec;

impl Codec for TaggedCodec {
    fn nested_content_type(&self) -> &'static str {
        NESTED_COSE
    }

    fn sign(
        &self,
        header: &Header,
        payload: &[u8],
        signer: &KeyMaterial,
    ) -> EnvelopeResult<Envelope> {
        let alg = header
            .alg
            .as_deref()
            .ok_or_else(|| EnvelopeError::malformed(Stage::Sign, "signed header has no alg"))?;
        let algorithm = SignatureAlgorithm::from_jose(alg)
            .ok_or_else(|| EnvelopeError::unsupported(alg, Stage::Sign))?;

        let protected = encode(&Value::Map(protected_entries(
            header,
            Some(algorithm.cose_id()),
        )?))?;
        let signature = signer.sign(&encode(&sig_structure1(&protected, payload))?, alg)?;

        sign1(protected, payload, signature)
    }

    fn unsigned(&self, header: &Header, payload: &[u8]) -> EnvelopeResult<Envelope> {
        let protected = encode(&Value::Map(protected_entries(header, None)?))?;
        sign1(protected, payload, Vec::new())
    }

    fn encrypt(
        &self,
        header: Header,
        entries: Vec<RecipientEntry>,
        content_key: &ContentKey,
        plaintext: &[u8],
    ) -> EnvelopeResult<Envelope> {
        let protected = encode(&Value::Map(protected_entries(&header, Some(COSE_A256GCM))?))?;
        let aad = encode(&enc_structure(&protected))?;
        let sealed = content::seal(content_key.as_bytes(), plaintext, &aad)?;

        let mut ciphertext = sealed.ciphertext;
        ciphertext.extend_from_slice(&sealed.tag);
        let recipients = entries
            .iter()
            .map(recipient_structure)
            .collect::<EnvelopeResult<Vec<_>>>()?;

        let structure = Value::Array(vec![
            Value::Bytes(protected),
            Value::Map(vec![(int(COSE_LABEL_IV), Value::Bytes(sealed.iv))]),
            Value::Bytes(ciphertext),
            Value::Array(recipients),
        ]);
        tagged(CoseStructure::Encrypt, structure)
    }

    fn parse(&self, envelope: &Envelope) -> EnvelopeResult<Layer> {
        let Envelope::Tagged(bytes) = envelope else {
            return Err(malformed("envelope encoding does not match codec"));
        };
        let Value::Tag(tag, inner) =
            decode(bytes).ok_or_else(|| malformed("envelope is not valid CBOR"))?
        else {
            return Err(malformed("COSE envelope must be tagged"));
        };

        match CoseStructure::from_tag(tag) {
            Some(CoseStructure::Sign1) => parse_sign1(*inner),
            Some(CoseStructure::Sign) => parse_sign(*inner),
            Some(CoseStructure::Encrypt) => parse_encrypt(*inner),
            Some(other) => Err(malformed(format!("{other:?} structures are not supported"))),
            None => Err(malformed(format!("unknown COSE tag {tag}"))),
        }
    }
}

/// Structural protection sniff for tagged bytes.
pub(crate) fn protection(bytes: &[u8]) -> Protection {
    match decode(bytes) {
        Some(Value::Tag(tag, inner)) => match CoseStructure::from_tag(tag) {
            Some(CoseStructure::Encrypt | CoseStructure::Encrypt0) => Protection::Encrypted,
            Some(CoseStructure::Sign) => Protection::Signed,
            Some(CoseStructure::Sign1) => match *inner {
                Value::Array(items) if has_signature(&items) => Protection::Signed,
                _ => Protection::Plain,
            },
            _ => Protection::Plain,
        },
        _ => Protection::Plain,
    }
}

fn has_signature(items: &[Value]) -> bool {
    matches!(items.get(3), Some(Value::Bytes(signature)) if !signature.is_empty())
}

// ============================================================================
// Encoding
// ============================================================================

fn sign1(protected: Vec<u8>, payload: &[u8], signature: Vec<u8>) -> EnvelopeResult<Envelope> {
    let structure = Value::Array(vec![
        Value::Bytes(protected),
        Value::Map(Vec::new()),
        Value::Bytes(payload.to_vec()),
        Value::Bytes(signature),
    ]);
    tagged(CoseStructure::Sign1, structure)
}

fn tagged(structure: CoseStructure, value: Value) -> EnvelopeResult<Envelope> {
    encode(&Value::Tag(structure.tag(), Box::new(value))).map(Envelope::Tagged)
}

fn protected_entries(header: &Header, alg: Option<i64>) -> EnvelopeResult<Vec<(Value, Value)>> {
    let mut entries = Vec::new();
    if let Some(alg) = alg {
        entries.push((int(COSE_LABEL_ALG), int(alg)));
    }
    if let Some(cty) = &header.cty {
        entries.push((int(COSE_LABEL_CONTENT_TYPE), Value::Text(cty.clone())));
    }
    if let Some(kid) = &header.kid {
        entries.push((int(COSE_LABEL_KID), Value::Bytes(kid.as_bytes().to_vec())));
    }
    if let Some(typ) = &header.typ {
        entries.push((int(COSE_LABEL_TYP), Value::Text(typ.clone())));
    }
    if let Some(chain) = &header.x5c {
        let mut certificates = chain
            .iter()
            .map(|cert| {
                b64::decode_standard(cert)
                    .map(Value::Bytes)
                    .map_err(|e| EnvelopeError::InvalidInput(format!("x5c is not base64: {e}")))
            })
            .collect::<EnvelopeResult<Vec<_>>>()?;
        let chain = if certificates.len() == 1 {
            certificates.remove(0)
        } else {
            Value::Array(certificates)
        };
        entries.push((int(COSE_LABEL_X5CHAIN), chain));
    }
    if let Some(zip) = &header.zip {
        entries.push((Value::Text(COSE_LABEL_ZIP.to_string()), Value::Text(zip.clone())));
    }
    entries.push((int(COSE_LABEL_CWT_CLAIMS), header.claims.to_cwt()));
    Ok(entries)
}

fn recipient_structure(entry: &RecipientEntry) -> EnvelopeResult<Value> {
    let protected = encode(&Value::Map(vec![(
        int(COSE_LABEL_ALG),
        int(entry.algorithm.cose_id()),
    )]))?;

    let mut unprotected = vec![(int(COSE_LABEL_KID), Value::Bytes(entry.kid.as_bytes().to_vec()))];
    if let Some(epk) = &entry.epk {
        unprotected.push((int(COSE_LABEL_EPK), cose_key(epk)?));
    }
    if let Some(iv) = &entry.iv {
        unprotected.push((int(COSE_LABEL_IV), Value::Bytes(iv.clone())));
    }
    if let Some(tag) = &entry.tag {
        unprotected.push((
            Value::Text(COSE_LABEL_WRAP_TAG.to_string()),
            Value::Bytes(tag.clone()),
        ));
    }

    Ok(Value::Array(vec![
        Value::Bytes(protected),
        Value::Map(unprotected),
        Value::Bytes(entry.encrypted_key.clone()),
    ]))
}

fn cose_key(epk: &Jwk) -> EnvelopeResult<Value> {
    Ok(Value::Map(vec![
        (int(COSE_KEY_KTY), int(COSE_KTY_OKP)),
        (int(COSE_KEY_CRV), int(COSE_CRV_X25519)),
        (int(COSE_KEY_X), Value::Bytes(epk.okp_key()?.to_vec())),
    ]))
}

/// `Sig_structure` for COSE_Sign1.
fn sig_structure1(protected: &[u8], payload: &[u8]) -> Value {
    Value::Array(vec![
        Value::Text("Signature1".into()),
        Value::Bytes(protected.to_vec()),
        Value::Bytes(Vec::new()),
        Value::Bytes(payload.to_vec()),
    ])
}

/// `Sig_structure` for one signer of a COSE_Sign.
fn sig_structure(body_protected: &[u8], sign_protected: &[u8], payload: &[u8]) -> Value {
    Value::Array(vec![
        Value::Text("Signature".into()),
        Value::Bytes(body_protected.to_vec()),
        Value::Bytes(sign_protected.to_vec()),
        Value::Bytes(Vec::new()),
        Value::Bytes(payload.to_vec()),
    ])
}

fn enc_structure(protected: &[u8]) -> Value {
    Value::Array(vec![
        Value::Text("Encrypt".into()),
        Value::Bytes(protected.to_vec()),
        Value::Bytes(Vec::new()),
    ])
}

// ============================================================================
// Decoding
// ============================================================================

fn parse_sign1(structure: Value) -> EnvelopeResult<Layer> {
    let [protected, unprotected, payload, signature] = array(structure, "COSE_Sign1")?;
    let protected = bytes(protected, "protected header")?;
    let (mut header, alg) = header_from_protected(&protected)?;
    merge_unprotected(&mut header, &unprotected)?;
    let payload = attached_payload(payload)?;
    let signature = bytes(signature, "signature")?;

    let Some(alg) = alg else {
        if !signature.is_empty() {
            return Err(EnvelopeError::verification(
                Stage::Verify,
                "unsigned structure carries a signature",
            ));
        }
        return Ok(Layer::Unsigned { header, payload });
    };

    header.alg = Some(algorithm_name(alg));
    Ok(Layer::Signed(vec![SignedPart {
        header,
        signing_input: encode(&sig_structure1(&protected, &payload))?,
        payload,
        signature,
    }]))
}

fn parse_sign(structure: Value) -> EnvelopeResult<Layer> {
    let [protected, unprotected, payload, signatures] = array(structure, "COSE_Sign")?;
    let body_protected = bytes(protected, "protected header")?;
    let (mut body, _) = header_from_protected(&body_protected)?;
    merge_unprotected(&mut body, &unprotected)?;
    let payload = attached_payload(payload)?;

    let Value::Array(signatures) = signatures else {
        return Err(malformed("COSE_Sign signatures must be an array"));
    };
    let parts = signatures
        .into_iter()
        .map(|signer| -> EnvelopeResult<SignedPart> {
            let [sign_protected, sign_unprotected, signature] = array(signer, "COSE_Signature")?;
            let sign_protected = bytes(sign_protected, "signer protected header")?;
            let (signer_header, alg) = header_from_protected(&sign_protected)?;
            let alg = alg.ok_or_else(|| {
                EnvelopeError::verification(Stage::Header, "signer header has no alg")
            })?;

            let mut header = body.clone();
            header.alg = Some(algorithm_name(alg));
            header.kid = signer_header.kid;
            header.x5c = signer_header.x5c.or(header.x5c);
            merge_unprotected(&mut header, &sign_unprotected)?;

            Ok(SignedPart {
                header,
                payload: payload.clone(),
                signing_input: encode(&sig_structure(&body_protected, &sign_protected, &payload))?,
                signature: bytes(signature, "signature")?,
            })
        })
        .collect::<EnvelopeResult<Vec<_>>>()?;

    Ok(Layer::Signed(parts))
}

fn parse_encrypt(structure: Value) -> EnvelopeResult<Layer> {
    let [protected, unprotected, ciphertext, recipients] = array(structure, "COSE_Encrypt")?;
    let protected = bytes(protected, "protected header")?;
    let (mut header, alg) = header_from_protected(&protected)?;
    match alg {
        Some(COSE_A256GCM) => header.enc = Some(CONTENT_ENCRYPTION.to_string()),
        Some(other) => return Err(EnvelopeError::unsupported(other.to_string(), Stage::Decrypt)),
        None => return Err(EnvelopeError::verification(Stage::Header, "missing alg")),
    }

    let iv = map_entry(&unprotected, COSE_LABEL_IV)
        .and_then(|value| match value {
            Value::Bytes(iv) => Some(iv.clone()),
            _ => None,
        })
        .ok_or_else(|| EnvelopeError::verification(Stage::Header, "missing IV"))?;

    let mut ciphertext = bytes(ciphertext, "ciphertext")?;
    if ciphertext.len() < content::TAG_LEN {
        return Err(EnvelopeError::verification(
            Stage::Decrypt,
            "ciphertext is shorter than the authentication tag",
        ));
    }
    let tag = ciphertext.split_off(ciphertext.len() - content::TAG_LEN);

    let Value::Array(recipients) = recipients else {
        return Err(malformed("COSE_Encrypt recipients must be an array"));
    };
    let recipients = recipients
        .into_iter()
        .map(parse_recipient)
        .collect::<EnvelopeResult<Vec<_>>>()?;

    Ok(Layer::Encrypted(EncryptedPart {
        header,
        aad: encode(&enc_structure(&protected))?,
        iv,
        ciphertext,
        tag,
        recipients,
    }))
}

fn parse_recipient(structure: Value) -> EnvelopeResult<RecipientEntry> {
    let [protected, unprotected, encrypted_key] = array(structure, "COSE_recipient")?;
    let protected = bytes(protected, "recipient protected header")?;
    let (_, alg) = header_from_protected(&protected)?;
    let alg = alg.ok_or_else(|| EnvelopeError::verification(Stage::Header, "recipient has no alg"))?;
    let algorithm = KeyManagementAlgorithm::from_cose(alg)
        .ok_or_else(|| EnvelopeError::unsupported(alg.to_string(), Stage::Decrypt))?;

    let kid = match map_entry(&unprotected, COSE_LABEL_KID) {
        Some(Value::Bytes(kid)) => String::from_utf8(kid.clone())
            .map_err(|_| EnvelopeError::verification(Stage::Header, "kid is not UTF-8"))?,
        _ => String::new(),
    };
    let epk = map_entry(&unprotected, COSE_LABEL_EPK)
        .map(jwk_from_cose_key)
        .transpose()?;
    let iv = match map_entry(&unprotected, COSE_LABEL_IV) {
        Some(Value::Bytes(iv)) => Some(iv.clone()),
        _ => None,
    };
    let tag = match text_entry(&unprotected, COSE_LABEL_WRAP_TAG) {
        Some(Value::Bytes(tag)) => Some(tag.clone()),
        _ => None,
    };

    Ok(RecipientEntry {
        kid,
        algorithm,
        encrypted_key: bytes(encrypted_key, "encrypted key")?,
        epk,
        iv,
        tag,
    })
}

fn jwk_from_cose_key(value: &Value) -> EnvelopeResult<Jwk> {
    let invalid = || EnvelopeError::verification(Stage::Header, "ephemeral key is not X25519");
    if map_entry(value, COSE_KEY_KTY).and_then(integer) != Some(COSE_KTY_OKP)
        || map_entry(value, COSE_KEY_CRV).and_then(integer) != Some(COSE_CRV_X25519)
    {
        return Err(invalid());
    }
    let Some(Value::Bytes(x)) = map_entry(value, COSE_KEY_X) else {
        return Err(invalid());
    };
    Ok(Jwk {
        kty: KeyFamily::X25519.kty().to_string(),
        crv: KeyFamily::X25519.crv().map(String::from),
        x: Some(b64::encode_url(x)),
        ..Jwk::default()
    })
}

/// Decode a protected header bucket. Returns the header and the raw `alg` id, whose meaning
/// depends on the structure.
fn header_from_protected(protected: &[u8]) -> EnvelopeResult<(Header, Option<i64>)> {
    let mut header = Header::default();
    if protected.is_empty() {
        return Ok((header, None));
    }
    let invalid = |reason: &str| EnvelopeError::verification(Stage::Header, reason);
    let Some(Value::Map(entries)) = decode(protected) else {
        return Err(invalid("protected header is not a CBOR map"));
    };

    let mut alg = None;
    for (label, value) in &entries {
        match label {
            Value::Integer(_) => match integer(label) {
                Some(COSE_LABEL_ALG) => {
                    alg = Some(integer(value).ok_or_else(|| invalid("alg must be an integer"))?)
                }
                Some(COSE_LABEL_CRIT) => ensure_understood(value)?,
                Some(COSE_LABEL_CONTENT_TYPE) => header.cty = Some(text(value, "content type")?),
                Some(COSE_LABEL_KID) => header.kid = Some(kid(value)?),
                Some(COSE_LABEL_TYP) => header.typ = Some(text(value, "typ")?),
                Some(COSE_LABEL_X5CHAIN) => header.x5c = Some(x5chain(value)?),
                Some(COSE_LABEL_CWT_CLAIMS) => header.claims = Claims::from_cwt(value)?,
                _ => {}
            },
            Value::Text(name) if name == COSE_LABEL_ZIP => header.zip = Some(text(value, "zip")?),
            _ => {}
        }
    }
    Ok((header, alg))
}

/// Read the unprotected members this codec uses. Only `kid` is taken, and only when the
/// protected bucket did not set it.
fn merge_unprotected(header: &mut Header, unprotected: &Value) -> EnvelopeResult<()> {
    if !matches!(unprotected, Value::Map(_)) {
        return Err(malformed("unprotected header must be a map"));
    }
    if header.kid.is_none() {
        if let Some(value) = map_entry(unprotected, COSE_LABEL_KID) {
            header.kid = Some(kid(value)?);
        }
    }
    Ok(())
}

fn ensure_understood(crit: &Value) -> EnvelopeResult<()> {
    let Value::Array(labels) = crit else {
        return Err(EnvelopeError::verification(Stage::Header, "crit must be an array"));
    };
    for label in labels {
        let understood = match label {
            Value::Text(name) => name == COSE_LABEL_ZIP,
            other => integer(other).is_some_and(|label| UNDERSTOOD_LABELS.contains(&label)),
        };
        if !understood {
            return Err(EnvelopeError::malformed(
                Stage::Header,
                format!("critical label {label:?} is not understood"),
            ));
        }
    }
    Ok(())
}

/// JOSE name for a COSE algorithm id. Unknown ids keep their number and fail verification.
fn algorithm_name(id: i64) -> String {
    SignatureAlgorithm::from_cose(id)
        .map(|algorithm| algorithm.as_str().to_string())
        .unwrap_or_else(|| id.to_string())
}

fn attached_payload(payload: Value) -> EnvelopeResult<Vec<u8>> {
    match payload {
        Value::Bytes(payload) => Ok(payload),
        Value::Null => Err(malformed("detached payloads are not supported")),
        _ => Err(malformed("payload must be a byte string")),
    }
}

fn x5chain(value: &Value) -> EnvelopeResult<Vec<String>> {
    let certificate = |value: &Value| match value {
        Value::Bytes(der) => Ok(b64::encode_standard(der)),
        _ => Err(EnvelopeError::verification(
            Stage::Header,
            "x5chain entries must be byte strings",
        )),
    };
    match value {
        Value::Array(chain) => chain.iter().map(certificate).collect(),
        single => Ok(vec![certificate(single)?]),
    }
}

fn kid(value: &Value) -> EnvelopeResult<String> {
    match value {
        Value::Bytes(kid) => String::from_utf8(kid.clone())
            .map_err(|_| EnvelopeError::verification(Stage::Header, "kid is not UTF-8")),
        _ => Err(EnvelopeError::verification(
            Stage::Header,
            "kid must be a byte string",
        )),
    }
}

fn text(value: &Value, name: &str) -> EnvelopeResult<String> {
    match value {
        Value::Text(text) => Ok(text.clone()),
        _ => Err(EnvelopeError::verification(
            Stage::Header,
            format!("{name} must be a text string"),
        )),
    }
}

fn map_entry(map: &Value, label: i64) -> Option<&Value> {
    let Value::Map(entries) = map else {
        return None;
    };
    entries
        .iter()
        .find(|(key, _)| integer(key) == Some(label))
        .map(|(_, value)| value)
}

fn text_entry<'a>(map: &'a Value, label: &str) -> Option<&'a Value> {
    let Value::Map(entries) = map else {
        return None;
    };
    entries
        .iter()
        .find(|(key, _)| matches!(key, Value::Text(name) if name == label))
        .map(|(_, value)| value)
}

fn array<const N: usize>(value: Value, name: &str) -> EnvelopeResult<[Value; N]> {
    match value {
        Value::Array(items) => <[Value; N]>::try_from(items).map_err(|items| {
            malformed(format!("{name} has {} members, expected {N}", items.len()))
        }),
        _ => Err(malformed(format!("{name} must be an array"))),
    }
}

fn bytes(value: Value, name: &str) -> EnvelopeResult<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        _ => Err(malformed(format!("{name} must be a byte string"))),
    }
}

fn int(value: i64) -> Value {
    Value::Integer(value.into())
}

fn encode(value: &Value) -> EnvelopeResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|e| {
        EnvelopeError::malformed(Stage::Serialize, format!("CBOR encoding failed: {e:?}"))
    })?;
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> Option<Value> {
    ciborium::de::from_reader(bytes).ok()
}

fn malformed(reason: impl Into<String>) -> EnvelopeError {
    EnvelopeError::malformed(Stage::Parse, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptographicEncryption;

    fn header() -> Header {
        Header {
            alg: Some("ES256".into()),
            cty: Some("application/fhir+json".into()),
            zip: Some("DEF".into()),
            claims: Claims {
                iat: Some(1_700_000_000),
                ..Claims::default()
            },
            ..Header::default()
        }
    }

    fn tag_of(envelope: &Envelope) -> u64 {
        let Envelope::Tagged(bytes) = envelope else {
            panic!("expected tagged bytes");
        };
        match decode(bytes).unwrap() {
            Value::Tag(tag, _) => tag,
            other => panic!("untagged value {other:?}"),
        }
    }

    #[test]
    fn sign1_round_trips_header_and_payload() {
        let key = KeyMaterial::generate("ES256").unwrap();
        let header = Header {
            kid: Some(key.key_id().to_string()),
            ..header()
        };
        let envelope = TaggedCodec.sign(&header, b"bundle", &key).unwrap();
        assert_eq!(tag_of(&envelope), 18);
        assert_eq!(envelope.protection(), Protection::Signed);

        let Layer::Signed(parts) = TaggedCodec.parse(&envelope).unwrap() else {
            panic!("expected a signed layer");
        };
        assert_eq!(parts[0].header, header);
        assert_eq!(parts[0].payload, b"bundle");
        assert!(key.verify(&parts[0].signing_input, &parts[0].signature, &key.public_key()));
    }

    #[test]
    fn unsigned_sign1_has_empty_signature() {
        let envelope = TaggedCodec.unsigned(&header(), b"bundle").unwrap();
        assert!(matches!(
            TaggedCodec.parse(&envelope).unwrap(),
            Layer::Unsigned { .. }
        ));
    }

    #[test]
    fn encrypt_carries_one_recipient_structure_per_key() {
        let keys = vec![
            KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap(),
            KeyMaterial::generate_rsa("RSA-OAEP-256", 1024).unwrap(),
        ];
        let cek = ContentKey::generate();
        let entries = KeyMaterial::encrypt_for(&keys, &cek).unwrap();

        let envelope = TaggedCodec.encrypt(header(), entries.clone(), &cek, b"secret").unwrap();
        assert_eq!(tag_of(&envelope), 96);

        let Layer::Encrypted(layer) = TaggedCodec.parse(&envelope).unwrap() else {
            panic!("expected an encrypted layer");
        };
        assert_eq!(layer.recipients, entries);
        assert_eq!(layer.header.enc.as_deref(), Some("A256GCM"));
        let plaintext = content::open(
            cek.as_bytes(),
            &layer.iv,
            &layer.ciphertext,
            &layer.tag,
            &layer.aad,
        )
        .unwrap();
        assert_eq!(plaintext, b"secret");
    }

    #[test]
    fn cose_sign_accepts_each_signer() {
        let key = KeyMaterial::generate("ES256").unwrap();
        let body_protected = encode(&Value::Map(vec![(
            int(COSE_LABEL_CONTENT_TYPE),
            Value::Text("application/fhir+json".into()),
        )]))
        .unwrap();
        let sign_protected = encode(&Value::Map(vec![(int(COSE_LABEL_ALG), int(-7))])).unwrap();
        let tbs = encode(&sig_structure(&body_protected, &sign_protected, b"bundle")).unwrap();
        let signature = key.sign(&tbs, "ES256").unwrap();

        let structure = Value::Array(vec![
            Value::Bytes(body_protected),
            Value::Map(Vec::new()),
            Value::Bytes(b"bundle".to_vec()),
            Value::Array(vec![Value::Array(vec![
                Value::Bytes(sign_protected),
                Value::Map(vec![(
                    int(COSE_LABEL_KID),
                    Value::Bytes(key.key_id().as_bytes().to_vec()),
                )]),
                Value::Bytes(signature),
            ])]),
        ]);
        let envelope = tagged(CoseStructure::Sign, structure).unwrap();

        let Layer::Signed(parts) = TaggedCodec.parse(&envelope).unwrap() else {
            panic!("expected a signed layer");
        };
        assert_eq!(parts[0].header.alg.as_deref(), Some("ES256"));
        assert_eq!(parts[0].header.kid.as_deref(), Some(key.key_id()));
        assert!(key.verify(&parts[0].signing_input, &parts[0].signature, &key.public_key()));
    }

    #[test]
    fn mac_structures_are_rejected() {
        let envelope = tagged(CoseStructure::Mac0, Value::Array(Vec::new())).unwrap();
        let err = TaggedCodec.parse(&envelope).unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedEnvelope { .. }));
    }

    #[test]
    fn unknown_critical_label_is_rejected() {
        let protected = encode(&Value::Map(vec![
            (int(COSE_LABEL_ALG), int(-7)),
            (int(COSE_LABEL_CRIT), Value::Array(vec![int(99)])),
        ]))
        .unwrap();
        let envelope = sign1(protected, b"bundle", vec![1, 2, 3]).unwrap();
        assert!(TaggedCodec.parse(&envelope).is_err());
    }
}
