use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use fhir::Resource;
use serde_json::json;
use vpr_envelope::{
    Access, Attachment, Composition, Compression, Encoding, Envelope, EnvelopeConfig,
    EnvelopeError, EnvelopeService, Expiration, KeyMaterial, OpenRequest, Protection, Role,
    RolePolicy, SealRequest, TransportMessage,
};

fn clinician() -> Access<'static> {
    Access::new(&RolePolicy, Role::Clinician)
}

fn composition(ids: &[&str]) -> Composition {
    let mut composition = Composition::new();
    for id in ids {
        let resource = Resource::new("Observation", id)
            .unwrap()
            .with_subject("Patient/p1")
            .with_field("status", json!("final"))
            .unwrap()
            .with_field(
                "code",
                json!({"coding": [{"system": "http://loinc.org", "code": "8867-4"}]}),
            )
            .unwrap();
        composition.add_resource(clinician(), resource).unwrap();
    }
    composition
}

fn identifiers(composition: &Composition) -> Vec<&str> {
    composition
        .resources()
        .iter()
        .map(Resource::identifier)
        .collect()
}

/// Replace one character in the middle of segment `index` with another base64url character.
fn alter_segment(token: &str, index: usize) -> String {
    let mut segments: Vec<String> = token.split('.').map(String::from).collect();
    let segment = &mut segments[index];
    let middle = segment.len() / 2;
    let replacement = if &segment[middle..=middle] == "A" { "B" } else { "A" };
    segment.replace_range(middle..=middle, replacement);
    segments.join(".")
}

/// Rewrite a base64url JSON header with `edit` applied to its text.
fn edit_header(encoded: &str, edit: impl Fn(&str) -> String) -> String {
    let json = String::from_utf8(URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap();
    let edited = edit(&json);
    assert_ne!(edited, json);
    URL_SAFE_NO_PAD.encode(edited)
}

/// Flip the low bit of the first character of `kid`.
fn altered_kid(kid: &str) -> String {
    let mut bytes = kid.as_bytes().to_vec();
    bytes[0] ^= 0x01;
    String::from_utf8(bytes).unwrap()
}

fn signed(encoding: Encoding, signer: &KeyMaterial) -> Envelope {
    EnvelopeService::default()
        .seal(
            clinician(),
            &composition(&["r1", "r2"]),
            &SealRequest::new(encoding).signed_by(signer, "ES256"),
        )
        .unwrap()
}

fn assert_verification_failed(envelope: &Envelope, signer: &KeyMaterial) {
    let err = EnvelopeService::default()
        .open(clinician(), envelope, &OpenRequest::new().trust(signer))
        .unwrap_err();
    assert!(
        matches!(err, EnvelopeError::VerificationFailed { .. }),
        "{err}"
    );
}

#[test]
fn every_encoding_round_trips_under_every_policy() {
    let service = EnvelopeService::default();
    let signer = KeyMaterial::generate("ES256").unwrap();
    let recipient = KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap();
    let recipients = [recipient.clone()];
    let original = composition(&["o3", "o1", "o2"]);

    for encoding in Encoding::ALL {
        for compression in [Compression::None, Compression::Deflate] {
            let requests = [
                SealRequest::new(encoding).signed_by(&signer, "ES256"),
                SealRequest::new(encoding).encrypted_for(&recipients),
                SealRequest::new(encoding)
                    .signed_by(&signer, "ES256")
                    .encrypted_for(&recipients),
            ];
            for request in requests {
                let request = request.compressed(compression);
                let envelope = service.seal(clinician(), &original, &request).unwrap();
                assert_eq!(envelope.encoding(), encoding);

                let bytes = envelope.to_bytes().unwrap();
                let received = Envelope::from_bytes(&bytes).unwrap();
                let open = OpenRequest::new().trust(&signer).recipient(&recipient);
                let opened = service.open(clinician(), &received, &open).unwrap();

                assert_eq!(opened, original, "{encoding} / {compression:?}");
            }
        }
    }
}

#[test]
fn two_resource_compact_signature_detects_payload_change() {
    let service = EnvelopeService::default();
    let signer = KeyMaterial::generate("ES256").unwrap();
    let original = composition(&["r1", "r2"]);

    let envelope = service
        .seal(
            clinician(),
            &original,
            &SealRequest::new(Encoding::Compact).signed_by(&signer, "ES256"),
        )
        .unwrap();
    let token = envelope.as_compact().unwrap();
    assert_eq!(token.split('.').count(), 3);

    let open = OpenRequest::new().trust(&signer);
    let opened = service.open(clinician(), &envelope, &open).unwrap();
    assert_eq!(identifiers(&opened), vec!["r1", "r2"]);

    let tampered = Envelope::Compact(alter_segment(token, 1));
    let err = service.open(clinician(), &tampered, &open).unwrap_err();
    assert!(
        matches!(err, EnvelopeError::VerificationFailed { .. }),
        "{err}"
    );
}

#[test]
fn compact_header_changes_fail_verification() {
    let signer = KeyMaterial::generate("ES256").unwrap();
    let envelope = signed(Encoding::Compact, &signer);
    let token = envelope.as_compact().unwrap();
    let (protected, rest) = token.split_once('.').unwrap();
    let kid = signer.key_id().to_string();

    let wrong_alg = edit_header(protected, |json| json.replacen("ES256", "ES246", 1));
    assert_verification_failed(&Envelope::Compact(format!("{wrong_alg}.{rest}")), &signer);

    let wrong_kid = edit_header(protected, |json| json.replacen(&kid, &altered_kid(&kid), 1));
    assert_verification_failed(&Envelope::Compact(format!("{wrong_kid}.{rest}")), &signer);

    assert_verification_failed(&Envelope::Compact(alter_segment(token, 0)), &signer);
}

#[test]
fn general_protected_header_changes_fail_verification() {
    let signer = KeyMaterial::generate("ES256").unwrap();
    let Envelope::General(original) = signed(Encoding::General, &signer) else {
        panic!("expected a general envelope");
    };
    let protected = original["protected"].as_str().unwrap().to_string();
    let kid = signer.key_id().to_string();

    for edited in [
        edit_header(&protected, |json| json.replacen("ES256", "ES246", 1)),
        edit_header(&protected, |json| json.replacen("ES256", "ES384", 1)),
        edit_header(&protected, |json| json.replacen(&kid, &altered_kid(&kid), 1)),
    ] {
        let mut tampered = original.clone();
        tampered["protected"] = json!(edited);
        assert_verification_failed(&Envelope::General(tampered), &signer);
    }
}

#[test]
fn cose_protected_header_changes_fail_verification() {
    let signer = KeyMaterial::generate("ES256").unwrap();
    let Envelope::Tagged(original) = signed(Encoding::Tagged, &signer) else {
        panic!("expected a tagged envelope");
    };

    // alg -7 (0x26) becomes -5 (0x24).
    let alg_at = original
        .windows(2)
        .position(|pair| pair == [0x01, 0x26])
        .unwrap();
    let mut wrong_alg = original.clone();
    wrong_alg[alg_at + 1] = 0x24;
    assert_verification_failed(&Envelope::Tagged(wrong_alg), &signer);

    let kid = signer.key_id().as_bytes();
    let kid_at = original
        .windows(kid.len())
        .position(|window| window == kid)
        .unwrap();
    let mut wrong_kid = original.clone();
    wrong_kid[kid_at] ^= 0x01;
    assert_verification_failed(&Envelope::Tagged(wrong_kid), &signer);
}

#[test]
fn tampered_ciphertext_fails_authentication() {
    let service = EnvelopeService::default();
    let recipient = KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap();
    let recipients = [recipient.clone()];

    let envelope = service
        .seal(
            clinician(),
            &composition(&["a"]),
            &SealRequest::new(Encoding::Compact).encrypted_for(&recipients),
        )
        .unwrap();
    let tampered = Envelope::Compact(alter_segment(envelope.as_compact().unwrap(), 3));

    let err = service
        .open(
            clinician(),
            &tampered,
            &OpenRequest::new().recipient(&recipient),
        )
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::VerificationFailed { .. }), "{err}");
}

#[test]
fn tampered_cose_signature_fails_verification() {
    let service = EnvelopeService::default();
    let signer = KeyMaterial::generate("ES256").unwrap();

    let envelope = service
        .seal(
            clinician(),
            &composition(&["a"]),
            &SealRequest::new(Encoding::Tagged).signed_by(&signer, "ES256"),
        )
        .unwrap();
    let Envelope::Tagged(mut bytes) = envelope else {
        panic!("expected tagged bytes");
    };
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let err = service
        .open(
            clinician(),
            &Envelope::Tagged(bytes),
            &OpenRequest::new().trust(&signer),
        )
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::VerificationFailed { .. }), "{err}");
}

#[test]
fn each_recipient_opens_independently() {
    let service = EnvelopeService::default();
    let recipients = vec![
        KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap(),
        KeyMaterial::generate_rsa("RSA-OAEP-256", 2048).unwrap(),
    ];
    let outsider = KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap();
    let original = composition(&["a", "b"]);

    for encoding in [Encoding::General, Encoding::Tagged] {
        let envelope = service
            .seal(
                clinician(),
                &original,
                &SealRequest::new(encoding).encrypted_for(&recipients),
            )
            .unwrap();
        assert_eq!(envelope.protection(), Protection::Encrypted);

        for recipient in &recipients {
            let opened = service
                .open(
                    clinician(),
                    &envelope,
                    &OpenRequest::new().recipient(recipient),
                )
                .unwrap();
            assert_eq!(opened, original);
        }

        let err = service
            .open(
                clinician(),
                &envelope,
                &OpenRequest::new().recipient(&outsider),
            )
            .unwrap_err();
        assert!(
            matches!(&err, EnvelopeError::RecipientNotFound { kid } if kid == outsider.key_id()),
            "{err}"
        );

        let err = service
            .open(clinician(), &envelope, &OpenRequest::new())
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::KeyMissing { .. }), "{err}");
    }
}

#[test]
fn expired_envelopes_are_rejected() {
    let service = EnvelopeService::default();
    let signer = KeyMaterial::generate("ES256").unwrap();
    let request = SealRequest::new(Encoding::General)
        .signed_by(&signer, "ES256")
        .expires(Expiration::In(Duration::minutes(5)));
    let envelope = service
        .seal(clinician(), &composition(&["a"]), &request)
        .unwrap();

    let open = OpenRequest::new().trust(&signer);
    let opened = service
        .open_detailed(clinician(), &envelope, &open)
        .unwrap();
    let expires_at = opened.claims.expires_at().unwrap();
    assert_eq!(opened.signed_by.as_deref(), Some(signer.key_id()));

    let late = open.clone().at(expires_at + Duration::seconds(1));
    let err = service.open(clinician(), &envelope, &late).unwrap_err();
    assert!(
        matches!(err, EnvelopeError::EnvelopeExpired { expired_at } if expired_at == expires_at)
    );
}

#[test]
fn configured_default_expiry_applies() {
    let config = EnvelopeConfig::default()
        .with_default_expiry(Some(Duration::hours(1)))
        .unwrap();
    let service = EnvelopeService::new(config);
    let signer = KeyMaterial::generate("ES256").unwrap();

    let envelope = service
        .seal(
            clinician(),
            &composition(&["a"]),
            &SealRequest::new(Encoding::Tagged).signed_by(&signer, "ES256"),
        )
        .unwrap();

    let later = OpenRequest::new()
        .trust(&signer)
        .at(Utc::now() + Duration::hours(2));
    let err = service.open(clinician(), &envelope, &later).unwrap_err();
    assert!(matches!(err, EnvelopeError::EnvelopeExpired { .. }));
}

#[test]
fn duplicate_identifiers_never_reach_an_envelope() {
    let mut composition = composition(&["a", "b"]);
    let err = composition
        .add_resource(clinician(), Resource::new("Patient", "a").unwrap())
        .unwrap_err();

    assert!(matches!(err, EnvelopeError::DuplicateIdentifier(id) if id == "a"));
    assert_eq!(identifiers(&composition), vec!["a", "b"]);
}

#[test]
fn roles_are_checked_on_every_call() {
    let service = EnvelopeService::default();
    let signer = KeyMaterial::generate("ES256").unwrap();
    let request = SealRequest::new(Encoding::Compact).signed_by(&signer, "ES256");
    let mut document = composition(&["a"]);
    document.set_role(Role::Clinician);

    let associate = Access::new(&RolePolicy, Role::PatientAssociate);
    assert!(matches!(
        service.seal(associate, &document, &request),
        Err(EnvelopeError::RoleViolation { .. })
    ));

    let envelope = service.seal(clinician(), &document, &request).unwrap();
    let opened = service
        .open(associate, &envelope, &OpenRequest::new().trust(&signer))
        .unwrap();
    assert!(matches!(
        opened.to_specification(associate, fhir::Specification::Fhir),
        Err(EnvelopeError::RoleViolation { .. })
    ));
}

#[test]
fn untrusted_signer_is_rejected() {
    let service = EnvelopeService::default();
    let signer = KeyMaterial::generate("ES384").unwrap();
    let stranger = KeyMaterial::generate("ES384").unwrap();

    let envelope = service
        .seal(
            clinician(),
            &composition(&["a"]),
            &SealRequest::new(Encoding::General).signed_by(&signer, "ES384"),
        )
        .unwrap();

    let err = service
        .open(clinician(), &envelope, &OpenRequest::new().trust(&stranger))
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::VerificationFailed { .. }));
}

#[test]
fn encrypted_only_envelope_fails_when_signature_required() {
    let service = EnvelopeService::default();
    let recipient = KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap();
    let recipients = [recipient.clone()];
    let envelope = service
        .seal(
            clinician(),
            &composition(&["a"]),
            &SealRequest::new(Encoding::General).encrypted_for(&recipients),
        )
        .unwrap();

    let open = OpenRequest::new()
        .recipient(&recipient)
        .require_signature(true);
    let err = service.open(clinician(), &envelope, &open).unwrap_err();
    assert!(matches!(err, EnvelopeError::VerificationFailed { .. }));
}

#[test]
fn plaintext_requires_opt_in_on_both_sides() {
    let permissive = EnvelopeService::new(EnvelopeConfig::default().with_plaintext(true));
    let strict = EnvelopeService::default();
    let original = composition(&["a", "b"]);

    for encoding in Encoding::ALL {
        let envelope = permissive
            .seal(clinician(), &original, &SealRequest::new(encoding))
            .unwrap();
        assert_eq!(envelope.protection(), Protection::Plain, "{encoding}");

        let opened = permissive
            .open(clinician(), &envelope, &OpenRequest::new())
            .unwrap();
        assert_eq!(opened, original);

        assert!(matches!(
            strict.open(clinician(), &envelope, &OpenRequest::new()),
            Err(EnvelopeError::MalformedEnvelope { .. })
        ));
        assert!(matches!(
            permissive.open(
                clinician(),
                &envelope,
                &OpenRequest::new().require_signature(true)
            ),
            Err(EnvelopeError::VerificationFailed { .. })
        ));
    }
}

#[test]
fn edwards_curve_signatures_can_be_disabled() {
    let enabled = EnvelopeService::default();
    let disabled =
        EnvelopeService::new(EnvelopeConfig::default().with_edwards_curve_signatures(false));
    let signer = KeyMaterial::generate("EdDSA").unwrap();
    let request = SealRequest::new(Encoding::Compact).signed_by(&signer, "EdDSA");

    assert!(matches!(
        disabled.seal(clinician(), &composition(&["a"]), &request),
        Err(EnvelopeError::AlgorithmUnsupported { .. })
    ));

    let envelope = enabled
        .seal(clinician(), &composition(&["a"]), &request)
        .unwrap();
    let open = OpenRequest::new().trust(&signer);
    assert!(enabled.open(clinician(), &envelope, &open).is_ok());
    assert!(matches!(
        disabled.open(clinician(), &envelope, &open),
        Err(EnvelopeError::VerificationFailed { .. })
    ));
}

#[test]
fn certificate_chain_must_carry_the_signing_key() {
    let issued = vpr_certificates::Certificate::issue(&vpr_certificates::IdentityRequest::new(
        "Jane Smith",
        "did:example:jane",
    ))
    .unwrap();
    let signer = KeyMaterial::from_pkcs8_pem(&issued.private_key_pem, "ES256")
        .unwrap()
        .with_certificate(issued.certificate_pem.as_bytes())
        .unwrap();
    assert!(signer.public_key().x5c.is_some());

    let unrelated = KeyMaterial::generate("ES256").unwrap();
    assert!(matches!(
        unrelated.with_certificate(&issued.certificate_der),
        Err(EnvelopeError::CertificateKeyMismatch { .. })
    ));

    let service = EnvelopeService::default();
    let envelope = service
        .seal(
            clinician(),
            &composition(&["a"]),
            &SealRequest::new(Encoding::Tagged).signed_by(&signer, "ES256"),
        )
        .unwrap();
    assert!(service
        .open(clinician(), &envelope, &OpenRequest::new().trust(&signer))
        .is_ok());

    // Another key published under the certified key's kid.
    let mut impostor = KeyMaterial::generate("ES256").unwrap().public_key();
    impostor.kid = Some(signer.key_id().to_string());
    impostor.x5c = None;
    let impostor = KeyMaterial::from_public(impostor).unwrap();

    let err = service
        .open(clinician(), &envelope, &OpenRequest::new().trust(&impostor))
        .unwrap_err();
    assert!(
        matches!(err, EnvelopeError::CertificateKeyMismatch { .. }),
        "{err}"
    );
}

#[test]
fn envelopes_nest_inside_transport_messages() {
    let service = EnvelopeService::default();
    let clinician_key = KeyMaterial::generate("ES256").unwrap();
    let gateway_key = KeyMaterial::generate("ES256").unwrap();
    let recipient = KeyMaterial::generate("ECDH-ES+A256GCMKW").unwrap();
    let recipients = [recipient.clone()];
    let original = composition(&["a", "b"]);

    let document = service
        .seal(
            clinician(),
            &original,
            &SealRequest::new(Encoding::General).signed_by(&clinician_key, "ES256"),
        )
        .unwrap();
    let attachment = Attachment::from_envelope(&document)
        .unwrap()
        .with_description("discharge summary");
    assert_eq!(
        attachment.media_type.as_deref(),
        Some("application/didcomm-signed+json")
    );

    let message = TransportMessage::new("https://vpr.example/record/1.0/share", json!({}))
        .from_did("did:example:hospital")
        .unwrap()
        .to_did("did:example:gp")
        .unwrap()
        .with_attachment(attachment);

    for encoding in [Encoding::Compact, Encoding::General, Encoding::Tagged] {
        let packed = service
            .pack(
                &message,
                &SealRequest::new(encoding)
                    .signed_by(&gateway_key, "ES256")
                    .encrypted_for(&recipients),
            )
            .unwrap();
        assert_eq!(packed.protection(), Protection::Encrypted);

        let unpacked = service
            .unpack(
                &packed,
                &OpenRequest::new()
                    .trust(&gateway_key)
                    .recipient(&recipient)
                    .require_signature(true),
            )
            .unwrap();
        assert_eq!(unpacked, message, "{encoding}");

        let inner = unpacked.attachments[0].envelope().unwrap();
        let opened = service
            .open(
                clinician(),
                &inner,
                &OpenRequest::new().trust(&clinician_key),
            )
            .unwrap();
        assert_eq!(opened, original);
    }
}

#[test]
fn expired_transport_messages_are_not_unpacked() {
    let service = EnvelopeService::default();
    let signer = KeyMaterial::generate("ES256").unwrap();
    let message = TransportMessage::new("t", json!({})).expires_in(Duration::minutes(10));
    let deadline = message.expires_time.unwrap();

    let packed = service
        .pack(
            &message,
            &SealRequest::new(Encoding::General).signed_by(&signer, "ES256"),
        )
        .unwrap();
    let open = OpenRequest::new().trust(&signer);
    assert_eq!(service.unpack(&packed, &open).unwrap(), message);

    let late = open.at(chrono::DateTime::from_timestamp(deadline, 0).unwrap());
    let err = service.unpack(&packed, &late).unwrap_err();
    assert!(
        matches!(err, EnvelopeError::EnvelopeExpired { expired_at } if expired_at.timestamp() == deadline),
        "{err}"
    );
}

#[test]
fn packed_messages_are_not_documents() {
    let service = EnvelopeService::default();
    let signer = KeyMaterial::generate("ES256").unwrap();
    let message = TransportMessage::new("t", json!({"note": "hello"}));

    let packed = service
        .pack(
            &message,
            &SealRequest::new(Encoding::Compact).signed_by(&signer, "ES256"),
        )
        .unwrap();

    let err = service
        .open(clinician(), &packed, &OpenRequest::new().trust(&signer))
        .unwrap_err();
    assert!(matches!(err, EnvelopeError::MalformedEnvelope { .. }));
}
