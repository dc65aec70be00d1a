//! X.509 identity certificates for envelope signing keys.
//!
//! Issues a self-signed P-256 certificate binding a holder's name and DID to a fresh signing
//! key. The private key is returned as PKCS#8 PEM so it can be loaded with
//! `vpr_envelope::KeyMaterial::from_pkcs8_pem`, and the certificate attached to the key's
//! `x5c` chain with `KeyMaterial::with_certificate`.

use rcgen::{
    CertificateParams, DistinguishedName, DnType, Ia5String, IsCa, KeyPair, KeyUsagePurpose,
    SanType,
};
use thiserror::Error;

const DID_PREFIX: &str = "did:";

/// Errors that can occur during certificate creation.
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("invalid certificate request: {0}")]
    InvalidRequest(String),

    #[error("failed to generate certificate: {0}")]
    GenerationError(String),
}

pub type CertificateResult<T> = std::result::Result<T, CertificateError>;

/// Who a certificate is issued to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityRequest {
    /// Common Name of the subject.
    pub name: String,
    /// DID recorded as a URI subjectAltName.
    pub did: String,
    /// Professional registration, recorded as `vpr://{authority}/{number}` when present.
    pub registration: Option<(String, String)>,
    pub validity_days: u32,
}

impl IdentityRequest {
    pub fn new(name: impl Into<String>, did: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            did: did.into(),
            registration: None,
            validity_days: 365,
        }
    }

    pub fn with_registration(
        mut self,
        authority: impl Into<String>,
        number: impl Into<String>,
    ) -> Self {
        self.registration = Some((authority.into(), number.into()));
        self
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    fn validate(&self) -> CertificateResult<()> {
        if self.name.trim().is_empty() {
            return Err(CertificateError::InvalidRequest("name is empty".into()));
        }
        if !self.did.starts_with(DID_PREFIX) {
            return Err(CertificateError::InvalidRequest(format!(
                "'{}' is not a DID",
                self.did
            )));
        }
        if self.validity_days == 0 {
            return Err(CertificateError::InvalidRequest(
                "validity must be at least one day".into(),
            ));
        }
        Ok(())
    }
}

/// A certificate and the signing key it certifies.
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub certificate_der: Vec<u8>,
    pub private_key_pem: String,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

pub struct Certificate;

impl Certificate {
    /// Issue a self-signed identity certificate with a fresh P-256 key.
    ///
    /// # Errors
    ///
    /// - `CertificateError::InvalidRequest` for an empty name, a non-DID, or zero validity.
    /// - `CertificateError::GenerationError` if key or certificate generation fails.
    pub fn issue(request: &IdentityRequest) -> CertificateResult<IssuedCertificate> {
        request.validate()?;
        let generation = |e: rcgen::Error| CertificateError::GenerationError(e.to_string());

        let mut params = CertificateParams::default();

        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, request.name.as_str());
        params.distinguished_name = subject;
        params.is_ca = IsCa::NoCa;

        params.subject_alt_names.push(uri(request.did.clone())?);
        if let Some((authority, number)) = &request.registration {
            params
                .subject_alt_names
                .push(uri(format!("vpr://{authority}/{number}"))?);
        }

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
        ];

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(i64::from(request.validity_days));

        let key_pair = KeyPair::generate().map_err(generation)?;
        let cert = params.self_signed(&key_pair).map_err(generation)?;

        tracing::debug!(did = %request.did, days = request.validity_days, "issued identity certificate");
        Ok(IssuedCertificate {
            certificate_pem: cert.pem(),
            certificate_der: cert.der().to_vec(),
            private_key_pem: key_pair.serialize_pem(),
        })
    }
}

fn uri(value: String) -> CertificateResult<SanType> {
    Ia5String::try_from(value)
        .map(SanType::URI)
        .map_err(|e| CertificateError::InvalidRequest(format!("subjectAltName URI: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::extensions::GeneralName;
    use x509_parser::prelude::*;

    fn request() -> IdentityRequest {
        IdentityRequest::new("John Doe", "did:example:clinician-1")
    }

    #[test]
    fn issues_pem_certificate_and_pkcs8_key() {
        let issued = Certificate::issue(&request()).unwrap();

        assert!(issued.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(issued.private_key_pem.contains("BEGIN PRIVATE KEY"));
        assert!(!format!("{issued:?}").contains("PRIVATE KEY"));
    }

    #[test]
    fn certificate_names_subject_and_did() {
        let issued =
            Certificate::issue(&request().with_registration("GMC", "123456")).unwrap();
        let (_, cert) = X509Certificate::from_der(&issued.certificate_der).unwrap();

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok());
        assert_eq!(common_name, Some("John Doe"));

        let san = cert.subject_alternative_name().unwrap().unwrap();
        let uris: Vec<&str> = san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::URI(uri) => Some(*uri),
                _ => None,
            })
            .collect();
        assert_eq!(uris, vec!["did:example:clinician-1", "vpr://GMC/123456"]);
    }

    #[test]
    fn validity_follows_request() {
        let issued = Certificate::issue(&request().with_validity_days(30)).unwrap();
        let (_, cert) = X509Certificate::from_der(&issued.certificate_der).unwrap();

        let validity = cert.validity();
        let days = (validity.not_after.timestamp() - validity.not_before.timestamp()) / 86_400;
        assert_eq!(days, 30);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let not_a_did = IdentityRequest::new("John Doe", "john@example.org");
        assert!(matches!(
            Certificate::issue(&not_a_did),
            Err(CertificateError::InvalidRequest(_))
        ));

        let expired = request().with_validity_days(0);
        assert!(Certificate::issue(&expired).is_err());

        let unnamed = IdentityRequest::new("  ", "did:example:x");
        assert!(Certificate::issue(&unnamed).is_err());
    }
}
