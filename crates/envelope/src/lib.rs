//! # VPR Envelope
//!
//! Secured wire representations of clinical documents.
//!
//! This crate turns an ordered set of FHIR resources into a verifiable, optionally encrypted
//! and compressed envelope addressed to any number of recipients, and back:
//! - [`KeyMaterial`]: one cryptographic identity, implementing [`CryptographicSignature`] and
//!   [`CryptographicEncryption`]
//! - [`Composition`]: an ordered, role-scoped document of [`fhir::Resource`]s
//! - [`EnvelopeService`]: the seal/open pipeline over three [`Encoding`]s (compact JOSE,
//!   general JSON, COSE tagged CBOR)
//! - [`TransportMessage`]: DIDComm-style transport messages carrying envelopes as attachments
//!
//! **No I/O**: key storage, configuration sources and output formatting belong to the caller
//! (see the `vpr` CLI). Configuration arrives once as an [`EnvelopeConfig`].

pub mod access;
pub mod algorithms;
mod b64;
pub mod composition;
pub mod compression;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod envelope;
mod error;
pub mod keys;
pub mod transport;

pub use access::{Access, AccessAuthority, Action, Role, RolePolicy};
pub use algorithms::{KeyFamily, KeyManagementAlgorithm, SignatureAlgorithm};
pub use composition::Composition;
pub use compression::Compression;
pub use config::EnvelopeConfig;
pub use crypto::{ContentKey, CryptographicEncryption, CryptographicSignature, RecipientEntry};
pub use envelope::{
    Claims, Encoding, Envelope, EnvelopeService, Expiration, OpenRequest, OpenedEnvelope,
    Protection, SealRequest,
};
pub use error::{EnvelopeError, EnvelopeResult, Stage};
pub use keys::{Jwk, KeyMaterial};
pub use transport::{
    Attachment, AttachmentData, Base64Data, JsonData, LinksData, TransportMessage,
};
