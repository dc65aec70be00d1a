//! FHIR wire/boundary support for the VPR envelope workspace.
//!
//! This crate provides **wire models** and **format/translation helpers** for the resources
//! carried inside sealed compositions:
//! - [`Resource`]: one opaque FHIR-aligned record with strict identity members
//! - [`Bundle`]: the canonical `collection` bundle form that gets signed and encrypted
//! - [`Specification`]: downstream renderings (FHIR, JSON:API, schema.org, SMART Health Card,
//!   EU Digital Green Certificate)
//!
//! This crate focuses on:
//! - FHIR semantic alignment (only `resourceType`, `id`, `meta` and `fullUrl` are interpreted)
//! - serialisation/deserialisation with located schema errors
//! - translation between domain carriers and wire structs
//!
//! It has no knowledge of keys, roles or envelopes.

pub mod resource;
pub mod specification;

pub use resource::{Bundle, Resource};
pub use specification::Specification;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
