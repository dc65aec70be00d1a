//! FHIR-aligned resource wire model and translation helpers.
//!
//! A [`Resource`] is one atomic clinical or identity record. The envelope layer treats resources
//! as opaque objects: only `resourceType`, `id`, `meta` and the bundle-level `fullUrl` are
//! interpreted, and every other member is carried through untouched in its original JSON form.
//!
//! Responsibilities:
//! - Define the domain-level [`Resource`] carrier
//! - Define a strict wire model for the identity members (remaining members are flattened)
//! - Translate between JSON text/values, bundle entries and the domain carrier

use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vpr_types::NonEmptyText;

/// Members owned by the carrier itself rather than the opaque content map.
const RESERVED_MEMBERS: &[&str] = &["resourceType", "id", "meta"];

// ============================================================================
// Public domain-level type
// ============================================================================

/// One clinical/identity record.
///
/// `fullUrl` and `meta` are transient metadata: [`Resource::clean`] resets them while keeping
/// the resource type, identifier and content.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    resource_type: NonEmptyText,
    identifier: NonEmptyText,
    full_url: Option<String>,
    meta: Option<Value>,
    content: Map<String, Value>,
}

impl Resource {
    /// Create an empty resource of `resource_type` identified by `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if either value is blank.
    pub fn new(resource_type: &str, identifier: &str) -> FhirResult<Self> {
        let resource_type = NonEmptyText::new(resource_type)
            .map_err(|_| FhirError::InvalidInput("resourceType cannot be empty".into()))?;
        let identifier = NonEmptyText::new(identifier)
            .map_err(|_| FhirError::InvalidInput("resource id cannot be empty".into()))?;

        Ok(Self {
            resource_type,
            identifier,
            full_url: None,
            meta: None,
            content: Map::new(),
        })
    }

    /// Add an opaque content member.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] for `resourceType`, `id` and `meta`, which are set
    /// through the dedicated constructors and setters.
    pub fn with_field(mut self, name: &str, value: Value) -> FhirResult<Self> {
        if RESERVED_MEMBERS.contains(&name) {
            return Err(FhirError::InvalidInput(format!(
                "'{name}' is a reserved resource member"
            )));
        }
        self.content.insert(name.to_string(), value);
        Ok(self)
    }

    /// Set the `subject` reference (for example `Patient/123`).
    pub fn with_subject(mut self, reference: &str) -> Self {
        self.content.insert(
            "subject".to_string(),
            serde_json::json!({ "reference": reference }),
        );
        self
    }

    pub fn with_full_url(mut self, full_url: impl Into<String>) -> Self {
        self.full_url = Some(full_url.into());
        self
    }

    pub fn resource_type(&self) -> &str {
        self.resource_type.as_str()
    }

    pub fn identifier(&self) -> &str {
        self.identifier.as_str()
    }

    /// The `subject.reference` member, if present.
    pub fn subject_reference(&self) -> Option<&str> {
        self.content
            .get("subject")
            .and_then(|subject| subject.get("reference"))
            .and_then(Value::as_str)
    }

    pub fn full_url(&self) -> Option<&str> {
        self.full_url.as_deref()
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.content.get(name)
    }

    pub fn set_full_url(&mut self, full_url: Option<String>) {
        self.full_url = full_url;
    }

    pub fn set_meta(&mut self, meta: Option<Value>) {
        self.meta = meta;
    }

    /// Reset transient metadata (`fullUrl`, `meta`) without touching identity or content.
    pub fn clean(&mut self) {
        self.full_url = None;
        self.meta = None;
    }

    /// `Type/id` form used by FHIR relative references.
    pub fn relative_reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.identifier)
    }

    /// Parse a resource from JSON text.
    ///
    /// Uses `serde_path_to_error` so schema mismatches report the failing member path.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if the text is not a JSON object with string
    /// `resourceType` and `id` members, or [`FhirError::InvalidInput`] if either is blank.
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);
        let wire = serde_path_to_error::deserialize::<_, ResourceWire>(&mut deserializer)
            .map_err(|err| schema_mismatch("Resource", err))?;
        wire_to_domain(wire, None)
    }

    /// Translate a JSON value into a resource.
    ///
    /// # Errors
    ///
    /// As for [`Resource::parse`].
    pub fn from_value(value: Value) -> FhirResult<Self> {
        let wire = serde_path_to_error::deserialize::<_, ResourceWire>(value)
            .map_err(|err| schema_mismatch("Resource", err))?;
        wire_to_domain(wire, None)
    }

    /// Render the resource as a FHIR JSON object (no `fullUrl`, which lives on bundle entries).
    pub fn to_value(&self) -> Value {
        let mut object = self.content.clone();
        object.insert(
            "resourceType".to_string(),
            Value::String(self.resource_type.to_string()),
        );
        object.insert("id".to_string(), Value::String(self.identifier.to_string()));
        if let Some(meta) = &self.meta {
            object.insert("meta".to_string(), meta.clone());
        }
        Value::Object(object)
    }

    /// Render the resource as a bundle entry (`fullUrl` + `resource`).
    pub fn to_bundle_entry(&self) -> Value {
        let mut entry = Map::new();
        if let Some(full_url) = &self.full_url {
            entry.insert("fullUrl".to_string(), Value::String(full_url.clone()));
        }
        entry.insert("resource".to_string(), self.to_value());
        Value::Object(entry)
    }

    fn from_entry_wire(entry: BundleEntryWire) -> FhirResult<Self> {
        wire_to_domain(entry.resource, entry.full_url)
    }
}

// ============================================================================
// Bundle translation
// ============================================================================

/// Bundle-level translation helpers.
///
/// This is a zero-sized type used for namespacing bundle operations.
pub struct Bundle;

impl Bundle {
    /// Render resources as a FHIR `collection` bundle, preserving order.
    pub fn render(resources: &[Resource]) -> Value {
        let entries: Vec<Value> = resources.iter().map(Resource::to_bundle_entry).collect();
        serde_json::json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": entries,
        })
    }

    /// Deterministic byte form of a bundle: sorted object keys, no insignificant whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if serialisation fails.
    pub fn canonical_bytes(resources: &[Resource]) -> FhirResult<Vec<u8>> {
        serde_json::to_vec(&Self::render(resources))
            .map_err(|e| FhirError::Translation(format!("Failed to serialise bundle: {e}")))
    }

    /// Parse a bundle back into its resources, in entry order.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if the bytes are not a `Bundle` or any entry is not a resource.
    pub fn parse(bytes: &[u8]) -> FhirResult<Vec<Resource>> {
        let mut deserializer = serde_json::Deserializer::from_slice(bytes);
        let wire = serde_path_to_error::deserialize::<_, BundleWire>(&mut deserializer)
            .map_err(|err| schema_mismatch("Bundle", err))?;

        if wire.resource_type != "Bundle" {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'Bundle', got '{}'",
                wire.resource_type
            )));
        }

        wire.entry
            .into_iter()
            .map(Resource::from_entry_wire)
            .collect()
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ResourceWire {
    #[serde(rename = "resourceType")]
    resource_type: String,

    id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<Value>,

    #[serde(flatten)]
    content: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct BundleEntryWire {
    #[serde(rename = "fullUrl", default, skip_serializing_if = "Option::is_none")]
    full_url: Option<String>,

    resource: ResourceWire,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct BundleWire {
    #[serde(rename = "resourceType")]
    resource_type: String,

    #[serde(rename = "type")]
    bundle_type: String,

    #[serde(default)]
    entry: Vec<BundleEntryWire>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: ResourceWire, full_url: Option<String>) -> FhirResult<Resource> {
    let mut resource = Resource::new(&wire.resource_type, &wire.id)?;
    resource.meta = wire.meta;
    resource.full_url = full_url;
    resource.content = wire.content;
    Ok(resource)
}

fn schema_mismatch<E: std::fmt::Display>(
    what: &str,
    err: serde_path_to_error::Error<E>,
) -> FhirError {
    let path = err.path().to_string();
    let source = err.into_inner();
    let path = if path.is_empty() || path == "." {
        "<root>"
    } else {
        path.as_str()
    };
    FhirError::Translation(format!("{what} schema mismatch at {path}: {source}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation() -> Resource {
        Resource::new("Observation", "obs-1")
            .unwrap()
            .with_subject("Patient/p1")
            .with_field("status", json!("final"))
            .unwrap()
            .with_full_url("urn:uuid:obs-1")
    }

    #[test]
    fn parses_opaque_members_and_identity() {
        let resource = Resource::parse(
            r#"{"resourceType":"Observation","id":"obs-1","status":"final",
                "subject":{"reference":"Patient/p1"},"meta":{"versionId":"2"}}"#,
        )
        .expect("parse resource");

        assert_eq!(resource.resource_type(), "Observation");
        assert_eq!(resource.identifier(), "obs-1");
        assert_eq!(resource.subject_reference(), Some("Patient/p1"));
        assert_eq!(resource.field("status"), Some(&json!("final")));
        assert_eq!(resource.meta(), Some(&json!({"versionId": "2"})));
    }

    #[test]
    fn parse_reports_missing_member() {
        let err = Resource::parse(r#"{"resourceType":"Patient"}"#).unwrap_err();
        match err {
            FhirError::Translation(msg) => assert!(msg.contains("id"), "{msg}"),
            other => panic!("expected Translation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_blank_identifier() {
        let err = Resource::parse(r#"{"resourceType":"Patient","id":"  "}"#).unwrap_err();
        assert!(matches!(err, FhirError::InvalidInput(_)));
    }

    #[test]
    fn reserved_members_cannot_be_set_as_content() {
        let err = Resource::new("Patient", "p1")
            .unwrap()
            .with_field("id", json!("other"))
            .unwrap_err();
        assert!(matches!(err, FhirError::InvalidInput(_)));
    }

    #[test]
    fn clean_resets_transient_metadata_only() {
        let mut resource = observation();
        resource.set_meta(Some(json!({"lastUpdated": "2026-01-11T14:35:22Z"})));

        resource.clean();

        assert_eq!(resource.full_url(), None);
        assert_eq!(resource.meta(), None);
        assert_eq!(resource.identifier(), "obs-1");
        assert_eq!(resource.subject_reference(), Some("Patient/p1"));
    }

    #[test]
    fn bundle_round_trip_preserves_order_and_full_urls() {
        let resources = vec![
            observation(),
            Resource::new("Patient", "p1").unwrap(),
            Resource::new("Condition", "c1").unwrap(),
        ];

        let bytes = Bundle::canonical_bytes(&resources).unwrap();
        let parsed = Bundle::parse(&bytes).unwrap();

        assert_eq!(parsed, resources);
    }

    #[test]
    fn canonical_bytes_sort_keys() {
        let bytes = Bundle::canonical_bytes(&[observation()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(r#"{"entry":[{"fullUrl":"urn:uuid:obs-1","resource":{"id""#));
        assert!(!text.contains(' '));
    }

    #[test]
    fn bundle_parse_rejects_other_resource_types() {
        let err = Bundle::parse(br#"{"resourceType":"Patient","type":"collection"}"#).unwrap_err();
        assert!(matches!(err, FhirError::InvalidInput(_)));
    }

    #[test]
    fn empty_bundle_parses_to_no_resources() {
        let bytes = Bundle::canonical_bytes(&[]).unwrap();
        assert!(Bundle::parse(&bytes).unwrap().is_empty());
    }
}
