//! Output specifications for rendering resources.
//!
//! A composition can be emitted in several downstream shapes. Each [`Specification`] maps a
//! resource to a JSON value; the mapping is pure and never mutates the resource.
//!
//! - `fhir`: plain FHIR resource JSON
//! - `fhir-bundle`: bundle entries (`fullUrl` + `resource`)
//! - `fhir-jsonapi`: JSON:API resource objects with FHIR attributes
//! - `schemaorg-jsonapi`: JSON:API resource objects with schema.org attributes
//! - `shc`: SMART Health Card minimised entries with `resource:N` references
//! - `dgc`: EU Digital Green Certificate claim fragments

use crate::{FhirError, FhirResult, Resource};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Supported rendering targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Specification {
    Fhir,
    FhirBundle,
    FhirJsonApi,
    SchemaOrgJsonApi,
    Shc,
    Dgc,
}

impl Specification {
    pub const ALL: [Specification; 6] = [
        Self::Fhir,
        Self::FhirBundle,
        Self::FhirJsonApi,
        Self::SchemaOrgJsonApi,
        Self::Shc,
        Self::Dgc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fhir => "fhir",
            Self::FhirBundle => "fhir-bundle",
            Self::FhirJsonApi => "fhir-jsonapi",
            Self::SchemaOrgJsonApi => "schemaorg-jsonapi",
            Self::Shc => "shc",
            Self::Dgc => "dgc",
        }
    }

    /// Parse a specification name (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] for unknown names.
    pub fn parse(input: &str) -> FhirResult<Self> {
        let lowered = input.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|spec| spec.as_str() == lowered)
            .ok_or_else(|| FhirError::InvalidInput(format!("unknown specification '{input}'")))
    }

    /// Render every resource in order.
    ///
    /// SMART Health Card references between members are rewritten to `resource:N`, so rendering
    /// needs the whole slice rather than one resource at a time.
    pub fn render_all(self, resources: &[Resource]) -> Vec<Value> {
        let positions: HashMap<String, usize> = resources
            .iter()
            .enumerate()
            .map(|(index, resource)| (resource.relative_reference(), index))
            .collect();

        resources
            .iter()
            .enumerate()
            .map(|(index, resource)| match self {
                Self::Fhir => resource.to_value(),
                Self::FhirBundle => resource.to_bundle_entry(),
                Self::FhirJsonApi => render_fhir_jsonapi(resource),
                Self::SchemaOrgJsonApi => render_schema_org(resource),
                Self::Shc => render_shc(resource, index, &positions),
                Self::Dgc => render_dgc(resource),
            })
            .collect()
    }
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Specification {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// FHIR resource type to schema.org type. Unlisted types fall back to `MedicalEntity`.
const SCHEMA_ORG_TYPES: &[(&str, &str)] = &[
    ("Patient", "Patient"),
    ("Practitioner", "Physician"),
    ("Organization", "MedicalOrganization"),
    ("Condition", "MedicalCondition"),
    ("Observation", "MedicalObservation"),
    ("Procedure", "MedicalProcedure"),
    ("MedicationStatement", "Drug"),
    ("Immunization", "MedicalTherapy"),
];

// ============================================================================
// Renderers (internal)
// ============================================================================

fn attributes_without(resource: &Resource, skip: &[&str]) -> Map<String, Value> {
    match resource.to_value() {
        Value::Object(mut object) => {
            for member in skip {
                object.remove(*member);
            }
            object
        }
        _ => Map::new(),
    }
}

fn render_fhir_jsonapi(resource: &Resource) -> Value {
    let mut object = Map::new();
    object.insert("type".into(), json!(resource.resource_type()));
    object.insert("id".into(), json!(resource.identifier()));
    object.insert(
        "attributes".into(),
        Value::Object(attributes_without(
            resource,
            &["resourceType", "id", "meta", "subject"],
        )),
    );

    if let Some((kind, id)) = resource.subject_reference().and_then(split_reference) {
        object.insert(
            "relationships".into(),
            json!({ "subject": { "data": { "type": kind, "id": id } } }),
        );
    }
    if let Some(full_url) = resource.full_url() {
        object.insert("links".into(), json!({ "self": full_url }));
    }
    if let Some(meta) = resource.meta() {
        object.insert("meta".into(), meta.clone());
    }

    Value::Object(object)
}

fn render_schema_org(resource: &Resource) -> Value {
    let schema_type = SCHEMA_ORG_TYPES
        .iter()
        .find(|(fhir, _)| *fhir == resource.resource_type())
        .map(|(_, schema)| *schema)
        .unwrap_or("MedicalEntity");

    let mut attributes = Map::new();
    attributes.insert("@context".into(), json!("https://schema.org"));
    attributes.insert("@type".into(), json!(schema_type));
    attributes.insert("identifier".into(), json!(resource.identifier()));
    attributes.insert(
        "additionalType".into(),
        json!(format!("http://hl7.org/fhir/{}", resource.resource_type())),
    );

    let value = resource.to_value();
    if let Some(family) = value.pointer("/name/0/family") {
        attributes.insert("familyName".into(), family.clone());
    }
    if let Some(given) = value.pointer("/name/0/given/0") {
        attributes.insert("givenName".into(), given.clone());
    }
    if let Some(birth_date) = value.get("birthDate") {
        attributes.insert("birthDate".into(), birth_date.clone());
    }
    if let Some(code) = value.pointer("/code/text") {
        attributes.insert("name".into(), code.clone());
    }
    if let Some(last_updated) = value.pointer("/meta/lastUpdated") {
        attributes.insert("dateModified".into(), last_updated.clone());
    }
    if let Some(full_url) = resource.full_url() {
        attributes.insert("url".into(), json!(full_url));
    }

    json!({
        "type": schema_type,
        "id": resource.identifier(),
        "attributes": attributes,
    })
}

fn render_shc(resource: &Resource, index: usize, positions: &HashMap<String, usize>) -> Value {
    let mut minimised = attributes_without(resource, &["id", "meta", "text"]);

    for member in ["subject", "patient"] {
        let target = minimised
            .get(member)
            .and_then(|value| value.get("reference"))
            .and_then(Value::as_str)
            .and_then(|reference| positions.get(reference));
        if let Some(position) = target {
            minimised.insert(
                member.to_string(),
                json!({ "reference": format!("resource:{position}") }),
            );
        }
    }

    json!({
        "fullUrl": format!("resource:{index}"),
        "resource": minimised,
    })
}

fn render_dgc(resource: &Resource) -> Value {
    let value = resource.to_value();
    let certificate_id = format!("URN:UVCI:{}", resource.identifier());

    match resource.resource_type() {
        "Patient" => {
            let mut name = Map::new();
            copy_pointer(&value, "/name/0/family", &mut name, "fn");
            copy_pointer(&value, "/name/0/given/0", &mut name, "gn");
            let mut claims = Map::new();
            claims.insert("nam".into(), Value::Object(name));
            copy_pointer(&value, "/birthDate", &mut claims, "dob");
            Value::Object(claims)
        }
        "Immunization" => {
            let mut entry = certificate_entry(&certificate_id);
            copy_pointer(&value, "/vaccineCode/coding/0/code", &mut entry, "mp");
            copy_pointer(&value, "/occurrenceDateTime", &mut entry, "dt");
            copy_pointer(
                &value,
                "/protocolApplied/0/doseNumberPositiveInt",
                &mut entry,
                "dn",
            );
            copy_pointer(
                &value,
                "/protocolApplied/0/seriesDosesPositiveInt",
                &mut entry,
                "sd",
            );
            json!({ "v": [entry] })
        }
        "Observation" => {
            let mut entry = certificate_entry(&certificate_id);
            copy_pointer(&value, "/code/coding/0/code", &mut entry, "tt");
            copy_pointer(&value, "/effectiveDateTime", &mut entry, "sc");
            copy_pointer(
                &value,
                "/valueCodeableConcept/coding/0/code",
                &mut entry,
                "tr",
            );
            json!({ "t": [entry] })
        }
        "Condition" => {
            let mut entry = certificate_entry(&certificate_id);
            copy_pointer(&value, "/code/coding/0/code", &mut entry, "tg");
            copy_pointer(&value, "/onsetDateTime", &mut entry, "fr");
            json!({ "r": [entry] })
        }
        other => json!({ "ci": certificate_id, "resourceType": other }),
    }
}

fn certificate_entry(certificate_id: &str) -> Map<String, Value> {
    let mut entry = Map::new();
    entry.insert("ci".into(), json!(certificate_id));
    entry
}

fn copy_pointer(source: &Value, pointer: &str, target: &mut Map<String, Value>, key: &str) {
    if let Some(found) = source.pointer(pointer) {
        target.insert(key.to_string(), found.clone());
    }
}

fn split_reference(reference: &str) -> Option<(&str, &str)> {
    let (kind, id) = reference.split_once('/')?;
    if kind.is_empty() || id.is_empty() {
        return None;
    }
    Some((kind, id))
}
