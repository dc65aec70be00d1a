//! Ordered, role-scoped documents of resources.
//!
//! A [`Composition`] owns its resources in insertion order. Identifiers are unique within one
//! composition; the order survives sealing and opening because the canonical payload is a FHIR
//! `collection` bundle whose entries follow the stored order.
//!
//! Every mutating or rendering operation takes an [`Access`] and is authorised at call time. The
//! role recorded with [`Composition::set_role`] is informational and never used to decide
//! access.

use crate::access::{Access, Action, Role};
use crate::{EnvelopeError, EnvelopeResult};
use fhir::{Bundle, Resource, Specification};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Composition {
    resources: Vec<Resource>,
    role: Option<Role>,
    cursor: Option<usize>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::RoleViolation`] if editing is denied, or
    /// [`EnvelopeError::DuplicateIdentifier`] if the identifier is already present. The member
    /// sequence is unchanged on either failure.
    pub fn add_resource(&mut self, access: Access<'_>, resource: Resource) -> EnvelopeResult<()> {
        access.require(Action::Edit)?;
        if self.position(resource.identifier()).is_some() {
            tracing::debug!(identifier = %resource.identifier(), "duplicate resource rejected");
            return Err(EnvelopeError::DuplicateIdentifier(
                resource.identifier().to_string(),
            ));
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Replace the resource with the same identifier, keeping its position.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidInput`] if no resource has that identifier.
    pub fn replace_resource(
        &mut self,
        access: Access<'_>,
        resource: Resource,
    ) -> EnvelopeResult<Resource> {
        access.require(Action::Edit)?;
        let index = self.require_position(resource.identifier())?;
        Ok(std::mem::replace(&mut self.resources[index], resource))
    }

    /// Remove and return the resource with `identifier`.
    ///
    /// A cursor on the removed resource is cleared; a cursor after it moves with its resource.
    pub fn remove_resource(
        &mut self,
        access: Access<'_>,
        identifier: &str,
    ) -> EnvelopeResult<Resource> {
        access.require(Action::Edit)?;
        let index = self.require_position(identifier)?;
        self.cursor = match self.cursor {
            Some(current) if current == index => None,
            Some(current) if current > index => Some(current - 1),
            other => other,
        };
        Ok(self.resources.remove(index))
    }

    /// Reset `fullUrl` and `meta` on every resource.
    pub fn clean_resources(&mut self, access: Access<'_>) -> EnvelopeResult<()> {
        access.require(Action::Edit)?;
        self.resources.iter_mut().for_each(Resource::clean);
        Ok(())
    }

    /// Move the cursor to the resource with `identifier`.
    pub fn select(&mut self, identifier: &str) -> EnvelopeResult<&Resource> {
        let index = self.require_position(identifier)?;
        self.cursor = Some(index);
        Ok(&self.resources[index])
    }

    /// The resource under the cursor, if any.
    pub fn current(&self) -> Option<&Resource> {
        self.cursor.and_then(|index| self.resources.get(index))
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn get(&self, identifier: &str) -> Option<&Resource> {
        self.position(identifier).map(|index| &self.resources[index])
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Record the advisory role. It does not grant or restrict anything.
    pub fn set_role(&mut self, role: Role) {
        self.role = Some(role);
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Render every resource, in order, in `specification`.
    ///
    /// An empty composition renders to an empty vector.
    pub fn to_specification(
        &self,
        access: Access<'_>,
        specification: Specification,
    ) -> EnvelopeResult<Vec<Value>> {
        access.require(Action::Render)?;
        Ok(specification.render_all(&self.resources))
    }

    pub(crate) fn canonical_bytes(&self) -> EnvelopeResult<Vec<u8>> {
        Ok(Bundle::canonical_bytes(&self.resources)?)
    }

    /// Rebuild a composition from canonical bundle bytes.
    ///
    /// Identifiers are re-checked, so a bundle with repeated identifiers is rejected.
    pub(crate) fn from_canonical_bytes(bytes: &[u8]) -> EnvelopeResult<Self> {
        let mut composition = Self::default();
        for resource in Bundle::parse(bytes)? {
            if composition.position(resource.identifier()).is_some() {
                return Err(EnvelopeError::DuplicateIdentifier(
                    resource.identifier().to_string(),
                ));
            }
            composition.resources.push(resource);
        }
        Ok(composition)
    }

    fn position(&self, identifier: &str) -> Option<usize> {
        self.resources
            .iter()
            .position(|resource| resource.identifier() == identifier)
    }

    fn require_position(&self, identifier: &str) -> EnvelopeResult<usize> {
        self.position(identifier).ok_or_else(|| {
            EnvelopeError::InvalidInput(format!("no resource with identifier '{identifier}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::RolePolicy;

    fn clinician() -> Access<'static> {
        Access::new(&RolePolicy, Role::Clinician)
    }

    fn patient(id: &str) -> Resource {
        Resource::new("Patient", id).unwrap()
    }

    fn composition(ids: &[&str]) -> Composition {
        let mut composition = Composition::new();
        for id in ids {
            composition.add_resource(clinician(), patient(id)).unwrap();
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

    #[test]
    fn duplicate_identifier_leaves_sequence_unchanged() {
        let mut composition = composition(&["a", "b"]);

        let err = composition
            .add_resource(clinician(), patient("a"))
            .unwrap_err();

        assert!(matches!(err, EnvelopeError::DuplicateIdentifier(id) if id == "a"));
        assert_eq!(identifiers(&composition), vec!["a", "b"]);
    }

    #[test]
    fn denied_edit_does_not_mutate() {
        let mut composition = composition(&["a"]);
        let administrator = Access::new(&RolePolicy, Role::CareAdministrator);

        let err = composition
            .add_resource(administrator, patient("b"))
            .unwrap_err();

        assert!(matches!(err, EnvelopeError::RoleViolation { .. }));
        assert_eq!(composition.len(), 1);
    }

    #[test]
    fn stored_role_is_not_consulted() {
        let mut composition = Composition::new();
        composition.set_role(Role::Clinician);

        let associate = Access::new(&RolePolicy, Role::PatientAssociate);
        let err = composition
            .add_resource(associate, patient("a"))
            .unwrap_err();

        assert!(matches!(err, EnvelopeError::RoleViolation { .. }));
        assert_eq!(composition.role(), Some(Role::Clinician));
    }

    #[test]
    fn replace_keeps_position() {
        let mut composition = composition(&["a", "b", "c"]);
        let replacement = patient("b").with_full_url("urn:uuid:b");

        let previous = composition
            .replace_resource(clinician(), replacement)
            .unwrap();

        assert_eq!(previous.full_url(), None);
        assert_eq!(identifiers(&composition), vec!["a", "b", "c"]);
        assert_eq!(
            composition.get("b").and_then(Resource::full_url),
            Some("urn:uuid:b")
        );
    }

    #[test]
    fn cursor_follows_removals() {
        let mut composition = composition(&["a", "b", "c"]);
        composition.select("c").unwrap();

        composition.remove_resource(clinician(), "a").unwrap();
        assert_eq!(composition.current().map(Resource::identifier), Some("c"));

        composition.remove_resource(clinician(), "c").unwrap();
        assert!(composition.current().is_none());
        assert!(composition.select("missing").is_err());
    }

    #[test]
    fn clean_resets_metadata_only() {
        let mut composition = Composition::new();
        let mut resource = patient("a").with_full_url("urn:uuid:a");
        resource.set_meta(Some(serde_json::json!({"versionId": "3"})));
        composition.add_resource(clinician(), resource).unwrap();

        composition.clean_resources(clinician()).unwrap();

        let cleaned = composition.get("a").unwrap();
        assert_eq!(cleaned.full_url(), None);
        assert_eq!(cleaned.meta(), None);
        assert_eq!(cleaned.resource_type(), "Patient");
    }

    #[test]
    fn rendering_preserves_order_and_count() {
        let composition = composition(&["z", "a", "m"]);

        let rendered = composition
            .to_specification(clinician(), Specification::Fhir)
            .unwrap();

        let ids: Vec<&str> = rendered
            .iter()
            .filter_map(|value| value["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);

        let empty = Composition::new()
            .to_specification(clinician(), Specification::Dgc)
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn canonical_bytes_round_trip_in_order() {
        let composition = composition(&["z", "a"]);
        let bytes = composition.canonical_bytes().unwrap();

        let restored = Composition::from_canonical_bytes(&bytes).unwrap();

        assert_eq!(identifiers(&restored), vec!["z", "a"]);
        assert_eq!(restored.canonical_bytes().unwrap(), bytes);
    }
}
