//! Role-based access gating.
//!
//! Authorisation belongs to an external authority. Every composition and envelope operation
//! receives an [`Access`] value (the acting role plus the authority that judges it) and asks the
//! authority again at call time. The role a [`crate::Composition`] remembers is advisory only
//! and is never consulted here.

use crate::{EnvelopeError, EnvelopeResult};
use std::fmt;
use std::str::FromStr;

/// Participant roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Clinician,
    CareAdministrator,
    Patient,
    PatientAssociate,
    System,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Self::Clinician,
        Self::CareAdministrator,
        Self::Patient,
        Self::PatientAssociate,
        Self::System,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clinician => "clinician",
            Self::CareAdministrator => "care_administrator",
            Self::Patient => "patient",
            Self::PatientAssociate => "patient_associate",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == lowered)
            .ok_or_else(|| EnvelopeError::InvalidInput(format!("unknown role '{s}'")))
    }
}

/// Operations gated by role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Edit,
    Render,
    Seal,
    Open,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Render => "render",
            Self::Seal => "seal",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External authorisation decision point.
pub trait AccessAuthority: Send + Sync {
    fn permits(&self, role: Role, action: Action) -> bool;
}

/// Static role/action table.
///
/// | Role | Edit | Render | Seal | Open |
/// |---|---|---|---|---|
/// | Clinician | yes | yes | yes | yes |
/// | CareAdministrator | no | yes | yes | yes |
/// | Patient | no | yes | no | yes |
/// | PatientAssociate | no | no | no | yes |
/// | System | no | yes | yes | yes |
#[derive(Clone, Copy, Debug, Default)]
pub struct RolePolicy;

const ROLE_POLICY: &[(Role, &[Action])] = &[
    (
        Role::Clinician,
        &[Action::Edit, Action::Render, Action::Seal, Action::Open],
    ),
    (
        Role::CareAdministrator,
        &[Action::Render, Action::Seal, Action::Open],
    ),
    (Role::Patient, &[Action::Render, Action::Open]),
    (Role::PatientAssociate, &[Action::Open]),
    (Role::System, &[Action::Render, Action::Seal, Action::Open]),
];

impl AccessAuthority for RolePolicy {
    fn permits(&self, role: Role, action: Action) -> bool {
        ROLE_POLICY
            .iter()
            .find(|(candidate, _)| *candidate == role)
            .is_some_and(|(_, actions)| actions.contains(&action))
    }
}

/// The acting role together with the authority that judges it.
#[derive(Clone, Copy)]
pub struct Access<'a> {
    authority: &'a dyn AccessAuthority,
    role: Role,
}

impl fmt::Debug for Access<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Access").field("role", &self.role).finish()
    }
}

impl<'a> Access<'a> {
    pub fn new(authority: &'a dyn AccessAuthority, role: Role) -> Self {
        Self { authority, role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::RoleViolation`] if the authority denies `action`.
    pub fn require(&self, action: Action) -> EnvelopeResult<()> {
        if self.authority.permits(self.role, action) {
            return Ok(());
        }
        tracing::warn!(role = %self.role, action = %action, "role violation");
        Err(EnvelopeError::RoleViolation {
            role: self.role.to_string(),
            action: action.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyAll;

    impl AccessAuthority for DenyAll {
        fn permits(&self, _role: Role, _action: Action) -> bool {
            false
        }
    }

    #[test]
    fn policy_table_matches_documented_matrix() {
        let policy = RolePolicy;
        assert!(policy.permits(Role::Clinician, Action::Edit));
        assert!(!policy.permits(Role::CareAdministrator, Action::Edit));
        assert!(policy.permits(Role::Patient, Action::Open));
        assert!(!policy.permits(Role::Patient, Action::Seal));
        assert!(!policy.permits(Role::PatientAssociate, Action::Render));
        assert!(policy.permits(Role::System, Action::Seal));
    }

    #[test]
    fn denied_action_is_a_role_violation() {
        let err = Access::new(&DenyAll, Role::Clinician)
            .require(Action::Open)
            .unwrap_err();
        match err {
            EnvelopeError::RoleViolation { role, action } => {
                assert_eq!(role, "clinician");
                assert_eq!(action, "open");
            }
            other => panic!("expected RoleViolation, got {other:?}"),
        }
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(
            "Care-Administrator".parse::<Role>().unwrap(),
            Role::CareAdministrator
        );
        assert!("surgeon".parse::<Role>().is_err());
    }
}
