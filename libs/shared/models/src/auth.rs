use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Authenticated identity extracted from a validated JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Party roles known to the scheduling domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorRole {
    Patient,
    Provider,
}

/// Operations an actor may invoke on the scheduling core.
///
/// Capability sets are resolved from the role claim at the boundary and
/// checked again inside the services, so no operation depends on ambient
/// session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Book,
    Complete,
    Cancel,
    Delete,
    Prescribe,
}

impl ActorRole {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            ActorRole::Patient => &[Capability::Book, Capability::Cancel, Capability::Delete],
            ActorRole::Provider => &[
                Capability::Complete,
                Capability::Cancel,
                Capability::Delete,
                Capability::Prescribe,
            ],
        }
    }
}

/// Actor identity threaded explicitly through every core operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: Uuid,
    pub role: ActorRole,
}

impl ActorContext {
    pub fn new(actor_id: Uuid, role: ActorRole) -> Self {
        Self { actor_id, role }
    }

    /// Resolve the actor from the authenticated user's claims.
    pub fn from_user(user: &User) -> Result<Self, AppError> {
        let actor_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppError::Auth("Malformed actor identifier in token".to_string()))?;

        let role = match user.role.as_deref() {
            Some("patient") => ActorRole::Patient,
            Some("doctor") | Some("provider") => ActorRole::Provider,
            other => {
                return Err(AppError::Auth(format!(
                    "Unknown actor role in token: {:?}",
                    other
                )))
            }
        };

        Ok(Self { actor_id, role })
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.capabilities().contains(&capability)
    }

    /// Capability gate used by handlers before touching the services.
    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(AppError::Auth(format!(
                "Role {:?} is not permitted to {:?}",
                self.role, capability
            )))
        }
    }

    pub fn is_patient(&self) -> bool {
        self.role == ActorRole::Patient
    }

    pub fn is_provider(&self) -> bool {
        self.role == ActorRole::Provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str) -> User {
        User {
            id: Uuid::new_v4().to_string(),
            email: Some("someone@example.com".to_string()),
            role: Some(role.to_string()),
            metadata: None,
            created_at: None,
        }
    }

    #[test]
    fn patient_capabilities() {
        let actor = ActorContext::from_user(&user("patient")).unwrap();
        assert!(actor.can(Capability::Book));
        assert!(actor.can(Capability::Cancel));
        assert!(actor.can(Capability::Delete));
        assert!(!actor.can(Capability::Complete));
        assert!(!actor.can(Capability::Prescribe));
    }

    #[test]
    fn provider_capabilities() {
        let actor = ActorContext::from_user(&user("doctor")).unwrap();
        assert!(actor.can(Capability::Complete));
        assert!(actor.can(Capability::Prescribe));
        assert!(!actor.can(Capability::Book));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(ActorContext::from_user(&user("admin")).is_err());
    }

    #[test]
    fn malformed_id_is_rejected() {
        let mut bad = user("patient");
        bad.id = "not-a-uuid".to_string();
        assert!(ActorContext::from_user(&bad).is_err());
    }
}
