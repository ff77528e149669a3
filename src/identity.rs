//! Caller identity.
//!
//! Authentication happens upstream; the gateway forwards the verified user
//! id and role as `x-user-id` / `x-user-role`. Every engine operation takes
//! an [`Identity`] explicitly.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Learner,
    Admin,
}

impl Role {
    pub fn parse(v: &str) -> Option<Role> {
        match v.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Role::Admin),
            "LEARNER" | "USER" | "STUDENT" => Some(Role::Learner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    pub fn learner(user_id: Uuid) -> Self {
        Self { user_id, role: Role::Learner }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self { user_id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(EngineError::Unauthenticated)?;

        // a missing role header means a plain learner
        let role = match parts.headers.get(USER_ROLE_HEADER) {
            None => Role::Learner,
            Some(v) => v
                .to_str()
                .ok()
                .and_then(Role::parse)
                .ok_or(EngineError::Unauthenticated)?,
        };

        Ok(Identity { user_id, role })
    }
}
