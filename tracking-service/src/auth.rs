//! Identity boundary. Authentication itself lives upstream; the
//! service trusts the identity headers injected by the gateway and
//! performs capability checks before touching the store.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: Uuid,
    pub admin: bool,
}

impl Actor {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "administrator role required".to_string(),
            ))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        let id = Uuid::parse_str(id).map_err(|_| AppError::Unauthorized)?;

        let admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|role| role.eq_ignore_ascii_case("admin"))
            .unwrap_or(false);

        Ok(Actor { id, admin })
    }
}
