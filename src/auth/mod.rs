pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;

use crate::{error::AppError, models::User, schema::users, state::AppState};

/// Bearer-token guard. Claims alone are not trusted: the user row is
/// re-loaded so deactivated accounts lose access before their token expires.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized("missing bearer token"))?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized("invalid or expired token"))?;

        let mut conn = state.db()?;
        let user = users::table
            .find(claims.sub)
            .first::<User>(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::unauthorized("user not found"))?;

        if !user.is_active() {
            return Err(AppError::unauthorized("account is inactive"));
        }

        Ok(AuthenticatedUser { user })
    }
}

/// Administrator-only guard layered on top of [`AuthenticatedUser`].
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser { user } =
            AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::forbidden("administrator role required"));
        }
        Ok(AdminUser { user })
    }
}
