use axum::{extract::State, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::User,
    response::ApiResponse,
    routes::users::UserView,
    schema::users,
    state::AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    /// The login form sends whatever the person typed; it may be a username.
    #[serde(alias = "username")]
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginData {
    pub token: String,
    pub user: UserView,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginData>>> {
    let identifier = payload.email.trim();
    if identifier.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("email and password are required"));
    }

    let mut conn = state.db()?;

    let user = users::table
        .filter(
            users::email
                .eq(identifier)
                .or(users::username.eq(identifier)),
        )
        .first::<User>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("user is not registered"))?;

    if !user.is_active() {
        return Err(AppError::forbidden("account is inactive"));
    }

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(AppError::internal)?;
    if !valid {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let token = state
        .jwt
        .generate_token(user.id, &user.email, &user.role)
        .map_err(AppError::from)?;

    let user: User = diesel::update(users::table.find(user.id))
        .set(users::last_login_at.eq(Utc::now().naive_utc()))
        .get_result(&mut conn)?;

    Ok(Json(ApiResponse::with_message(
        "login successful",
        LoginData {
            token,
            user: UserView::from(&user),
        },
    )))
}

pub async fn profile(auth: AuthenticatedUser) -> Json<ApiResponse<UserView>> {
    Json(ApiResponse::data(UserView::from(&auth.user)))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<ApiResponse<UserView>>> {
    let valid = password::verify_password(&payload.current_password, &auth.user.password_hash)
        .map_err(AppError::internal)?;
    if !valid {
        return Err(AppError::unauthorized("current password is incorrect"));
    }

    if payload.new_password.len() < 8 {
        return Err(AppError::bad_request(
            "new password must be at least 8 characters",
        ));
    }

    let password_hash = password::hash_password(&payload.new_password)?;
    let mut conn = state.db()?;
    let user: User = diesel::update(users::table.find(auth.user.id))
        .set((
            users::password_hash.eq(password_hash),
            users::must_change_password.eq(false),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    Ok(Json(ApiResponse::with_message(
        "password updated",
        UserView::from(&user),
    )))
}
