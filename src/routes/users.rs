use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::{prelude::*, select, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::auth::{password, AdminUser};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::pagination::{PageParams, Pagination};
use crate::response::ApiResponse;
use crate::routes::to_iso;
use crate::schema::{documents, users};
use crate::state::AppState;
use crate::xlsx::{self, Sheet};

pub const USER_ROLES: &[&str] = &["administrator", "consulta"];
pub const USER_STATUSES: &[&str] = &["active", "inactive"];

/// What the API exposes about a user. The password hash and reset-token
/// columns never leave the service.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: i32,
    pub full_name: String,
    pub email: String,
    pub username: Option<String>,
    pub role: String,
    pub status: String,
    pub must_change_password: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            role: user.role.clone(),
            status: user.status.clone(),
            must_change_password: user.must_change_password,
            last_login_at: user.last_login_at.map(to_iso),
            created_at: to_iso(user.created_at),
            updated_at: to_iso(user.updated_at),
        }
    }
}

fn is_valid_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && !local.contains(char::is_whitespace)
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains(char::is_whitespace)
        }
        _ => false,
    }
}

fn is_institutional(email: &str, domain: &str) -> bool {
    email
        .rsplit_once('@')
        .is_some_and(|(local, email_domain)| !local.is_empty() && email_domain == domain)
}

fn ensure_institutional(email: &str, domain: &str) -> AppResult<()> {
    if !is_institutional(email, domain) {
        return Err(AppError::bad_request(format!(
            "email must belong to the @{domain} domain"
        )));
    }
    Ok(())
}

/// Lowercased ASCII slug: accents folded away, anything outside
/// `[a-z0-9._-]` dropped.
fn slugify(value: &str) -> String {
    value
        .nfd()
        .filter(|ch| !unicode_normalization::char::is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        .collect()
}

/// Username base: the requested username if it slugs to something, else the
/// local part of the email, else a timestamped fallback.
fn username_base(requested: Option<&str>, email: &str) -> String {
    let from_username = requested.map(slugify).unwrap_or_default();
    if !from_username.is_empty() {
        return from_username;
    }
    let from_email = slugify(email.split('@').next().unwrap_or_default());
    if !from_email.is_empty() {
        return from_email;
    }
    format!("usuario{}", Utc::now().timestamp())
}

/// Appends a numeric suffix until the candidate is free.
fn unique_username(conn: &mut PgConnection, base: &str) -> AppResult<String> {
    let mut candidate = base.to_owned();
    let mut counter = 1;
    loop {
        let taken: bool = select(exists(
            users::table.filter(users::username.eq(&candidate)),
        ))
        .get_result(conn)?;
        if !taken {
            return Ok(candidate);
        }
        candidate = format!("{base}{counter}");
        counter += 1;
    }
}

struct ProvisionedUser {
    user: User,
    temp_password: String,
}

/// Shared by individual creation and the bulk upload: derives the username,
/// rejects duplicates, hashes a fresh temporary password and inserts the row.
fn provision_user(
    conn: &mut PgConnection,
    full_name: &str,
    email: &str,
    requested_username: Option<&str>,
    role: &str,
) -> AppResult<ProvisionedUser> {
    let username = unique_username(conn, &username_base(requested_username, email))?;

    let existing: Option<User> = users::table
        .filter(users::email.eq(email).or(users::username.eq(&username)))
        .first(conn)
        .optional()?;
    if let Some(existing) = existing {
        let message = if existing.email == email {
            "the email is already registered"
        } else {
            "the username is already taken"
        };
        return Err(AppError::bad_request(message));
    }

    let temp_password = password::generate_temp_password();
    let password_hash = password::hash_password(&temp_password)?;

    let user: User = diesel::insert_into(users::table)
        .values(NewUser {
            full_name: full_name.to_owned(),
            email: email.to_owned(),
            username: Some(username),
            password_hash,
            role: role.to_owned(),
            status: "active".to_owned(),
            must_change_password: true,
        })
        .get_result(conn)?;

    Ok(ProvisionedUser {
        user,
        temp_password,
    })
}

fn validate_role(value: &str) -> AppResult<String> {
    let role = value.trim().to_lowercase();
    if USER_ROLES.contains(&role.as_str()) {
        Ok(role)
    } else {
        Err(AppError::bad_request(
            "role must be administrator or consulta",
        ))
    }
}

fn clean_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub full_name: String,
    pub email: String,
    pub username: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CredentialIssueData {
    pub user: UserView,
    pub email_sent: bool,
    /// Only present in contingency mode, for manual hand-off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_password: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<impl IntoResponse> {
    let full_name = payload.full_name.trim().to_owned();
    let email = clean_email(&payload.email);
    if full_name.is_empty() || email.is_empty() {
        return Err(AppError::bad_request("full_name and email are required"));
    }
    ensure_institutional(&email, &state.config.institutional_email_domain)?;
    let role = match payload.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(role) => validate_role(role)?,
        None => "consulta".to_owned(),
    };

    let provisioned = {
        let mut conn = state.db()?;
        provision_user(
            &mut conn,
            &full_name,
            &email,
            payload.username.as_deref(),
            &role,
        )?
    };

    let username = provisioned.user.username.clone().unwrap_or_default();
    let email_sent = match state
        .mailer
        .send_welcome(
            &provisioned.user.email,
            &provisioned.user.full_name,
            &username,
            &provisioned.temp_password,
        )
        .await
    {
        Ok(()) => true,
        Err(err) => {
            // Contingency mode: the account stays; the admin delivers the
            // temporary password by hand.
            warn!(error = %err, email = %provisioned.user.email, "welcome email failed");
            false
        }
    };

    info!(user_id = provisioned.user.id, email = %provisioned.user.email, "user created");

    let message = if email_sent {
        "user created; temporary credentials sent to the institutional email"
    } else {
        "user created, but the welcome email failed; deliver the temporary password manually"
    };

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            message,
            CredentialIssueData {
                user: UserView::from(&provisioned.user),
                email_sent,
                temp_password: (!email_sent).then_some(provisioned.temp_password),
            },
        )),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListUsersParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserListData {
    pub users: Vec<UserView>,
    pub pagination: Pagination,
}

fn user_listing(
    search: &Option<String>,
    role: &Option<String>,
) -> users::BoxedQuery<'static, diesel::pg::Pg> {
    let mut query = users::table.into_boxed();
    if let Some(term) = search {
        let pattern = format!("%{term}%");
        query = query.filter(
            users::full_name
                .ilike(pattern.clone())
                .or(users::email.ilike(pattern.clone()))
                .or(users::username.ilike(pattern)),
        );
    }
    if let Some(role) = role {
        query = query.filter(users::role.eq(role.clone()));
    }
    query
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<ListUsersParams>,
) -> AppResult<Json<ApiResponse<UserListData>>> {
    let (page, limit) = PageParams {
        page: params.page,
        limit: params.limit,
    }
    .sanitized();
    let offset = (page - 1) * limit;
    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);
    let role = params
        .role
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_owned);

    let mut conn = state.db()?;

    let total: i64 = user_listing(&search, &role).count().get_result(&mut conn)?;
    let rows: Vec<User> = user_listing(&search, &role)
        .order(users::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(ApiResponse::data(UserListData {
        users: rows.iter().map(UserView::from).collect(),
        pagination: Pagination::new(total, page, limit),
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
struct UserChanges {
    full_name: Option<String>,
    email: Option<String>,
    username: Option<String>,
    role: Option<String>,
    status: Option<String>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn update_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<ApiResponse<UserView>>> {
    let mut conn = state.db()?;

    let user: User = users::table
        .find(id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let full_name = payload
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned);
    let email = payload
        .email
        .as_deref()
        .map(clean_email)
        .filter(|e| !e.is_empty());
    let username = payload
        .username
        .as_deref()
        .map(|raw| slugify(raw.trim()))
        .filter(|u| !u.is_empty());
    let role = match payload.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(role) => Some(validate_role(role)?),
        None => None,
    };
    let status = match payload
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(status) if USER_STATUSES.contains(&status) => Some(status.to_owned()),
        Some(_) => return Err(AppError::bad_request("status must be active or inactive")),
        None => None,
    };

    if let Some(new_email) = &email {
        if *new_email != user.email {
            ensure_institutional(new_email, &state.config.institutional_email_domain)?;
        }
    }

    let email_changed = email.as_deref().is_some_and(|e| e != user.email);
    let username_changed = username
        .as_deref()
        .is_some_and(|u| Some(u) != user.username.as_deref());
    if email_changed || username_changed {
        let check_email = email.clone().unwrap_or_else(|| user.email.clone());
        let check_username = username.clone().or_else(|| user.username.clone());
        let query = match check_username {
            Some(check_username) => users::table
                .filter(users::id.ne(id))
                .filter(
                    users::email
                        .eq(check_email)
                        .or(users::username.eq(check_username)),
                )
                .into_boxed(),
            None => users::table
                .filter(users::id.ne(id))
                .filter(users::email.eq(check_email))
                .into_boxed(),
        };
        let taken = query
            .select(users::id)
            .first::<i32>(&mut conn)
            .optional()?
            .is_some();
        if taken {
            return Err(AppError::bad_request(
                "the email or username is already in use",
            ));
        }
    }

    let changes = UserChanges {
        full_name,
        email,
        username,
        role,
        status,
        updated_at: Some(Utc::now().naive_utc()),
    };

    let updated: User = diesel::update(users::table.find(id))
        .set(&changes)
        .get_result(&mut conn)?;

    Ok(Json(ApiResponse::with_message(
        "user updated",
        UserView::from(&updated),
    )))
}

/// Active administrators other than the given user. Zero means the last-admin
/// protections kick in.
fn other_active_admins(conn: &mut PgConnection, excluding: i32) -> QueryResult<i64> {
    users::table
        .filter(users::role.eq("administrator"))
        .filter(users::status.eq("active"))
        .filter(users::id.ne(excluding))
        .count()
        .get_result(conn)
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

pub async fn set_user_status(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i32>,
    Json(payload): Json<SetStatusRequest>,
) -> AppResult<Json<ApiResponse<UserView>>> {
    let status = payload.status.trim().to_lowercase();
    if !USER_STATUSES.contains(&status.as_str()) {
        return Err(AppError::bad_request("status must be active or inactive"));
    }

    let mut conn = state.db()?;

    let user: User = users::table
        .find(id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    if status == "inactive" {
        if user.id == admin.user.id {
            return Err(AppError::bad_request("you cannot deactivate your own account"));
        }
        if user.is_admin() && other_active_admins(&mut conn, user.id)? == 0 {
            return Err(AppError::bad_request(
                "the last active administrator cannot be deactivated",
            ));
        }
    }

    let updated: User = diesel::update(users::table.find(id))
        .set((
            users::status.eq(&status),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    info!(user_id = updated.id, status = %status, "user status changed");

    let message = if status == "active" {
        "user reactivated"
    } else {
        "user deactivated"
    };
    Ok(Json(ApiResponse::with_message(
        message,
        UserView::from(&updated),
    )))
}

pub async fn reset_temp_password(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<CredentialIssueData>>> {
    let temp_password = password::generate_temp_password();
    let password_hash = password::hash_password(&temp_password)?;

    let user: User = {
        let mut conn = state.db()?;
        let user: Option<User> = users::table.find(id).first(&mut conn).optional()?;
        let user = user.ok_or_else(|| AppError::not_found("user not found"))?;
        diesel::update(users::table.find(user.id))
            .set((
                users::password_hash.eq(password_hash),
                users::must_change_password.eq(true),
                users::reset_token_hash.eq(None::<String>),
                users::reset_token_expiry.eq(None::<NaiveDateTime>),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(&mut conn)?
    };

    let email_sent = match state
        .mailer
        .send_temporary_password(&user.email, &user.full_name, &temp_password)
        .await
    {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, email = %user.email, "temporary-password email failed");
            false
        }
    };

    info!(user_id = user.id, "temporary password reset by administrator");

    let message = if email_sent {
        "temporary password reset and sent to the institutional email"
    } else {
        "temporary password reset, but the email failed; deliver it manually"
    };

    Ok(Json(ApiResponse::with_message(
        message,
        CredentialIssueData {
            user: UserView::from(&user),
            email_sent,
            temp_password: (!email_sent).then_some(temp_password),
        },
    )))
}

pub async fn delete_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<()>>> {
    let mut conn = state.db()?;

    let user: User = users::table
        .find(id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    if user.id == admin.user.id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }
    if user.is_admin() && other_active_admins(&mut conn, user.id)? == 0 {
        return Err(AppError::bad_request(
            "the last active administrator cannot be deleted",
        ));
    }

    // Audit columns keep no FK to a vanished row; the documents themselves
    // survive the deletion.
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::update(documents::table.filter(documents::created_by.eq(user.id)))
            .set(documents::created_by.eq(None::<i32>))
            .execute(conn)?;
        diesel::update(documents::table.filter(documents::updated_by.eq(user.id)))
            .set(documents::updated_by.eq(None::<i32>))
            .execute(conn)?;
        diesel::update(documents::table.filter(documents::deleted_by.eq(user.id)))
            .set(documents::deleted_by.eq(None::<i32>))
            .execute(conn)?;
        diesel::delete(users::table.find(user.id)).execute(conn)?;
        Ok(())
    })?;

    info!(user_id = user.id, email = %user.email, "user permanently deleted");

    Ok(Json(ApiResponse::message("user permanently deleted")))
}

#[derive(Debug, Serialize)]
pub struct BulkRowError {
    pub row: u32,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BulkRowWarning {
    pub row: u32,
    pub email: String,
    pub message: String,
    pub temp_password: String,
}

#[derive(Debug, Serialize)]
pub struct BulkUploadData {
    pub total: usize,
    pub imported: usize,
    pub errors: Vec<BulkRowError>,
    pub warnings: Vec<BulkRowWarning>,
    /// Base64 `.xlsx` listing the failed rows, present when any row failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_report: Option<String>,
}

pub async fn bulk_upload_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    mut multipart: Multipart,
) -> AppResult<Json<ApiResponse<BulkUploadData>>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "failed to read multipart field");
        AppError::bad_request("invalid multipart payload")
    })? {
        if field.name() == Some("file") {
            let data = field.bytes().await.map_err(|err| {
                error!(error = %err, "failed to read spreadsheet upload");
                AppError::bad_request("failed to read file contents")
            })?;
            file_bytes = Some(data.to_vec());
        }
    }
    let Some(bytes) = file_bytes else {
        return Err(AppError::bad_request("an .xlsx file is required"));
    };

    let sheet = Sheet::from_xlsx(&bytes)
        .map_err(|err| AppError::bad_request(format!("could not read spreadsheet: {err}")))?;
    if sheet.is_empty() {
        return Err(AppError::bad_request("the spreadsheet has no data rows"));
    }

    let domain = state.config.institutional_email_domain.clone();
    let mut results = BulkUploadData {
        total: sheet.len(),
        imported: 0,
        errors: Vec::new(),
        warnings: Vec::new(),
        error_report: None,
    };
    let mut seen_emails = std::collections::HashSet::new();
    let mut outbox: Vec<(u32, User, String)> = Vec::new();

    {
        let mut conn = state.db()?;
        for (index, row) in sheet.rows().enumerate() {
            let row_number = index as u32 + 2;
            let raw_email = row.text("email").unwrap_or_default();
            let email = clean_email(&raw_email);

            let full_name = row.text("nombre").unwrap_or_default();
            if full_name.is_empty() || email.is_empty() {
                results.errors.push(BulkRowError {
                    row: row_number,
                    email: raw_email,
                    message: "required fields are empty".to_owned(),
                });
                continue;
            }
            if !is_institutional(&email, &domain) {
                results.errors.push(BulkRowError {
                    row: row_number,
                    email,
                    message: format!("email must belong to the @{domain} domain"),
                });
                continue;
            }
            // A later row repeating an email already in the file is a
            // mistake, not an update.
            if !seen_emails.insert(email.clone()) {
                results.errors.push(BulkRowError {
                    row: row_number,
                    email,
                    message: "email duplicated within the file".to_owned(),
                });
                continue;
            }
            let role = match row.text("role").as_deref().map(str::trim) {
                Some(role) if !role.is_empty() => match validate_role(role) {
                    Ok(role) => role,
                    Err(err) => {
                        results.errors.push(BulkRowError {
                            row: row_number,
                            email,
                            message: err.message().to_owned(),
                        });
                        continue;
                    }
                },
                _ => "consulta".to_owned(),
            };

            match provision_user(
                &mut conn,
                &full_name,
                &email,
                row.text("username").as_deref(),
                &role,
            ) {
                Ok(provisioned) => {
                    results.imported += 1;
                    outbox.push((row_number, provisioned.user, provisioned.temp_password));
                }
                Err(err) => {
                    results.errors.push(BulkRowError {
                        row: row_number,
                        email,
                        message: err.message().to_owned(),
                    });
                }
            }
        }
    }

    for (row_number, user, temp_password) in outbox {
        let username = user.username.clone().unwrap_or_default();
        if let Err(err) = state
            .mailer
            .send_welcome(&user.email, &user.full_name, &username, &temp_password)
            .await
        {
            warn!(error = %err, email = %user.email, "welcome email failed during bulk upload");
            results.warnings.push(BulkRowWarning {
                row: row_number,
                email: user.email,
                message: "user created but the welcome email failed".to_owned(),
                temp_password,
            });
        }
    }

    info!(
        total = results.total,
        imported = results.imported,
        failed = results.errors.len(),
        "user bulk upload finished"
    );

    let message = format!("imported {}/{} users", results.imported, results.total);

    if !results.errors.is_empty() {
        let entries: Vec<(u32, String, String)> = results
            .errors
            .iter()
            .map(|e| (e.row, e.email.clone(), e.message.clone()))
            .collect();
        let report = xlsx::error_report(&entries)
            .map_err(|err| AppError::internal(format!("failed to build error report: {err}")))?;
        results.error_report = Some(base64::engine::general_purpose::STANDARD.encode(report));
    }

    Ok(Json(ApiResponse::with_message(message, results)))
}

#[derive(Debug, Deserialize)]
pub struct RequestPasswordResetRequest {
    pub email: String,
}

pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<RequestPasswordResetRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    let email = clean_email(&payload.email);
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("a valid email is required"));
    }
    ensure_institutional(&email, &state.config.institutional_email_domain)?;

    let user: User = {
        let mut conn = state.db()?;
        users::table
            .filter(users::email.eq(&email))
            .filter(users::status.eq("active"))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| {
                AppError::not_found("the institutional email is not registered on the platform")
            })?
    };

    let token = password::generate_reset_token();
    let token_hash = password::sha256_hex(&token);
    let expiry =
        Utc::now().naive_utc() + Duration::minutes(state.config.reset_token_expiry_minutes);

    {
        let mut conn = state.db()?;
        diesel::update(users::table.find(user.id))
            .set((
                users::reset_token_hash.eq(&token_hash),
                users::reset_token_expiry.eq(expiry),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
    }

    let reset_link = format!(
        "{}/reset-password/{token}",
        state.config.frontend_url.trim_end_matches('/')
    );
    // Self-service recovery fails loudly: without the email the person has
    // no way to finish the flow.
    state
        .mailer
        .send_password_reset(&user.email, &user.full_name, &reset_link)
        .await
        .map_err(|err| {
            AppError::internal(format!("password-reset email to {} failed: {err}", user.email))
        })?;

    info!(user_id = user.id, "password reset link sent");

    Ok(Json(ApiResponse::message(
        "a recovery link has been sent to your email",
    )))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    if payload.token.trim().is_empty() || payload.new_password.len() < 8 {
        return Err(AppError::bad_request(
            "a token and a new password of at least 8 characters are required",
        ));
    }

    let token_hash = password::sha256_hex(payload.token.trim());
    let password_hash = password::hash_password(&payload.new_password)?;

    let mut conn = state.db()?;

    let user: Option<User> = users::table
        .filter(users::reset_token_hash.eq(&token_hash))
        .filter(users::reset_token_expiry.gt(Utc::now().naive_utc()))
        .first(&mut conn)
        .optional()?;
    let Some(user) = user else {
        return Err(AppError::bad_request("invalid or expired token"));
    };

    diesel::update(users::table.find(user.id))
        .set((
            users::password_hash.eq(password_hash),
            users::must_change_password.eq(false),
            users::reset_token_hash.eq(None::<String>),
            users::reset_token_expiry.eq(None::<NaiveDateTime>),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    info!(user_id = user.id, "password reset completed");

    Ok(Json(ApiResponse::message("password reset successfully")))
}
