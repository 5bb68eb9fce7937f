use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::{prelude::*, result::DatabaseErrorKind, select, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::AdminUser;
use crate::error::{AppError, AppResult};
use crate::models::{Document, NewDocument};
use crate::pagination::{PageParams, Pagination};
use crate::response::ApiResponse;
use crate::routes::documents::{build_document_views, DocumentView, SearchData};
use crate::schema::{document_types, documents, sub_processes, users};
use crate::state::AppState;
use crate::storage::{key_from_link, public_link, unique_document_key};

const MAX_PDF_BYTES: usize = 10 * 1024 * 1024;

pub const DOCUMENT_STATUSES: &[&str] = &["current", "obsolete", "under_review"];

struct UploadedFile {
    original_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Everything the create/update forms can carry. Text fields stay raw here;
/// the handlers decide what "absent" and "blank" mean for each operation.
#[derive(Default)]
struct DocumentForm {
    code: Option<String>,
    title: Option<String>,
    version: Option<String>,
    sub_process_id: Option<i32>,
    document_type_id: Option<i32>,
    status: Option<String>,
    created_date: Option<String>,
    reviewed_by: Option<String>,
    approved_by: Option<String>,
    approval_date: Option<String>,
    author: Option<String>,
    file: Option<UploadedFile>,
}

async fn read_document_form(mut multipart: Multipart) -> AppResult<DocumentForm> {
    let mut form = DocumentForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "failed to read multipart field");
        AppError::bad_request("invalid multipart payload")
    })? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        if name == "file" {
            let original_name = field
                .file_name()
                .map(str::to_owned)
                .unwrap_or_else(|| "documento.pdf".to_owned());
            let content_type = field.content_type().map(str::to_owned);
            let data = field.bytes().await.map_err(|err| {
                error!(error = %err, "failed to read uploaded file");
                AppError::bad_request("failed to read file contents")
            })?;
            form.file = Some(UploadedFile {
                original_name,
                content_type,
                bytes: data.to_vec(),
            });
            continue;
        }

        let text = field.text().await.map_err(|err| {
            error!(error = %err, field = %name, "failed to read multipart field");
            AppError::bad_request("invalid multipart payload")
        })?;

        match name.as_str() {
            "code" => form.code = Some(text),
            "title" => form.title = Some(text),
            "version" => form.version = Some(text),
            "sub_process_id" => form.sub_process_id = Some(parse_id("sub_process_id", &text)?),
            "document_type_id" => {
                form.document_type_id = Some(parse_id("document_type_id", &text)?)
            }
            "status" => form.status = Some(text),
            "created_date" => form.created_date = Some(text),
            "reviewed_by" => form.reviewed_by = Some(text),
            "approved_by" => form.approved_by = Some(text),
            "approval_date" => form.approval_date = Some(text),
            "author" => form.author = Some(text),
            _ => {}
        }
    }

    Ok(form)
}

fn parse_id(name: &str, value: &str) -> AppResult<i32> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("{name} must be an integer")))
}

fn parse_date(name: &str, value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::bad_request(format!("{name} must be a YYYY-MM-DD date")))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// Update semantics for nullable text columns: absent keeps the prior value,
/// blank clears it.
fn field_update(value: &Option<String>) -> Option<Option<String>> {
    value.as_deref().map(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}

fn date_update(name: &str, value: &Option<String>) -> AppResult<Option<Option<NaiveDate>>> {
    match value.as_deref() {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(Some(None)),
        Some(raw) => Ok(Some(Some(parse_date(name, raw)?))),
    }
}

fn validate_status(value: &str) -> AppResult<String> {
    let status = value.trim().to_lowercase();
    if DOCUMENT_STATUSES.contains(&status.as_str()) {
        Ok(status)
    } else {
        Err(AppError::bad_request(
            "status must be one of current, obsolete or under_review",
        ))
    }
}

fn ensure_pdf(file: &UploadedFile) -> AppResult<()> {
    let by_header = file
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.eq_ignore_ascii_case("application/pdf"));
    let by_name = mime_guess::from_path(&file.original_name).first()
        == Some(mime_guess::mime::APPLICATION_PDF);
    if !by_header && !by_name {
        return Err(AppError::bad_request("only PDF files are accepted"));
    }
    if file.bytes.is_empty() {
        return Err(AppError::bad_request("uploaded file is empty"));
    }
    if file.bytes.len() > MAX_PDF_BYTES {
        return Err(AppError::bad_request("file exceeds the 10 MB limit"));
    }
    Ok(())
}

fn attachment_content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

/// Best-effort removal after a failed write so error responses do not leave
/// an orphaned upload behind.
async fn remove_stored_file(state: &AppState, key: &str) {
    if let Err(err) = state.storage.delete(key).await {
        warn!(error = %err, key = %key, "failed to remove stored file");
    }
}

fn map_unique_code(err: diesel::result::Error) -> AppError {
    match err {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::bad_request("a document with this code already exists")
        }
        other => other.into(),
    }
}

fn active_document(conn: &mut PgConnection, id: i32) -> AppResult<Document> {
    documents::table
        .find(id)
        .filter(documents::deleted.eq(false))
        .first::<Document>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("document not found"))
}

fn document_view(conn: &mut PgConnection, document: Document) -> AppResult<DocumentView> {
    build_document_views(conn, vec![document])?
        .pop()
        .ok_or_else(|| AppError::internal("document view assembly produced no row"))
}

pub async fn create_document(
    State(state): State<AppState>,
    admin: AdminUser,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let form = read_document_form(multipart).await?;

    let Some(file) = form.file else {
        return Err(AppError::bad_request("a PDF file is required"));
    };
    ensure_pdf(&file)?;

    let (code, title, version, status, sub_process_id, document_type_id) = match (
        non_empty(&form.code),
        non_empty(&form.title),
        non_empty(&form.version),
        non_empty(&form.status),
        form.sub_process_id,
        form.document_type_id,
    ) {
        (Some(code), Some(title), Some(version), Some(status), Some(sub), Some(ty)) => {
            (code, title, version, status, sub, ty)
        }
        _ => {
            return Err(AppError::bad_request(
                "code, title, version, sub_process_id, document_type_id and status are required",
            ))
        }
    };
    let status = validate_status(&status)?;
    let created_date = match non_empty(&form.created_date) {
        Some(raw) => Some(parse_date("created_date", &raw)?),
        None => None,
    };
    let approval_date = match non_empty(&form.approval_date) {
        Some(raw) => Some(parse_date("approval_date", &raw)?),
        None => None,
    };

    {
        let mut conn = state.db()?;

        let sub_exists: bool = select(exists(
            sub_processes::table.filter(sub_processes::id.eq(sub_process_id)),
        ))
        .get_result(&mut conn)?;
        if !sub_exists {
            return Err(AppError::bad_request("sub-process does not exist"));
        }

        let type_exists: bool = select(exists(
            document_types::table.filter(document_types::id.eq(document_type_id)),
        ))
        .get_result(&mut conn)?;
        if !type_exists {
            return Err(AppError::bad_request("document type does not exist"));
        }

        let code_taken: bool = select(exists(
            documents::table
                .filter(documents::code.eq(&code))
                .filter(documents::deleted.eq(false)),
        ))
        .get_result(&mut conn)?;
        if code_taken {
            return Err(AppError::bad_request(
                "a document with this code already exists",
            ));
        }
    }

    let key = unique_document_key(&file.original_name);
    state
        .storage
        .save(&key, file.bytes)
        .await
        .map_err(|err| AppError::internal(format!("failed to store upload {key}: {err}")))?;

    let new_document = NewDocument {
        sub_process_id,
        document_type_id,
        code,
        title,
        version: Some(version),
        created_date,
        reviewed_by: non_empty(&form.reviewed_by),
        approved_by: non_empty(&form.approved_by),
        approval_date,
        author: non_empty(&form.author),
        status,
        access_link: Some(public_link(&key)),
        created_by: Some(admin.user.id),
    };

    let insert_result = match state.db() {
        Ok(mut conn) => diesel::insert_into(documents::table)
            .values(&new_document)
            .get_result::<Document>(&mut conn),
        Err(err) => {
            remove_stored_file(&state, &key).await;
            return Err(err);
        }
    };

    let document = match insert_result {
        Ok(document) => document,
        Err(err) => {
            // Unique index race: another request claimed the code after our check.
            remove_stored_file(&state, &key).await;
            return Err(map_unique_code(err));
        }
    };

    info!(document_id = document.id, code = %document.code, "document created");

    let view = {
        let mut conn = state.db()?;
        document_view(&mut conn, document)?
    };

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("document created", view)),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ManagementListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

fn management_listing(
    search: &Option<String>,
    include_deleted: bool,
) -> documents::BoxedQuery<'static, diesel::pg::Pg> {
    let mut query = documents::table.into_boxed();
    if !include_deleted {
        query = query.filter(documents::deleted.eq(false));
    }
    if let Some(term) = search {
        let pattern = format!("%{term}%");
        query = query.filter(
            documents::code
                .ilike(pattern.clone())
                .or(documents::title.ilike(pattern)),
        );
    }
    query
}

pub async fn list_documents(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<ManagementListParams>,
) -> AppResult<Json<ApiResponse<SearchData>>> {
    let (page, limit) = PageParams {
        page: params.page,
        limit: params.limit,
    }
    .sanitized();
    let offset = (page - 1) * limit;
    let search = non_empty(&params.search);

    let mut conn = state.db()?;

    let total: i64 = management_listing(&search, params.include_deleted)
        .count()
        .get_result(&mut conn)?;
    let docs: Vec<Document> = management_listing(&search, params.include_deleted)
        .order(documents::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    let rows = build_document_views(&mut conn, docs)?;

    Ok(Json(ApiResponse::data(SearchData {
        rows,
        pagination: Pagination::new(total, page, limit),
    })))
}

#[derive(Debug, Serialize)]
pub struct UserRef {
    pub id: i32,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: DocumentView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserRef>,
}

pub async fn get_document(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<DocumentDetail>>> {
    let mut conn = state.db()?;

    let document = active_document(&mut conn, id)?;

    let created_by = match document.created_by {
        Some(user_id) => users::table
            .find(user_id)
            .select((users::id, users::full_name, users::email))
            .first::<(i32, String, String)>(&mut conn)
            .optional()?
            .map(|(id, full_name, email)| UserRef {
                id,
                full_name,
                email,
            }),
        None => None,
    };

    let view = document_view(&mut conn, document)?;

    Ok(Json(ApiResponse::data(DocumentDetail {
        document: view,
        created_by,
    })))
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = documents)]
struct DocumentChanges {
    sub_process_id: Option<i32>,
    document_type_id: Option<i32>,
    code: Option<String>,
    title: Option<String>,
    version: Option<Option<String>>,
    created_date: Option<Option<NaiveDate>>,
    reviewed_by: Option<Option<String>>,
    approved_by: Option<Option<String>>,
    approval_date: Option<Option<NaiveDate>>,
    author: Option<Option<String>>,
    status: Option<String>,
    access_link: Option<String>,
    updated_by: Option<i32>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn update_document(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> AppResult<Json<ApiResponse<DocumentView>>> {
    let form = read_document_form(multipart).await?;

    let code = non_empty(&form.code);
    let title = non_empty(&form.title);
    let status = match non_empty(&form.status) {
        Some(value) => Some(validate_status(&value)?),
        None => None,
    };
    let created_date = date_update("created_date", &form.created_date)?;
    let approval_date = date_update("approval_date", &form.approval_date)?;

    if let Some(file) = &form.file {
        ensure_pdf(file)?;
    }

    let document = {
        let mut conn = state.db()?;

        let document = active_document(&mut conn, id)?;

        if let Some(new_code) = &code {
            let taken: bool = select(exists(
                documents::table
                    .filter(documents::code.eq(new_code))
                    .filter(documents::deleted.eq(false))
                    .filter(documents::id.ne(id)),
            ))
            .get_result(&mut conn)?;
            if taken {
                return Err(AppError::bad_request(
                    "a document with this code already exists",
                ));
            }
        }

        if let Some(sub_id) = form.sub_process_id {
            let sub_exists: bool = select(exists(
                sub_processes::table.filter(sub_processes::id.eq(sub_id)),
            ))
            .get_result(&mut conn)?;
            if !sub_exists {
                return Err(AppError::bad_request("sub-process does not exist"));
            }
        }

        if let Some(type_id) = form.document_type_id {
            let type_exists: bool = select(exists(
                document_types::table.filter(document_types::id.eq(type_id)),
            ))
            .get_result(&mut conn)?;
            if !type_exists {
                return Err(AppError::bad_request("document type does not exist"));
            }
        }

        document
    };

    let mut new_key: Option<String> = None;
    if let Some(file) = form.file {
        let key = unique_document_key(&file.original_name);
        state
            .storage
            .save(&key, file.bytes)
            .await
            .map_err(|err| AppError::internal(format!("failed to store upload {key}: {err}")))?;

        // The replaced file goes away now; the row still points at it until
        // the update below lands.
        if let Some(previous) = document.access_link.as_deref().and_then(key_from_link) {
            if let Err(err) = state.storage.delete(previous).await {
                warn!(error = %err, key = %previous, "failed to delete replaced file");
            }
        }
        new_key = Some(key);
    }

    let changes = DocumentChanges {
        sub_process_id: form.sub_process_id,
        document_type_id: form.document_type_id,
        code,
        title,
        version: field_update(&form.version),
        created_date,
        reviewed_by: field_update(&form.reviewed_by),
        approved_by: field_update(&form.approved_by),
        approval_date,
        author: field_update(&form.author),
        status,
        access_link: new_key.as_deref().map(public_link),
        updated_by: Some(admin.user.id),
        updated_at: Some(Utc::now().naive_utc()),
    };

    let update_result = match state.db() {
        Ok(mut conn) => diesel::update(documents::table.find(id))
            .set(&changes)
            .get_result::<Document>(&mut conn),
        Err(err) => {
            if let Some(key) = &new_key {
                remove_stored_file(&state, key).await;
            }
            return Err(err);
        }
    };

    let updated = match update_result {
        Ok(document) => document,
        Err(err) => {
            if let Some(key) = &new_key {
                remove_stored_file(&state, key).await;
            }
            return Err(map_unique_code(err));
        }
    };

    info!(document_id = updated.id, code = %updated.code, "document updated");

    let view = {
        let mut conn = state.db()?;
        document_view(&mut conn, updated)?
    };

    Ok(Json(ApiResponse::with_message("document updated", view)))
}

pub async fn delete_document(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<()>>> {
    let mut conn = state.db()?;

    let document = active_document(&mut conn, id)?;

    // The stored file stays on disk so the document can be restored.
    diesel::update(documents::table.find(document.id))
        .set((
            documents::deleted.eq(true),
            documents::deleted_by.eq(Some(admin.user.id)),
            documents::deleted_at.eq(Some(Utc::now().naive_utc())),
            documents::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    info!(document_id = document.id, code = %document.code, "document soft-deleted");

    Ok(Json(ApiResponse::message("document deleted")))
}

pub async fn restore_document(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<DocumentView>>> {
    let mut conn = state.db()?;

    let document = documents::table
        .find(id)
        .filter(documents::deleted.eq(true))
        .first::<Document>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("document not found or not deleted"))?;

    let restored = diesel::update(documents::table.find(document.id))
        .set((
            documents::deleted.eq(false),
            documents::deleted_by.eq(None::<i32>),
            documents::deleted_at.eq(None::<NaiveDateTime>),
            documents::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result::<Document>(&mut conn)
        .map_err(|err| match err {
            // The code may have been reused by a live document since this
            // one was deleted.
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::bad_request("an active document already uses this code")
            }
            other => other.into(),
        })?;

    info!(document_id = restored.id, code = %restored.code, "document restored");

    let view = document_view(&mut conn, restored)?;

    Ok(Json(ApiResponse::with_message("document restored", view)))
}

pub async fn download_document(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<impl IntoResponse> {
    let document = {
        let mut conn = state.db()?;
        active_document(&mut conn, id)?
    };

    let Some(key) = document
        .access_link
        .as_deref()
        .and_then(key_from_link)
        .map(str::to_owned)
    else {
        return Err(AppError::not_found("document has no stored file"));
    };

    let bytes = match state.storage.read(&key).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, key = %key, document_id = document.id, "stored file missing");
            return Err(AppError::not_found("file not found on disk"));
        }
    };

    let filename = format!("{}_{}.pdf", document.code, document.title);
    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_owned()),
        (
            header::CONTENT_DISPOSITION,
            attachment_content_disposition(&filename),
        ),
    ];

    Ok((headers, bytes))
}
