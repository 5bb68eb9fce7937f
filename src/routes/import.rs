use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDate, Utc};
use diesel::{prelude::*, result::Error as DieselError, PgConnection};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::auth::AdminUser;
use crate::error::{AppError, AppResult};
use crate::models::NewDocument;
use crate::response::ApiResponse;
use crate::schema::{document_types, documents, macro_processes, processes, sub_processes};
use crate::state::AppState;
use crate::xlsx::{self, Row, Sheet};

const MAX_NAME: usize = 200;
const MAX_TYPE_NAME: usize = 100;
const MAX_CODE: usize = 50;
const MAX_TITLE: usize = 300;
const MAX_PERSON: usize = 200;
const MAX_VERSION: usize = 20;

/// One spreadsheet row after normalization, required fields guaranteed.
struct ImportRow {
    macro_process: String,
    process: String,
    sub_process: String,
    document_type: String,
    code: String,
    title: String,
    version: Option<String>,
    created_date: Option<NaiveDate>,
    reviewed_by: Option<String>,
    approved_by: Option<String>,
    approval_date: Option<NaiveDate>,
    author: Option<String>,
    status: String,
    access_link: Option<String>,
}

fn capped(value: Option<String>, max: usize) -> Option<String> {
    value.map(|text| {
        if text.chars().count() > max {
            text.chars().take(max).collect()
        } else {
            text
        }
    })
}

/// Spreadsheets carry whatever the staff typed; legacy files say "vigente"
/// or "activo" where the database stores "current".
fn normalize_status(value: Option<&str>) -> String {
    let normalized = value.map(|raw| raw.trim().to_lowercase()).unwrap_or_default();
    let status = match normalized.as_str() {
        "obsoleto" | "obsolete" => "obsolete",
        "en_revision" | "en revision" | "en revisión" | "under_review" => "under_review",
        _ => "current",
    };
    status.to_owned()
}

/// `None` means the row is missing one of the six required columns.
fn extract_row(row: &Row<'_>, shift_fix: bool) -> Option<ImportRow> {
    let raw_type = row.text("tipo_documentacion");
    let raw_code = row.text("codigo");
    let raw_title = row.text("titulo");

    // Some historical exports arrive with these three columns rotated one
    // position; an over-long code is the tell.
    let (document_type, code, title) = if shift_fix
        && raw_code
            .as_deref()
            .is_some_and(|c| c.chars().count() > MAX_CODE)
        && raw_type.is_some()
        && raw_title.is_some()
    {
        (raw_title, raw_type, raw_code)
    } else {
        (raw_type, raw_code, raw_title)
    };

    Some(ImportRow {
        macro_process: capped(row.text("macro_proceso"), MAX_NAME)?,
        process: capped(row.text("proceso"), MAX_NAME)?,
        sub_process: capped(row.text("subproceso"), MAX_NAME)?,
        document_type: capped(document_type, MAX_TYPE_NAME)?,
        code: capped(code, MAX_CODE)?,
        title: capped(title, MAX_TITLE)?,
        version: capped(row.text("version"), MAX_VERSION),
        created_date: row.date("fecha_creacion"),
        reviewed_by: capped(row.text("revisa"), MAX_PERSON),
        approved_by: capped(row.text("aprueba"), MAX_PERSON),
        approval_date: row.date("fecha_aprobacion"),
        author: capped(row.text("autor"), MAX_PERSON),
        status: normalize_status(row.text("estado").as_deref()),
        access_link: row.text("link_acceso"),
    })
}

fn find_or_create_macro_process(conn: &mut PgConnection, name: &str) -> QueryResult<i32> {
    let inserted: Option<i32> = diesel::insert_into(macro_processes::table)
        .values(macro_processes::name.eq(name))
        .on_conflict(macro_processes::name)
        .do_nothing()
        .returning(macro_processes::id)
        .get_result(conn)
        .optional()?;
    if let Some(id) = inserted {
        return Ok(id);
    }
    macro_processes::table
        .filter(macro_processes::name.eq(name))
        .select(macro_processes::id)
        .first(conn)
}

fn find_or_create_process(
    conn: &mut PgConnection,
    macro_process_id: i32,
    name: &str,
) -> QueryResult<i32> {
    let inserted: Option<i32> = diesel::insert_into(processes::table)
        .values((
            processes::macro_process_id.eq(macro_process_id),
            processes::name.eq(name),
        ))
        .on_conflict((processes::macro_process_id, processes::name))
        .do_nothing()
        .returning(processes::id)
        .get_result(conn)
        .optional()?;
    if let Some(id) = inserted {
        return Ok(id);
    }
    processes::table
        .filter(processes::macro_process_id.eq(macro_process_id))
        .filter(processes::name.eq(name))
        .select(processes::id)
        .first(conn)
}

fn find_or_create_sub_process(
    conn: &mut PgConnection,
    process_id: i32,
    name: &str,
) -> QueryResult<i32> {
    let inserted: Option<i32> = diesel::insert_into(sub_processes::table)
        .values((
            sub_processes::process_id.eq(process_id),
            sub_processes::name.eq(name),
        ))
        .on_conflict((sub_processes::process_id, sub_processes::name))
        .do_nothing()
        .returning(sub_processes::id)
        .get_result(conn)
        .optional()?;
    if let Some(id) = inserted {
        return Ok(id);
    }
    sub_processes::table
        .filter(sub_processes::process_id.eq(process_id))
        .filter(sub_processes::name.eq(name))
        .select(sub_processes::id)
        .first(conn)
}

fn find_or_create_document_type(conn: &mut PgConnection, name: &str) -> QueryResult<i32> {
    let inserted: Option<i32> = diesel::insert_into(document_types::table)
        .values(document_types::name.eq(name))
        .on_conflict(document_types::name)
        .do_nothing()
        .returning(document_types::id)
        .get_result(conn)
        .optional()?;
    if let Some(id) = inserted {
        return Ok(id);
    }
    document_types::table
        .filter(document_types::name.eq(name))
        .select(document_types::id)
        .first(conn)
}

enum RowOutcome {
    Created,
    Updated,
}

fn upsert_document(
    conn: &mut PgConnection,
    row: &ImportRow,
    sub_process_id: i32,
    document_type_id: i32,
    match_soft_deleted: bool,
) -> QueryResult<RowOutcome> {
    let mut lookup = documents::table
        .filter(documents::code.eq(&row.code))
        .into_boxed();
    if !match_soft_deleted {
        lookup = lookup.filter(documents::deleted.eq(false));
    }
    // A live row wins over soft-deleted rows carrying the same code.
    let existing: Option<i32> = lookup
        .order((documents::deleted.asc(), documents::id.asc()))
        .select(documents::id)
        .first(conn)
        .optional()?;

    match existing {
        Some(id) => {
            diesel::update(documents::table.find(id))
                .set((
                    documents::sub_process_id.eq(sub_process_id),
                    documents::document_type_id.eq(document_type_id),
                    documents::title.eq(&row.title),
                    documents::version.eq(row.version.as_deref()),
                    documents::created_date.eq(row.created_date),
                    documents::reviewed_by.eq(row.reviewed_by.as_deref()),
                    documents::approved_by.eq(row.approved_by.as_deref()),
                    documents::approval_date.eq(row.approval_date),
                    documents::author.eq(row.author.as_deref()),
                    documents::status.eq(&row.status),
                    documents::access_link.eq(row.access_link.as_deref()),
                    documents::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
            Ok(RowOutcome::Updated)
        }
        None => {
            diesel::insert_into(documents::table)
                .values(NewDocument {
                    sub_process_id,
                    document_type_id,
                    code: row.code.clone(),
                    title: row.title.clone(),
                    version: row.version.clone(),
                    created_date: row.created_date,
                    reviewed_by: row.reviewed_by.clone(),
                    approved_by: row.approved_by.clone(),
                    approval_date: row.approval_date,
                    author: row.author.clone(),
                    status: row.status.clone(),
                    access_link: row.access_link.clone(),
                    created_by: None,
                })
                .execute(conn)?;
            Ok(RowOutcome::Created)
        }
    }
}

/// Constraint violations and lookups that came up empty stay scoped to their
/// row; anything else aborts the whole batch.
fn is_row_error(err: &DieselError) -> bool {
    matches!(err, DieselError::DatabaseError(_, _) | DieselError::NotFound)
}

#[derive(Debug, Serialize)]
pub struct RowError {
    pub row: u32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub total: usize,
    pub imported: usize,
    pub updated: usize,
    pub errors: Vec<RowError>,
}

pub async fn import_documents(
    State(state): State<AppState>,
    _admin: AdminUser,
    mut multipart: Multipart,
) -> AppResult<Json<ApiResponse<ImportSummary>>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name = String::new();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "failed to read multipart field");
        AppError::bad_request("invalid multipart payload")
    })? {
        if field.name() == Some("file") {
            file_name = field.file_name().unwrap_or("import.xlsx").to_owned();
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

    info!(file = %file_name, rows = sheet.len(), "starting document import");

    let shift_fix = state.config.import_column_shift_fix;
    let match_soft_deleted = state.config.import_match_soft_deleted;

    let mut summary = ImportSummary {
        total: sheet.len(),
        imported: 0,
        updated: 0,
        errors: Vec::new(),
    };

    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        for (index, row) in sheet.rows().enumerate() {
            // Display rows are 1-indexed and the header occupies row 1.
            let row_number = index as u32 + 2;

            let Some(fields) = extract_row(&row, shift_fix) else {
                summary.errors.push(RowError {
                    row: row_number,
                    message: "missing required fields (macro_proceso, proceso, subproceso, \
                              tipo_documentacion, codigo, titulo)"
                        .to_owned(),
                });
                continue;
            };

            // Nested transaction = savepoint: a failed row rolls back its
            // own writes without poisoning the batch.
            let outcome = conn.transaction::<_, DieselError, _>(|conn| {
                let macro_id = find_or_create_macro_process(conn, &fields.macro_process)?;
                let process_id = find_or_create_process(conn, macro_id, &fields.process)?;
                let sub_id = find_or_create_sub_process(conn, process_id, &fields.sub_process)?;
                let type_id = find_or_create_document_type(conn, &fields.document_type)?;
                upsert_document(conn, &fields, sub_id, type_id, match_soft_deleted)
            });

            match outcome {
                Ok(RowOutcome::Created) => summary.imported += 1,
                Ok(RowOutcome::Updated) => summary.updated += 1,
                Err(err) if is_row_error(&err) => {
                    warn!(row = row_number, error = %err, "import row failed");
                    summary.errors.push(RowError {
                        row: row_number,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    })?;

    info!(
        total = summary.total,
        imported = summary.imported,
        updated = summary.updated,
        failed = summary.errors.len(),
        "document import finished"
    );

    let message = format!(
        "import finished: {} new, {} updated out of {} rows",
        summary.imported, summary.updated, summary.total
    );

    Ok(Json(ApiResponse::with_message(message, summary)))
}

pub async fn download_template() -> AppResult<impl IntoResponse> {
    let bytes = xlsx::document_template()
        .map_err(|err| AppError::internal(format!("failed to build template: {err}")))?;

    let headers = [
        (
            header::CONTENT_TYPE,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_owned(),
        ),
        (
            header::CONTENT_DISPOSITION,
            "attachment; filename=plantilla_documentos_sgc.xlsx".to_owned(),
        ),
    ];

    Ok((headers, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    const HEADERS: [&str; 6] = [
        "macro_proceso",
        "proceso",
        "subproceso",
        "tipo_documentacion",
        "codigo",
        "titulo",
    ];

    fn build_sheet(headers: &[&str], row: &[&str]) -> Sheet {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        for (col, value) in row.iter().enumerate() {
            sheet.write_string(1, col as u16, *value).unwrap();
        }
        let bytes = workbook.save_to_buffer().unwrap();
        Sheet::from_xlsx(&bytes).unwrap()
    }

    #[test]
    fn status_coercion_accepts_both_dialects() {
        assert_eq!(normalize_status(Some("vigente")), "current");
        assert_eq!(normalize_status(Some("Activo")), "current");
        assert_eq!(normalize_status(Some("activos")), "current");
        assert_eq!(normalize_status(Some("OBSOLETO")), "obsolete");
        assert_eq!(normalize_status(Some("obsolete")), "obsolete");
        assert_eq!(normalize_status(Some("en_revision")), "under_review");
        assert_eq!(normalize_status(Some("under_review")), "under_review");
        assert_eq!(normalize_status(Some("???")), "current");
        assert_eq!(normalize_status(None), "current");
    }

    #[test]
    fn caps_count_characters_not_bytes() {
        let accented = "ñ".repeat(60);
        let result = capped(Some(accented), 50).unwrap();
        assert_eq!(result.chars().count(), 50);
    }

    #[test]
    fn rows_missing_required_fields_are_rejected() {
        let sheet = build_sheet(&HEADERS, &["GE", "", "FO", "Manual", "MAN-1", "Título"]);
        let row = sheet.rows().next().unwrap();
        assert!(extract_row(&row, false).is_none());
    }

    #[test]
    fn shifted_columns_are_realigned_when_the_fix_is_on() {
        let long_title = "Manual de procedimientos para la gestión integral de calidad";
        assert!(long_title.chars().count() > MAX_CODE);
        let sheet = build_sheet(
            &HEADERS,
            &["GE", "PE", "FO", "MAN-GE-001", long_title, "Manual"],
        );
        let row = sheet.rows().next().unwrap();

        let fixed = extract_row(&row, true).unwrap();
        assert_eq!(fixed.code, "MAN-GE-001");
        assert_eq!(fixed.title, long_title);
        assert_eq!(fixed.document_type, "Manual");

        let raw = extract_row(&row, false).unwrap();
        assert_eq!(raw.code.chars().count(), MAX_CODE);
        assert_eq!(raw.document_type, "MAN-GE-001");
        assert_eq!(raw.title, "Manual");
    }

    #[test]
    fn template_example_row_imports_cleanly() {
        let bytes = xlsx::document_template().unwrap();
        let sheet = Sheet::from_xlsx(&bytes).unwrap();
        let row = sheet.rows().next().unwrap();
        let fields = extract_row(&row, false).unwrap();
        assert_eq!(fields.macro_process, "Gestión Estratégica");
        assert_eq!(fields.code, "MAN-GE-001");
        assert_eq!(fields.status, "current");
        assert_eq!(
            fields.created_date,
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(fields.access_link, None);
    }
}
