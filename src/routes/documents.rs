use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::models::{Document, DocumentType, MacroProcess, Process, SubProcess};
use crate::pagination::{PageParams, Pagination, DEFAULT_PAGE_SIZE};
use crate::response::ApiResponse;
use crate::routes::to_iso;
use crate::schema::{document_types, documents, macro_processes, processes, sub_processes};
use crate::state::AppState;

/// Query parameters for the public search. The frontend sends the catalog
/// filters under their Spanish names.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(rename = "macro_proceso_id")]
    pub macro_process_id: Option<i32>,
    #[serde(rename = "proceso_id")]
    pub process_id: Option<i32>,
    #[serde(rename = "subproceso_id")]
    pub sub_process_id: Option<i32>,
    #[serde(rename = "tipo_documentacion_id")]
    pub document_type_id: Option<i32>,
    #[serde(rename = "titulo")]
    pub title: Option<String>,
    #[serde(rename = "estado")]
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// The most specific hierarchy filter wins; broader ones are ignored once a
/// narrower one is present.
#[derive(Debug, PartialEq, Eq)]
enum HierarchyFilter {
    SubProcess(i32),
    Process(i32),
    MacroProcess(i32),
}

#[derive(Debug, Default)]
struct EffectiveFilters {
    hierarchy: Option<HierarchyFilter>,
    document_type_id: Option<i32>,
    title: Option<String>,
    status: Option<String>,
}

impl EffectiveFilters {
    fn is_empty(&self) -> bool {
        self.hierarchy.is_none()
            && self.document_type_id.is_none()
            && self.title.is_none()
            && self.status.is_none()
    }
}

fn effective_filters(params: &SearchParams) -> EffectiveFilters {
    let hierarchy = if let Some(id) = params.sub_process_id {
        Some(HierarchyFilter::SubProcess(id))
    } else if let Some(id) = params.process_id {
        Some(HierarchyFilter::Process(id))
    } else {
        params.macro_process_id.map(HierarchyFilter::MacroProcess)
    };

    let title = params
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned);
    let status = params
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    EffectiveFilters {
        hierarchy,
        document_type_id: params.document_type_id,
        title,
        status,
    }
}

/// Boxed so the same filter set can be counted and then paged. Soft-deleted
/// documents never show up in the public search.
fn filtered_documents(
    filters: &EffectiveFilters,
) -> documents::BoxedQuery<'static, diesel::pg::Pg> {
    let mut query = documents::table
        .into_boxed()
        .filter(documents::deleted.eq(false));

    match filters.hierarchy {
        Some(HierarchyFilter::SubProcess(id)) => {
            query = query.filter(documents::sub_process_id.eq(id));
        }
        Some(HierarchyFilter::Process(id)) => {
            let subs = sub_processes::table
                .filter(sub_processes::process_id.eq(id))
                .select(sub_processes::id);
            query = query.filter(documents::sub_process_id.eq_any(subs));
        }
        Some(HierarchyFilter::MacroProcess(id)) => {
            let procs = processes::table
                .filter(processes::macro_process_id.eq(id))
                .select(processes::id);
            let subs = sub_processes::table
                .filter(sub_processes::process_id.eq_any(procs))
                .select(sub_processes::id);
            query = query.filter(documents::sub_process_id.eq_any(subs));
        }
        None => {}
    }

    if let Some(type_id) = filters.document_type_id {
        query = query.filter(documents::document_type_id.eq(type_id));
    }
    if let Some(title) = &filters.title {
        query = query.filter(documents::title.ilike(format!("%{title}%")));
    }
    if let Some(status) = &filters.status {
        query = query.filter(documents::status.eq(status.clone()));
    }

    query
}

#[derive(Debug, Serialize)]
pub struct SearchData {
    pub rows: Vec<DocumentView>,
    pub pagination: Pagination,
}

pub async fn search_documents(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<ApiResponse<SearchData>>> {
    let filters = effective_filters(&params);

    // Browsing the whole repository without filters is not a use case.
    if filters.is_empty() {
        return Ok(Json(ApiResponse::with_message(
            "apply at least one filter to see documents",
            SearchData {
                rows: Vec::new(),
                pagination: Pagination::new(0, 1, DEFAULT_PAGE_SIZE),
            },
        )));
    }

    let (page, limit) = PageParams {
        page: params.page,
        limit: params.limit,
    }
    .sanitized();
    let offset = (page - 1) * limit;

    let mut conn = state.db()?;

    let total: i64 = filtered_documents(&filters).count().get_result(&mut conn)?;

    let docs: Vec<Document> = filtered_documents(&filters)
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
pub struct MacroProcessView {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessView {
    pub id: i32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macro_process: Option<MacroProcessView>,
}

#[derive(Debug, Serialize)]
pub struct SubProcessView {
    pub id: i32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessView>,
}

#[derive(Debug, Serialize)]
pub struct DocumentTypeView {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub id: i32,
    pub code: String,
    pub title: String,
    pub version: Option<String>,
    pub created_date: Option<chrono::NaiveDate>,
    pub reviewed_by: Option<String>,
    pub approved_by: Option<String>,
    pub approval_date: Option<chrono::NaiveDate>,
    pub author: Option<String>,
    pub status: String,
    pub access_link: Option<String>,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_process: Option<SubProcessView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentTypeView>,
    pub created_at: String,
    pub updated_at: String,
}

/// Loads the hierarchy for a page of documents in four queries instead of
/// one per row.
pub(crate) fn build_document_views(
    conn: &mut PgConnection,
    docs: Vec<Document>,
) -> AppResult<Vec<DocumentView>> {
    if docs.is_empty() {
        return Ok(Vec::new());
    }

    let sub_ids: Vec<i32> = docs.iter().map(|d| d.sub_process_id).collect();
    let subs: HashMap<i32, SubProcess> = sub_processes::table
        .filter(sub_processes::id.eq_any(&sub_ids))
        .load::<SubProcess>(conn)?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let proc_ids: Vec<i32> = subs.values().map(|s| s.process_id).collect();
    let procs: HashMap<i32, Process> = processes::table
        .filter(processes::id.eq_any(&proc_ids))
        .load::<Process>(conn)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let macro_ids: Vec<i32> = procs.values().map(|p| p.macro_process_id).collect();
    let macros: HashMap<i32, MacroProcess> = macro_processes::table
        .filter(macro_processes::id.eq_any(&macro_ids))
        .load::<MacroProcess>(conn)?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    let type_ids: Vec<i32> = docs.iter().map(|d| d.document_type_id).collect();
    let types: HashMap<i32, DocumentType> = document_types::table
        .filter(document_types::id.eq_any(&type_ids))
        .load::<DocumentType>(conn)?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    let views = docs
        .into_iter()
        .map(|doc| {
            let sub_process = subs.get(&doc.sub_process_id).map(|sub| {
                let process = procs.get(&sub.process_id).map(|proc| {
                    let macro_process =
                        macros.get(&proc.macro_process_id).map(|m| MacroProcessView {
                            id: m.id,
                            name: m.name.clone(),
                        });
                    ProcessView {
                        id: proc.id,
                        name: proc.name.clone(),
                        macro_process,
                    }
                });
                SubProcessView {
                    id: sub.id,
                    name: sub.name.clone(),
                    process,
                }
            });
            let document_type = types.get(&doc.document_type_id).map(|t| DocumentTypeView {
                id: t.id,
                name: t.name.clone(),
            });

            DocumentView {
                id: doc.id,
                code: doc.code,
                title: doc.title,
                version: doc.version,
                created_date: doc.created_date,
                reviewed_by: doc.reviewed_by,
                approved_by: doc.approved_by,
                approval_date: doc.approval_date,
                author: doc.author,
                status: doc.status,
                access_link: doc.access_link,
                deleted: doc.deleted,
                sub_process,
                document_type,
                created_at: to_iso(doc.created_at),
                updated_at: to_iso(doc.updated_at),
            }
        })
        .collect();

    Ok(views)
}
