use axum::{
    extract::{Query, State},
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::AppResult,
    models::{DocumentType, MacroProcess, Process, SubProcess},
    response::ApiResponse,
    schema::{document_types, macro_processes, processes, sub_processes},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    pub id: i32,
    pub name: String,
}

pub async fn list_macro_processes(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<CatalogEntry>>>> {
    let mut conn = state.db()?;
    let rows: Vec<MacroProcess> = macro_processes::table
        .order(macro_processes::name.asc())
        .load(&mut conn)?;
    let entries = rows
        .into_iter()
        .map(|row| CatalogEntry {
            id: row.id,
            name: row.name,
        })
        .collect();
    Ok(Json(ApiResponse::data(entries)))
}

#[derive(Deserialize)]
pub struct ProcessFilter {
    #[serde(rename = "macro_proceso_id")]
    pub macro_process_id: Option<i32>,
}

pub async fn list_processes(
    State(state): State<AppState>,
    Query(filter): Query<ProcessFilter>,
) -> AppResult<Json<ApiResponse<Vec<CatalogEntry>>>> {
    let mut conn = state.db()?;
    let mut query = processes::table.into_boxed();
    if let Some(macro_process_id) = filter.macro_process_id {
        query = query.filter(processes::macro_process_id.eq(macro_process_id));
    }
    let rows: Vec<Process> = query.order(processes::name.asc()).load(&mut conn)?;
    let entries = rows
        .into_iter()
        .map(|row| CatalogEntry {
            id: row.id,
            name: row.name,
        })
        .collect();
    Ok(Json(ApiResponse::data(entries)))
}

#[derive(Deserialize)]
pub struct SubProcessFilter {
    #[serde(rename = "proceso_id")]
    pub process_id: Option<i32>,
}

pub async fn list_sub_processes(
    State(state): State<AppState>,
    Query(filter): Query<SubProcessFilter>,
) -> AppResult<Json<ApiResponse<Vec<CatalogEntry>>>> {
    let mut conn = state.db()?;
    let mut query = sub_processes::table.into_boxed();
    if let Some(process_id) = filter.process_id {
        query = query.filter(sub_processes::process_id.eq(process_id));
    }
    let rows: Vec<SubProcess> = query.order(sub_processes::name.asc()).load(&mut conn)?;
    let entries = rows
        .into_iter()
        .map(|row| CatalogEntry {
            id: row.id,
            name: row.name,
        })
        .collect();
    Ok(Json(ApiResponse::data(entries)))
}

pub async fn list_document_types(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<CatalogEntry>>>> {
    let mut conn = state.db()?;
    let rows: Vec<DocumentType> = document_types::table
        .order(document_types::name.asc())
        .load(&mut conn)?;
    let entries = rows
        .into_iter()
        .map(|row| CatalogEntry {
            id: row.id,
            name: row.name,
        })
        .collect();
    Ok(Json(ApiResponse::data(entries)))
}
