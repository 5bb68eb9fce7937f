mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use common::{acquire_db_lock, body_to_json, body_to_vec, TestApp};
use diesel::prelude::*;
use rust_xlsxwriter::Workbook;
use serde_json::json;

const HEADERS: [&str; 8] = [
    "macro_proceso",
    "proceso",
    "subproceso",
    "tipo_documentacion",
    "codigo",
    "titulo",
    "version",
    "estado",
];

fn build_xlsx(rows: &[[&str; 8]]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string(0, col as u16, *header)?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            if !value.is_empty() {
                sheet.write_string(row_idx as u32 + 1, col as u16, *value)?;
            }
        }
    }
    Ok(workbook.save_to_buffer()?)
}

async fn upload(
    app: &TestApp,
    token: &str,
    bytes: &[u8],
) -> Result<hyper::Response<axum::body::Body>> {
    app.send_multipart(
        Method::POST,
        "/api/import/excel",
        &[],
        Some(("documentos.xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", bytes)),
        token,
    )
    .await
}

#[tokio::test]
async fn import_builds_the_hierarchy_once_and_updates_on_reimport() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    app.insert_admin("gestor@unicesmag.edu.co", "clave-gestor").await?;
    let token = app.login_token("gestor@unicesmag.edu.co", "clave-gestor").await?;

    let bytes = build_xlsx(&[
        [
            "Gestión Estratégica",
            "Planeación Estratégica",
            "Formulación de Objetivos",
            "Manual",
            "MAN-GE-001",
            "Manual de Planeación",
            "1.0",
            "vigente",
        ],
        [
            "Gestión Estratégica",
            "Planeación Estratégica",
            "Seguimiento Estratégico",
            "Procedimiento",
            "PROC-GE-001",
            "Procedimiento de Seguimiento",
            "1.0",
            "activo",
        ],
    ])?;

    let response = upload(&app, &token, &bytes).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"]["total"], json!(2));
    assert_eq!(body["data"]["imported"], json!(2));
    assert_eq!(body["data"]["updated"], json!(0));
    assert_eq!(body["data"]["errors"], json!([]));

    // The "activo" dialect lands as the canonical status.
    let status: String = app
        .with_conn(|conn| {
            use sgc::schema::documents;
            Ok(documents::table
                .filter(documents::code.eq("PROC-GE-001"))
                .select(documents::status)
                .first(conn)?)
        })
        .await?;
    assert_eq!(status, "current");

    // Second pass: every row matches by code, nothing is duplicated.
    let bytes = build_xlsx(&[
        [
            "Gestión Estratégica",
            "Planeación Estratégica",
            "Formulación de Objetivos",
            "Manual",
            "MAN-GE-001",
            "Manual de Planeación v2",
            "2.0",
            "vigente",
        ],
        [
            "Gestión Estratégica",
            "Planeación Estratégica",
            "Seguimiento Estratégico",
            "Procedimiento",
            "PROC-GE-001",
            "Procedimiento de Seguimiento",
            "1.1",
            "vigente",
        ],
    ])?;
    let body = body_to_json(upload(&app, &token, &bytes).await?.into_body()).await?;
    assert_eq!(body["data"]["imported"], json!(0));
    assert_eq!(body["data"]["updated"], json!(2));

    let (macros, processes, subs, types, docs) = app
        .with_conn(|conn| {
            use sgc::schema::{document_types, documents, macro_processes, processes, sub_processes};
            Ok((
                macro_processes::table.count().get_result::<i64>(conn)?,
                processes::table.count().get_result::<i64>(conn)?,
                sub_processes::table.count().get_result::<i64>(conn)?,
                document_types::table.count().get_result::<i64>(conn)?,
                documents::table.count().get_result::<i64>(conn)?,
            ))
        })
        .await?;
    assert_eq!((macros, processes, subs, types, docs), (1, 1, 2, 2, 2));

    let (title, version): (String, Option<String>) = app
        .with_conn(|conn| {
            use sgc::schema::documents;
            Ok(documents::table
                .filter(documents::code.eq("MAN-GE-001"))
                .select((documents::title, documents::version))
                .first(conn)?)
        })
        .await?;
    assert_eq!(title, "Manual de Planeación v2");
    assert_eq!(version.as_deref(), Some("2.0"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rows_missing_required_fields_are_reported_without_sinking_the_batch() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    app.insert_admin("gestor@unicesmag.edu.co", "clave-gestor").await?;
    let token = app.login_token("gestor@unicesmag.edu.co", "clave-gestor").await?;

    let bytes = build_xlsx(&[
        [
            "Gestión Estratégica",
            "Planeación Estratégica",
            "Formulación de Objetivos",
            "Manual",
            "MAN-GE-001",
            "Manual de Planeación",
            "",
            "",
        ],
        // No code.
        [
            "Gestión Estratégica",
            "Planeación Estratégica",
            "Formulación de Objetivos",
            "Manual",
            "",
            "Manual sin código",
            "",
            "",
        ],
    ])?;

    let body = body_to_json(upload(&app, &token, &bytes).await?.into_body()).await?;
    assert_eq!(body["data"]["total"], json!(2));
    assert_eq!(body["data"]["imported"], json!(1));
    // Header is row 1, so the bad data row reports as 3.
    assert_eq!(body["data"]["errors"][0]["row"], json!(3));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn import_matches_soft_deleted_documents_by_code() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    app.insert_admin("gestor@unicesmag.edu.co", "clave-gestor").await?;
    let token = app.login_token("gestor@unicesmag.edu.co", "clave-gestor").await?;

    let bytes = build_xlsx(&[[
        "Gestión Estratégica",
        "Planeación Estratégica",
        "Formulación de Objetivos",
        "Manual",
        "MAN-GE-001",
        "Manual original",
        "1.0",
        "vigente",
    ]])?;
    upload(&app, &token, &bytes).await?;

    app.with_conn(|conn| {
        use sgc::schema::documents;
        diesel::update(documents::table.filter(documents::code.eq("MAN-GE-001")))
            .set(documents::deleted.eq(true))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    // With soft-deleted matching on, the tombstone is updated in place
    // rather than shadowed by a new row.
    let body = body_to_json(upload(&app, &token, &bytes).await?.into_body()).await?;
    assert_eq!(body["data"]["updated"], json!(1));
    let count: i64 = app
        .with_conn(|conn| {
            use sgc::schema::documents;
            Ok(documents::table.count().get_result(conn)?)
        })
        .await?;
    assert_eq!(count, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn import_requires_a_file_and_an_admin() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    app.insert_admin("gestor@unicesmag.edu.co", "clave-gestor").await?;
    app.insert_user(
        "Lector",
        "lector@unicesmag.edu.co",
        "lector",
        "sololectura",
        "consulta",
    )
    .await?;
    let admin_token = app.login_token("gestor@unicesmag.edu.co", "clave-gestor").await?;
    let consulta_token = app.login_token("lector@unicesmag.edu.co", "sololectura").await?;

    let response = app
        .send_multipart(Method::POST, "/api/import/excel", &[], None, &admin_token)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = build_xlsx(&[])?;
    let response = upload(&app, &consulta_token, &bytes).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn template_downloads_with_the_expected_columns() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    // The template carries no data and needs no token.
    let response = app.get("/api/import/template", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()?
        .to_owned();
    assert!(disposition.contains("plantilla_documentos_sgc.xlsx"));

    let bytes = body_to_vec(response.into_body()).await?;
    let sheet = sgc::xlsx::Sheet::from_xlsx(&bytes)?;
    let row = sheet.rows().next().expect("template example row");
    for header in HEADERS {
        assert!(row.text(header).is_some(), "missing column {header}");
    }

    app.cleanup().await?;
    Ok(())
}
