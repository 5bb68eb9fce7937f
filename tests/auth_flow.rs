mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn login_and_profile_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_admin("alicia@unicesmag.edu.co", "s3creta!!").await?;
    let token = app.login_token("alicia@unicesmag.edu.co", "s3creta!!").await?;

    let response = app.get("/api/auth/profile", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["email"], json!("alicia@unicesmag.edu.co"));
    assert_eq!(body["data"]["role"], json!("administrator"));
    assert!(body["data"].get("password_hash").is_none());
    assert!(body["data"].get("reset_token_hash").is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_accepts_the_username_as_identifier() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user(
        "Beatriz Ruiz",
        "beatriz@unicesmag.edu.co",
        "beatriz.ruiz",
        "clave-larga",
        "consulta",
    )
    .await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({"username": "beatriz.ruiz", "password": "clave-larga"}),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_distinguishes_unknown_inactive_and_wrong_password() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_admin("carla@unicesmag.edu.co", "correcta1").await?;

    // Unknown identifier.
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({"email": "nadie@unicesmag.edu.co", "password": "x"}),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Wrong password.
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({"email": "carla@unicesmag.edu.co", "password": "incorrecta"}),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["success"], json!(false));

    // Inactive account.
    app.with_conn(|conn| {
        use diesel::prelude::*;
        use sgc::schema::users;
        diesel::update(users::table.filter(users::email.eq("carla@unicesmag.edu.co")))
            .set(users::status.eq("inactive"))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({"email": "carla@unicesmag.edu.co", "password": "correcta1"}),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn change_password_requires_the_current_one_and_clears_the_flag() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_admin("dario@unicesmag.edu.co", "antigua123").await?;
    app.with_conn(|conn| {
        use diesel::prelude::*;
        use sgc::schema::users;
        diesel::update(users::table)
            .set(users::must_change_password.eq(true))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    let token = app.login_token("dario@unicesmag.edu.co", "antigua123").await?;

    let response = app
        .post_json(
            "/api/auth/change-password",
            &json!({"current_password": "equivocada", "new_password": "nueva-clave-1"}),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_json(
            "/api/auth/change-password",
            &json!({"current_password": "antigua123", "new_password": "corta"}),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/auth/change-password",
            &json!({"current_password": "antigua123", "new_password": "nueva-clave-1"}),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"]["must_change_password"], json!(false));

    // The old password no longer works.
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({"email": "dario@unicesmag.edu.co", "password": "antigua123"}),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    app.login_token("dario@unicesmag.edu.co", "nueva-clave-1").await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn role_guards_gate_the_management_surface() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user(
        "Consulta",
        "lector@unicesmag.edu.co",
        "lector",
        "sololectura",
        "consulta",
    )
    .await?;
    let token = app.login_token("lector@unicesmag.edu.co", "sololectura").await?;

    // No token at all.
    let response = app.get("/api/management/documentos", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Consulta role on an admin-only route.
    let response = app.get("/api/management/documentos", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app.get("/api/users", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The consulta surface stays open to the role.
    let response = app.get("/api/macro-procesos", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}
