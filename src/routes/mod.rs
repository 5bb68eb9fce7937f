use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::{
    auth::{AdminUser, AuthenticatedUser},
    state::AppState,
};

pub mod auth;
pub mod catalog;
pub mod documents;
pub mod health;
pub mod import;
pub mod management;
pub mod users;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    // /login is open; profile and change-password authenticate through the
    // extractors in their handler signatures.
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/profile", get(auth::profile))
        .route("/change-password", post(auth::change_password));

    let consulta_state = state.clone();
    let consulta_routes = Router::new()
        .route("/macro-procesos", get(catalog::list_macro_processes))
        .route("/procesos", get(catalog::list_processes))
        .route("/subprocesos", get(catalog::list_sub_processes))
        .route("/tipos-documentacion", get(catalog::list_document_types))
        .route("/documentos", get(documents::search_documents))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(consulta_state));

    let management_state = state.clone();
    let management_routes = Router::new()
        .route(
            "/documentos",
            get(management::list_documents).post(management::create_document),
        )
        .route(
            "/documentos/:id",
            get(management::get_document)
                .put(management::update_document)
                .delete(management::delete_document),
        )
        .route("/documentos/:id/restore", patch(management::restore_document))
        .route("/documentos/:id/download", get(management::download_document))
        .layer(middleware::from_extractor_with_state::<AdminUser, _>(management_state));

    let import_state = state.clone();
    let import_admin_routes = Router::new()
        .route("/excel", post(import::import_documents))
        .layer(middleware::from_extractor_with_state::<AdminUser, _>(import_state));
    // QA staff bookmark the template; it carries no data and stays open.
    let import_routes =
        import_admin_routes.merge(Router::new().route("/template", get(import::download_template)));

    let users_state = state.clone();
    let users_admin_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/bulk-upload", post(users::bulk_upload_users))
        .route("/:id", put(users::update_user).delete(users::delete_user))
        .route("/:id/status", patch(users::set_user_status))
        .route("/:id/reset-temp-password", post(users::reset_temp_password))
        .layer(middleware::from_extractor_with_state::<AdminUser, _>(users_state));
    let users_routes = users_admin_routes.merge(
        Router::new()
            .route("/request-password-reset", post(users::request_password_reset))
            .route("/reset-password", post(users::reset_password)),
    );

    let uploads_dir = state.config.uploads_dir.clone();

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api", consulta_routes)
        .nest("/api/management", management_routes)
        .nest("/api/import", import_routes)
        .nest("/api/users", users_routes)
        .route("/api/health", get(health::health_check))
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 32))
}

/// Timestamps are stored as naive UTC; the API serializes them as RFC 3339.
pub(crate) fn to_iso(dt: chrono::NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}
