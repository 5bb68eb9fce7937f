use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use sgc::auth::jwt::JwtService;
use sgc::auth::password::hash_password;
use sgc::config::AppConfig;
use sgc::db::{self, PgPool};
use sgc::mailer::Mailer;
use sgc::models::NewUser;
use sgc::routes;
use sgc::state::AppState;
use sgc::storage::FileStorage;
use tokio::sync::Mutex;
use tower::util::ServiceExt;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl FileStorage for FakeStorage {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut guard = self.files.lock().await;
        guard.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.files.lock().await;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("file {key} missing"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self.files.lock().await;
        guard.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let guard = self.files.lock().await;
        Ok(guard.contains_key(key))
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn file_count(&self) -> usize {
        let guard = self.files.lock().await;
        guard.len()
    }

    #[allow(dead_code)]
    pub async fn keys(&self) -> Vec<String> {
        let guard = self.files.lock().await;
        guard.keys().cloned().collect()
    }
}

#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct SentEmail {
    pub kind: &'static str,
    pub to: String,
    /// Temp password or reset link, depending on the kind.
    pub secret: String,
}

/// Records outbound mail instead of sending it; can be switched to fail so
/// the contingency paths are testable.
#[derive(Default)]
pub struct FakeMailer {
    fail: AtomicBool,
    sent: Mutex<Vec<SentEmail>>,
}

impl FakeMailer {
    async fn record(&self, kind: &'static str, to: &str, secret: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("smtp unavailable (test)");
        }
        let mut guard = self.sent.lock().await;
        guard.push(SentEmail {
            kind,
            to: to.to_string(),
            secret: secret.to_string(),
        });
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<SentEmail> {
        let guard = self.sent.lock().await;
        guard.clone()
    }

    #[allow(dead_code)]
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send_welcome(
        &self,
        to: &str,
        _full_name: &str,
        _username: &str,
        temp_password: &str,
    ) -> Result<()> {
        self.record("welcome", to, temp_password).await
    }

    async fn send_temporary_password(
        &self,
        to: &str,
        _full_name: &str,
        temp_password: &str,
    ) -> Result<()> {
        self.record("temporary_password", to, temp_password).await
    }

    async fn send_password_reset(
        &self,
        to: &str,
        _full_name: &str,
        reset_link: &str,
    ) -> Result<()> {
        self.record("password_reset", to, reset_link).await
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    mailer: Arc<FakeMailer>,
}

impl TestApp {
    /// `Ok(None)` when `TEST_DATABASE_URL` is unset so the suite skips
    /// instead of failing on machines without Postgres.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            frontend_url: "http://localhost:3000".to_string(),
            cors_allowed_origin: None,
            uploads_dir: "uploads-test".to_string(),
            institutional_email_domain: "unicesmag.edu.co".to_string(),
            smtp_host: "localhost".to_string(),
            smtp_port: 2525,
            smtp_user: None,
            smtp_pass: None,
            smtp_from: "noreply@unicesmag.edu.co".to_string(),
            reset_token_expiry_minutes: 60,
            import_match_soft_deleted: true,
            import_column_shift_fix: false,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn FileStorage> = storage.clone();
        let mailer = Arc::new(FakeMailer::default());
        let mailer_for_state: Arc<dyn Mailer> = mailer.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, storage_for_state, mailer_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
            mailer,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn mailer(&self) -> Arc<FakeMailer> {
        self.mailer.clone()
    }

    pub async fn insert_user(
        &self,
        full_name: &str,
        email: &str,
        username: &str,
        password: &str,
        role: &str,
    ) -> Result<i32> {
        let full_name = full_name.to_string();
        let email = email.to_string();
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let user = NewUser {
                full_name,
                email,
                username: Some(username),
                password_hash,
                role,
                status: "active".to_string(),
                must_change_password: false,
            };
            let id = diesel::insert_into(sgc::schema::users::table)
                .values(&user)
                .returning(sgc::schema::users::id)
                .get_result::<i32>(conn)
                .context("failed to insert user")?;
            Ok(id)
        })
        .await
    }

    pub async fn insert_admin(&self, email: &str, password: &str) -> Result<i32> {
        self.insert_user(
            "Admin de Prueba",
            email,
            email.split('@').next().unwrap_or("admin"),
            password,
            "administrator",
        )
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_json(response.into_body()).await?;
        body["data"]["token"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("login response missing data.token"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Multipart request with text fields plus an optional `file` part.
    #[allow(dead_code)]
    pub async fn send_multipart(
        &self,
        method: Method,
        path: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = "sgc-test-boundary-7d1c";
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        if let Some((filename, content_type, data)) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend(data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_json(body: Body) -> Result<Value> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(serde_json::from_slice(&collected.to_bytes())?)
}

#[allow(dead_code)]
pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE documents, sub_processes, processes, macro_processes, document_types, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
