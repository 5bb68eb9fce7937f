pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod models;
pub mod pagination;
pub mod response;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod xlsx;
