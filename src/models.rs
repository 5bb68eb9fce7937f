use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub full_name: String,
    pub email: String,
    pub username: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub must_change_password: bool,
    pub reset_token_hash: Option<String>,
    pub reset_token_expiry: Option<NaiveDateTime>,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == "administrator"
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub username: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub must_change_password: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = macro_processes)]
pub struct MacroProcess {
    pub id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = processes)]
#[diesel(belongs_to(MacroProcess))]
pub struct Process {
    pub id: i32,
    pub macro_process_id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = sub_processes)]
#[diesel(belongs_to(Process))]
pub struct SubProcess {
    pub id: i32,
    pub process_id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_types)]
pub struct DocumentType {
    pub id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(SubProcess))]
#[diesel(belongs_to(DocumentType))]
pub struct Document {
    pub id: i32,
    pub sub_process_id: i32,
    pub document_type_id: i32,
    pub code: String,
    pub title: String,
    pub version: Option<String>,
    pub created_date: Option<NaiveDate>,
    pub reviewed_by: Option<String>,
    pub approved_by: Option<String>,
    pub approval_date: Option<NaiveDate>,
    pub author: Option<String>,
    pub status: String,
    pub access_link: Option<String>,
    pub created_by: Option<i32>,
    pub updated_by: Option<i32>,
    pub deleted: bool,
    pub deleted_by: Option<i32>,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub sub_process_id: i32,
    pub document_type_id: i32,
    pub code: String,
    pub title: String,
    pub version: Option<String>,
    pub created_date: Option<NaiveDate>,
    pub reviewed_by: Option<String>,
    pub approved_by: Option<String>,
    pub approval_date: Option<NaiveDate>,
    pub author: Option<String>,
    pub status: String,
    pub access_link: Option<String>,
    pub created_by: Option<i32>,
}
