use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::PgConnection;
use tracing_subscriber::EnvFilter;

use sgc::auth::password;
use sgc::config::AppConfig;
use sgc::db;
use sgc::models::NewUser;
use sgc::schema::{document_types, documents, macro_processes, processes, sub_processes, users};

/// Idempotent bootstrap data: default accounts, the institutional process
/// catalog and a handful of example documents. Safe to run repeatedly.
fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "seed",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    seed_users(&mut conn, &config.institutional_email_domain)?;
    let catalog = seed_catalog(&mut conn)?;
    seed_documents(&mut conn, &catalog)?;

    tracing::info!("seeding finished");
    Ok(())
}

fn seed_users(conn: &mut PgConnection, domain: &str) -> Result<()> {
    let accounts = [
        (
            "Administrador del Sistema",
            format!("admin@{domain}"),
            "admin",
            "Admin123!",
            "administrator",
        ),
        (
            "Usuario de Consulta",
            format!("consulta@{domain}"),
            "consulta",
            "Consulta123!",
            "consulta",
        ),
    ];

    for (full_name, email, username, initial_password, role) in accounts {
        let exists: Option<i32> = users::table
            .filter(users::email.eq(&email))
            .select(users::id)
            .first(conn)
            .optional()?;
        if exists.is_some() {
            continue;
        }
        let password_hash = password::hash_password(initial_password)?;
        diesel::insert_into(users::table)
            .values(NewUser {
                full_name: full_name.to_owned(),
                email: email.clone(),
                username: Some(username.to_owned()),
                password_hash,
                role: role.to_owned(),
                status: "active".to_owned(),
                must_change_password: false,
            })
            .execute(conn)?;
        tracing::info!(email = %email, role = %role, "seeded account");
    }

    Ok(())
}

struct SeededCatalog {
    sub_process_ids: Vec<i32>,
    document_type_ids: Vec<i32>,
}

const MACRO_PROCESSES: [(&str, &[(&str, &[&str])]); 4] = [
    (
        "Gestión Estratégica",
        &[
            (
                "Planeación Estratégica",
                &["Formulación de Objetivos", "Seguimiento Estratégico"],
            ),
            ("Direccionamiento Estratégico", &["Políticas y Lineamientos"]),
        ],
    ),
    (
        "Gestión Misional",
        &[
            (
                "Prestación de Servicios",
                &["Atención al Cliente", "Control de Calidad"],
            ),
            ("Gestión de Proyectos", &["Planificación de Proyectos"]),
        ],
    ),
    (
        "Gestión de Apoyo",
        &[
            (
                "Gestión del Talento Humano",
                &["Reclutamiento y Selección", "Capacitación y Desarrollo"],
            ),
            (
                "Gestión Financiera",
                &["Presupuesto y Contabilidad", "Tesorería"],
            ),
        ],
    ),
    (
        "Gestión de Evaluación",
        &[("Auditoría Interna", &[]), ("Mejora Continua", &[])],
    ),
];

const DOCUMENT_TYPES: [&str; 6] = [
    "Manual",
    "Procedimiento",
    "Instructivo",
    "Formato",
    "Política",
    "Caracterización",
];

fn seed_catalog(conn: &mut PgConnection) -> Result<SeededCatalog> {
    let mut sub_process_ids = Vec::new();

    for (macro_name, process_list) in MACRO_PROCESSES {
        let macro_id = upsert_by_name(conn, UpsertTable::MacroProcess, macro_name, None)?;
        for (process_name, sub_names) in process_list {
            let process_id =
                upsert_by_name(conn, UpsertTable::Process, process_name, Some(macro_id))?;
            for sub_name in *sub_names {
                let sub_id =
                    upsert_by_name(conn, UpsertTable::SubProcess, sub_name, Some(process_id))?;
                sub_process_ids.push(sub_id);
            }
        }
    }

    let mut document_type_ids = Vec::new();
    for type_name in DOCUMENT_TYPES {
        document_type_ids.push(upsert_by_name(conn, UpsertTable::DocumentType, type_name, None)?);
    }

    tracing::info!(
        sub_processes = sub_process_ids.len(),
        document_types = document_type_ids.len(),
        "seeded catalog"
    );

    Ok(SeededCatalog {
        sub_process_ids,
        document_type_ids,
    })
}

enum UpsertTable {
    MacroProcess,
    Process,
    SubProcess,
    DocumentType,
}

fn upsert_by_name(
    conn: &mut PgConnection,
    table: UpsertTable,
    name: &str,
    parent_id: Option<i32>,
) -> Result<i32> {
    let id = match table {
        UpsertTable::MacroProcess => {
            let inserted: Option<i32> = diesel::insert_into(macro_processes::table)
                .values(macro_processes::name.eq(name))
                .on_conflict(macro_processes::name)
                .do_nothing()
                .returning(macro_processes::id)
                .get_result(conn)
                .optional()?;
            match inserted {
                Some(id) => id,
                None => macro_processes::table
                    .filter(macro_processes::name.eq(name))
                    .select(macro_processes::id)
                    .first(conn)?,
            }
        }
        UpsertTable::Process => {
            let parent = parent_id.context("process seed needs a macro-process id")?;
            let inserted: Option<i32> = diesel::insert_into(processes::table)
                .values((
                    processes::macro_process_id.eq(parent),
                    processes::name.eq(name),
                ))
                .on_conflict((processes::macro_process_id, processes::name))
                .do_nothing()
                .returning(processes::id)
                .get_result(conn)
                .optional()?;
            match inserted {
                Some(id) => id,
                None => processes::table
                    .filter(processes::macro_process_id.eq(parent))
                    .filter(processes::name.eq(name))
                    .select(processes::id)
                    .first(conn)?,
            }
        }
        UpsertTable::SubProcess => {
            let parent = parent_id.context("sub-process seed needs a process id")?;
            let inserted: Option<i32> = diesel::insert_into(sub_processes::table)
                .values((
                    sub_processes::process_id.eq(parent),
                    sub_processes::name.eq(name),
                ))
                .on_conflict((sub_processes::process_id, sub_processes::name))
                .do_nothing()
                .returning(sub_processes::id)
                .get_result(conn)
                .optional()?;
            match inserted {
                Some(id) => id,
                None => sub_processes::table
                    .filter(sub_processes::process_id.eq(parent))
                    .filter(sub_processes::name.eq(name))
                    .select(sub_processes::id)
                    .first(conn)?,
            }
        }
        UpsertTable::DocumentType => {
            let inserted: Option<i32> = diesel::insert_into(document_types::table)
                .values(document_types::name.eq(name))
                .on_conflict(document_types::name)
                .do_nothing()
                .returning(document_types::id)
                .get_result(conn)
                .optional()?;
            match inserted {
                Some(id) => id,
                None => document_types::table
                    .filter(document_types::name.eq(name))
                    .select(document_types::id)
                    .first(conn)?,
            }
        }
    };
    Ok(id)
}

struct SeedDocument {
    code: &'static str,
    title: &'static str,
    version: &'static str,
    sub_process: usize,
    document_type: usize,
    author: &'static str,
    reviewed_by: &'static str,
    approved_by: &'static str,
}

const SEED_DOCUMENTS: [SeedDocument; 6] = [
    SeedDocument {
        code: "MAN-GE-001",
        title: "Manual de Planeación Estratégica",
        version: "2.0",
        sub_process: 0,
        document_type: 0,
        author: "Dpto. Planeación",
        reviewed_by: "Juan Pérez",
        approved_by: "María González",
    },
    SeedDocument {
        code: "PROC-GE-001",
        title: "Procedimiento de Formulación de Objetivos",
        version: "1.5",
        sub_process: 0,
        document_type: 1,
        author: "Dpto. Planeación",
        reviewed_by: "Ana Torres",
        approved_by: "Carlos Ramírez",
    },
    SeedDocument {
        code: "POL-GE-001",
        title: "Política de Calidad Institucional",
        version: "2.1",
        sub_process: 2,
        document_type: 4,
        author: "Dirección General",
        reviewed_by: "Comité Directivo",
        approved_by: "Director General",
    },
    SeedDocument {
        code: "PROC-GM-001",
        title: "Procedimiento de Atención al Cliente",
        version: "3.1",
        sub_process: 3,
        document_type: 1,
        author: "Área de Servicio",
        reviewed_by: "Supervisor",
        approved_by: "Gerente Operaciones",
    },
    SeedDocument {
        code: "FOR-GM-001",
        title: "Formato de Registro de No Conformidades",
        version: "2.0",
        sub_process: 4,
        document_type: 3,
        author: "Control de Calidad",
        reviewed_by: "Auditor",
        approved_by: "Director Calidad",
    },
    SeedDocument {
        code: "INST-GA-001",
        title: "Instructivo de Manejo de Caja Menor",
        version: "1.2",
        sub_process: 9,
        document_type: 2,
        author: "Tesorería",
        reviewed_by: "Tesorero",
        approved_by: "Director Financiero",
    },
];

fn seed_documents(conn: &mut PgConnection, catalog: &SeededCatalog) -> Result<()> {
    let mut created = 0;
    for doc in &SEED_DOCUMENTS {
        let sub_process_id = catalog
            .sub_process_ids
            .get(doc.sub_process)
            .copied()
            .context("seed document references a missing sub-process")?;
        let document_type_id = catalog
            .document_type_ids
            .get(doc.document_type)
            .copied()
            .context("seed document references a missing document type")?;

        let exists: Option<i32> = documents::table
            .filter(documents::code.eq(doc.code))
            .select(documents::id)
            .first(conn)
            .optional()?;
        if exists.is_some() {
            continue;
        }

        diesel::insert_into(documents::table)
            .values((
                documents::sub_process_id.eq(sub_process_id),
                documents::document_type_id.eq(document_type_id),
                documents::code.eq(doc.code),
                documents::title.eq(doc.title),
                documents::version.eq(doc.version),
                documents::author.eq(doc.author),
                documents::reviewed_by.eq(doc.reviewed_by),
                documents::approved_by.eq(doc.approved_by),
                documents::status.eq("current"),
            ))
            .execute(conn)?;
        created += 1;
    }

    tracing::info!(created, "seeded example documents");
    Ok(())
}
