use std::time::Duration;

use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Schema};

use crate::entity::{AuditLogs, OrderItems, Orders, Products, Users};

pub type OrmConn = DatabaseConnection;

/// Create a SeaORM connection pool.
pub async fn create_orm_conn(database_url: &str, max_connections: u32) -> Result<OrmConn> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let conn = Database::connect(options).await?;
    Ok(conn)
}

/// Bring the schema up to date.
///
/// PostgreSQL runs the versioned SQL files in `migrations/`. Other backends
/// (SQLite for tests and local runs) get tables derived from the entities.
pub async fn run_migrations(conn: &OrmConn) -> Result<()> {
    match conn.get_database_backend() {
        DbBackend::Postgres => {
            let pool = conn.get_postgres_connection_pool();
            sqlx::migrate!("./migrations").run(pool).await?;
        }
        _ => create_schema(conn).await?,
    }
    Ok(())
}

pub async fn create_schema(conn: &OrmConn) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);
    // Referenced tables first so foreign keys resolve.
    let mut statements = vec![
        schema.create_table_from_entity(Users),
        schema.create_table_from_entity(Products),
        schema.create_table_from_entity(Orders),
        schema.create_table_from_entity(OrderItems),
        schema.create_table_from_entity(AuditLogs),
    ];
    for statement in statements.iter_mut() {
        statement.if_not_exists();
        conn.execute(backend.build(&*statement)).await?;
    }
    tracing::debug!(backend = ?backend, "schema created from entities");
    Ok(())
}
