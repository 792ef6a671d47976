use anyhow::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, EntityTrait, Schema};

use crate::entity::{AuditLogs, Carts, OrderItems, Orders, Payments, Products, Users};

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    let conn = Database::connect(database_url).await?;
    Ok(conn)
}

/// Bring the schema up to date.
///
/// Postgres runs the versioned SQL files in `migrations/`. SQLite (tests and
/// local runs) gets tables generated straight from the entity definitions.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    match conn.get_database_backend() {
        DatabaseBackend::Postgres => {
            sqlx::migrate!("./migrations")
                .run(conn.get_postgres_connection_pool())
                .await?;
        }
        _ => create_schema_from_entities(conn).await?,
    }
    Ok(())
}

async fn create_schema_from_entities(conn: &DatabaseConnection) -> Result<()> {
    create_table(conn, Users).await?;
    create_table(conn, Products).await?;
    create_table(conn, Carts).await?;
    create_table(conn, Orders).await?;
    create_table(conn, OrderItems).await?;
    create_table(conn, Payments).await?;
    create_table(conn, AuditLogs).await?;
    Ok(())
}

async fn create_table<E: EntityTrait>(conn: &DatabaseConnection, entity: E) -> Result<()> {
    let backend = conn.get_database_backend();
    let mut stmt = Schema::new(backend).create_table_from_entity(entity);
    stmt.if_not_exists();
    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}
