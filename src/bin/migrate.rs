use marketplace_checkout::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
};
use sea_orm::ConnectionTrait;

/// Applies the schema without starting the HTTP server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .init();

    let config = AppConfig::from_env()?;
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;
    tracing::info!(backend = ?orm.get_database_backend(), "schema up to date");
    Ok(())
}
