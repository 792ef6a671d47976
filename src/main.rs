use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketplace_checkout::{
    app::build_app,
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    gateway::PayPalGateway,
    middleware::auth::JwtKeys,
    services::catalog::DbCatalog,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,marketplace_checkout=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let gateway = PayPalGateway::new(config.gateway.clone())?;
    let state = AppState::new(
        orm.clone(),
        JwtKeys::new(&config.jwt_secret, config.jwt_ttl_hours),
        Arc::new(DbCatalog::new(orm)),
        Arc::new(gateway),
        config.gateway.clone(),
    );

    let app = build_app(state);

    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    tracing::info!(gateway = %config.gateway.base_url, "listening on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}
