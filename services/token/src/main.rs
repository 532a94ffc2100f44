use anyhow::Context;
use rust_common::{init_tracing, ShutdownCoordinator, TracingConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use token_service::config::{KeyStoreBackend, RevocationStoreBackend};
use token_service::http::{router, AppState};
use token_service::storage::{
    postgres, InMemoryKeyStore, InMemoryRevocationStore, KeyStore, PgKeyStore, PgRevocationStore,
    RedisRevocationStore, RevocationStore,
};
use token_service::{Config, Issuer, KeyManager};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&TracingConfig::from_env("token-service"));

    info!("Starting Token Service");

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid HOST/PORT")?;

    let (key_store, revocation_store) = build_stores(&config).await?;

    let keys = Arc::new(
        KeyManager::initialize(key_store, config.keys.clone())
            .await
            .context("failed to initialize signing keys")?,
    );
    let issuer = Arc::new(Issuer::new(
        Arc::clone(&keys),
        revocation_store,
        config.issuer.clone(),
    ));

    let mut coordinator = ShutdownCoordinator::new();
    let rotation_shutdown = coordinator.subscribe();
    coordinator.spawn(
        "key-rotation",
        Arc::clone(&keys).run_rotation_loop(rotation_shutdown),
    );

    let app = router(AppState::new(issuer));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Token Service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown(config.shutdown_timeout).await;
    info!("Token Service stopped");
    Ok(())
}

async fn build_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn KeyStore>, Arc<dyn RevocationStore>)> {
    let pool = match &config.database_url {
        Some(url)
            if config.key_store == KeyStoreBackend::Postgres
                || config.revocation_store == RevocationStoreBackend::Postgres =>
        {
            let pool = postgres::connect(url, config.database_max_connections).await?;
            postgres::migrate(&pool).await?;
            Some(pool)
        }
        _ => None,
    };

    let key_store: Arc<dyn KeyStore> = match (&config.key_store, &pool) {
        (KeyStoreBackend::Postgres, Some(pool)) => Arc::new(PgKeyStore::new(pool.clone())),
        (KeyStoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL is required"),
        (KeyStoreBackend::Memory, _) => {
            warn!("Signing keys are kept in memory and will not survive a restart");
            Arc::new(InMemoryKeyStore::new())
        }
    };

    let revocation_store: Arc<dyn RevocationStore> = match (&config.revocation_store, &pool) {
        (RevocationStoreBackend::Postgres, Some(pool)) => {
            Arc::new(PgRevocationStore::new(pool.clone()))
        }
        (RevocationStoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL is required"),
        (RevocationStoreBackend::Redis, _) => {
            let url = config
                .redis_url
                .as_deref()
                .context("REDIS_URL is required")?;
            Arc::new(RedisRevocationStore::new(url).await?)
        }
        (RevocationStoreBackend::Memory, _) => {
            warn!("Refresh token records are kept in memory and will not survive a restart");
            Arc::new(InMemoryRevocationStore::new())
        }
    };

    Ok((key_store, revocation_store))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
