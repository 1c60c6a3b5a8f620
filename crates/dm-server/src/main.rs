//! Device management server entry point.
//!
//! Loads configuration, connects the enabled backends (local directories,
//! S3, PostgreSQL), then starts the Axum HTTP server with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use dm_core::audit::{AuditBackend, AuditTrail, MemoryAuditBackend};
use dm_core::audit_file::FileAuditBackend;
use dm_core::enrollment::{EnrollmentService, Sink, SinkKind};
use dm_core::gateway::{BinariesMode, BinaryGateway, LocalGateway, PresignGateway, ProxyGateway};
use dm_core::health::{HealthReporter, ProvisioningProbe, StoreProbe};
use dm_core::provisioning::{MemoryProvisioningStore, ProvisioningStore};
use dm_core::resolver::{ConfigResolver, ResolverSettings};
use dm_core::template::{TemplateStore, Variables};
use dm_storage::{LocalBackend, ObjectStore};

use dm_server::config::{LogFormat, ServerConfig};
use dm_server::routes::build_router;
use dm_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    init_tracing(&config);

    info!(
        bind = %config.bind_addr,
        binaries_mode = %config.binaries_mode,
        default_profile = %config.default_profile,
        "device management server starting"
    );

    let state = build_app_state(&config).await?;
    let app = build_router(Arc::new(state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "device management server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("device management server stopped");
    Ok(())
}

/// `RUST_LOG` overrides the configured level.
fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Connect every enabled backend and assemble the shared state.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let s3 = if config.uses_s3() {
        Some(connect_s3(config).await?)
    } else {
        None
    };

    // Provisioning state and audit trail.
    let mut audit = AuditTrail::new();
    let mut health = HealthReporter::new();
    let provisioning: Arc<dyn ProvisioningStore> = match &config.database_url {
        Some(url) => {
            let (store, rows) = connect_postgres(url).await?;
            audit = audit.with_backend(rows);
            health = health.with_probe(Arc::new(ProvisioningProbe::new(Arc::clone(&store))));
            store
        }
        None => {
            info!("no database configured, provisioning state is kept in memory");
            health = health.with_skipped("db");
            Arc::new(MemoryProvisioningStore::new())
        }
    };

    if let Some(path) = &config.audit_file {
        info!(path = %path.display(), "audit rows are appended to file");
        audit = audit.with_backend(Arc::new(FileAuditBackend::new(path)));
    }
    if !audit.has_backends() {
        info!("no audit backend configured, keeping audit rows in memory");
        audit = audit.with_backend(Arc::new(MemoryAuditBackend::new()));
    }

    // Enrollment sinks.
    let mut sinks = Vec::new();
    if config.store_enroll_locally {
        let local: Arc<dyn ObjectStore> = Arc::new(LocalBackend::new(&config.enroll_dir));
        info!(dir = %config.enroll_dir.display(), "local enrollment sink enabled");
        health = health.with_probe(Arc::new(StoreProbe::new("local_storage", Arc::clone(&local))));
        sinks.push(Sink::new(
            SinkKind::Local,
            local,
            config.local_prefix_enroll.clone(),
        ));
    } else {
        health = health.with_skipped("local_storage");
    }
    if let (true, Some(store)) = (config.store_enroll_s3, &s3) {
        info!(prefix = %config.s3_prefix_enroll, "S3 enrollment sink enabled");
        sinks.push(Sink::new(
            SinkKind::S3,
            Arc::clone(store),
            config.s3_prefix_enroll.clone(),
        ));
    }
    match &s3 {
        Some(store) => health = health.with_probe(Arc::new(StoreProbe::new("s3", Arc::clone(store)))),
        None => health = health.with_skipped("s3"),
    }

    // Binary delivery.
    let gateway: Arc<dyn BinaryGateway> = match (config.binaries_mode, &s3) {
        (BinariesMode::Presign, Some(store)) => Arc::new(PresignGateway::new(
            Arc::clone(store),
            config.s3_prefix_binaries.clone(),
            config.presign_ttl,
            config.storage_timeout,
        )),
        (BinariesMode::Proxy, Some(store)) => Arc::new(ProxyGateway::new(
            Arc::clone(store),
            config.s3_prefix_binaries.clone(),
            config.storage_timeout,
        )),
        (BinariesMode::Local, _) => Arc::new(LocalGateway::new(
            LocalBackend::new(&config.binaries_dir),
            config.s3_prefix_binaries.clone(),
            config.storage_timeout,
        )),
        (mode, None) => anyhow::bail!("binaries mode '{mode}' requires S3"),
    };

    // Configuration templates.
    let variables = Arc::new(Variables::from_env());
    let resolver = ConfigResolver::new(
        TemplateStore::new(&config.config_dir),
        variables,
        ResolverSettings {
            default_profile: config.default_profile,
            enabled: config.config_enabled,
        },
    );
    info!(dir = %config.config_dir.display(), "serving configuration templates");

    let enrollment = EnrollmentService::new(provisioning, audit, sinks);
    let mut state = AppState::new(resolver, enrollment, gateway, health)
        .with_max_body_bytes(config.max_body_bytes)
        .with_allow_origins(config.allow_origins.clone())
        .with_trust_forwarded_for(config.trust_forwarded_for);
    if let Some(token) = &config.admin_token {
        info!("admin routes enabled");
        state = state.with_admin_token(token);
    }
    Ok(state)
}

/// The same pool backs provisioning records and audit rows.
#[cfg(feature = "postgres-backend")]
async fn connect_postgres(
    url: &str,
) -> anyhow::Result<(Arc<dyn ProvisioningStore>, Arc<dyn AuditBackend>)> {
    let store = Arc::new(
        dm_core::postgres::PgStore::connect(url)
            .await
            .context("failed to connect to PostgreSQL")?,
    );
    info!("provisioning state stored in PostgreSQL");
    let rows: Arc<dyn AuditBackend> = store.clone();
    Ok((store, rows))
}

#[cfg(not(feature = "postgres-backend"))]
async fn connect_postgres(
    _url: &str,
) -> anyhow::Result<(Arc<dyn ProvisioningStore>, Arc<dyn AuditBackend>)> {
    anyhow::bail!("a database is configured but this binary was built without postgres-backend")
}

#[cfg(feature = "s3-backend")]
async fn connect_s3(config: &ServerConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let settings = dm_storage::S3Settings {
        bucket: config.s3_bucket.clone().unwrap_or_default(),
        region: config.aws_region.clone(),
        endpoint_url: config.s3_endpoint_url.clone(),
        access_key_id: config.s3_access_key_id.clone(),
        secret_access_key: config.s3_secret_access_key.clone(),
        timeout: config.storage_timeout,
    };
    let store = dm_storage::S3Backend::connect(&settings)
        .await
        .context("failed to configure S3 client")?;
    info!(bucket = %store.bucket(), endpoint = ?config.s3_endpoint_url, "S3 storage configured");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "s3-backend"))]
async fn connect_s3(_config: &ServerConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    anyhow::bail!("S3 is required by the configuration but this binary was built without s3-backend")
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
