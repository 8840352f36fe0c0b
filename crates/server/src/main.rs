use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qrelease_core::{
    create_audit_system, load_config, validate_config, AlertTarget, AuditEvent, AuditHandle,
    AuditStore, Collaborators, Config, HttpReleaseGateway, JustificationPolicy, LogNotifier,
    Notifier, ProgressStore, ServiceNowClient, SmtpNotifier, SqliteAuditStore,
    SqliteProgressStore, TicketAttachmentInspector, WorkflowEngine,
};

use qrelease_server::api::create_router;
use qrelease_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = matches!(
        std::env::var("QRELEASE_LOG_FORMAT").as_deref(),
        Ok("json")
    );

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("QRELEASE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    let progress_store: Arc<dyn ProgressStore> = Arc::new(
        SqliteProgressStore::new(&config.database.path)
            .context("Failed to create progress journal")?,
    );
    info!("Progress journal initialized");

    // Create audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;

    let engine = build_engine(&config, Arc::clone(&progress_store), audit_handle.clone())?;
    if let Some(ref engine) = engine {
        if config.engine.enabled {
            engine.start().await;
            info!("Workflow engine started");
        } else {
            info!("Workflow engine disabled in config; poll cycles run on request only");
        }
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        audit_handle.clone(),
        audit_store,
        progress_store,
        engine.clone(),
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Pipelines past their release marker finish before this returns.
    if let Some(ref engine) = engine {
        info!("Stopping workflow engine...");
        engine.stop().await;
    }

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The engine holds an AuditHandle clone; the writer exits once every
    // handle is gone.
    drop(engine);
    drop(audit_handle);

    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

/// Wire the engine to its collaborators.
///
/// Returns `None` when the ticketing system or the gateway is not configured;
/// the API still serves the journal and audit log in that case.
fn build_engine(
    config: &Config,
    store: Arc<dyn ProgressStore>,
    audit: AuditHandle,
) -> Result<Option<Arc<WorkflowEngine>>> {
    let notifier: Arc<dyn Notifier> = match config.notifier.smtp {
        Some(ref smtp) => {
            info!(host = %smtp.host, "Using SMTP notifier");
            Arc::new(SmtpNotifier::new(smtp).context("Failed to create SMTP notifier")?)
        }
        None => {
            warn!("No SMTP relay configured; failure alerts go to the log only");
            Arc::new(LogNotifier::new())
        }
    };

    let (servicenow, gateway) = match (&config.servicenow, &config.gateway) {
        (Some(servicenow), Some(gateway)) => (servicenow.clone(), gateway.clone()),
        (servicenow, gateway) => {
            error!(
                "Workflow engine unavailable (servicenow configured: {}, gateway configured: {})",
                servicenow.is_some(),
                gateway.is_some()
            );
            return Ok(None);
        }
    };

    info!(instance = %servicenow.url, "Initializing ServiceNow client");
    let ticketing = Arc::new(ServiceNowClient::new(servicenow));

    info!(url = %gateway.url, "Initializing release gateway client");
    let services = Collaborators {
        source: ticketing.clone(),
        inspector: Arc::new(TicketAttachmentInspector::new(ticketing.clone())),
        gateway: Arc::new(HttpReleaseGateway::new(gateway)),
        updater: ticketing,
        notifier,
    };

    let engine = WorkflowEngine::new(
        config.engine.clone(),
        JustificationPolicy::new(config.justification_policy.clone()),
        AlertTarget::from(&config.notifier),
        store,
        services,
    )
    .with_audit(audit);

    Ok(Some(Arc::new(engine)))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
