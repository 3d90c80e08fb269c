//! Dialogue orchestrator server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dialogue_config::{load_settings, ConfigRegistry, MasterDialogueConfig, Settings};
use dialogue_engine::{ConfidenceBands, OrchestratorDeps, TurnOrchestrator};
use dialogue_nlu::{HttpKnowledgeBase, HttpNluBackend, KeywordNluBackend, NluAdapter, NluBackend};
use dialogue_persistence::{PersistenceLayer, ScyllaConfig};
use dialogue_server::{create_router, init_metrics, AppState, CleanupScheduler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("DIALOGUE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!(
                "Loaded configuration (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing();
    tracing::info!("Starting dialogue orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let _metrics_handle = init_metrics();
    tracing::info!("Initialized Prometheus metrics at /metrics");

    // Domain configuration: intents, slots, handlers, templates
    let registry = match ConfigRegistry::from_dir(&settings.domain_config_dir) {
        Ok(registry) => {
            tracing::info!(
                dir = %settings.domain_config_dir,
                intents = registry.snapshot().active_intents().len(),
                "Loaded domain configuration"
            );
            Arc::new(registry)
        }
        Err(e) => {
            tracing::warn!(
                dir = %settings.domain_config_dir,
                error = %e,
                "Domain config missing, starting with an empty intent set"
            );
            Arc::new(ConfigRegistry::from_config(MasterDialogueConfig::default()))
        }
    };

    // Persistence: ScyllaDB when enabled, in-memory otherwise
    let persistence = if settings.persistence.enabled {
        let scylla = ScyllaConfig {
            hosts: settings.persistence.scylla_hosts.clone(),
            keyspace: settings.persistence.keyspace.clone(),
            replication_factor: settings.persistence.replication_factor,
            connect_timeout_ms: settings.persistence.connect_timeout_ms,
        };
        match dialogue_persistence::init(scylla).await {
            Ok(layer) => {
                tracing::info!(
                    hosts = ?settings.persistence.scylla_hosts,
                    keyspace = %settings.persistence.keyspace,
                    "ScyllaDB persistence initialized"
                );
                layer
            }
            Err(e) => {
                tracing::error!(
                    "Failed to initialize ScyllaDB: {}. Falling back to in-memory.",
                    e
                );
                PersistenceLayer::in_memory()
            }
        }
    } else {
        tracing::info!("Persistence disabled, using in-memory stores");
        PersistenceLayer::in_memory()
    };

    // NLU backend: external classifier, or the keyword fallback when no
    // endpoint is configured
    let backend: Arc<dyn NluBackend> = if settings.nlu.endpoint.is_empty() {
        tracing::warn!("No NLU endpoint configured, using keyword-similarity fallback");
        Arc::new(KeywordNluBackend::new())
    } else {
        Arc::new(HttpNluBackend::new(settings.nlu.endpoint.clone()))
    };
    let nlu = Arc::new(NluAdapter::new(
        backend,
        Duration::from_millis(settings.nlu.timeout_ms),
    ));

    let knowledge_base = if settings.knowledge_base.enabled {
        tracing::info!(endpoint = %settings.knowledge_base.endpoint, "Knowledge-base fallback enabled");
        Some(Arc::new(HttpKnowledgeBase::new(
            settings.knowledge_base.endpoint.clone(),
            Duration::from_millis(settings.knowledge_base.timeout_ms),
        )) as Arc<dyn dialogue_nlu::KnowledgeBase>)
    } else {
        None
    };

    let bands = ConfidenceBands {
        high: settings.orchestrator.confidence_high,
        medium: settings.orchestrator.confidence_medium,
        low: settings.orchestrator.confidence_low,
        reject: settings.orchestrator.confidence_reject,
    };

    let orchestrator = Arc::new(TurnOrchestrator::new(OrchestratorDeps {
        registry: registry.clone(),
        nlu,
        knowledge_base,
        persistence: persistence.clone(),
        settings: settings.orchestrator.clone(),
        handler_settings: settings.handlers.clone(),
        confidence_bands: bands,
    }));

    // Background cleanup
    let scheduler = Arc::new(CleanupScheduler::new(
        persistence.clone(),
        settings.cleanup.clone(),
    ));
    let cleanup_shutdown = scheduler.start();
    tracing::info!(
        interval_hours = settings.cleanup.interval_hours,
        "Cleanup scheduler started"
    );

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let state = AppState::new(settings, registry, orchestrator, persistence, env);
    let router = create_router(state);

    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = cleanup_shutdown.send(true);
    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installs on every supported platform");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installs on unix")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
