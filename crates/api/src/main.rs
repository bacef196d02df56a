use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promokit_api::config::ServerConfig;
use promokit_api::router::build_app_router;
use promokit_api::state::AppState;
use promokit_core::registry::{ModelRegistry, RegistrySettings};
use promokit_engine::caption::CaptionClient;
use promokit_engine::loader::DefaultFactory;
use promokit_engine::manager::BackendManager;
use promokit_engine::remote::RemoteWorkflowService;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promokit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Model registry ---
    let registry = Arc::new(ModelRegistry::load_or_fallback(&config.models_file));
    let issues = registry.validate();
    if issues.is_empty() {
        tracing::info!(models = registry.names().count(), "Model registry loaded");
    } else {
        for issue in &issues {
            tracing::warn!(
                model = issue.model.as_deref().unwrap_or("<runtime>"),
                problem = %issue.message,
                "Model registry issue",
            );
        }
    }
    let settings = RegistrySettings::resolve(registry.runtime());
    tracing::info!(
        primary = settings.primary_model(),
        fallback_enabled = settings.fallback_enabled(),
        "Backend selection resolved",
    );

    // --- Services ---
    let workflows = Arc::new(RemoteWorkflowService::new(
        config.graph_server_url.clone(),
        config.poll_config(),
    ));
    let factory = Arc::new(DefaultFactory::new(Arc::clone(&workflows)));
    let manager = Arc::new(BackendManager::new(
        Arc::clone(&registry),
        settings,
        factory,
    ));
    let captions = Arc::new(CaptionClient::new(
        config.caption_api_url.clone(),
        config.caption_api_key.clone(),
        config.caption_model.clone(),
        config.caption_max_tokens,
    ));

    // --- Warm load ---
    // Best-effort: a failed warm load is logged and the first generation
    // request retries the chain.
    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            match manager.load_with_fallback().await {
                Ok(name) => tracing::info!(model = %name, "Warm load complete"),
                Err(e) => tracing::warn!(error = %e, "Warm load failed"),
            }
        });
    }

    // --- App state / router ---
    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        manager: Arc::clone(&manager),
        workflows,
        captions,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    manager.unload().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
