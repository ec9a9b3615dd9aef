use anyhow::Result;
use std::sync::Arc;
use tracing::{info, instrument};

use ginko_api::access::AccessGate;
use ginko_api::activity::ActivityService;
use ginko_api::agent::AgentRegistry;
use ginko_api::ai::EpicDecomposer;
use ginko_api::alerting::AlertingService;
use ginko_api::billing::{StripeSeatSync, WebhookHandler};
use ginko_api::checkpoint::CheckpointStore;
use ginko_api::config::Config;
use ginko_api::context::ContextService;
use ginko_api::cursor::CursorStore;
use ginko_api::epic::EpicService;
use ginko_api::events::EventLog;
use ginko_api::graph::GraphSession;
use ginko_api::identity::IdentityStore;
use ginko_api::namespace::NamespaceService;
use ginko_api::observability::init_observability;
use ginko_api::routes::create_router;
use ginko_api::sprint::SprintService;
use ginko_api::state::AppState;
use ginko_api::stream::EventStream;
use ginko_api::task::TaskService;
use ginko_api::team::{NoopSeatSync, SeatSyncNotifier, TeamService};
use ginko_api::{HttpIdentityProvider, IdentityResolver};

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    info!("Initializing observability...");
    let metrics = init_observability(&config).await?;

    let alerting = Arc::new(AlertingService::new(config.observability.clone()));

    info!("Starting Ginko graph-authoritative API");
    info!("Configuration loaded successfully");

    info!("Connecting to graph store...");
    let graph_session = GraphSession::connect(&config.graph).await?;
    graph_session.ensure_schema().await?;
    info!("Graph store connection established and schema ensured");

    info!("Connecting to identity store...");
    let identity = IdentityStore::connect(&config.identity.database_url, config.identity.max_connections).await?;
    identity.migrate().await?;
    info!("Identity store connection established and migrations completed");

    let provider_url = config
        .identity
        .provider_url
        .clone()
        .unwrap_or_else(|| "http://localhost:9999".to_string());
    let identity_provider = Arc::new(HttpIdentityProvider::new(
        provider_url,
        config.identity.service_role_key.clone(),
    ));
    let identity_resolver = IdentityResolver::new(identity_provider);

    let namespaces = NamespaceService::new(graph_session.clone());
    let access = AccessGate::new(namespaces.clone(), identity.clone());
    let events = EventLog::new(graph_session.clone());
    let cursors = CursorStore::new(graph_session.clone(), events.clone());
    let context = ContextService::new(graph_session.clone());
    let stream = EventStream::new(events.clone());
    let epics = EpicService::new(graph_session.clone(), events.clone());
    let sprints = SprintService::new(graph_session.clone(), events.clone());
    let activity = ActivityService::new(graph_session.clone());
    let tasks = TaskService::new(graph_session.clone(), events.clone(), activity.clone());
    let agents = AgentRegistry::new(graph_session.clone());
    let checkpoints = CheckpointStore::new(graph_session.clone());

    let seat_sync: Arc<dyn SeatSyncNotifier> = match &config.billing.stripe_secret_key {
        Some(secret_key) => Arc::new(StripeSeatSync::new(identity.clone(), Some(secret_key.clone()))),
        None => Arc::new(NoopSeatSync),
    };
    let teams = TeamService::new(identity.clone(), seat_sync);
    let billing = WebhookHandler::new(identity.clone(), config.billing.clone());
    let ai = EpicDecomposer::new(config.ai.anthropic_api_key.clone());

    let app_state = AppState {
        namespaces,
        access,
        events,
        cursors,
        context,
        stream,
        epics,
        sprints,
        tasks,
        activity,
        agents,
        checkpoints,
        teams,
        identity,
        billing,
        ai,
        config: Arc::new(config.clone()),
        metrics,
        alerting,
    };

    let app = create_router(app_state, identity_resolver);

    let listener =
        tokio::net::TcpListener::bind(&format!("{}:{}", config.server.host, config.server.port))
            .await?;
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    info!("Ginko API server started successfully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
