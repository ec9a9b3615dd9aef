// Library module for shared functionality and testing
pub mod access;
pub mod activity;
pub mod agent;
pub mod ai;
pub mod alerting;
pub mod auth;
pub mod billing;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod cursor;
pub mod epic;
pub mod errors;
pub mod events;
pub mod graph;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod namespace;
pub mod observability;
pub mod routes;
pub mod sprint;
pub mod state;
pub mod stream;
pub mod task;
pub mod team;
pub mod transition;

pub use access::AccessGate;
pub use alerting::{Alert, AlertSeverity, AlertingService};
pub use auth::{HttpIdentityProvider, IdentityProvider, IdentityResolver, Principal};
pub use config::Config;
pub use errors::{AppError, AppResult, ErrorResponse};
pub use events::EventLog;
pub use graph::GraphSession;
pub use identity::IdentityStore;
pub use models::*;
pub use observability::{add_correlation_id, init_observability, shutdown_tracing, Metrics};
pub use routes::create_router;
pub use state::AppState;
