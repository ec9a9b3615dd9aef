use std::sync::Arc;

use crate::access::AccessGate;
use crate::activity::ActivityService;
use crate::agent::AgentRegistry;
use crate::ai::EpicDecomposer;
use crate::alerting::AlertingService;
use crate::billing::WebhookHandler;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::context::ContextService;
use crate::cursor::CursorStore;
use crate::epic::EpicService;
use crate::events::EventLog;
use crate::identity::IdentityStore;
use crate::namespace::NamespaceService;
use crate::observability::Metrics;
use crate::sprint::SprintService;
use crate::stream::EventStream;
use crate::task::TaskService;
use crate::team::TeamService;

/// Everything a handler needs, grouped the way the teacher's own `AppState`
/// (`api.rs`) bundles its database/event/auth services plus metrics and
/// alerting. Each field is its own thin service over either the graph
/// session or the identity pool, so cloning `AppState` is cheap — every
/// field is itself a cheap handle (an `Arc`-backed driver, a pool, or a
/// plain struct of the two).
#[derive(Clone)]
pub struct AppState {
    pub namespaces: NamespaceService,
    pub access: AccessGate,
    pub events: EventLog,
    pub cursors: CursorStore,
    pub context: ContextService,
    pub stream: EventStream,
    pub epics: EpicService,
    pub sprints: SprintService,
    pub tasks: TaskService,
    pub activity: ActivityService,
    pub agents: AgentRegistry,
    pub checkpoints: CheckpointStore,
    pub teams: TeamService,
    pub identity: IdentityStore,
    pub billing: WebhookHandler,
    pub ai: EpicDecomposer,
    pub config: Arc<Config>,
    pub metrics: Metrics,
    pub alerting: Arc<AlertingService>,
}
