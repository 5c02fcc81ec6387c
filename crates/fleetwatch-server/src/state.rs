use fleetwatch_core::Orchestrator;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Bearer token protecting `/reset` and `/refresh` (None = open).
    pub admin_token: Option<String>,
}
