use std::sync::Arc;
use std::time::Duration;

use scout_core::traits::ProductSearch;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub searcher: Arc<dyn ProductSearch>,
    /// Bearer token protecting `/v1/*` (None = open access).
    pub api_key: Option<String>,
    /// Upper bound for a request's deadline; also the default when the caller sends none.
    pub max_deadline: Duration,
}
