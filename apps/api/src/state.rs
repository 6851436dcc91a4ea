use std::sync::Arc;

use crate::config::Config;
use crate::session::registry::SessionRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Open editing sessions. Each owns its document, autosave and realtime channel.
    pub sessions: Arc<SessionRegistry>,
}
