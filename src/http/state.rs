use crate::config::Config;
use crate::session::{InterviewSession, SessionServices};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Active interview sessions (session_id → session)
    pub sessions: Arc<RwLock<HashMap<String, Arc<InterviewSession>>>>,
    pub config: Arc<Config>,
    pub services: SessionServices,
}

impl AppState {
    pub fn new(config: Arc<Config>, services: SessionServices) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            services,
        }
    }
}
