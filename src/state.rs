//! Application state shared by every HTTP handler.

use std::sync::Arc;

use crate::config::Config;
use crate::remote::RemoteDataSource;
use crate::session::SessionManager;

/// Application state passed to all handlers
pub struct AppState<R> {
    pub manager: Arc<SessionManager<R>>,
    pub config: Arc<Config>,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            config: Arc::clone(&self.config),
        }
    }
}

impl<R: RemoteDataSource> AppState<R> {
    pub fn new(manager: Arc<SessionManager<R>>, config: Arc<Config>) -> Self {
        Self { manager, config }
    }
}
