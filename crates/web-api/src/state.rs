use std::sync::Arc;

use application::ConnectionLifecycleManager;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ConnectionLifecycleManager>,
}

impl AppState {
    pub fn new(lifecycle: Arc<ConnectionLifecycleManager>) -> Self {
        Self { lifecycle }
    }
}
