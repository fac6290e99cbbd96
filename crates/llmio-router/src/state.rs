use std::sync::Arc;

use llmio_core::{AuthService, Dispatcher};
use llmio_storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub auth: Arc<AuthService>,
    pub storage: Arc<dyn Storage>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        auth: Arc<AuthService>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            dispatcher,
            auth,
            storage,
        }
    }
}
