use std::sync::Arc;

use crate::adapters::in_memory::in_memory_outbox_store::InMemoryOutboxStore;
use crate::application::command_handlers::enqueue_handler::EnqueueHandler;

#[derive(Clone)]
pub struct AppState {
    pub enqueue_handler: Arc<EnqueueHandler<InMemoryOutboxStore>>,
    pub store: Arc<InMemoryOutboxStore>,
}

impl AppState {
    pub fn new(store: Arc<InMemoryOutboxStore>) -> Self {
        Self {
            enqueue_handler: Arc::new(EnqueueHandler::new(store.clone())),
            store,
        }
    }
}
