use crate::{
    config::Config,
    services::{Clock, ConversationService, HistoryService, MessageService},
    store::Stores,
    websocket::{router::FanoutRouter, ConnectionRegistry},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub registry: ConnectionRegistry,
    pub router: FanoutRouter,
    pub messages: MessageService,
    pub conversations: ConversationService,
    pub history: HistoryService,
}

impl AppState {
    /// Wire services, registry and router over one set of stores.
    pub fn new(config: Arc<Config>, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let conversations = ConversationService::new(stores.conversations.clone());
        let messages = MessageService::new(
            stores.messages.clone(),
            conversations.clone(),
            clock.clone(),
            config.policy,
            config.max_body_len,
        );
        let history = HistoryService::new(stores.messages.clone(), config.history.clone());
        let registry = ConnectionRegistry::new(clock);
        let router = FanoutRouter::new(
            registry.clone(),
            messages.clone(),
            stores.presence.clone(),
        );

        Self {
            config,
            stores,
            registry,
            router,
            messages,
            conversations,
            history,
        }
    }
}
