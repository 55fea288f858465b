use chrono::{Duration, TimeZone, Utc};
use direct_chat_service::config::{Config, LifecyclePolicy};
use direct_chat_service::services::ManualClock;
use direct_chat_service::state::AppState;
use direct_chat_service::store::{MemoryStore, Stores};
use direct_chat_service::websocket::message_types::WsInboundEvent;
use direct_chat_service::websocket::ConnectionId;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub state: AppState,
}

/// One live WebSocket connection, minus the socket.
pub struct Client {
    pub user_id: Uuid,
    pub connection_id: ConnectionId,
    rx: UnboundedReceiver<String>,
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(LifecyclePolicy::default())
}

#[allow(dead_code)]
pub fn harness_with(policy: LifecyclePolicy) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));
    let mut config = Config::for_memory();
    config.policy = policy;
    let state = AppState::new(Arc::new(config), Stores::shared(store.clone()), clock.clone());
    Harness {
        store,
        clock,
        state,
    }
}

impl Harness {
    pub async fn connect(&self, user_id: Uuid) -> Client {
        let (tx, rx) = unbounded_channel();
        let connection_id = ConnectionId::new();
        self.state
            .router
            .join(connection_id, user_id, tx)
            .await
            .expect("join failed");
        Client {
            user_id,
            connection_id,
            rx,
        }
    }

    #[allow(dead_code)]
    pub async fn dispatch(&self, client: &Client, event: WsInboundEvent) -> Result<(), String> {
        self.state
            .router
            .dispatch(client.connection_id, client.user_id, event)
            .await
            .map_err(|e| e.code().to_string())
    }

    /// Send a message one second after the previous one; returns its id.
    #[allow(dead_code)]
    pub async fn send(&self, from: &Client, to: Uuid, body: &str) -> Uuid {
        self.clock.advance(Duration::seconds(1));
        let before = self.store.message_count();
        self.dispatch(
            from,
            WsInboundEvent::Send {
                receiver_id: to,
                body: body.to_string(),
                reply_to: None,
                client_message_id: None,
            },
        )
        .await
        .expect("send failed");
        assert_eq!(self.store.message_count(), before + 1);

        let history = self
            .state
            .history
            .load_history(from.user_id, to, None)
            .await
            .expect("history");
        history.last().expect("sent message in history").message.id
    }
}

#[allow(dead_code)]
impl Client {
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&text).expect("frame is JSON"));
        }
        frames
    }

    pub fn drain_types(&mut self) -> Vec<String> {
        self.drain()
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}
