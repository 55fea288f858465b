use crate::config::WsConfig;
use crate::state::AppState;
use crate::websocket::router::FanoutRouter;
use crate::websocket::ConnectionId;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: Uuid,
}

// WebSocket Actor
struct WsSession {
    connection_id: ConnectionId,
    user_id: Uuid,
    router: FanoutRouter,
    ws: WsConfig,
    hb: Instant,
    // Inbound text frames, drained in order by this connection's task
    ingress: Option<UnboundedSender<String>>,
    closed: Option<oneshot::Sender<()>>,
}

impl WsSession {
    fn new(user_id: Uuid, router: FanoutRouter, ws: WsConfig) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            user_id,
            router,
            ws,
            hb: Instant::now(),
            ingress: None,
            closed: None,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = Duration::from_secs(self.ws.heartbeat_secs);
        let timeout = Duration::from_secs(self.ws.client_timeout_secs);
        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(
                    connection_id = %act.connection_id,
                    user_id = %act.user_id,
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "WebSocket session started"
        );

        self.hb(ctx);

        // Frames fanned out to this connection reach the socket through this stream.
        let (frame_tx, frame_rx) = unbounded_channel::<String>();
        ctx.add_stream(UnboundedReceiverStream::new(frame_rx));

        // Join, every inbound frame, then disconnect all run on one task, so a
        // connection's triggers are applied strictly in arrival order.
        let (ingress_tx, mut ingress_rx) = unbounded_channel::<String>();
        let (closed_tx, mut closed_rx) = oneshot::channel::<()>();
        self.ingress = Some(ingress_tx);
        self.closed = Some(closed_tx);

        let router = self.router.clone();
        let connection_id = self.connection_id;
        let user_id = self.user_id;
        actix::spawn(async move {
            if let Err(e) = router.join(connection_id, user_id, frame_tx).await {
                tracing::warn!(connection_id = %connection_id, error = %e, "join fanout failed");
            }
            loop {
                // Once the socket is gone, frames still queued are dropped; the
                // one being dispatched runs to completion.
                let text = tokio::select! {
                    biased;
                    _ = &mut closed_rx => break,
                    text = ingress_rx.recv() => match text {
                        Some(text) => text,
                        None => break,
                    },
                };
                // Errors were already reported to this connection by the router.
                let _ = router.dispatch_text(connection_id, user_id, &text).await;
            }
            router.disconnect(connection_id).await;
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "WebSocket session stopped"
        );
        // Wakes the connection task so it unregisters without draining the queue.
        self.ingress.take();
        if let Some(closed) = self.closed.take() {
            let _ = closed.send(());
        }
    }
}

// Outbound frames from the registry
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // The registry dropped our sender: the connection was unregistered.
        ctx.stop();
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                let queued = self
                    .ingress
                    .as_ref()
                    .map(|tx| tx.send(text.to_string()).is_ok())
                    .unwrap_or(false);
                if !queued {
                    tracing::warn!(connection_id = %self.connection_id, "ingress queue closed");
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(connection_id = %self.connection_id, "Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.connection_id, ?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

// HTTP handler
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let params = query.into_inner();
    let session = WsSession::new(
        params.user_id,
        state.router.clone(),
        state.config.ws.clone(),
    );
    ws::start(session, &req, stream)
}
