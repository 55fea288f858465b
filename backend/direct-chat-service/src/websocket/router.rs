//! Bridges message lifecycle transitions to live connections.
//!
//! Each trigger first applies and persists its transition, collecting the
//! frames it wants to emit. Frames are only sent once the whole trigger has
//! succeeded; on failure the originating connection gets a single `error`
//! frame and nobody else hears anything.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{DeleteRequest, Message, MessageDto, MessageStatus, ReplySummary};
use crate::services::{KeyedMutex, MessageService};
use crate::store::PresenceStore;
use crate::websocket::message_types::{encode_frame, WsInboundEvent, WsOutboundEvent};
use crate::websocket::{ConnectionId, ConnectionRegistry, FrameSender, PresenceChange};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    User(Uuid),
    Connection(ConnectionId),
    EveryoneExcept(Uuid),
}

/// Frames staged by one trigger, emitted in push order.
#[derive(Debug, Default)]
struct Fanout {
    frames: Vec<(Target, WsOutboundEvent)>,
}

impl Fanout {
    fn push(&mut self, target: Target, event: WsOutboundEvent) {
        self.frames.push((target, event));
    }

    fn to_user(&mut self, user_id: Uuid, event: WsOutboundEvent) {
        self.push(Target::User(user_id), event);
    }

    /// Same event to both participants, once when they are the same user.
    fn to_participants(&mut self, a: Uuid, b: Uuid, event: WsOutboundEvent) {
        if a != b {
            self.to_user(b, event.clone());
        }
        self.to_user(a, event);
    }
}

#[derive(Clone)]
pub struct FanoutRouter {
    registry: ConnectionRegistry,
    messages: MessageService,
    presence: Arc<dyn PresenceStore>,
    // Held from registry change through persisted presence to its broadcast.
    presence_locks: KeyedMutex<Uuid>,
}

impl FanoutRouter {
    pub fn new(
        registry: ConnectionRegistry,
        messages: MessageService,
        presence: Arc<dyn PresenceStore>,
    ) -> Self {
        Self {
            registry,
            messages,
            presence,
            presence_locks: KeyedMutex::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register a new connection and announce the user if it just came online.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        sender: FrameSender,
    ) -> AppResult<PresenceChange> {
        let guard = self.presence_locks.lock(user_id).await;
        let change = self.registry.register(connection_id, user_id, sender);
        self.update_gauges();
        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            ?change,
            "connection joined"
        );

        let presence = self.presence_on_join(connection_id, user_id, change).await;
        let settled = self.settle(connection_id, presence);
        drop(guard);
        settled?;

        if self.messages.policy().deliver_backlog_on_join {
            let backlog = self.deliver_backlog(user_id).await;
            self.settle(connection_id, backlog)?;
        }

        Ok(change)
    }

    async fn presence_on_join(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        change: PresenceChange,
    ) -> AppResult<Fanout> {
        let mut fanout = Fanout::default();
        if change == PresenceChange::BecameOnline {
            self.presence.set_presence(user_id, true, None).await?;
            fanout.push(
                Target::EveryoneExcept(user_id),
                WsOutboundEvent::PresenceOnline { user_id },
            );
        }

        let online_user_ids = self
            .registry
            .online_users()
            .into_iter()
            .filter(|id| *id != user_id)
            .collect();
        fanout.push(
            Target::Connection(connection_id),
            WsOutboundEvent::PresenceSnapshot { online_user_ids },
        );
        Ok(fanout)
    }

    async fn deliver_backlog(&self, user_id: Uuid) -> AppResult<Fanout> {
        let mut fanout = Fanout::default();
        for pending in self.messages.pending_for(user_id).await? {
            if let Some(delivered) = self.messages.mark_delivered(pending.id).await? {
                fanout.to_user(delivered.sender_id, status_event(&delivered));
            }
        }
        Ok(fanout)
    }

    /// Remove a connection and announce the user if it was the last one.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<(Uuid, PresenceChange)> {
        let owner = self.registry.user_for(connection_id)?;
        let _guard = self.presence_locks.lock(owner).await;
        let (user_id, change) = self.registry.unregister(connection_id)?;
        self.update_gauges();
        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            ?change,
            "connection left"
        );

        if let PresenceChange::BecameOffline { last_seen } = change {
            match self.presence.set_presence(user_id, false, Some(last_seen)).await {
                Ok(()) => {
                    let mut fanout = Fanout::default();
                    fanout.push(
                        Target::EveryoneExcept(user_id),
                        WsOutboundEvent::PresenceOffline { user_id, last_seen },
                    );
                    self.flush(fanout);
                }
                Err(e) => {
                    // The originating connection is gone; there is nobody to tell.
                    metrics::record_error(e.code());
                    tracing::error!(user_id = %user_id, error = %e, "failed to persist offline presence");
                }
            }
        }
        Some((user_id, change))
    }

    /// Parse and dispatch one raw text frame.
    pub async fn dispatch_text(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        text: &str,
    ) -> AppResult<()> {
        match WsInboundEvent::parse(text) {
            Ok(event) => self.dispatch(connection_id, user_id, event).await,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "rejected inbound frame");
                self.report_error(connection_id, &e);
                Err(e)
            }
        }
    }

    /// Apply one inbound event for `user_id` and fan out the result.
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        event: WsInboundEvent,
    ) -> AppResult<()> {
        metrics::record_inbound(event.event_name());

        let outcome = match event {
            WsInboundEvent::Send {
                receiver_id,
                body,
                reply_to,
                client_message_id,
            } => {
                self.handle_send(user_id, receiver_id, body, reply_to, client_message_id)
                    .await
            }
            WsInboundEvent::Delivered { message_ids } => {
                self.handle_delivered(user_id, &message_ids).await
            }
            WsInboundEvent::Seen { message_ids } => self.handle_seen(user_id, &message_ids).await,
            WsInboundEvent::Typing {
                receiver_id,
                is_typing,
            } => Ok(self.handle_typing(user_id, receiver_id, is_typing)),
            WsInboundEvent::Edit { message_id, body } => {
                self.handle_edit(user_id, message_id, body).await
            }
            WsInboundEvent::Delete { message_id, scope } => {
                self.handle_delete(user_id, message_id, scope).await
            }
        };

        self.settle(connection_id, outcome)
    }

    async fn handle_send(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        body: String,
        reply_to: Option<Uuid>,
        client_message_id: Option<String>,
    ) -> AppResult<Fanout> {
        let message = self
            .messages
            .create_message(sender_id, receiver_id, body, reply_to)
            .await?;

        let reply_target = match message.reply_to {
            Some(id) => self.messages.get_message(id).await?,
            None => None,
        };
        let project = |viewer_id: Uuid| {
            let reply = reply_target
                .as_ref()
                .and_then(|target| ReplySummary::visible_to(target, viewer_id));
            MessageDto::from_message(&message, reply)
        };

        let mut fanout = Fanout::default();
        // A note to self only gets the confirmation.
        if receiver_id != sender_id {
            fanout.to_user(
                receiver_id,
                WsOutboundEvent::MessageNew {
                    message: project(receiver_id),
                },
            );
        }
        fanout.to_user(
            sender_id,
            WsOutboundEvent::MessageSent {
                message: project(sender_id),
                client_message_id,
            },
        );

        if self.registry.is_online(receiver_id) {
            if let Some(delivered) = self.messages.mark_delivered(message.id).await? {
                fanout.to_user(sender_id, status_event(&delivered));
            }
        }
        Ok(fanout)
    }

    async fn handle_delivered(&self, receiver_id: Uuid, message_ids: &[Uuid]) -> AppResult<Fanout> {
        let changed = self
            .messages
            .mark_delivered_for(message_ids, receiver_id)
            .await?;
        let mut fanout = Fanout::default();
        for message in &changed {
            fanout.to_user(message.sender_id, status_event(message));
        }
        Ok(fanout)
    }

    async fn handle_seen(&self, viewer_id: Uuid, message_ids: &[Uuid]) -> AppResult<Fanout> {
        let outcome = self.messages.mark_seen(message_ids, viewer_id).await?;
        let mut fanout = Fanout::default();
        for message in &outcome.changed {
            fanout.to_user(message.sender_id, status_event(message));
        }
        tracing::debug!(
            viewer_id = %viewer_id,
            changed = outcome.changed.len(),
            senders = outcome.senders.len(),
            "messages marked seen"
        );
        Ok(fanout)
    }

    fn handle_typing(&self, user_id: Uuid, receiver_id: Uuid, is_typing: bool) -> Fanout {
        let mut fanout = Fanout::default();
        fanout.to_user(
            receiver_id,
            WsOutboundEvent::Typing { user_id, is_typing },
        );
        fanout
    }

    async fn handle_edit(&self, requester_id: Uuid, message_id: Uuid, body: String) -> AppResult<Fanout> {
        let message = self
            .messages
            .edit_message(message_id, body, requester_id)
            .await?;
        let mut fanout = Fanout::default();
        fanout.to_participants(
            message.sender_id,
            message.receiver_id,
            WsOutboundEvent::MessageEdited {
                message_id: message.id,
                conversation_key: message.conversation_key.clone(),
                new_body: message.body.clone(),
                is_edited: message.is_edited,
                edited_at: message.edited_at,
            },
        );
        Ok(fanout)
    }

    async fn handle_delete(
        &self,
        requester_id: Uuid,
        message_id: Uuid,
        request: DeleteRequest,
    ) -> AppResult<Fanout> {
        let message = self
            .messages
            .delete_message(message_id, requester_id, request)
            .await?;
        let event = WsOutboundEvent::MessageDeleted {
            message_id: message.id,
            conversation_key: message.conversation_key.clone(),
            scope: message.delete_scope,
        };

        let mut fanout = Fanout::default();
        match request {
            DeleteRequest::ForSenderOnly => fanout.to_user(requester_id, event),
            DeleteRequest::ForBoth => {
                fanout.to_participants(message.sender_id, message.receiver_id, event)
            }
        }
        Ok(fanout)
    }

    /// Flush a successful trigger, or report its failure to the originator only.
    fn settle(&self, connection_id: ConnectionId, outcome: AppResult<Fanout>) -> AppResult<()> {
        match outcome {
            Ok(fanout) => {
                self.flush(fanout);
                Ok(())
            }
            Err(e) => {
                self.report_error(connection_id, &e);
                Err(e)
            }
        }
    }

    fn flush(&self, fanout: Fanout) {
        for (target, event) in fanout.frames {
            let Some(frame) = encode_counted(event.event_name(), &event) else {
                continue;
            };
            let reached = match target {
                Target::User(user_id) => self.registry.send_to_user(user_id, &frame),
                Target::Connection(connection_id) => {
                    usize::from(self.registry.send_to_connection(connection_id, &frame))
                }
                Target::EveryoneExcept(user_id) => self.registry.broadcast_except(user_id, &frame),
            };
            metrics::record_outbound(event.event_name(), reached);
        }
    }

    fn report_error(&self, connection_id: ConnectionId, err: &AppError) {
        metrics::record_error(err.code());
        if err.is_retryable() {
            tracing::error!(connection_id = %connection_id, code = err.code(), error = %err, "trigger failed");
        } else {
            tracing::warn!(connection_id = %connection_id, code = err.code(), error = %err, "trigger rejected");
        }

        if let Ok(frame) = WsOutboundEvent::from_error(err).to_frame() {
            if self.registry.send_to_connection(connection_id, &frame) {
                metrics::record_outbound("error", 1);
            }
        }
    }

    fn update_gauges(&self) {
        metrics::set_connection_gauges(
            self.registry.connection_count(),
            self.registry.online_users().len(),
        );
    }
}

/// Encode a frame, counting a failure the same way a failed trigger is counted.
fn encode_counted<T: Serialize + ?Sized>(event: &str, value: &T) -> Option<String> {
    match encode_frame(event, value) {
        Ok(frame) => Some(frame),
        Err(e) => {
            metrics::record_error(e.code());
            None
        }
    }
}

fn status_event(message: &Message) -> WsOutboundEvent {
    debug_assert!(message.status > MessageStatus::Sent);
    WsOutboundEvent::StatusChanged {
        message_id: message.id,
        conversation_key: message.conversation_key.clone(),
        status: message.status,
    }
}
