use crate::config::HistoryConfig;
use crate::error::AppResult;
use crate::models::{ConversationKey, Message, MessageDto, ReplySummary};
use crate::store::MessageStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One message of a reconstructed history, with its reply target resolved
/// for the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub message: Message,
    pub reply: Option<ReplySummary>,
}

impl HistoryEntry {
    pub fn to_dto(&self) -> MessageDto {
        MessageDto::from_message(&self.message, self.reply.clone())
    }
}

impl Serialize for HistoryEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_dto().serialize(serializer)
    }
}

/// Rebuilds a conversation as one participant is allowed to see it.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn MessageStore>,
    config: HistoryConfig,
}

impl HistoryService {
    pub fn new(store: Arc<dyn MessageStore>, config: HistoryConfig) -> Self {
        Self { store, config }
    }

    /// Clamp a requested page size into `1..=max_limit`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1))
    }

    /// The newest `limit` messages between `viewer_id` and `other_id` that the
    /// viewer can see, oldest first.
    pub async fn load_history(
        &self,
        viewer_id: Uuid,
        other_id: Uuid,
        limit: Option<usize>,
    ) -> AppResult<Vec<HistoryEntry>> {
        let key = ConversationKey::for_pair(viewer_id, other_id);
        let limit = self.effective_limit(limit);

        let mut page = self.store.list_visible(&key, viewer_id, limit).await?;
        page.reverse();

        let mut references: HashMap<Uuid, Option<ReplySummary>> = page
            .iter()
            .map(|m| (m.id, ReplySummary::visible_to(m, viewer_id)))
            .collect();

        // Reply targets outside the page still need a lookup.
        for reply_id in page.iter().filter_map(|m| m.reply_to) {
            if references.contains_key(&reply_id) {
                continue;
            }
            let summary = self
                .store
                .get_message(reply_id)
                .await?
                .filter(|target| target.conversation_key == key)
                .and_then(|target| ReplySummary::visible_to(&target, viewer_id));
            references.insert(reply_id, summary);
        }

        let entries = page
            .into_iter()
            .map(|message| {
                let reply = message
                    .reply_to
                    .and_then(|id| references.get(&id).cloned().flatten());
                HistoryEntry { message, reply }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            conversation_key = %key,
            viewer_id = %viewer_id,
            count = entries.len(),
            "history loaded"
        );
        Ok(entries)
    }
}
