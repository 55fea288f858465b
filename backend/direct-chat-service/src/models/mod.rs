pub mod conversation;
pub mod message;
pub mod presence;

pub use conversation::{Conversation, ConversationKey, ConversationUpsert};
pub use message::{
    DeleteRequest, DeleteScope, Message, MessageDto, MessageStatus, NewMessage, ReplySummary,
};
pub use presence::UserPresence;
