pub mod clock;
pub mod conversation_service;
pub mod history_service;
pub mod keyed_lock;
pub mod message_service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation_service::ConversationService;
pub use history_service::{HistoryEntry, HistoryService};
pub use keyed_lock::KeyedMutex;
pub use message_service::{MessageService, SeenOutcome};
