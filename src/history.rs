use crate::error::StorageError;
use crate::models::{ChatHistory, Message};
use crate::storage::StorageManager;

const STORAGE_KEY: &str = "chat_history";

/// Owns the conversation history and writes it back after every change.
#[derive(Debug)]
pub struct HistoryManager {
    storage: StorageManager,
    history: ChatHistory,
}

impl HistoryManager {
    /// Loads any previously stored history, starting empty when there is none.
    pub async fn new(storage: StorageManager) -> Self {
        let history = storage
            .load::<ChatHistory>(STORAGE_KEY)
            .await
            .unwrap_or_default();
        log::info!("Loaded {} messages from history", history.messages.len());
        Self { storage, history }
    }

    /// Appends `message` and persists the whole history.
    ///
    /// The in-memory history has already grown when the persist step fails,
    /// so an error means "recorded for this session, durability unknown".
    pub async fn add_message(&mut self, message: Message) -> Result<(), StorageError> {
        log::debug!("Adding {} message to history", message.role);
        self.history.messages.push(message);
        self.save_history().await
    }

    /// An independent snapshot of every message, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.history.messages.clone()
    }

    /// The last `min(count, len)` messages in their original order.
    pub fn last_messages(&self, count: usize) -> Vec<Message> {
        let messages = &self.history.messages;
        messages[messages.len().saturating_sub(count)..].to_vec()
    }

    pub async fn clear_history(&mut self) -> Result<(), StorageError> {
        log::info!("Clearing chat history ({} messages)", self.history.messages.len());
        self.history = ChatHistory::default();
        self.save_history().await
    }

    pub fn len(&self) -> usize {
        self.history.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.messages.is_empty()
    }

    async fn save_history(&self) -> Result<(), StorageError> {
        self.storage.save(STORAGE_KEY, &self.history).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn manager() -> (StorageManager, HistoryManager) {
        let storage = StorageManager::in_memory().await.unwrap();
        let manager = HistoryManager::new(storage.clone()).await;
        (storage, manager)
    }

    fn numbered(count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn starts_empty_without_stored_history() {
        let (_, manager) = manager().await;
        assert!(manager.is_empty());
        assert_eq!(manager.history(), Vec::<Message>::new());
    }

    #[tokio::test]
    async fn messages_come_back_in_call_order() {
        let (_, mut manager) = manager().await;
        let messages = numbered(5);
        for message in messages.clone() {
            manager.add_message(message).await.unwrap();
        }
        assert_eq!(manager.history(), messages);
        assert_eq!(manager.len(), 5);
    }

    #[tokio::test]
    async fn returned_history_is_a_copy() {
        let (_, mut manager) = manager().await;
        manager.add_message(Message::user("Hello")).await.unwrap();

        let mut snapshot = manager.history();
        snapshot.push(Message::assistant("injected"));
        snapshot[0] = Message::user("changed");

        assert_eq!(manager.history(), vec![Message::user("Hello")]);
    }

    #[tokio::test]
    async fn last_messages_returns_tail_in_order() {
        let (_, mut manager) = manager().await;
        let messages = numbered(15);
        for message in messages.clone() {
            manager.add_message(message).await.unwrap();
        }

        assert_eq!(manager.last_messages(10), messages[5..].to_vec());
        assert_eq!(manager.last_messages(1), messages[14..].to_vec());
        assert_eq!(manager.last_messages(0), Vec::<Message>::new());
        assert_eq!(manager.last_messages(100), messages);
    }

    #[tokio::test]
    async fn last_messages_on_empty_history_is_empty() {
        let (_, manager) = manager().await;
        for n in [0, 1, 10] {
            assert_eq!(manager.last_messages(n), Vec::<Message>::new());
        }
    }

    #[tokio::test]
    async fn clear_empties_memory_and_storage() {
        let (storage, mut manager) = manager().await;
        for message in numbered(3) {
            manager.add_message(message).await.unwrap();
        }
        manager.clear_history().await.unwrap();
        assert!(manager.history().is_empty());

        let reloaded = HistoryManager::new(storage).await;
        assert!(reloaded.is_empty());
    }

    #[tokio::test]
    async fn new_manager_reproduces_stored_history() {
        let (storage, mut first) = manager().await;
        let messages = numbered(4);
        for message in messages.clone() {
            first.add_message(message).await.unwrap();
        }

        let second = HistoryManager::new(storage).await;
        assert_eq!(second.history(), messages);
    }

    #[tokio::test]
    async fn persisted_record_has_messages_envelope() {
        let (storage, mut manager) = manager().await;
        manager.add_message(Message::user("Hello")).await.unwrap();

        let raw: serde_json::Value = storage.load(STORAGE_KEY).await.unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"messages": [{"role": "user", "content": "Hello"}]})
        );
    }

    #[tokio::test]
    async fn failed_persist_still_records_in_memory() {
        let (storage, mut manager) = manager().await;
        manager.add_message(Message::user("kept")).await.unwrap();
        storage.pool().close().await;

        let err = manager.add_message(Message::user("unsaved")).await.unwrap_err();
        assert!(matches!(err, StorageError::Medium(_)));
        assert_eq!(
            manager.history(),
            vec![Message::user("kept"), Message::user("unsaved")]
        );

        assert!(manager.clear_history().await.is_err());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_starts_empty() {
        let storage = StorageManager::in_memory().await.unwrap();
        storage.save(STORAGE_KEY, "not a history").await.unwrap();

        let manager = HistoryManager::new(storage).await;
        assert!(manager.is_empty());
    }
}
