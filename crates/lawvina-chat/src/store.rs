use std::collections::HashMap;

use crate::error::{ChatError, ChatErrorCode};
use crate::storage::{KeyValueStorage, MemoryStorage, StorageError};
use crate::types::{Conversation, Message, Role};

pub const CONVERSATIONS_STORAGE_KEY: &str = "lawvina-conversations";
pub const GREETING: &str = "Xin chào! Tôi là trợ lý pháp luật AI của LawVina. Tôi có thể giúp bạn tra cứu và phân tích các quy định pháp luật Việt Nam.";
pub const DEFAULT_TITLE: &str = "Cuộc trò chuyện mới";
pub const TITLE_MAX_CHARS: usize = 50;
pub const HISTORY_LIMIT: usize = 6;

const PERSISTENCE_ADVISORY: &str =
    "Không thể lưu lịch sử hội thoại; các thay đổi chỉ được giữ trong phiên này.";

/// What a stream needs to know about the exchange it is writing into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeTicket {
    pub conversation_id: String,
    pub message: String,
    pub history: Vec<Message>,
    pub barrier: BarrierToken,
    reply_index: usize,
}

/// Proof of holding a conversation's write barrier. Only the holder of the
/// current token can release it, so a late release from a finished exchange
/// cannot free the barrier of the exchange that followed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierToken(u64);

/// Ordered conversations with a single active pointer, mirrored into a
/// key-value storage after every change.
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active_id: Option<String>,
    storage: Box<dyn KeyValueStorage>,
    streaming: HashMap<String, BarrierToken>,
    next_barrier: u64,
    persistence_error: Option<ChatError>,
    advisory: Option<String>,
    next_seq: u64,
}

impl ConversationStore {
    pub fn load(storage: Box<dyn KeyValueStorage>) -> Self {
        let mut store = Self {
            conversations: Vec::new(),
            active_id: None,
            storage,
            streaming: HashMap::new(),
            next_barrier: 1,
            persistence_error: None,
            advisory: None,
            next_seq: 1,
        };

        match store.read_persisted() {
            Ok(conversations) => store.conversations = conversations,
            Err(error) => store.degrade(error),
        }
        tracing::info!(
            conversations = store.conversations.len(),
            "conversation store loaded"
        );

        store.active_id = store
            .conversations
            .first()
            .map(|conversation| conversation.id.clone());
        if store.conversations.is_empty() {
            store.create_conversation();
        }
        store
    }

    pub fn in_memory() -> Self {
        Self::load(Box::new(MemoryStorage::new()))
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == id)
    }

    pub fn is_streaming(&self, id: &str) -> bool {
        self.streaming.contains_key(id)
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence_error.is_none()
    }

    /// The failure that switched the store to in-memory operation.
    pub fn persistence_error(&self) -> Option<&ChatError> {
        self.persistence_error.as_ref()
    }

    /// Returns the persistence advisory once, the first time it is asked for.
    pub fn take_advisory(&mut self) -> Option<String> {
        self.advisory.take()
    }

    pub fn create_conversation(&mut self) -> String {
        let now = now_millis();
        let id = self.next_conversation_id(now);
        self.conversations.insert(
            0,
            Conversation {
                id: id.clone(),
                title: DEFAULT_TITLE.to_string(),
                messages: vec![Message::assistant(GREETING)],
                created_at: now,
                updated_at: now,
            },
        );
        self.active_id = Some(id.clone());
        tracing::debug!(conversation_id = %id, "conversation created");
        self.persist();
        id
    }

    /// Unknown ids are ignored so stale selections cannot break the store.
    pub fn select_conversation(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            tracing::debug!(conversation_id = id, "select of unknown conversation ignored");
            return false;
        }
        self.active_id = Some(id.to_string());
        true
    }

    /// Replaces the active conversation's messages. Returns `Ok(false)` when
    /// `id` is not the active conversation, and an error while a stream holds
    /// the write barrier for it.
    pub fn update_messages(&mut self, id: &str, messages: Vec<Message>) -> Result<bool, ChatError> {
        if self.streaming.contains_key(id) {
            return Err(ChatError::new(
                ChatErrorCode::ExchangeInFlight,
                format!("conversation {id} is receiving a streamed reply"),
            ));
        }
        if self.active_id.as_deref() != Some(id) {
            return Ok(false);
        }
        let Some(conversation) = self.find_mut(id) else {
            return Ok(false);
        };
        replace_messages(conversation, messages);
        self.persist();
        Ok(true)
    }

    pub fn delete_conversation(&mut self, id: &str) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|conversation| conversation.id != id);
        if self.conversations.len() == before {
            return false;
        }

        if self.active_id.as_deref() == Some(id) {
            self.active_id = self
                .conversations
                .first()
                .map(|conversation| conversation.id.clone());
        }
        tracing::debug!(conversation_id = id, "conversation deleted");
        if self.conversations.is_empty() {
            // create_conversation persists the fresh list.
            self.create_conversation();
        } else {
            self.persist();
        }
        true
    }

    /// Takes the write barrier for `id`. Only one stream may write into a
    /// conversation at a time.
    pub fn acquire_barrier(&mut self, id: &str) -> Result<BarrierToken, ChatError> {
        if self.get(id).is_none() {
            return Err(ChatError::new(
                ChatErrorCode::ConversationNotFound,
                format!("conversation not found: {id}"),
            ));
        }
        if self.streaming.contains_key(id) {
            return Err(ChatError::new(
                ChatErrorCode::ExchangeInFlight,
                format!("a reply is already streaming into conversation {id}"),
            ));
        }
        let token = BarrierToken(self.next_barrier);
        self.next_barrier += 1;
        self.streaming.insert(id.to_string(), token);
        Ok(token)
    }

    /// Releases the barrier for `id` if `token` still holds it. Returns
    /// whether anything was released.
    pub fn release_barrier(&mut self, id: &str, token: BarrierToken) -> bool {
        if self.streaming.get(id) != Some(&token) {
            return false;
        }
        self.streaming.remove(id);
        tracing::debug!(conversation_id = id, "write barrier released");
        true
    }

    /// Takes the barrier, appends the user message and an empty assistant
    /// placeholder, and returns the history to send with the question.
    pub fn begin_exchange(&mut self, id: &str, input: &str) -> Result<ExchangeTicket, ChatError> {
        if input.trim().is_empty() {
            return Err(ChatError::new(
                ChatErrorCode::InvalidInput,
                "message must not be empty",
            ));
        }
        let barrier = self.acquire_barrier(id)?;

        let index = self
            .conversations
            .iter()
            .position(|conversation| conversation.id == id)
            .ok_or_else(|| {
                ChatError::new(
                    ChatErrorCode::ConversationNotFound,
                    format!("conversation not found: {id}"),
                )
            })?;
        let conversation = &mut self.conversations[index];
        let history_start = conversation.messages.len().saturating_sub(HISTORY_LIMIT);
        let history = conversation.messages[history_start..].to_vec();

        let mut messages = conversation.messages.clone();
        messages.push(Message::user(input));
        messages.push(Message::assistant_placeholder());
        let reply_index = messages.len() - 1;
        replace_messages(conversation, messages);
        self.persist();

        Ok(ExchangeTicket {
            conversation_id: id.to_string(),
            message: input.to_string(),
            history,
            barrier,
            reply_index,
        })
    }

    /// Mirrors streaming progress into memory without persisting it.
    pub fn record_progress(&mut self, ticket: &ExchangeTicket, reply: &Message) {
        if let Some(slot) = self
            .find_mut(&ticket.conversation_id)
            .and_then(|conversation| conversation.messages.get_mut(ticket.reply_index))
        {
            *slot = reply.clone();
        }
    }

    /// The barrier holder's final write. Applies whether or not the
    /// conversation is active, then releases the barrier.
    pub fn commit_exchange(&mut self, ticket: &ExchangeTicket, reply: Message) -> bool {
        self.release_barrier(&ticket.conversation_id, ticket.barrier);
        let Some(conversation) = self.find_mut(&ticket.conversation_id) else {
            tracing::info!(
                conversation_id = %ticket.conversation_id,
                "conversation deleted before its reply finished; reply discarded"
            );
            return false;
        };

        let mut messages = conversation.messages.clone();
        if ticket.reply_index < messages.len() {
            messages[ticket.reply_index] = reply;
        } else {
            messages.push(reply);
        }
        replace_messages(conversation, messages);
        self.persist();
        true
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id == id)
    }

    fn next_conversation_id(&mut self, now: i64) -> String {
        loop {
            let id = format!("conv-{now}-{}", self.next_seq);
            self.next_seq += 1;
            if self.get(&id).is_none() {
                return id;
            }
        }
    }

    fn read_persisted(&self) -> Result<Vec<Conversation>, StorageError> {
        match self.storage.get(CONVERSATIONS_STORAGE_KEY)? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    fn persist(&mut self) {
        if self.persistence_error.is_some() {
            return;
        }
        let result = serde_json::to_string(&self.conversations)
            .map_err(StorageError::from)
            .and_then(|raw| self.storage.set(CONVERSATIONS_STORAGE_KEY, &raw));
        if let Err(error) = result {
            self.degrade(error);
        }
    }

    fn degrade(&mut self, error: StorageError) {
        if self.persistence_error.is_some() {
            return;
        }
        tracing::warn!(
            error = %error,
            "conversation persistence failed; continuing without persistence"
        );
        self.persistence_error = Some(error.into());
        self.advisory = Some(PERSISTENCE_ADVISORY.to_string());
    }
}

pub fn derive_title(messages: &[Message]) -> Option<String> {
    let first_user = messages
        .iter()
        .find(|message| message.role == Role::User)?;
    let content = first_user.content.as_str();
    if content.chars().count() <= TITLE_MAX_CHARS {
        return Some(content.to_string());
    }
    let mut title = content.chars().take(TITLE_MAX_CHARS).collect::<String>();
    title.push_str("...");
    Some(title)
}

fn replace_messages(conversation: &mut Conversation, messages: Vec<Message>) {
    if let Some(title) = derive_title(&messages) {
        conversation.title = title;
    }
    conversation.messages = messages;
    conversation.updated_at = now_millis();
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_truncates_long_first_user_message() {
        let question = "What is the penalty for driving without a license in Hanoi?!!";
        assert_eq!(question.chars().count(), 61);
        let title = derive_title(&[Message::assistant(GREETING), Message::user(question)])
            .expect("title");
        assert_eq!(title, format!("{}...", &question[..50]));
    }

    #[test]
    fn title_counts_characters_not_bytes() {
        let question = "Mức phạt khi vượt đèn đỏ".repeat(3);
        let title = derive_title(&[Message::user(question.clone())]).expect("title");
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(question.starts_with(title.trim_end_matches("...")));
    }

    #[test]
    fn title_is_absent_without_user_messages() {
        assert_eq!(derive_title(&[Message::assistant(GREETING)]), None);
    }

    #[test]
    fn history_is_the_last_six_messages_before_the_question() {
        let mut store = ConversationStore::in_memory();
        let id = store.active_id().expect("active").to_string();
        let mut messages = vec![Message::assistant(GREETING)];
        for index in 0..4 {
            messages.push(Message::user(format!("q{index}")));
            messages.push(Message::assistant(format!("a{index}")));
        }
        store.update_messages(&id, messages.clone()).expect("update");

        let ticket = store.begin_exchange(&id, "q4").expect("begin");
        assert_eq!(ticket.history, messages[3..].to_vec());
        assert_eq!(ticket.history.len(), HISTORY_LIMIT);
        let conversation = store.get(&id).expect("conversation");
        assert_eq!(conversation.messages.len(), messages.len() + 2);
        assert_eq!(conversation.title, "q0");
    }

    #[test]
    fn blank_input_is_rejected_without_taking_the_barrier() {
        let mut store = ConversationStore::in_memory();
        let id = store.active_id().expect("active").to_string();
        let error = store.begin_exchange(&id, "   ").expect_err("blank input");
        assert_eq!(error.code, ChatErrorCode::InvalidInput);
        assert!(!store.is_streaming(&id));
    }

    #[test]
    fn a_finished_exchange_cannot_release_the_next_ones_barrier() {
        let mut store = ConversationStore::in_memory();
        let id = store.active_id().expect("active").to_string();
        let first = store.begin_exchange(&id, "Câu hỏi 1").expect("first");
        assert!(store.commit_exchange(&first, Message::assistant("Trả lời 1")));
        let second = store.begin_exchange(&id, "Câu hỏi 2").expect("second");

        assert!(!store.release_barrier(&id, first.barrier));
        assert!(store.is_streaming(&id));
        let error = store.begin_exchange(&id, "Câu hỏi 3").expect_err("barrier held");
        assert_eq!(error.code, ChatErrorCode::ExchangeInFlight);
        let error = store
            .update_messages(&id, vec![Message::user("ghi đè")])
            .expect_err("barrier held");
        assert_eq!(error.code, ChatErrorCode::ExchangeInFlight);

        assert!(store.release_barrier(&id, second.barrier));
        assert!(!store.is_streaming(&id));
    }
}
