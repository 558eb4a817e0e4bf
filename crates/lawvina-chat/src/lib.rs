//! Streaming chat client for the LawVina legal assistant: NDJSON transport,
//! message reduction, citation resolution and persisted conversations.

mod client;
mod error;
mod event;
mod reasoning;
mod reducer;
mod session;
mod sources;
mod storage;
mod store;
mod transport;
mod transport_retry;
mod types;

pub use client::{
    ChatClient, ChatClientConfig, DEFAULT_BASE_URL, DEFAULT_DOCUMENT_LIMIT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_STREAM_IDLE_TIMEOUT, HttpBody,
};
pub use error::{ChatError, ChatErrorCode};
pub use event::{StreamEvent, UsedDocs, interpret_record};
pub use reasoning::{
    REASONING_CLOSE, REASONING_OPEN, ReasoningSegment, ReasoningView, partition_reasoning,
};
pub use reducer::{
    CONNECTION_ERROR_NOTICE, Clock, DEFAULT_FLUSH_INTERVAL, ManualClock, MessageReducer,
    SystemClock,
};
pub use session::{
    ChatSession, ExchangeOutcome, ExchangeStream, ExchangeUpdate, SharedStore, apply_stream,
    lock_store, shared_store,
};
pub use sources::SourceResolver;
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use store::{
    BarrierToken, CONVERSATIONS_STORAGE_KEY, ConversationStore, DEFAULT_TITLE, ExchangeTicket,
    GREETING, HISTORY_LIMIT, TITLE_MAX_CHARS, derive_title,
};
pub use transport::{ChunkList, ChunkSource, LineBuffer, RecordStream};
pub use transport_retry::DEFAULT_TRANSPORT_RETRY_COUNT;
pub use types::{
    ChatMode, ChatRequest, Citation, Conversation, Document, DocumentBody, DocumentMetadata,
    DocumentReference, DocumentSection, DocumentSummary, Message, Role,
};
