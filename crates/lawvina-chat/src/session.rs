use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::client::ChatClient;
use crate::error::{ChatError, ChatErrorCode};
use crate::event::interpret_record;
use crate::reducer::{Clock, DEFAULT_FLUSH_INTERVAL, MessageReducer};
use crate::store::{BarrierToken, ConversationStore, ExchangeTicket};
use crate::transport::{ChunkSource, RecordStream};
use crate::types::{ChatMode, ChatRequest, Message};

pub type SharedStore = Arc<Mutex<ConversationStore>>;

pub fn shared_store(store: ConversationStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Locks the store, recovering it if a panicking holder poisoned the mutex.
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, ConversationStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeUpdate {
    Progress {
        conversation_id: String,
        message: Message,
    },
    Warning {
        conversation_id: String,
        message: String,
    },
    Completed {
        conversation_id: String,
        message: Message,
    },
    Failed {
        conversation_id: String,
        message: Message,
        error: ChatError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    pub conversation_id: String,
    pub message: Message,
    pub error: Option<ChatError>,
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Updates of one in-flight exchange, ending with exactly one terminal update.
pub struct ExchangeStream {
    conversation_id: String,
    updates: mpsc::UnboundedReceiver<ExchangeUpdate>,
    outcome: watch::Receiver<Option<ExchangeOutcome>>,
}

impl ExchangeStream {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn next(&mut self) -> Option<ExchangeUpdate> {
        self.updates.recv().await
    }

    pub async fn outcome(&self) -> Option<ExchangeOutcome> {
        let mut outcome = self.outcome.clone();
        let value = outcome.wait_for(Option::is_some).await.ok()?;
        value.clone()
    }
}

impl fmt::Debug for ExchangeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeStream")
            .field("conversation_id", &self.conversation_id)
            .field("finished", &self.outcome.borrow().is_some())
            .finish()
    }
}

struct ExchangeStreamWriter {
    updates: mpsc::UnboundedSender<ExchangeUpdate>,
    outcome: watch::Sender<Option<ExchangeOutcome>>,
}

impl ExchangeStreamWriter {
    fn push(&self, update: ExchangeUpdate) {
        // The reader may have been dropped; the exchange still runs to the end.
        let _ = self.updates.send(update);
    }

    fn finish(self, outcome: ExchangeOutcome) {
        self.outcome.send_replace(Some(outcome));
    }
}

fn exchange_channel(conversation_id: &str) -> (ExchangeStream, ExchangeStreamWriter) {
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = watch::channel(None);
    (
        ExchangeStream {
            conversation_id: conversation_id.to_string(),
            updates: updates_rx,
            outcome: outcome_rx,
        },
        ExchangeStreamWriter {
            updates: updates_tx,
            outcome: outcome_tx,
        },
    )
}

/// Releases a conversation's write barrier however the exchange ends. A
/// barrier already released by the commit is left to whoever holds it now.
struct BarrierGuard {
    store: SharedStore,
    conversation_id: String,
    token: BarrierToken,
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        lock_store(&self.store).release_barrier(&self.conversation_id, self.token);
    }
}

/// Streams one reply into the conversation named by `ticket`: records are
/// decoded, reduced, mirrored into the store as they commit, and the final
/// message is committed when the body ends or fails.
pub async fn apply_stream<S, C>(
    store: &SharedStore,
    ticket: &ExchangeTicket,
    body: Result<Option<S>, ChatError>,
    mut reducer: MessageReducer<C>,
    on_update: &mut (dyn FnMut(ExchangeUpdate) + Send),
) -> ExchangeOutcome
where
    S: ChunkSource,
    C: Clock,
{
    let conversation_id = ticket.conversation_id.clone();
    let result = async {
        let mut records = RecordStream::open(body?)?;
        while let Some(record) = records.next_record().await? {
            let event = match interpret_record(&record) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(error) if error.is_recoverable() => {
                    tracing::warn!(error = %error, "skipping malformed chat record");
                    continue;
                }
                Err(error) => return Err(error),
            };

            if reducer.apply(event) {
                let snapshot = reducer.message().clone();
                lock_store(store).record_progress(ticket, &snapshot);
                on_update(ExchangeUpdate::Progress {
                    conversation_id: conversation_id.clone(),
                    message: snapshot,
                });
            }
            for warning in reducer.take_warnings() {
                on_update(ExchangeUpdate::Warning {
                    conversation_id: conversation_id.clone(),
                    message: warning,
                });
            }
        }
        Ok::<(), ChatError>(())
    }
    .await;

    let (message, error) = match result {
        Ok(()) => (reducer.finish(), None),
        Err(error) => (reducer.fail(&error), Some(error)),
    };
    lock_store(store).commit_exchange(ticket, message.clone());

    let terminal = match &error {
        None => ExchangeUpdate::Completed {
            conversation_id: conversation_id.clone(),
            message: message.clone(),
        },
        Some(error) => ExchangeUpdate::Failed {
            conversation_id: conversation_id.clone(),
            message: message.clone(),
            error: error.clone(),
        },
    };
    on_update(terminal);
    if let Some(error) = &error {
        tracing::warn!(
            conversation_id = %conversation_id,
            error = %error.as_compact_json(),
            "chat exchange ended with an error"
        );
    }
    tracing::info!(
        conversation_id = %conversation_id,
        succeeded = error.is_none(),
        content_len = message.content.len(),
        citations = message.citations().len(),
        "chat exchange finished"
    );

    ExchangeOutcome {
        conversation_id,
        message,
        error,
    }
}

/// Sends questions for the conversations of a shared store.
pub struct ChatSession {
    client: ChatClient,
    store: SharedStore,
    mode: ChatMode,
    flush_interval: Duration,
}

impl ChatSession {
    pub fn new(client: ChatClient, store: SharedStore) -> Self {
        Self {
            client,
            store,
            mode: ChatMode::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ChatMode) {
        self.mode = mode;
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Starts an exchange in the background. Fails without side effects when
    /// the input is blank, the conversation is unknown, or a reply is already
    /// streaming into it.
    pub fn send(&self, conversation_id: &str, input: &str) -> Result<ExchangeStream, ChatError> {
        let ticket = lock_store(&self.store).begin_exchange(conversation_id, input)?;
        let request = ChatRequest {
            message: ticket.message.clone(),
            history: ticket.history.clone(),
            mode: self.mode,
        };
        let (stream, writer) = exchange_channel(&ticket.conversation_id);
        let client = self.client.clone();
        let store = Arc::clone(&self.store);
        let flush_interval = self.flush_interval;

        spawn_exchange_task(async move {
            let barrier = BarrierGuard {
                store: Arc::clone(&store),
                conversation_id: ticket.conversation_id.clone(),
                token: ticket.barrier,
            };
            let body = client.open_chat(&request).await;
            let reducer = MessageReducer::new(Message::assistant_placeholder())
                .with_flush_interval(flush_interval);
            let mut forward = |update: ExchangeUpdate| writer.push(update);
            let outcome = apply_stream(&store, &ticket, body, reducer, &mut forward).await;
            drop(barrier);
            writer.finish(outcome);
        });
        Ok(stream)
    }

    /// Sends and waits for the final message.
    pub async fn ask(&self, conversation_id: &str, input: &str) -> Result<ExchangeOutcome, ChatError> {
        let stream = self.send(conversation_id, input)?;
        stream.outcome().await.ok_or_else(|| {
            ChatError::new(
                ChatErrorCode::Transport,
                "exchange ended without a final message",
            )
        })
    }
}

fn spawn_exchange_task<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(task);
        return;
    }

    std::thread::spawn(move || {
        if let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            runtime.block_on(task);
        }
    });
}
