use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::ChatError;
use crate::event::StreamEvent;
use crate::sources::SourceResolver;
use crate::types::{Citation, Message};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(30);
pub const CONNECTION_ERROR_NOTICE: &str = "\n\n[Lỗi kết nối: Không thể nhận phản hồi từ AI]";

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    text: String,
    status: Option<String>,
    citations: Option<Vec<Citation>>,
}

impl Accumulator {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.status.is_none() && self.citations.is_none()
    }
}

/// Builds one assistant message from stream events, committing buffered
/// changes to the visible message at most once per flush interval unless an
/// event asks for immediate feedback.
pub struct MessageReducer<C = SystemClock> {
    message: Message,
    pending: Accumulator,
    resolver: SourceResolver,
    warnings: Vec<String>,
    clock: C,
    flush_interval: Duration,
    last_commit: Instant,
    /// Set once `used_docs` resolved; later `sources` only refill the pool.
    resolved: bool,
    completed: bool,
}

impl MessageReducer<SystemClock> {
    pub fn new(message: Message) -> Self {
        Self::with_clock(message, SystemClock)
    }
}

impl<C: Clock> MessageReducer<C> {
    pub fn with_clock(message: Message, clock: C) -> Self {
        let last_commit = clock.now();
        Self {
            message,
            pending: Accumulator::default(),
            resolver: SourceResolver::new(),
            warnings: Vec::new(),
            clock,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            last_commit,
            resolved: false,
            completed: false,
        }
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Applies one event. Returns `true` when the visible message changed.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.completed {
            tracing::debug!("stream event after completion ignored");
            return false;
        }

        let bypass = event.bypasses_throttle();
        match event {
            StreamEvent::Sources(candidates) => {
                self.resolver.replace_candidates(candidates);
                if !self.resolved {
                    self.pending.citations = Some(self.resolver.candidates().to_vec());
                }
            }
            StreamEvent::Content(delta) => self.pending.text.push_str(&delta),
            StreamEvent::Status(status) => {
                self.pending.status = Some(status);
            }
            StreamEvent::UsedDocs(used) => {
                self.pending.citations = Some(self.resolver.resolve(used));
                self.resolved = true;
            }
            StreamEvent::Warning(warning) => {
                tracing::warn!(warning = %warning, "chat backend warning");
                self.warnings.push(warning);
            }
        }

        if self.pending.is_empty() {
            return false;
        }
        let due = self.clock.now().duration_since(self.last_commit) >= self.flush_interval;
        if bypass || due {
            self.commit();
            return true;
        }
        false
    }

    /// Commits any residue regardless of the throttle and freezes the message.
    pub fn finish(&mut self) -> Message {
        if !self.completed {
            self.commit();
            self.message.status = None;
            self.completed = true;
        }
        self.message.clone()
    }

    /// Freezes the message with the connection error notice appended.
    pub fn fail(&mut self, error: &ChatError) -> Message {
        if !self.completed {
            tracing::warn!(error = %error, "chat exchange failed");
            self.commit();
            self.message.content.push_str(CONNECTION_ERROR_NOTICE);
            self.message.status = None;
            self.completed = true;
        }
        self.message.clone()
    }

    fn commit(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if let Some(status) = pending.status {
            self.message.status = Some(status).filter(|status| !status.trim().is_empty());
        }
        self.message.content.push_str(&pending.text);
        if !self.message.content.is_empty() {
            self.message.status = None;
        }
        if let Some(citations) = pending.citations {
            self.message.citations = Some(citations);
        }
        self.last_commit = self.clock.now();
        tracing::trace!(
            content_len = self.message.content.len(),
            citations = self.message.citations().len(),
            "assistant message committed"
        );
    }
}
