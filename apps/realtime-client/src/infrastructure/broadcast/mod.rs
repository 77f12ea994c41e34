//! Topic Bus
//!
//! In-process publish/subscribe keyed by topic string, used to fan decoded
//! venue messages out to many consumers.
//!
//! # Architecture
//!
//! - [`Stream`] owns per-topic sequence counters, bounded history rings and
//!   the consumer lists.
//! - [`Consumer`] owns a handler, a cursor (last delivered index) and a
//!   backlog queue drained by a single re-entrancy-guarded loop.
//!
//! Messages are immutable and shared by `Arc`. Within a topic every consumer
//! sees strictly increasing indexes; an index at or below the cursor is
//! skipped, so duplicate deliveries are harmless.

mod consumer;
mod stream;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

pub use consumer::Consumer;
pub use stream::Stream;

use crate::domain::error::ClientError;
use crate::StreamSettings;

// =============================================================================
// Configuration
// =============================================================================

/// Default number of messages retained per topic.
pub const DEFAULT_MAX_MESSAGES_PER_TOPIC: usize = 10_000;

/// Configuration for a [`Stream`].
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// History retained per topic; 0 disables retention.
    pub max_messages_per_topic: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_messages_per_topic: DEFAULT_MAX_MESSAGES_PER_TOPIC,
        }
    }
}

impl From<StreamSettings> for StreamConfig {
    fn from(settings: StreamSettings) -> Self {
        Self {
            max_messages_per_topic: settings.max_messages_per_topic,
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Retained messages of one topic.
pub(crate) type TopicLog<P> = Mutex<VecDeque<Arc<Message<P>>>>;

/// Live view of the topic log filtered to messages older than its owner.
///
/// This is not a copy taken at publish time. The log is read when
/// [`messages`](Self::messages) is called, so entries evicted after the owner
/// was published are missing from the result, and a closed stream yields an
/// empty view. The log is held weakly so retained messages do not keep each
/// other alive.
pub struct HistoryView<P> {
    log: Weak<TopicLog<P>>,
    before: i64,
}

impl<P> HistoryView<P> {
    pub(crate) const fn new(log: Weak<TopicLog<P>>, before: i64) -> Self {
        Self { log, before }
    }

    /// Retained messages older than the owning message, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Arc<Message<P>>> {
        let Some(log) = self.log.upgrade() else {
            return Vec::new();
        };
        let log = log.lock();
        log.iter()
            .filter(|message| message.metadata.index < self.before)
            .cloned()
            .collect()
    }
}

impl<P> fmt::Debug for HistoryView<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryView")
            .field("before", &self.before)
            .finish_non_exhaustive()
    }
}

/// Metadata attached to every published message.
#[derive(Debug)]
pub struct MessageMetadata<P> {
    /// Topic the message was published on.
    pub topic: String,
    /// Topic-local sequence number, starting at 0.
    pub index: i64,
    /// Older messages still retained on the topic.
    pub history: HistoryView<P>,
}

/// Immutable published record.
#[derive(Debug)]
pub struct Message<P> {
    /// Published payload.
    pub payload: P,
    /// Error published alongside the payload, if any.
    pub error: Option<ClientError>,
    /// Topic, index and history.
    pub metadata: MessageMetadata<P>,
}

impl<P> Message<P> {
    /// Topic-local index.
    #[must_use]
    pub const fn index(&self) -> i64 {
        self.metadata.index
    }

    /// Whether the message carries an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Boxed future returned by message handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type Callback<P> = dyn Fn(Arc<Message<P>>) -> HandlerFuture + Send + Sync;

/// Identified message handler.
///
/// Each handler gets a unique id at construction; clones share it, which is
/// what [`Stream::unsubscribe`] matches on.
pub struct MessageHandler<P> {
    id: Uuid,
    callback: Arc<Callback<P>>,
}

impl<P: Send + Sync + 'static> MessageHandler<P> {
    /// Wrap an async callback.
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(Arc<Message<P>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            callback: Arc::new(move |message| Box::pin(callback(message))),
        }
    }

    /// Wrap a plain closure.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(Arc<Message<P>>) + Send + Sync + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            callback: Arc::new(move |message| {
                callback(message);
                Box::pin(std::future::ready(()))
            }),
        }
    }
}

impl<P> MessageHandler<P> {
    /// Unique handler id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Invoke the handler.
    pub fn call(&self, message: Arc<Message<P>>) -> HandlerFuture {
        (self.callback)(message)
    }
}

impl<P> Clone for MessageHandler<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<P> PartialEq for MessageHandler<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P> Eq for MessageHandler<P> {}

impl<P> fmt::Debug for MessageHandler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandler")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
