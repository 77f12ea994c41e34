//! Topic consumer with cursor and backlog.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::Mutex;

use super::{Message, MessageHandler};
use crate::domain::queue::RingQueue;

/// One subscription to one topic.
///
/// Deliveries are queued and drained by a single loop at a time. A message
/// whose index is at or below the cursor is dropped.
pub struct Consumer<P> {
    handler: MessageHandler<P>,
    synchronous: bool,
    cursor: AtomicI64,
    backlog: Mutex<RingQueue<Arc<Message<P>>>>,
    running: AtomicBool,
}

/// Clears the running flag even if the drain future is dropped mid-await.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<P: Send + Sync + 'static> Consumer<P> {
    /// Create a consumer whose cursor starts at `cursor`.
    #[must_use]
    pub fn new(handler: MessageHandler<P>, cursor: i64, synchronous: bool) -> Self {
        Self {
            handler,
            synchronous,
            cursor: AtomicI64::new(cursor),
            backlog: Mutex::new(RingQueue::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Queue a message without delivering it. The stream calls this under its
    /// topic lock so backlog order matches index order.
    pub fn enqueue(&self, message: Arc<Message<P>>) {
        self.backlog.lock().enqueue(message);
    }

    /// Handle queued messages unless another drain is already running.
    pub async fn drain(&self) {
        loop {
            if self.running.swap(true, Ordering::AcqRel) {
                return;
            }
            {
                let _guard = RunningGuard(&self.running);
                while let Some(message) = self.next_message() {
                    self.handle_message(message).await;
                }
            }
            // A publish may have queued between the last dequeue and the flag reset.
            if self.backlog.lock().is_empty() {
                return;
            }
        }
    }

    fn next_message(&self) -> Option<Arc<Message<P>>> {
        self.backlog.lock().dequeue()
    }

    async fn handle_message(&self, message: Arc<Message<P>>) {
        let index = message.index();
        if index <= self.cursor.load(Ordering::Acquire) {
            tracing::trace!(
                topic = %message.metadata.topic,
                index,
                "skipping already delivered message"
            );
            return;
        }
        self.cursor.store(index, Ordering::Release);

        let delivery = self.handler.call(message);
        if self.synchronous {
            delivery.await;
        } else {
            tokio::spawn(delivery);
        }
    }
}

impl<P> Consumer<P> {
    /// Index of the last delivered message, -1 if none.
    #[must_use]
    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Handler this consumer invokes.
    #[must_use]
    pub const fn handler(&self) -> &MessageHandler<P> {
        &self.handler
    }

    /// Whether deliveries are awaited before the next one starts.
    #[must_use]
    pub const fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Messages queued and not yet handled.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }
}

impl<P> std::fmt::Debug for Consumer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("handler", &self.handler)
            .field("synchronous", &self.synchronous)
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
