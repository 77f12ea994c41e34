//! Topic-keyed stream with bounded history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    Consumer, HistoryView, Message, MessageHandler, MessageMetadata, StreamConfig, TopicLog,
};
use crate::domain::error::ClientError;
use crate::infrastructure::metrics;

struct StreamState<P> {
    topics: HashMap<String, Arc<TopicLog<P>>>,
    consumers: HashMap<String, Vec<Arc<Consumer<P>>>>,
    indexes: HashMap<String, i64>,
}

impl<P> Default for StreamState<P> {
    fn default() -> Self {
        Self {
            topics: HashMap::new(),
            consumers: HashMap::new(),
            indexes: HashMap::new(),
        }
    }
}

/// In-process publish/subscribe bus.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use realtime_client::infrastructure::broadcast::{Message, MessageHandler, Stream};
///
/// # tokio_test::block_on(async {
/// let stream = Stream::<u32>::default();
/// let handler = MessageHandler::from_fn(|m: Arc<Message<u32>>| println!("{}", m.payload));
/// stream.subscribe("ticker:BTC/USDT", handler, true);
/// let index = stream.publish("ticker:BTC/USDT", 42, None).await;
/// assert_eq!(index, 0);
/// # });
/// ```
pub struct Stream<P> {
    config: StreamConfig,
    state: Mutex<StreamState<P>>,
}

impl<P: Send + Sync + 'static> Default for Stream<P> {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl<P: Send + Sync + 'static> Stream<P> {
    /// Create a stream.
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StreamState::default()),
        }
    }

    /// Publish a payload, returning its topic-local index.
    ///
    /// Resolves once every synchronous consumer of the topic has handled the
    /// message (or queued it behind a drain already in progress).
    pub async fn publish(&self, topic: &str, payload: P, error: Option<ClientError>) -> i64 {
        let (message, consumers) = {
            let mut state = self.state.lock();
            let index = state.indexes.get(topic).map_or(0, |last| last + 1);
            let log = Arc::clone(
                state
                    .topics
                    .entry(topic.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
            );
            let message = Arc::new(Message {
                payload,
                error,
                metadata: MessageMetadata {
                    topic: topic.to_string(),
                    index,
                    history: HistoryView::new(Arc::downgrade(&log), index),
                },
            });

            let max = self.config.max_messages_per_topic;
            if max > 0 {
                let mut log = log.lock();
                log.push_back(Arc::clone(&message));
                while log.len() > max {
                    log.pop_front();
                }
            }

            state.indexes.insert(topic.to_string(), index);
            let consumers = state.consumers.get(topic).cloned().unwrap_or_default();
            // queue while the index is reserved so concurrent publishers
            // cannot reorder a topic in any backlog
            for consumer in &consumers {
                consumer.enqueue(Arc::clone(&message));
            }
            (message, consumers)
        };

        metrics::record_published(topic);
        for consumer in consumers {
            consumer.drain().await;
        }
        message.index()
    }

    /// Register a handler on a topic. The consumer starts after the current
    /// last index, so it only sees messages published from now on.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler<P>,
        synchronous: bool,
    ) -> Arc<Consumer<P>> {
        let mut state = self.state.lock();
        let cursor = state.indexes.get(topic).copied().unwrap_or(-1);
        let consumer = Arc::new(Consumer::new(handler, cursor, synchronous));
        state
            .consumers
            .entry(topic.to_string())
            .or_default()
            .push(Arc::clone(&consumer));
        tracing::debug!(topic, cursor, synchronous, "consumer subscribed");
        consumer
    }

    /// Remove every consumer of `topic` using `handler`.
    pub fn unsubscribe(&self, topic: &str, handler: &MessageHandler<P>) -> bool {
        let mut state = self.state.lock();
        let Some(consumers) = state.consumers.get_mut(topic) else {
            return false;
        };
        let before = consumers.len();
        consumers.retain(|consumer| consumer.handler() != handler);
        let removed = consumers.len() != before;
        if consumers.is_empty() {
            state.consumers.remove(topic);
        }
        if removed {
            tracing::debug!(topic, handler = %handler.id(), "consumer unsubscribed");
        }
        removed
    }

    /// Retained messages of a topic, oldest first.
    #[must_use]
    pub fn get_message_history(&self, topic: &str) -> Vec<Arc<Message<P>>> {
        let log = self.state.lock().topics.get(topic).cloned();
        log.map(|log| log.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Index of the last message published on a topic, -1 if none.
    #[must_use]
    pub fn get_last_index(&self, topic: &str) -> i64 {
        self.state.lock().indexes.get(topic).copied().unwrap_or(-1)
    }

    /// Replay retained history to every consumer of a topic.
    pub async fn run(&self, topic: &str) {
        let consumers = {
            let state = self.state.lock();
            let consumers = state.consumers.get(topic).cloned().unwrap_or_default();
            if let Some(log) = state.topics.get(topic) {
                let log = log.lock();
                for consumer in &consumers {
                    for message in log.iter() {
                        consumer.enqueue(Arc::clone(message));
                    }
                }
            }
            consumers
        };
        for consumer in consumers {
            consumer.drain().await;
        }
    }

    /// Number of consumers registered on a topic.
    #[must_use]
    pub fn consumer_count(&self, topic: &str) -> usize {
        self.state.lock().consumers.get(topic).map_or(0, Vec::len)
    }

    /// Topics that have seen at least one publish.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.state.lock().indexes.keys().cloned().collect()
    }

    /// Drop all topics, consumers and indexes.
    pub fn close(&self) {
        *self.state.lock() = StreamState::default();
        tracing::debug!("stream closed");
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl<P> std::fmt::Debug for Stream<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    fn recorder() -> (MessageHandler<u32>, Arc<Mutex<Vec<i64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = MessageHandler::from_fn(move |message: Arc<Message<u32>>| {
            sink.lock().push(message.index());
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn indexes_start_at_zero_per_topic() {
        let stream = Stream::default();
        assert_eq!(stream.get_last_index("a"), -1);
        assert_eq!(stream.publish("a", 1_u32, None).await, 0);
        assert_eq!(stream.publish("a", 2, None).await, 1);
        assert_eq!(stream.publish("b", 3, None).await, 0);
        assert_eq!(stream.get_last_index("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn synchronous_consumer_sees_messages_in_order() {
        let stream = Arc::new(Stream::<u32>::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let handler = MessageHandler::new(move |message: Arc<Message<u32>>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(format!("start {}", message.index()));
                tokio::time::sleep(Duration::from_millis(10)).await;
                sink.lock().push(format!("end {}", message.index()));
            }
        });
        stream.subscribe("trades", handler, true);

        for payload in 0..3 {
            stream.publish("trades", payload, None).await;
        }

        assert_eq!(
            *events.lock(),
            vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_publishers_reach_every_consumer_in_order() {
        let stream = Arc::new(Stream::<u32>::default());
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());

        let (started, release) = (Arc::clone(&entered), Arc::clone(&gate));
        let slow = MessageHandler::new(move |message: Arc<Message<u32>>| {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            async move {
                if message.index() == 0 {
                    started.notify_one();
                    release.notified().await;
                }
            }
        });
        stream.subscribe("t", slow, true);
        let (handler, seen) = recorder();
        stream.subscribe("t", handler, true);

        let first = tokio::spawn({
            let stream = Arc::clone(&stream);
            async move { stream.publish("t", 0, None).await }
        });
        entered.notified().await;

        // the first publisher is parked inside the slow consumer
        let second = tokio::spawn({
            let stream = Arc::clone(&stream);
            async move { stream.publish("t", 1, None).await }
        });
        assert_eq!(second.await.unwrap(), 1);
        assert_eq!(*seen.lock(), vec![0, 1]);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), 0);
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[tokio::test]
    async fn late_subscriber_starts_after_last_index() {
        let stream = Stream::default();
        stream.publish("t", 1_u32, None).await;
        stream.publish("t", 2, None).await;

        let (handler, seen) = recorder();
        let consumer = stream.subscribe("t", handler, true);
        assert_eq!(consumer.cursor(), 1);

        stream.publish("t", 3, None).await;
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let stream = Stream::new(StreamConfig {
            max_messages_per_topic: 2,
        });
        for payload in 0..5_u32 {
            stream.publish("t", payload, None).await;
        }

        let history = stream.get_message_history("t");
        let payloads: Vec<u32> = history.iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![3, 4]);
        assert_eq!(stream.get_last_index("t"), 4);
    }

    #[tokio::test]
    async fn zero_cap_disables_history() {
        let stream = Stream::new(StreamConfig {
            max_messages_per_topic: 0,
        });
        stream.publish("t", 1_u32, None).await;
        assert!(stream.get_message_history("t").is_empty());
        assert_eq!(stream.get_last_index("t"), 0);
    }

    #[tokio::test]
    async fn message_history_holds_prior_messages() {
        let stream = Stream::default();
        stream.publish("t", 10_u32, None).await;
        stream.publish("t", 11, None).await;
        stream.publish("t", 12, None).await;

        let history = stream.get_message_history("t");
        let last = history.last().unwrap();
        let prior: Vec<u32> = last
            .metadata
            .history
            .messages()
            .iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(prior, vec![10, 11]);
    }

    #[tokio::test]
    async fn unsubscribe_by_handler() {
        let stream = Stream::default();
        let (handler, seen) = recorder();
        stream.subscribe("t", handler.clone(), true);
        stream.subscribe("t", handler.clone(), true);
        let (other, other_seen) = recorder();
        stream.subscribe("t", other, true);
        assert_eq!(stream.consumer_count("t"), 3);

        assert!(stream.unsubscribe("t", &handler));
        assert!(!stream.unsubscribe("t", &handler));
        assert_eq!(stream.consumer_count("t"), 1);

        stream.publish("t", 1_u32, None).await;
        assert!(seen.lock().is_empty());
        assert_eq!(*other_seen.lock(), vec![0]);
    }

    #[tokio::test]
    async fn run_skips_seen_messages() {
        let stream = Stream::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        stream.subscribe(
            "t",
            MessageHandler::from_fn(move |_: Arc<Message<u32>>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            true,
        );
        stream.publish("t", 1, None).await;
        stream.publish("t", 2, None).await;

        stream.run("t").await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn error_messages_are_delivered() {
        let stream = Stream::default();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        stream.subscribe(
            "t",
            MessageHandler::from_fn(move |message: Arc<Message<u32>>| {
                if let Some(error) = &message.error {
                    sink.lock().push(error.clone());
                }
            }),
            true,
        );

        stream
            .publish("t", 0, Some(ClientError::Exchange("rejected".to_string())))
            .await;

        assert_eq!(
            *errors.lock(),
            vec![ClientError::Exchange("rejected".to_string())]
        );
    }

    #[tokio::test]
    async fn close_resets_everything() {
        let stream = Stream::default();
        let (handler, _) = recorder();
        stream.subscribe("t", handler, true);
        stream.publish("t", 1, None).await;

        stream.close();

        assert_eq!(stream.get_last_index("t"), -1);
        assert_eq!(stream.consumer_count("t"), 0);
        assert!(stream.get_message_history("t").is_empty());
        assert!(stream.topics().is_empty());
    }
}
