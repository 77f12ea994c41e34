//! Keepalive Monitor
//!
//! Periodic liveness check for an open connection. On every tick the monitor
//! compares the time since the last pong with the deadline
//! (`keep_alive × max_ping_pong_misses`): past it, a timeout event ends the
//! monitor; otherwise a probe event asks the connection to ping.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::ClientConfig;

/// Keepalive timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Tick interval.
    pub interval: Duration,
    /// Silence tolerated before the connection is declared dead.
    pub deadline: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            deadline: Duration::from_secs(60),
        }
    }
}

impl KeepAliveConfig {
    /// Create a configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// Derive from client settings; `None` when keepalive is disabled.
    #[must_use]
    pub fn from_client_config(config: &ClientConfig) -> Option<Self> {
        Some(Self {
            interval: config.effective_keep_alive()?,
            deadline: config.keep_alive_deadline()?,
        })
    }
}

/// Events emitted by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveEvent {
    /// Send a liveness probe.
    Probe,
    /// No pong within the deadline.
    Timeout {
        /// Time since the last pong.
        elapsed: Duration,
    },
}

/// Pong bookkeeping shared between the monitor and the connection task.
#[derive(Debug)]
pub struct KeepAliveState {
    last_pong: RwLock<Instant>,
    last_pong_ms: AtomicI64,
}

impl Default for KeepAliveState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepAliveState {
    /// State with a pong recorded now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_pong: RwLock::new(Instant::now()),
            last_pong_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Record that the peer proved it is alive.
    pub fn record_pong(&self) {
        *self.last_pong.write() = Instant::now();
        self.last_pong_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Time since the last pong.
    #[must_use]
    pub fn time_since_pong(&self) -> Duration {
        self.last_pong.read().elapsed()
    }

    /// Wall-clock time of the last pong, ms since the epoch.
    #[must_use]
    pub fn last_pong_millis(&self) -> i64 {
        self.last_pong_ms.load(Ordering::Acquire)
    }
}

/// Monitor task driving [`KeepAliveEvent`]s.
pub struct KeepAliveMonitor {
    config: KeepAliveConfig,
    state: Arc<KeepAliveState>,
    event_tx: mpsc::Sender<KeepAliveEvent>,
    cancel: CancellationToken,
}

impl KeepAliveMonitor {
    /// Create a monitor.
    #[must_use]
    pub const fn new(
        config: KeepAliveConfig,
        state: Arc<KeepAliveState>,
        event_tx: mpsc::Sender<KeepAliveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver goes away, or a timeout fires.
    pub async fn run(self) {
        let start = Instant::now() + self.config.interval;
        let mut interval = tokio::time::interval_at(start, self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keepalive monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> bool {
        let elapsed = self.state.time_since_pong();
        if elapsed > self.config.deadline {
            tracing::warn!(
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                deadline_ms = u64::try_from(self.config.deadline.as_millis()).unwrap_or(u64::MAX),
                "Keepalive deadline missed"
            );
            let _ = self
                .event_tx
                .send(KeepAliveEvent::Timeout { elapsed })
                .await;
            return false;
        }

        if self.event_tx.send(KeepAliveEvent::Probe).await.is_err() {
            tracing::debug!("Event channel closed, stopping keepalive");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_keep_alive_yields_no_config() {
        let config = ClientConfig {
            keep_alive: None,
            ..ClientConfig::default()
        };
        assert!(KeepAliveConfig::from_client_config(&config).is_none());
    }

    #[test]
    fn config_from_client_defaults() {
        let config = KeepAliveConfig::from_client_config(&ClientConfig::default()).unwrap();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.deadline, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn probes_while_pongs_arrive() {
        let config = KeepAliveConfig::new(Duration::from_millis(50), Duration::from_millis(120));
        let state = Arc::new(KeepAliveState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            KeepAliveMonitor::new(config, Arc::clone(&state), event_tx, cancel.clone()).run(),
        );

        for _ in 0..5 {
            let event = event_rx.recv().await.unwrap();
            assert_eq!(event, KeepAliveEvent::Probe);
            state.record_pong();
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_pongs() {
        let config = KeepAliveConfig::new(Duration::from_millis(50), Duration::from_millis(120));
        let state = Arc::new(KeepAliveState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            KeepAliveMonitor::new(config, state, event_tx, cancel).run(),
        );

        let mut events = Vec::new();
        while let Some(event) = event_rx.recv().await {
            events.push(event);
        }

        assert_eq!(events[0], KeepAliveEvent::Probe);
        assert_eq!(events[1], KeepAliveEvent::Probe);
        assert!(matches!(
            events.last(),
            Some(KeepAliveEvent::Timeout { elapsed }) if *elapsed > Duration::from_millis(120)
        ));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_monitor() {
        let config = KeepAliveConfig::new(Duration::from_secs(10), Duration::from_secs(20));
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            KeepAliveMonitor::new(config, Arc::new(KeepAliveState::new()), event_tx, cancel.clone())
                .run(),
        );

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "monitor should shut down on cancellation");
    }
}
