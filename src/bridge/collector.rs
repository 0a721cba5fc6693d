//! Filtered, bounded subscription over a bridge's message stream.
//!
//! A collector watches one bridge's event stream for messages passing a
//! filter, hands them to the consumer in order, and terminates exactly
//! once for exactly one reason. Each collector owns its own broadcast
//! receiver and timers, so stopping one never disturbs another.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::messages::BridgeEvent;
use crate::game::message::GameMessage;

/// Why a collector terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Collected the configured maximum of matching messages.
    Limit,
    /// Saw the configured maximum of messages, matching or not.
    ProcessedLimit,
    /// The absolute time budget elapsed.
    Time,
    /// No matching message arrived within the idle window.
    Idle,
    /// The bridge's game connection dropped.
    Disconnect,
    /// Stopped by the consumer or an external cancel signal.
    User,
}

pub type CollectorFilter = Box<dyn Fn(&GameMessage) -> bool + Send>;

/// Termination bounds. Unset bounds never fire.
#[derive(Default)]
pub struct CollectorOptions {
    pub max: Option<usize>,
    pub max_processed: Option<usize>,
    pub time: Option<Duration>,
    pub idle: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

pub struct MessageCollector {
    items: mpsc::UnboundedReceiver<Arc<GameMessage>>,
    end: Arc<std::sync::OnceLock<EndReason>>,
    stop: CancellationToken,
}

impl MessageCollector {
    pub fn new(
        events: broadcast::Receiver<BridgeEvent>,
        filter: CollectorFilter,
        options: CollectorOptions,
    ) -> Self {
        let (items_tx, items_rx) = mpsc::unbounded_channel();
        let end = Arc::new(std::sync::OnceLock::new());
        let stop = CancellationToken::new();

        let worker = Worker {
            events,
            filter,
            options,
            items: items_tx,
            end: Arc::clone(&end),
            stop: stop.clone(),
        };
        tokio::spawn(worker.run());

        Self {
            items: items_rx,
            end,
            stop,
        }
    }

    /// Next matching message, or `None` once the collector has ended.
    pub async fn next(&mut self) -> Option<Arc<GameMessage>> {
        self.items.recv().await
    }

    /// Drain to completion.
    pub async fn collect_all(mut self) -> (Vec<Arc<GameMessage>>, EndReason) {
        let mut collected = Vec::new();
        while let Some(message) = self.next().await {
            collected.push(message);
        }
        (collected, self.end_reason().unwrap_or(EndReason::User))
    }

    /// Stop collecting. Idempotent; a collector that already ended
    /// keeps its original reason.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Set once the collector has terminated.
    pub fn end_reason(&self) -> Option<EndReason> {
        self.end.get().copied()
    }
}

impl Drop for MessageCollector {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Worker {
    events: broadcast::Receiver<BridgeEvent>,
    filter: CollectorFilter,
    options: CollectorOptions,
    items: mpsc::UnboundedSender<Arc<GameMessage>>,
    end: Arc<std::sync::OnceLock<EndReason>>,
    stop: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let reason = self.collect().await;
        // First terminal reason wins; dropping the sender ends next().
        let _ = self.end.set(reason);
    }

    async fn collect(&mut self) -> EndReason {
        let time_deadline = self.options.time.map(|t| Instant::now() + t);
        let mut idle_deadline = self.options.idle.map(|t| Instant::now() + t);
        let mut collected = 0usize;
        let mut processed = 0usize;
        let external = self.options.cancel.clone().unwrap_or_default();

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return EndReason::User,
                _ = external.cancelled() => return EndReason::User,
                _ = deadline(time_deadline) => return EndReason::Time,
                _ = deadline(idle_deadline) => return EndReason::Idle,
                event = self.events.recv() => match event {
                    Ok(BridgeEvent::Message(message)) => {
                        processed += 1;
                        if (self.filter)(&message) {
                            collected += 1;
                            if self.items.send(message).is_err() {
                                return EndReason::User;
                            }
                            if let Some(idle) = self.options.idle {
                                idle_deadline = Some(Instant::now() + idle);
                            }
                            if self.options.max.is_some_and(|max| collected >= max) {
                                return EndReason::Limit;
                            }
                        }
                        if self
                            .options
                            .max_processed
                            .is_some_and(|max| processed >= max)
                        {
                            return EndReason::ProcessedLimit;
                        }
                    }
                    Ok(BridgeEvent::Disconnected { .. }) | Ok(BridgeEvent::Errored { .. }) => {
                        return EndReason::Disconnect;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return EndReason::Disconnect,
                },
            }
        }
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
