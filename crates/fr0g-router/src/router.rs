//! The event router: input queue ownership and the per-event worker loop.
//!
//! Workers dequeue one event at a time, call the analyzer with the
//! per-event deadline, and turn each returned action into an output
//! command handed to egress in the analyzer's order. Failures requeue with
//! exponential backoff until the retry budget is spent, then dead-letter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use fr0g_core::config::QueueConfig;
use fr0g_core::error::PlatformError;
use fr0g_core::queue::{DeadLetters, PriorityQueue, QueueMessage};
use fr0g_core::retry::RetryConfig;
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::{AnalysisResult, InputEvent, OutputAction, OutputCommand};

/// Analyzer seam; implemented by the RPC bridge and by test stubs.
#[async_trait]
pub trait EventAnalyzer: Send + Sync {
    /// Analyze one event.
    async fn analyze(&self, event: &InputEvent) -> Result<AnalysisResult, PlatformError>;
}

#[async_trait]
impl EventAnalyzer for crate::analyzer::AnalyzerBridge {
    async fn analyze(&self, event: &InputEvent) -> Result<AnalysisResult, PlatformError> {
        crate::analyzer::AnalyzerBridge::analyze(self, event).await
    }
}

/// Command hand-off seam; implemented by the egress RPC client and by test
/// collectors.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Accept one synthesized command.
    async fn submit(&self, command: OutputCommand) -> Result<(), PlatformError>;
}

#[async_trait]
impl CommandSink for crate::egress_client::CommandForwarder {
    async fn submit(&self, command: OutputCommand) -> Result<(), PlatformError> {
        crate::egress_client::CommandForwarder::submit(self, command).await
    }
}

/// Router counters exposed on `/status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RouterStats {
    /// Events fully processed (actions forwarded, acknowledged).
    pub processed: u64,
    /// Events requeued at least once.
    pub requeued: u64,
    /// Events abandoned to the dead-letter sink.
    pub dead_lettered: u64,
}

/// Owner of the input queue and its worker pool.
pub struct EventRouter {
    queue: Arc<PriorityQueue<InputEvent>>,
    dead: Arc<DeadLetters>,
    analyzer: Arc<dyn EventAnalyzer>,
    egress: Arc<dyn CommandSink>,
    retry: RetryConfig,
    enqueue_timeout: std::time::Duration,
    processed: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
}

impl EventRouter {
    /// Build the router over its queue and peers.
    pub fn new(
        queue_config: &QueueConfig,
        analyzer: Arc<dyn EventAnalyzer>,
        egress: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            queue: Arc::new(PriorityQueue::new(queue_config.capacity)),
            dead: Arc::new(DeadLetters::new(256)),
            analyzer,
            egress,
            retry: queue_config.retry(),
            enqueue_timeout: queue_config.enqueue_timeout(),
            processed: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// The input queue, for the RPC ingest surface and introspection.
    pub fn queue(&self) -> Arc<PriorityQueue<InputEvent>> {
        Arc::clone(&self.queue)
    }

    /// The dead-letter sink.
    pub fn dead_letters(&self) -> Arc<DeadLetters> {
        Arc::clone(&self.dead)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            processed: self.processed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Start `count` workers consuming the input queue.
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        shutdown: &ShutdownToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..count)
            .map(|index| {
                let router = Arc::clone(self);
                let token = shutdown.clone();
                tokio::spawn(router.worker_loop(index, token))
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, index: usize, mut shutdown: ShutdownToken) {
        tracing::debug!(worker = index, "router worker up");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => return,
                message = self.queue.dequeue() => message,
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Cancellation aborts the analyzer call and requeues the
                    // event under the retry policy.
                    self.requeue_or_dead_letter(message, "cancelled during analysis");
                    return;
                }
                outcome = self.analyzer.analyze(&message.payload) => {
                    self.settle(message, outcome).await;
                }
            }
        }
    }

    async fn settle(
        &self,
        message: QueueMessage<InputEvent>,
        outcome: Result<AnalysisResult, PlatformError>,
    ) {
        match outcome {
            Ok(result) => {
                if let Err(err) = self.forward_actions(&message.payload, &result.actions).await {
                    tracing::warn!(
                        event = %message.id,
                        error = %err,
                        "egress hand-off failed"
                    );
                    if err.is_transient() {
                        self.retry_later(message, &err.to_string());
                    } else {
                        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
                        self.dead.push(&message, format!("egress: {err}"));
                    }
                    return;
                }
                tracing::debug!(
                    event = %message.id,
                    actions = result.actions.len(),
                    "event processed"
                );
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) if err.is_transient() => {
                self.retry_later(message, &err.to_string());
            }
            Err(err) => {
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
                self.dead.push(&message, format!("analyzer: {err}"));
            }
        }
    }

    /// Hand every action to egress, in the analyzer's order. Stops at the
    /// first failure so a retry resumes deterministically; duplicates from
    /// the already-delivered prefix are merged at egress by command id.
    async fn forward_actions(
        &self,
        event: &InputEvent,
        actions: &[OutputAction],
    ) -> Result<(), PlatformError> {
        // Derived from the event's own timestamp so a retry regenerates the
        // same ids and egress can suppress the duplicates.
        let nanos = event
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| event.timestamp.timestamp_millis());
        for (seq, action) in actions.iter().enumerate() {
            let mut command = OutputCommand::from(action.clone());
            command.id = format!("action_{}_{}_{}", event.id, nanos, seq);
            command.priority = event.priority;
            self.egress.submit(command).await?;
        }
        Ok(())
    }

    fn retry_later(&self, message: QueueMessage<InputEvent>, reason: &str) {
        match message.into_retry() {
            Ok(message) => {
                self.requeued.fetch_add(1, Ordering::Relaxed);
                let delay = self.retry.delay_for(message.retries.saturating_sub(1));
                tracing::info!(
                    event = %message.id,
                    retries = message.retries,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "requeueing event"
                );
                let queue = Arc::clone(&self.queue);
                let dead = Arc::clone(&self.dead);
                let timeout = self.enqueue_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(rejected) = queue.enqueue(message, timeout).await {
                        let message = rejected.into_message();
                        dead.push(&message, "requeue rejected: queue full");
                    }
                });
            }
            Err(message) => {
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
                self.dead
                    .push(&message, format!("retries exhausted: {reason}"));
            }
        }
    }

    fn requeue_or_dead_letter(&self, message: QueueMessage<InputEvent>, reason: &str) {
        match message.into_retry() {
            Ok(message) => {
                self.requeued.fetch_add(1, Ordering::Relaxed);
                if let Err(rejected) = self.queue.try_enqueue(message) {
                    let message = rejected.into_message();
                    self.dead.push(&message, reason);
                }
            }
            Err(message) => {
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
                self.dead.push(&message, reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parking_lot::Mutex;

    use fr0g_core::types::ChannelType;

    use super::*;

    struct ScriptedAnalyzer {
        failures_before_success: AtomicU64,
        actions: Vec<OutputAction>,
    }

    #[async_trait]
    impl EventAnalyzer for ScriptedAnalyzer {
        async fn analyze(&self, event: &InputEvent) -> Result<AnalysisResult, PlatformError> {
            if self.failures_before_success.load(Ordering::SeqCst) > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                return Err(PlatformError::Transient("connection refused".into()));
            }
            Ok(AnalysisResult {
                event_id: event.id.clone(),
                processed: true,
                actions: self.actions.clone(),
                metadata: Default::default(),
                processed_at: Utc::now(),
            })
        }
    }

    #[derive(Default)]
    struct CollectingCommands {
        commands: Mutex<Vec<OutputCommand>>,
    }

    #[async_trait]
    impl CommandSink for CollectingCommands {
        async fn submit(&self, command: OutputCommand) -> Result<(), PlatformError> {
            self.commands.lock().push(command);
            Ok(())
        }
    }

    fn action(target: &str, content: &str) -> OutputAction {
        OutputAction {
            id: String::new(),
            channel: ChannelType::Sms,
            target: target.to_string(),
            content: content.to_string(),
            metadata: Default::default(),
            priority: 0,
        }
    }

    fn queue_config() -> QueueConfig {
        QueueConfig {
            capacity: 16,
            enqueue_timeout_ms: 100,
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    fn enqueue_event(router: &EventRouter, event: InputEvent) {
        let message = QueueMessage::new(
            event.id.clone(),
            event.channel,
            event.source.clone(),
            String::new(),
            event,
            0,
            3,
        );
        router.queue().try_enqueue(message).unwrap();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_actions_forwarded_in_order_with_id_prefix() {
        let analyzer = Arc::new(ScriptedAnalyzer {
            failures_before_success: AtomicU64::new(0),
            actions: vec![action("t", "a1"), action("t", "a2"), action("t", "a3")],
        });
        let sink = Arc::new(CollectingCommands::default());
        let router = Arc::new(EventRouter::new(&queue_config(), analyzer, sink.clone()));

        let controller = fr0g_core::shutdown::ShutdownController::new();
        let _workers = router.spawn_workers(1, &controller.token());

        enqueue_event(
            &router,
            InputEvent::new("e1", ChannelType::Sms, "+1555", "hi").with_priority(4),
        );

        wait_until(|| sink.commands.lock().len() == 3).await;
        let commands = sink.commands.lock();
        assert_eq!(commands[0].content, "a1");
        assert_eq!(commands[1].content, "a2");
        assert_eq!(commands[2].content, "a3");
        for (seq, command) in commands.iter().enumerate() {
            assert!(command.id.starts_with("action_e1_"));
            assert!(command.id.ends_with(&format!("_{seq}")));
            // Priority inherited from the event.
            assert_eq!(command.priority, 4);
        }
        drop(commands);
        controller.trigger();
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let analyzer = Arc::new(ScriptedAnalyzer {
            failures_before_success: AtomicU64::new(2),
            actions: vec![action("t", "reply")],
        });
        let sink = Arc::new(CollectingCommands::default());
        let router = Arc::new(EventRouter::new(&queue_config(), analyzer, sink.clone()));

        let controller = fr0g_core::shutdown::ShutdownController::new();
        let _workers = router.spawn_workers(1, &controller.token());

        enqueue_event(&router, InputEvent::new("e1", ChannelType::Sms, "s", "hi"));

        wait_until(|| sink.commands.lock().len() == 1).await;
        assert_eq!(router.stats().requeued, 2);
        assert_eq!(router.stats().dead_lettered, 0);
        controller.trigger();
    }

    #[tokio::test]
    async fn test_retry_exhaustion_dead_letters() {
        // Four consecutive failures against a budget of three retries: the
        // event dies on the fourth failure and a fifth attempt never runs.
        let analyzer = Arc::new(ScriptedAnalyzer {
            failures_before_success: AtomicU64::new(u64::MAX),
            actions: Vec::new(),
        });
        let sink = Arc::new(CollectingCommands::default());
        let router = Arc::new(EventRouter::new(&queue_config(), analyzer, sink.clone()));

        let controller = fr0g_core::shutdown::ShutdownController::new();
        let _workers = router.spawn_workers(1, &controller.token());

        enqueue_event(&router, InputEvent::new("e1", ChannelType::Sms, "s", "hi"));

        wait_until(|| router.stats().dead_lettered == 1).await;
        assert!(sink.commands.lock().is_empty());
        assert_eq!(router.stats().requeued, 3);
        assert_eq!(router.dead_letters().total(), 1);

        let records = router.dead_letters().snapshot();
        assert_eq!(records[0].id, "e1");
        assert_eq!(records[0].retries, 3);
        controller.trigger();
    }

    struct StallingAnalyzer;

    #[async_trait]
    impl EventAnalyzer for StallingAnalyzer {
        async fn analyze(&self, _event: &InputEvent) -> Result<AnalysisResult, PlatformError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancellation_requeues_in_flight_event() {
        let sink = Arc::new(CollectingCommands::default());
        let router = Arc::new(EventRouter::new(
            &queue_config(),
            Arc::new(StallingAnalyzer),
            sink,
        ));

        let controller = fr0g_core::shutdown::ShutdownController::new();
        let workers = router.spawn_workers(1, &controller.token());

        enqueue_event(&router, InputEvent::new("e1", ChannelType::Sms, "s", "hi"));

        // Let the worker pick the event up and block in the analyzer call.
        wait_until(|| router.queue().is_empty()).await;
        controller.trigger();
        for worker in workers {
            worker.await.unwrap();
        }

        // The aborted attempt is back on the queue with its retry counted.
        let message = router.queue().try_dequeue().unwrap();
        assert_eq!(message.id, "e1");
        assert_eq!(message.retries, 1);
        assert_eq!(router.stats().requeued, 1);
    }

    #[tokio::test]
    async fn test_same_event_retries_reuse_command_ids() {
        let analyzer = Arc::new(ScriptedAnalyzer {
            failures_before_success: AtomicU64::new(0),
            actions: vec![action("t", "reply")],
        });
        let sink = Arc::new(CollectingCommands::default());
        let router = Arc::new(EventRouter::new(&queue_config(), analyzer, sink.clone()));

        let event = InputEvent::new("e1", ChannelType::Sms, "s", "hi");
        router
            .forward_actions(&event, &[action("t", "reply")])
            .await
            .unwrap();
        router
            .forward_actions(&event, &[action("t", "reply")])
            .await
            .unwrap();

        let commands = sink.commands.lock();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].id, commands[1].id);
    }
}
