//! The egress pipeline: output queue ownership, validation, review gating,
//! and the dispatch workers.
//!
//! Per command the order is fixed: duplicate-safe dispatch only ever
//! happens after validation and, for gated commands, after an approval.
//! The state machine per command is
//! `received -> validated -> {rejected | pending_review -> {approved |
//! rejected | expired} | dispatching -> {sent | failed_retry ->
//! dispatching | failed_terminal}}`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use fr0g_core::config::QueueConfig;
use fr0g_core::queue::{DeadLetters, PriorityQueue, QueueMessage};
use fr0g_core::retry::RetryConfig;
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::{OutputCommand, OutputResult, ReviewStatus, ValidationIssue};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::review::{self, ReviewQueue};
use crate::validate;

/// Bounded log of recent terminal results plus counters.
pub struct ResultsLog {
    ring: Mutex<VecDeque<OutputResult>>,
    keep: usize,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl ResultsLog {
    /// Keep the most recent `keep` results.
    pub fn new(keep: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(keep)),
            keep,
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Record one terminal result.
    pub fn record(&self, result: OutputResult) {
        if result.success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                command = %result.command_id,
                error = result.error_message.as_deref().unwrap_or(""),
                "command failed"
            );
        }
        let mut ring = self.ring.lock();
        if ring.len() == self.keep {
            ring.pop_front();
        }
        ring.push_back(result);
    }

    /// The most recent result for a command id.
    pub fn get(&self, command_id: &str) -> Option<OutputResult> {
        self.ring
            .lock()
            .iter()
            .rev()
            .find(|r| r.command_id == command_id)
            .cloned()
    }

    /// Counters `(succeeded, failed)`.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }

    /// Recent results, oldest first.
    pub fn snapshot(&self) -> Vec<OutputResult> {
        self.ring.lock().iter().cloned().collect()
    }
}

/// Owner of the output queue, the review queue, and the dispatch workers.
pub struct EgressPipeline {
    queue: Arc<PriorityQueue<OutputCommand>>,
    dead: Arc<DeadLetters>,
    dispatcher: Arc<Dispatcher>,
    review: Arc<ReviewQueue>,
    results: Arc<ResultsLog>,
    retry: RetryConfig,
    enqueue_timeout: std::time::Duration,
    max_retries: u32,
}

impl EgressPipeline {
    /// Build the pipeline.
    pub fn new(
        queue_config: &QueueConfig,
        dispatcher: Arc<Dispatcher>,
        review: Arc<ReviewQueue>,
    ) -> Self {
        Self {
            queue: Arc::new(PriorityQueue::new(queue_config.capacity)),
            dead: Arc::new(DeadLetters::new(256)),
            dispatcher,
            review,
            results: Arc::new(ResultsLog::new(256)),
            retry: queue_config.retry(),
            enqueue_timeout: queue_config.enqueue_timeout(),
            max_retries: queue_config.max_retries,
        }
    }

    /// The output queue, for the RPC surface and introspection.
    pub fn queue(&self) -> Arc<PriorityQueue<OutputCommand>> {
        Arc::clone(&self.queue)
    }

    /// The dead-letter sink.
    pub fn dead_letters(&self) -> Arc<DeadLetters> {
        Arc::clone(&self.dead)
    }

    /// The review queue.
    pub fn review(&self) -> Arc<ReviewQueue> {
        Arc::clone(&self.review)
    }

    /// The results log.
    pub fn results(&self) -> Arc<ResultsLog> {
        Arc::clone(&self.results)
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Accept one command into the output queue.
    pub async fn submit(&self, command: OutputCommand) -> Result<(), fr0g_core::error::PlatformError> {
        let priority = command.priority;
        let message = QueueMessage::new(
            command.id.clone(),
            command.channel,
            String::new(),
            command.target.clone(),
            command,
            priority,
            self.max_retries,
        );
        self.queue
            .enqueue(message, self.enqueue_timeout)
            .await
            .map_err(|_| fr0g_core::error::PlatformError::QueueFull)
    }

    /// Start the dispatch workers and the review decision loop.
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        shutdown: &ShutdownToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles: Vec<tokio::task::JoinHandle<()>> = (0..count)
            .map(|index| {
                let pipeline = Arc::clone(self);
                let token = shutdown.clone();
                tokio::spawn(pipeline.worker_loop(index, token))
            })
            .collect();
        let pipeline = Arc::clone(self);
        handles.push(tokio::spawn(pipeline.decision_loop(shutdown.clone())));
        handles
    }

    async fn worker_loop(self: Arc<Self>, index: usize, mut shutdown: ShutdownToken) {
        tracing::debug!(worker = index, "egress worker up");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => return,
                message = self.queue.dequeue() => message,
            };
            self.process(message).await;
        }
    }

    async fn process(&self, message: QueueMessage<OutputCommand>) {
        let command = message.payload.clone();

        let issues = validate::validate_command(&command);
        if validate::has_errors(&issues) {
            let mut result =
                OutputResult::failure(&command.id, validate::error_summary(&issues));
            attach_issues(&mut result, &issues);
            self.results.record(result);
            return;
        }

        if review::requires_review(&command) {
            let id = command.id.clone();
            if !self.review.park(command) {
                // At-most-once also holds while the first copy waits for a
                // reviewer: the duplicate terminates here.
                tracing::info!(command = %id, "duplicate command suppressed");
                self.results.record(
                    OutputResult::failure(&id, "duplicate command suppressed")
                        .with_metadata("duplicate_suppressed", "true"),
                );
            }
            return;
        }

        match self.dispatcher.dispatch(command).await {
            DispatchOutcome::Completed(mut result) => {
                attach_issues(&mut result, &issues);
                self.results.record(result);
            }
            DispatchOutcome::FailedPermanently(mut result) => {
                self.dead.push(
                    &message,
                    result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "permanent send failure".to_string()),
                );
                attach_issues(&mut result, &issues);
                self.results.record(result);
            }
            DispatchOutcome::RetryLater(_) => self.retry_later(message),
        }
    }

    fn retry_later(&self, message: QueueMessage<OutputCommand>) {
        match message.into_retry() {
            Ok(message) => {
                let delay = self.retry.delay_for(message.retries.saturating_sub(1));
                tracing::info!(
                    command = %message.id,
                    retries = message.retries,
                    delay_ms = delay.as_millis() as u64,
                    "requeueing command"
                );
                let queue = Arc::clone(&self.queue);
                let dead = Arc::clone(&self.dead);
                let results = Arc::clone(&self.results);
                let timeout = self.enqueue_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(rejected) = queue.enqueue(message, timeout).await {
                        let message = rejected.into_message();
                        dead.push(&message, "requeue rejected: queue full");
                        results.record(OutputResult::failure(
                            &message.id,
                            "retries abandoned: queue full",
                        ));
                    }
                });
            }
            Err(message) => {
                self.dead.push(&message, "retries exhausted");
                self.results.record(OutputResult::failure(
                    &message.id,
                    "retries exhausted: transient send failures",
                ));
            }
        }
    }

    async fn decision_loop(self: Arc<Self>, mut shutdown: ShutdownToken) {
        let mut feed = self.review.subscribe();
        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return,
                outcome = feed.recv() => match outcome {
                    Ok(outcome) => outcome,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::error!(missed, "review decisions lost to lag");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
            };

            let command = outcome.command;
            match command.review_status {
                ReviewStatus::Approved => {
                    // Back through the queue: dispatch order and retry
                    // policy stay uniform, and the gate skips decided
                    // commands.
                    if self.submit(command.clone()).await.is_err() {
                        self.dead_letter_approved(command);
                    }
                }
                ReviewStatus::Rejected => {
                    let comments = command.review_comments.as_deref().unwrap_or("no comments");
                    self.results.record(OutputResult::failure(
                        &command.id,
                        format!("rejected: {comments}"),
                    ));
                }
                ReviewStatus::Expired => {
                    self.results.record(OutputResult::failure(
                        &command.id,
                        "review deadline expired",
                    ));
                }
                _ => {}
            }
        }
    }

    fn dead_letter_approved(&self, command: OutputCommand) {
        let message = QueueMessage::new(
            command.id.clone(),
            command.channel,
            String::new(),
            command.target.clone(),
            command,
            0,
            0,
        );
        self.dead.push(&message, "approved command: queue full");
        self.results.record(OutputResult::failure(
            &message.id,
            "approved but queue full",
        ));
    }
}

fn attach_issues(result: &mut OutputResult, issues: &[ValidationIssue]) {
    if issues.is_empty() {
        return;
    }
    if let Ok(json) = serde_json::to_string(issues) {
        result.metadata.insert("validation_issues".to_string(), json);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fr0g_core::config::QueueConfig;
    use fr0g_core::shutdown::ShutdownController;
    use fr0g_core::types::{ChannelType, OutputAction};

    use crate::review::Decision;
    use crate::senders::testing::FakeSender;
    use crate::senders::{Sender, SenderRegistry};

    use super::*;

    fn command(id: &str, target: &str, content: &str) -> OutputCommand {
        OutputCommand::from(OutputAction {
            id: id.to_string(),
            channel: ChannelType::Sms,
            target: target.to_string(),
            content: content.to_string(),
            metadata: Default::default(),
            priority: 0,
        })
    }

    fn pipeline_with(
        sender: Arc<FakeSender>,
        review_deadline: Option<Duration>,
    ) -> (Arc<EgressPipeline>, ShutdownController) {
        let mut registry = SenderRegistry::new();
        registry.register(sender as Arc<dyn Sender>);
        let dispatcher = Arc::new(Dispatcher::new(registry));
        let review = Arc::new(ReviewQueue::new(review_deadline));
        let config = QueueConfig {
            capacity: 32,
            enqueue_timeout_ms: 100,
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        };
        let pipeline = Arc::new(EgressPipeline::new(&config, dispatcher, review));
        let controller = ShutdownController::new();
        pipeline.spawn_workers(2, &controller.token());
        (pipeline, controller)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_happy_path_dispatches_once() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        let (pipeline, controller) = pipeline_with(sender.clone(), None);

        pipeline
            .submit(command("c1", "+15551234", "Auto-reply: hi"))
            .await
            .unwrap();

        wait_until(|| sender.sent.lock().len() == 1).await;
        let result = pipeline.results().get("c1").unwrap();
        assert!(result.success);
        assert_eq!(sender.sent.lock()[0].content, "Auto-reply: hi");
        controller.trigger();
    }

    #[tokio::test]
    async fn test_validation_reject_never_reaches_sender() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        let (pipeline, controller) = pipeline_with(sender.clone(), None);

        pipeline.submit(command("c1", "", "hi")).await.unwrap();

        wait_until(|| pipeline.results().get("c1").is_some()).await;
        let result = pipeline.results().get("c1").unwrap();
        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("Target is required"));
        assert!(result.metadata.contains_key("validation_issues"));
        assert!(sender.sent.lock().is_empty());
        assert!(pipeline.review().is_empty());
        controller.trigger();
    }

    #[tokio::test]
    async fn test_urgent_content_parks_until_approved() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        let (pipeline, controller) = pipeline_with(sender.clone(), None);

        pipeline
            .submit(command("c1", "+15551234", "URGENT: reboot now"))
            .await
            .unwrap();

        wait_until(|| pipeline.review().len() == 1).await;
        // Parked, not dispatched.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sender.sent.lock().is_empty());

        pipeline
            .review()
            .decide("c1", Decision::Approve, "ops", None)
            .unwrap();

        wait_until(|| sender.sent.lock().len() == 1).await;
        let result = pipeline.results().get("c1").unwrap();
        assert!(result.success);
        controller.trigger();
    }

    #[tokio::test]
    async fn test_duplicate_of_parked_command_is_suppressed() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        let (pipeline, controller) = pipeline_with(sender.clone(), None);

        pipeline
            .submit(command("c1", "+15551234", "URGENT: reboot now"))
            .await
            .unwrap();
        wait_until(|| pipeline.review().len() == 1).await;

        // A second copy arriving while the first waits for a reviewer is
        // dropped with the duplicate marker, not parked twice.
        pipeline
            .submit(command("c1", "+15551234", "URGENT: reboot now"))
            .await
            .unwrap();
        wait_until(|| pipeline.results().get("c1").is_some()).await;
        let result = pipeline.results().get("c1").unwrap();
        assert!(!result.success);
        assert_eq!(
            result.metadata.get("duplicate_suppressed").map(String::as_str),
            Some("true")
        );
        assert_eq!(pipeline.review().len(), 1);
        assert!(sender.sent.lock().is_empty());

        // Approving the original still dispatches exactly once.
        pipeline
            .review()
            .decide("c1", Decision::Approve, "ops", None)
            .unwrap();
        wait_until(|| sender.sent.lock().len() == 1).await;
        controller.trigger();
    }

    #[tokio::test]
    async fn test_rejection_is_terminal_with_comments() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        let (pipeline, controller) = pipeline_with(sender.clone(), None);

        pipeline
            .submit(command("c1", "+15551234", "urgent stuff"))
            .await
            .unwrap();
        wait_until(|| pipeline.review().len() == 1).await;

        pipeline
            .review()
            .decide("c1", Decision::Reject, "ops", Some("not appropriate".into()))
            .unwrap();

        wait_until(|| pipeline.results().get("c1").is_some()).await;
        let result = pipeline.results().get("c1").unwrap();
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("rejected: not appropriate")
        );
        assert!(sender.sent.lock().is_empty());
        controller.trigger();
    }

    #[tokio::test]
    async fn test_expired_review_is_treated_as_rejection() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        let (pipeline, controller) =
            pipeline_with(sender.clone(), Some(Duration::from_millis(0)));

        pipeline
            .submit(command("c1", "+15551234", "urgent"))
            .await
            .unwrap();
        wait_until(|| pipeline.review().len() == 1).await;

        pipeline.review().expire_overdue();
        wait_until(|| pipeline.results().get("c1").is_some()).await;
        let result = pipeline.results().get("c1").unwrap();
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("expired"));
        assert!(sender.sent.lock().is_empty());
        controller.trigger();
    }

    #[tokio::test]
    async fn test_duplicate_submission_sends_once() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        let (pipeline, controller) = pipeline_with(sender.clone(), None);

        pipeline
            .submit(command("c1", "+15551234", "hi"))
            .await
            .unwrap();
        pipeline
            .submit(command("c1", "+15551234", "hi"))
            .await
            .unwrap();

        wait_until(|| pipeline.dispatcher().stats().suppressed == 1).await;
        assert_eq!(sender.sent.lock().len(), 1);
        // The duplicate's result carries the marker.
        let results = pipeline.results().snapshot();
        assert!(results.iter().any(|r| {
            r.command_id == "c1"
                && r.metadata.get("duplicate_suppressed").map(String::as_str) == Some("true")
        }));
        controller.trigger();
    }

    #[tokio::test]
    async fn test_transient_sender_failures_retry_until_exhaustion() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        sender
            .failures_before_success
            .store(u64::MAX, std::sync::atomic::Ordering::SeqCst);
        let (pipeline, controller) = pipeline_with(sender.clone(), None);

        pipeline
            .submit(command("c1", "+15551234", "hi"))
            .await
            .unwrap();

        wait_until(|| pipeline.dead_letters().total() == 1).await;
        let result = pipeline.results().get("c1").unwrap();
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("retries exhausted"));
        controller.trigger();
    }

    #[tokio::test]
    async fn test_warnings_ride_on_successful_result() {
        let sender = Arc::new(FakeSender::new(ChannelType::Sms));
        let (pipeline, controller) = pipeline_with(sender.clone(), None);

        pipeline
            .submit(command("c1", "+15551234", &"x".repeat(200)))
            .await
            .unwrap();

        wait_until(|| pipeline.results().get("c1").is_some()).await;
        let result = pipeline.results().get("c1").unwrap();
        assert!(result.success);
        assert!(result
            .metadata
            .get("validation_issues")
            .unwrap()
            .contains("exceeds"));
        controller.trigger();
    }
}
