//! Highlight request consumer
//!
//! Strictly one job at a time per worker. Each message tries the per-video
//! distributed lock; contention means another worker owns the video, so
//! the offset commits and the message is silently dropped. The job runs
//! under the configured timeout; every terminal path emits exactly one
//! outcome event and releases the lock.

use super::job::JobRunner;
use super::{HighlightJobPayload, JobFailure, JobOutcome};
use crate::bus::BusProducer;
use crate::config::Settings;
use crate::lock::VideoLock;
use crate::metrics::Metrics;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub struct HighlightConsumer {
    consumer: StreamConsumer,
    producer: BusProducer,
    lock: VideoLock,
    runner: JobRunner,
    settings: Arc<Settings>,
    metrics: Arc<Metrics>,
}

impl HighlightConsumer {
    pub fn new(
        consumer: StreamConsumer,
        producer: BusProducer,
        lock: VideoLock,
        runner: JobRunner,
        settings: Arc<Settings>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            consumer,
            producer,
            lock,
            runner,
            settings,
            metrics,
        }
    }

    pub async fn run(&self) -> crate::Result<()> {
        info!(
            "highlight consumer started on topic {}",
            self.settings.bus.highlight_request_topic
        );

        loop {
            let message = self.consumer.recv().await?;

            let payload: HighlightJobPayload = match message
                .payload()
                .ok_or("empty message")
                .and_then(|raw| serde_json::from_slice(raw).map_err(|_| "malformed payload"))
            {
                Ok(payload) => payload,
                Err(reason) => {
                    warn!("dropping bad highlight request: {}", reason);
                    self.consumer.commit_message(&message, CommitMode::Async)?;
                    continue;
                }
            };

            let video_id = payload.video_id.clone();
            info!("received highlight request for video {}", video_id);

            // Per-video exclusivity
            match self.lock.acquire(&video_id).await {
                Ok(true) => {}
                Ok(false) => {
                    self.consumer.commit_message(&message, CommitMode::Async)?;
                    continue;
                }
                Err(e) => {
                    error!("lock acquisition failed for {}: {}", video_id, e);
                    self.metrics
                        .upstream_failures
                        .with_label_values(&["cache"])
                        .inc();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            }

            self.process_locked(&payload).await;

            self.lock.release(&video_id).await;
            self.consumer.commit_message(&message, CommitMode::Async)?;
        }
    }

    /// Run the job under the timeout and emit exactly one outcome event.
    async fn process_locked(&self, payload: &HighlightJobPayload) {
        let started = Instant::now();
        let timeout = Duration::from_secs(self.settings.governance.job_timeout_secs);

        match tokio::time::timeout(timeout, self.runner.run(payload)).await {
            Ok(Ok(outcome)) => {
                let topic = outcome_topic(&self.settings, &outcome);
                self.emit(topic, &payload.video_id, &outcome).await;
            }
            Ok(Err(e)) => {
                error!("job failed for {}: {}", payload.video_id, e);
                self.metrics
                    .highlight_jobs
                    .with_label_values(&["error"])
                    .inc();
                let failure = JobFailure {
                    video_id: payload.video_id.clone(),
                    error: e.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                self.emit(
                    &self.settings.bus.highlight_failed_topic,
                    &payload.video_id,
                    &failure,
                )
                .await;
            }
            Err(_) => {
                error!(
                    "job timed out for {} after {}s",
                    payload.video_id,
                    timeout.as_secs()
                );
                self.metrics
                    .highlight_jobs
                    .with_label_values(&["timeout"])
                    .inc();
                let failure = JobFailure {
                    video_id: payload.video_id.clone(),
                    error: format!("job timed out after {}s", timeout.as_secs()),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                self.emit(
                    &self.settings.bus.highlight_failed_topic,
                    &payload.video_id,
                    &failure,
                )
                .await;
            }
        }
    }

    async fn emit<T: serde::Serialize>(&self, topic: &str, key: &str, event: &T) {
        match self.producer.publish(topic, key, event).await {
            Ok(()) => info!("emitted {} for {}", topic, key),
            Err(e) => {
                error!("outcome event for {} not published: {}", key, e);
                self.metrics
                    .upstream_failures
                    .with_label_values(&["bus"])
                    .inc();
            }
        }
    }
}

/// Choose the outcome topic for a finished job.
pub fn outcome_topic<'a>(settings: &'a Settings, outcome: &JobOutcome) -> &'a str {
    if outcome.warnings.is_empty() {
        &settings.bus.highlight_complete_topic
    } else {
        &settings.bus.highlight_degraded_topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_topic_selection() {
        let settings = Settings::from_env();
        let mut outcome = JobOutcome {
            video_id: "v1".to_string(),
            clip_count: 1,
            highlights_json_path: "highlights/v1/highlights.json".to_string(),
            duration_ms: 1000,
            vtt_used: false,
            warnings: vec![],
        };
        assert_eq!(
            outcome_topic(&settings, &outcome),
            settings.bus.highlight_complete_topic
        );

        outcome.warnings.push("title enrichment failed".to_string());
        assert_eq!(
            outcome_topic(&settings, &outcome),
            settings.bus.highlight_degraded_topic
        );
    }

    #[test]
    fn test_zero_clips_still_completes() {
        let settings = Settings::from_env();
        let outcome = JobOutcome {
            video_id: "v1".to_string(),
            clip_count: 0,
            highlights_json_path: String::new(),
            duration_ms: 10,
            vtt_used: false,
            warnings: vec![],
        };
        // Zero clips without warnings is a completion, not a failure
        assert_eq!(
            outcome_topic(&settings, &outcome),
            settings.bus.highlight_complete_topic
        );
    }
}
