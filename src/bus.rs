//! Message bus plumbing (Kafka)
//!
//! Producers serialize UTF-8 JSON; consumers run with auto-commit disabled
//! and `earliest` offset reset so offsets advance only after a handler
//! finishes. SASL/PLAIN is wired in when credentials are configured.

use crate::config::BusSettings;
use crate::error::PlatformError;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

fn base_config(settings: &BusSettings) -> ClientConfig {
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", &settings.bootstrap_servers);

    if let (Some(user), Some(pass)) = (&settings.sasl_user, &settings.sasl_pass) {
        cfg.set("security.protocol", "SASL_PLAINTEXT")
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", user)
            .set("sasl.password", pass);
    }

    cfg
}

/// JSON-serializing producer wrapper
#[derive(Clone)]
pub struct BusProducer {
    inner: FutureProducer,
}

impl BusProducer {
    pub fn new(settings: &BusSettings) -> crate::Result<Self> {
        let inner: FutureProducer = base_config(settings)
            .set("message.timeout.ms", "10000")
            .create()?;
        Ok(Self { inner })
    }

    /// Publish a value as JSON and wait for broker acknowledgement
    pub async fn publish<T: Serialize>(&self, topic: &str, key: &str, value: &T) -> crate::Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.inner
            .send(
                FutureRecord::to(topic).key(key).payload(&payload),
                Duration::from_secs(10),
            )
            .await
            .map_err(|(e, _)| PlatformError::Bus(e))?;
        Ok(())
    }
}

/// Consumer tuning for the worker kind
pub enum ConsumerProfile {
    /// Default tuning for short-lived handlers
    Standard,
    /// Long-job tuning: highlight jobs can legally hold a partition for
    /// hours, so the poll interval and session timeout are stretched.
    LongJob,
}

/// Create a manual-commit stream consumer subscribed to `topics`.
pub fn create_consumer(
    settings: &BusSettings,
    group_id: &str,
    topics: &[&str],
    profile: ConsumerProfile,
) -> crate::Result<StreamConsumer> {
    let mut cfg = base_config(settings);
    cfg.set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");

    if matches!(profile, ConsumerProfile::LongJob) {
        cfg.set("max.poll.interval.ms", "10800000")
            .set("session.timeout.ms", "180000")
            .set("heartbeat.interval.ms", "40000");
    }

    let consumer: StreamConsumer = cfg.create()?;
    consumer.subscribe(topics)?;
    info!("consumer '{}' subscribed to {:?}", group_id, topics);
    Ok(consumer)
}
