//! Prometheus metric definitions
//!
//! All metrics hang off an owned [`Metrics`] struct with its own registry;
//! components receive a reference instead of reaching for globals.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};

/// Owned metric set for one worker process
pub struct Metrics {
    registry: Registry,

    /// Upstream failures by component (doc store, bus, blob, gateway, cache)
    pub upstream_failures: IntCounterVec,
    /// Requests rejected by the token-bucket limiter
    pub rate_limited: IntCounter,

    /// Oplog jobs by terminal status
    pub oplog_jobs: IntCounterVec,
    /// Time spent executing one oplog job
    pub oplog_job_seconds: Histogram,
    /// Oplog rows rescheduled for retry
    pub oplog_retries: IntCounter,

    /// Searches served while the rerank breaker was open
    pub rerank_degraded: IntCounter,
    /// Search-side cache hits (analysis shortcuts)
    pub search_cache_hits: IntCounter,

    /// Highlight jobs by outcome
    pub highlight_jobs: IntCounterVec,
    /// Highlight job wall time
    pub highlight_job_seconds: Histogram,
    /// Highlight clips produced
    pub highlight_clips: IntCounter,
    /// Per-signal wall time
    pub signal_seconds: HistogramVec,
    /// Per-signal failures
    pub signal_failures: IntCounterVec,
    /// Caption availability per job
    pub vtt_used: IntCounterVec,
    /// AI gateway calls by purpose
    pub intelligence_calls: IntCounterVec,

    /// Current CPU usage percent (governance)
    pub cpu_percent: Gauge,
    /// Current RSS in MB (governance)
    pub memory_mb: Gauge,
    /// Governance throttle pauses
    pub throttle_total: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let upstream_failures = IntCounterVec::new(
            Opts::new(
                "mediaforge_upstream_failures_total",
                "Upstream dependency failures",
            ),
            &["component"],
        )?;
        let rate_limited = IntCounter::new(
            "mediaforge_rate_limited_total",
            "Requests rejected by the rate limiter",
        )?;

        let oplog_jobs = IntCounterVec::new(
            Opts::new("mediaforge_oplog_jobs_total", "Oplog jobs processed"),
            &["status"],
        )?;
        let oplog_job_seconds = Histogram::with_opts(HistogramOpts::new(
            "mediaforge_oplog_job_seconds",
            "Time spent processing one oplog job",
        ))?;
        let oplog_retries = IntCounter::new(
            "mediaforge_oplog_retries_total",
            "Oplog rows rescheduled for retry",
        )?;

        let rerank_degraded = IntCounter::new(
            "mediaforge_rerank_degraded_total",
            "Searches served with the rerank circuit breaker open",
        )?;
        let search_cache_hits = IntCounter::new(
            "mediaforge_search_cache_hits_total",
            "Search-side cache hits",
        )?;

        let highlight_jobs = IntCounterVec::new(
            Opts::new("mediaforge_highlight_jobs_total", "Highlight jobs processed"),
            &["status"],
        )?;
        let highlight_job_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "mediaforge_highlight_job_seconds",
                "Highlight job wall time",
            )
            .buckets(vec![30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0]),
        )?;
        let highlight_clips = IntCounter::new(
            "mediaforge_highlight_clips_total",
            "Highlight clips generated",
        )?;
        let signal_seconds = HistogramVec::new(
            HistogramOpts::new(
                "mediaforge_highlight_signal_seconds",
                "Wall time per signal module",
            ),
            &["signal"],
        )?;
        let signal_failures = IntCounterVec::new(
            Opts::new(
                "mediaforge_highlight_signal_failures_total",
                "Signal module failures",
            ),
            &["signal"],
        )?;
        let vtt_used = IntCounterVec::new(
            Opts::new(
                "mediaforge_highlight_vtt_used_total",
                "Caption availability per highlight job",
            ),
            &["used"],
        )?;
        let intelligence_calls = IntCounterVec::new(
            Opts::new(
                "mediaforge_intelligence_calls_total",
                "AI gateway calls by purpose",
            ),
            &["purpose"],
        )?;

        let cpu_percent = Gauge::new(
            "mediaforge_governance_cpu_percent",
            "Current CPU usage percent",
        )?;
        let memory_mb = Gauge::new(
            "mediaforge_governance_memory_mb",
            "Current process RSS in MB",
        )?;
        let throttle_total = IntCounter::new(
            "mediaforge_governance_throttle_total",
            "Governance throttle pauses",
        )?;

        for collector in [
            Box::new(upstream_failures.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(rate_limited.clone()),
            Box::new(oplog_jobs.clone()),
            Box::new(oplog_job_seconds.clone()),
            Box::new(oplog_retries.clone()),
            Box::new(rerank_degraded.clone()),
            Box::new(search_cache_hits.clone()),
            Box::new(highlight_jobs.clone()),
            Box::new(highlight_job_seconds.clone()),
            Box::new(highlight_clips.clone()),
            Box::new(signal_seconds.clone()),
            Box::new(signal_failures.clone()),
            Box::new(vtt_used.clone()),
            Box::new(intelligence_calls.clone()),
            Box::new(cpu_percent.clone()),
            Box::new(memory_mb.clone()),
            Box::new(throttle_total.clone()),
        ] {
            registry.register(collector)?;
        }

        Ok(Self {
            registry,
            upstream_failures,
            rate_limited,
            oplog_jobs,
            oplog_job_seconds,
            oplog_retries,
            rerank_degraded,
            search_cache_hits,
            highlight_jobs,
            highlight_job_seconds,
            highlight_clips,
            signal_seconds,
            signal_failures,
            vtt_used,
            intelligence_calls,
            cpu_percent,
            memory_mb,
            throttle_total,
        })
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics.highlight_jobs.with_label_values(&["success"]).inc();
        metrics.cpu_percent.set(42.0);

        let rendered = metrics.render();
        assert!(rendered.contains("mediaforge_highlight_jobs_total"));
        assert!(rendered.contains("mediaforge_governance_cpu_percent"));
    }
}
