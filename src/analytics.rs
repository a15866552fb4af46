//! Per-query latency samples and rolling windowed statistics.
//!
//! Samples are append-only; the forwarder records one per answered query,
//! after the response has gone out. The statistics are computed over all
//! samples whose `created_at` falls inside the requested timeframe.

use crate::Error;
use crate::Type;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One resolved query.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub name: String,
    pub record_type: Type,

    /// How long the query took, in milliseconds.
    pub resolve_time: f64,

    /// The TTL of the answer's first rrset.
    pub ttl: u32,

    pub created_at: DateTime<Utc>,
}

/// Timeframes the statistics can be computed over.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Timeframe {
    Minutes15,
    Minutes30,
    Minutes60,
    Minutes90,
    Hours6,
    Hours12,
    Day1,
    Day3,
    Week1,
    Month1,
}

impl Timeframe {
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::Minutes15 => 15,
            Timeframe::Minutes30 => 30,
            Timeframe::Minutes60 => 60,
            Timeframe::Minutes90 => 90,
            Timeframe::Hours6 => 6 * 60,
            Timeframe::Hours12 => 12 * 60,
            Timeframe::Day1 => 24 * 60,
            Timeframe::Day3 => 3 * 24 * 60,
            Timeframe::Week1 => 7 * 24 * 60,
            Timeframe::Month1 => 30 * 24 * 60,
        }
    }
}

/// Resolve time statistics over one timeframe, in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub average: f64,
    pub median: f64,
    pub minimum: f64,
    pub maximum: f64,

    /// The 75th and 99th percentiles.
    pub percentiles: [f64; 2],
}

/// Where samples are persisted.
///
/// The crate ships an in-process store; deployments that need durable
/// samples point this trait at their document database (collection
/// `analytics`, indexed by `created_at`).
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn record(&self, sample: Sample) -> Result<(), Error>;

    /// All samples with `created_at` within `window` of now.
    async fn since(&self, window: ChronoDuration) -> Result<Vec<Sample>, Error>;
}

/// In-process append-only [`SampleStore`].
#[derive(Default)]
pub struct MemorySampleStore {
    samples: RwLock<Vec<Sample>>,
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn record(&self, sample: Sample) -> Result<(), Error> {
        self.samples.write().await.push(sample);
        Ok(())
    }

    async fn since(&self, window: ChronoDuration) -> Result<Vec<Sample>, Error> {
        let lower_bound = Utc::now() - window;

        Ok(self
            .samples
            .read()
            .await
            .iter()
            .filter(|s| s.created_at >= lower_bound)
            .cloned()
            .collect())
    }
}

/// Records per-query latency and computes the rolling statistics.
pub struct Analytics {
    store: Arc<dyn SampleStore>,
}

impl Analytics {
    pub fn new(store: Arc<dyn SampleStore>) -> Analytics {
        Analytics { store }
    }

    /// Appends one sample. Best-effort: a failing store is logged, never
    /// propagated, since the response has already been sent.
    pub async fn log_resolver(&self, name: &str, record_type: Type, resolve_time: f64, ttl: u32) {
        let sample = Sample {
            name: name.to_string(),
            record_type,
            resolve_time,
            ttl,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.record(sample).await {
            warn!("Failed to record latency sample for {}: {}", name, e);
        }
    }

    /// Computes the statistics over `timeframe`, or `None` when the window
    /// holds no samples.
    pub async fn statistics(&self, timeframe: Timeframe) -> Result<Option<Statistics>, Error> {
        let samples = self
            .store
            .since(ChronoDuration::minutes(timeframe.minutes()))
            .await?;

        let mut times: Vec<f64> = samples.iter().map(|s| s.resolve_time).collect();
        if times.is_empty() {
            return Ok(None);
        }

        times.sort_by(|a, b| a.partial_cmp(b).expect("resolve times are never NaN"));

        let average = times.iter().sum::<f64>() / times.len() as f64;

        Ok(Some(Statistics {
            average,
            median: percentile(&times, 0.50),
            minimum: times[0],
            maximum: times[times.len() - 1],
            percentiles: [percentile(&times, 0.75), percentile(&times, 0.99)],
        }))
    }

    /// Renders the statistics the way the daemon prints them once a minute.
    pub fn render_stats_table(stats: &Statistics, timeframe: Timeframe) -> String {
        let row = format!(
            "| {:>10} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10} |",
            format!("{:.2} ms", stats.average),
            format!("{:.2} ms", stats.median),
            format!("{:.2} ms", stats.minimum),
            format!("{:.2} ms", stats.maximum),
            format!("{:.2} ms", stats.percentiles[0]),
            format!("{:.2} ms", stats.percentiles[1]),
        );

        let header = format!(
            "| {:>10} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10} |",
            "Average", "Median", "Minimum", "Maximum", "75%", "99%",
        );
        let rule = "-".repeat(header.len());

        format!(
            "Per Minute Stats (last {} minutes)\n{rule}\n{header}\n{rule}\n{row}\n{rule}",
            timeframe.minutes(),
            rule = rule,
            header = header,
            row = row,
        )
    }

    /// Emits the 60-minute stats table every `period`. Advisory output only,
    /// runs until the task is dropped.
    pub async fn report_loop(self: Arc<Self>, period: std::time::Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The first tick fires immediately, skip it.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match self.statistics(Timeframe::Minutes60).await {
                Ok(Some(stats)) => {
                    info!(
                        "\n{}",
                        Analytics::render_stats_table(&stats, Timeframe::Minutes60)
                    );
                }
                Ok(None) => (),
                Err(e) => warn!("Failed to compute statistics: {}", e),
            }
        }
    }
}

/// Nearest-rank percentile over an already sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());

    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn analytics_with(times: &[f64]) -> Analytics {
        let analytics = Analytics::new(Arc::new(MemorySampleStore::default()));
        for time in times {
            analytics
                .log_resolver("example.com.", Type::A, *time, 60)
                .await;
        }
        analytics
    }

    #[tokio::test]
    async fn test_statistics() {
        let analytics = analytics_with(&[10.0, 20.0, 30.0, 40.0, 50.0]).await;

        let stats = analytics
            .statistics(Timeframe::Minutes60)
            .await
            .unwrap()
            .expect("expected statistics");

        assert_eq!(stats.minimum, 10.0);
        assert_eq!(stats.maximum, 50.0);
        assert_eq!(stats.average, 30.0);
        assert_eq!(stats.median, 30.0);
        assert_eq!(stats.percentiles, [40.0, 50.0]);
    }

    #[tokio::test]
    async fn test_statistics_empty_window() {
        let analytics = analytics_with(&[]).await;

        assert_eq!(analytics.statistics(Timeframe::Minutes60).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_percentiles_are_ordered() {
        let analytics =
            analytics_with(&[3.5, 120.0, 7.25, 42.0, 9.0, 88.8, 1.0, 64.2, 17.3]).await;

        let stats = analytics
            .statistics(Timeframe::Minutes60)
            .await
            .unwrap()
            .expect("expected statistics");

        assert!(stats.minimum <= stats.percentiles[0]);
        assert!(stats.percentiles[0] <= stats.percentiles[1]);
        assert!(stats.percentiles[1] <= stats.maximum);
        assert!(stats.minimum <= stats.average && stats.average <= stats.maximum);
    }

    #[test]
    fn test_timeframe_minutes() {
        assert_eq!(Timeframe::Minutes15.minutes(), 15);
        assert_eq!(Timeframe::Day1.minutes(), 1440);
        assert_eq!(Timeframe::Month1.minutes(), 43200);
    }
}
