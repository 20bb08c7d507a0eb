use crate::error::AnalyticsError;
use crate::report::{
    HealthScore, OperationKind, OperationSummary, PerformanceMetric, PerformanceReport,
    Recommendation, RecommendationKind, SlowQueryStats,
};
use chrono::{DateTime, Utc};
use configuration::MonitorSettings;
use core_types::PoolStatus;
use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;

static STRING_LITERAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").ok());
static POSITIONAL_PARAM: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\$\d+").ok());
static NUMBER_LITERAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").ok());
static PARAM_LIST: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\(\s*\?(?:\s*,\s*\?)*\s*\)").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

fn replace_all<'a>(pattern: &LazyLock<Option<Regex>>, sql: &'a str, with: &str) -> Cow<'a, str> {
    match LazyLock::force(pattern) {
        Some(re) => re.replace_all(sql, with),
        None => Cow::Borrowed(sql),
    }
}

/// Reduces a SQL statement to its pattern: literals and placeholders become
/// `?`, placeholder lists collapse to `(?)` and whitespace is collapsed.
///
/// `SELECT * FROM t WHERE id = 42` and `SELECT * FROM t WHERE id = $1` share
/// the pattern `SELECT * FROM t WHERE id = ?`.
pub fn normalize_query(sql: &str) -> String {
    let sql = replace_all(&STRING_LITERAL, sql, "?");
    let sql = replace_all(&POSITIONAL_PARAM, &sql, "?");
    let sql = replace_all(&NUMBER_LITERAL, &sql, "?");
    let sql = replace_all(&PARAM_LIST, &sql, "(?)");
    replace_all(&WHITESPACE, &sql, " ").trim().to_string()
}

/// Records per-operation timings for one Store and derives health signals.
#[derive(Debug)]
pub struct PerformanceMonitor {
    settings: MonitorSettings,
    metrics: Mutex<VecDeque<PerformanceMetric>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl PerformanceMonitor {
    pub fn new(settings: MonitorSettings) -> Result<Self, AnalyticsError> {
        if settings.window_size == 0 {
            return Err(AnalyticsError::InvalidSetting {
                setting: "window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(settings.utilization_warning_ratio > 0.0 && settings.utilization_warning_ratio <= 1.0) {
            return Err(AnalyticsError::InvalidSetting {
                setting: "utilization_warning_ratio",
                reason: format!("{} is not in (0, 1]", settings.utilization_warning_ratio),
            });
        }
        for (setting, value) in [
            ("slow_query_threshold_ms", settings.slow_query_threshold_ms),
            ("acquire_time_warning_ms", settings.acquire_time_warning_ms),
            ("target_query_latency_ms", settings.target_query_latency_ms),
            ("target_acquire_latency_ms", settings.target_acquire_latency_ms),
        ] {
            if !(value > 0.0) {
                return Err(AnalyticsError::InvalidSetting {
                    setting,
                    reason: format!("{value} must be positive"),
                });
            }
        }

        Ok(Self {
            metrics: Mutex::new(VecDeque::with_capacity(settings.window_size)),
            settings,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Records a successful operation.
    pub fn record_operation(
        &self,
        operation: OperationKind,
        query: Option<&str>,
        duration: Duration,
        size: u64,
    ) {
        let metric = self.metric(operation, query, duration, size, None);
        if metric.duration_ms >= self.settings.slow_query_threshold_ms {
            tracing::warn!(
                operation = %operation,
                duration_ms = metric.duration_ms,
                query = metric.query.as_deref().unwrap_or("-"),
                "Slow database operation."
            );
        }
        self.push(metric);
    }

    /// Records an operation that ended in an error.
    pub fn record_failed_operation(
        &self,
        operation: OperationKind,
        query: Option<&str>,
        duration: Duration,
        error: &str,
    ) {
        let metric = self.metric(operation, query, duration, 0, Some(error.to_string()));
        tracing::debug!(
            operation = %operation,
            duration_ms = metric.duration_ms,
            error,
            "Database operation failed."
        );
        self.push(metric);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Hit rate in `[0, 1]`, or `None` when the cache has never been consulted.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        (lookups > 0).then(|| hits as f64 / lookups as f64)
    }

    /// A copy of the metrics currently inside the window, oldest first.
    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        let mut metrics = self.lock();
        self.evict_expired(&mut metrics, Utc::now());
        metrics.iter().cloned().collect()
    }

    /// Groups executions slower than `threshold_ms` by normalized query
    /// pattern, slowest average first.
    pub fn get_slow_queries(&self, threshold_ms: f64) -> Vec<SlowQueryStats> {
        let mut groups: HashMap<String, SlowQueryStats> = HashMap::new();
        for metric in self.metrics() {
            let Some(pattern) = metric.query else { continue };
            if metric.duration_ms < threshold_ms {
                continue;
            }
            let entry = groups.entry(pattern.clone()).or_insert_with(|| SlowQueryStats {
                pattern,
                count: 0,
                avg_ms: 0.0,
                max_ms: 0.0,
                total_ms: 0.0,
                last_seen: metric.timestamp,
            });
            entry.count += 1;
            entry.total_ms += metric.duration_ms;
            entry.max_ms = entry.max_ms.max(metric.duration_ms);
            entry.avg_ms = entry.total_ms / entry.count as f64;
            if metric.timestamp > entry.last_seen {
                entry.last_seen = metric.timestamp;
            }
        }
        let mut slow: Vec<SlowQueryStats> = groups.into_values().collect();
        slow.sort_by(|a, b| b.avg_ms.total_cmp(&a.avg_ms));
        slow
    }

    /// Computes the 0–100 health score.
    ///
    /// Latency sub-scores are 100 up to their target and decay as
    /// `100 * target / observed` beyond it. Missing signals (no queries, no
    /// pool, no cache lookups) score 100.
    pub fn compute_health_score(&self, pool: Option<&PoolStatus>) -> HealthScore {
        let metrics = self.metrics();

        let succeeded: Vec<f64> = metrics
            .iter()
            .filter(|m| m.succeeded)
            .map(|m| m.duration_ms)
            .collect();
        let query_latency = if succeeded.is_empty() {
            100.0
        } else {
            let avg = succeeded.iter().sum::<f64>() / succeeded.len() as f64;
            latency_score(avg, self.settings.target_query_latency_ms)
        };

        let connection_latency = match pool {
            Some(status) if status.total_acquired > 0 => latency_score(
                status.avg_acquire_time_ms,
                self.settings.target_acquire_latency_ms,
            ),
            _ => 100.0,
        };

        let cache_hit_rate = self.cache_hit_rate().map_or(100.0, |rate| rate * 100.0);

        let error_rate = if metrics.is_empty() {
            100.0
        } else {
            let failed = metrics.iter().filter(|m| !m.succeeded).count();
            (1.0 - failed as f64 / metrics.len() as f64) * 100.0
        };

        HealthScore::from_components(query_latency, connection_latency, cache_hit_rate, error_rate)
    }

    /// Suggests pool and caching adjustments from a pool snapshot. Each
    /// recommendation is also logged as a warning; nothing is applied.
    pub fn recommend_pool_adjustment(&self, status: &PoolStatus) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();
        let max = status.max_connections;

        let slow_acquire = status.total_acquired > 0
            && status.avg_acquire_time_ms > self.settings.acquire_time_warning_ms;
        let saturated = status.utilization() > self.settings.utilization_warning_ratio;
        if slow_acquire || saturated {
            let suggested = (max + max.div_ceil(2)).max(max + 1);
            let mut reasons = Vec::new();
            if slow_acquire {
                reasons.push(format!(
                    "average acquire time {:.1}ms exceeds {:.1}ms",
                    status.avg_acquire_time_ms, self.settings.acquire_time_warning_ms
                ));
            }
            if saturated {
                reasons.push(format!(
                    "utilization {:.0}% exceeds {:.0}%",
                    status.utilization() * 100.0,
                    self.settings.utilization_warning_ratio * 100.0
                ));
            }
            recommendations.push(Recommendation {
                kind: RecommendationKind::IncreaseMaxConnections {
                    current: max,
                    suggested,
                },
                message: format!(
                    "Raise max_connections from {max} to {suggested}: {}",
                    reasons.join(", ")
                ),
            });
        } else if status.total_acquired >= 100
            && max > status.min_connections
            && status.peak_active.saturating_mul(4) <= max
        {
            let suggested = (status.peak_active * 2).max(status.min_connections).max(1);
            if suggested < max {
                recommendations.push(Recommendation {
                    kind: RecommendationKind::DecreaseMaxConnections {
                        current: max,
                        suggested,
                    },
                    message: format!(
                        "Peak usage of {} connections never approached max_connections {max}; {suggested} would suffice",
                        status.peak_active
                    ),
                });
            }
        }

        if status.failed_acquires > 0 {
            recommendations.push(Recommendation {
                kind: RecommendationKind::InvestigateAcquireFailures {
                    failed_acquires: status.failed_acquires,
                },
                message: format!(
                    "{} connection acquisitions failed or timed out",
                    status.failed_acquires
                ),
            });
        }

        let lookups =
            self.cache_hits.load(Ordering::Relaxed) + self.cache_misses.load(Ordering::Relaxed);
        if let Some(rate) = self.cache_hit_rate()
            && lookups >= 10
            && rate < self.settings.min_cache_hit_rate
        {
            recommendations.push(Recommendation {
                kind: RecommendationKind::ImproveCaching { hit_rate: rate },
                message: format!(
                    "Schema validation cache hit rate {:.0}% is below {:.0}%; consider a longer cache TTL",
                    rate * 100.0,
                    self.settings.min_cache_hit_rate * 100.0
                ),
            });
        }

        let slow = self.get_slow_queries(self.settings.slow_query_threshold_ms);
        if !slow.is_empty() {
            recommendations.push(Recommendation {
                kind: RecommendationKind::OptimizeSlowQueries {
                    patterns: slow.len(),
                },
                message: format!(
                    "{} query patterns exceeded {:.0}ms; slowest: {}",
                    slow.len(),
                    self.settings.slow_query_threshold_ms,
                    slow[0].pattern
                ),
            });
        }

        for recommendation in &recommendations {
            tracing::warn!(recommendation = %recommendation.message, "Performance recommendation.");
        }
        recommendations
    }

    /// Builds the full report. `pool` is `None` before the Store is set up.
    pub fn report(&self, pool: Option<PoolStatus>) -> PerformanceReport {
        let metrics = self.metrics();
        let mut durations: Vec<f64> = metrics.iter().map(|m| m.duration_ms).collect();
        durations.sort_by(f64::total_cmp);

        let total = metrics.len();
        let failed = metrics.iter().filter(|m| !m.succeeded).count();
        let avg = if total == 0 {
            0.0
        } else {
            durations.iter().sum::<f64>() / total as f64
        };

        let mut by_operation: BTreeMap<OperationKind, OperationSummary> = BTreeMap::new();
        for metric in &metrics {
            let summary = by_operation
                .entry(metric.operation)
                .or_insert_with(|| OperationSummary {
                    operation: metric.operation,
                    count: 0,
                    failed: 0,
                    avg_ms: 0.0,
                    max_ms: 0.0,
                });
            summary.avg_ms = (summary.avg_ms * summary.count as f64 + metric.duration_ms)
                / (summary.count + 1) as f64;
            summary.count += 1;
            summary.max_ms = summary.max_ms.max(metric.duration_ms);
            if !metric.succeeded {
                summary.failed += 1;
            }
        }

        let recommendations = pool
            .as_ref()
            .map(|status| self.recommend_pool_adjustment(status))
            .unwrap_or_default();

        PerformanceReport {
            generated_at: Utc::now(),
            total_operations: total,
            failed_operations: failed,
            avg_duration_ms: avg,
            p95_duration_ms: percentile(&durations, 0.95),
            max_duration_ms: durations.last().copied().unwrap_or(0.0),
            by_operation: by_operation.into_values().collect(),
            slow_queries: self.get_slow_queries(self.settings.slow_query_threshold_ms),
            health: self.compute_health_score(pool.as_ref()),
            recommendations,
            pool,
        }
    }

    fn metric(
        &self,
        operation: OperationKind,
        query: Option<&str>,
        duration: Duration,
        size: u64,
        error: Option<String>,
    ) -> PerformanceMetric {
        PerformanceMetric {
            operation,
            query: query.map(normalize_query),
            duration_ms: duration.as_secs_f64() * 1_000.0,
            timestamp: Utc::now(),
            size,
            succeeded: error.is_none(),
            error,
        }
    }

    fn push(&self, metric: PerformanceMetric) {
        let now = metric.timestamp;
        let mut metrics = self.lock();
        metrics.push_back(metric);
        while metrics.len() > self.settings.window_size {
            metrics.pop_front();
        }
        self.evict_expired(&mut metrics, now);
    }

    fn evict_expired(&self, metrics: &mut VecDeque<PerformanceMetric>, now: DateTime<Utc>) {
        let Ok(window) = chrono::Duration::from_std(self.settings.window()) else {
            return;
        };
        let cutoff = now - window;
        while metrics.front().is_some_and(|m| m.timestamp < cutoff) {
            metrics.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PerformanceMetric>> {
        // A panic while holding the lock cannot leave the buffer half-written.
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn latency_score(observed_ms: f64, target_ms: f64) -> f64 {
    if observed_ms <= target_ms {
        100.0
    } else {
        100.0 * target_ms / observed_ms
    }
}

fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
