use chrono::{DateTime, Utc};
use core_types::PoolStatus;
use serde::Serialize;
use std::fmt;

/// The kinds of Store activity the monitor distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Store,
    StoreBatch,
    Retrieve,
    SchemaValidation,
    Migration,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Store => "store",
            OperationKind::StoreBatch => "store_batch",
            OperationKind::Retrieve => "retrieve",
            OperationKind::SchemaValidation => "schema_validation",
            OperationKind::Migration => "migration",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetric {
    pub operation: OperationKind,
    /// Normalized SQL pattern, when the operation ran a query.
    pub query: Option<String>,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    /// Rows written or returned.
    pub size: u64,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Slow executions of one normalized query pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowQueryStats {
    pub pattern: String,
    pub count: usize,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub total_ms: f64,
    pub last_seen: DateTime<Utc>,
}

/// The 0–100 health figure and the sub-scores it is weighted from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthScore {
    pub score: f64,
    pub query_latency: f64,
    pub connection_latency: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
}

impl HealthScore {
    pub const QUERY_LATENCY_WEIGHT: f64 = 0.4;
    pub const CONNECTION_LATENCY_WEIGHT: f64 = 0.3;
    pub const CACHE_HIT_RATE_WEIGHT: f64 = 0.2;
    pub const ERROR_RATE_WEIGHT: f64 = 0.1;

    /// Combines sub-scores (each 0–100) into the weighted health score.
    pub fn from_components(
        query_latency: f64,
        connection_latency: f64,
        cache_hit_rate: f64,
        error_rate: f64,
    ) -> Self {
        let score = query_latency * Self::QUERY_LATENCY_WEIGHT
            + connection_latency * Self::CONNECTION_LATENCY_WEIGHT
            + cache_hit_rate * Self::CACHE_HIT_RATE_WEIGHT
            + error_rate * Self::ERROR_RATE_WEIGHT;
        Self {
            score: score.clamp(0.0, 100.0),
            query_latency,
            connection_latency,
            cache_hit_rate,
            error_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecommendationKind {
    IncreaseMaxConnections { current: u32, suggested: u32 },
    DecreaseMaxConnections { current: u32, suggested: u32 },
    InvestigateAcquireFailures { failed_acquires: u64 },
    ImproveCaching { hit_rate: f64 },
    OptimizeSlowQueries { patterns: usize },
}

/// A suggested adjustment. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    #[serde(flatten)]
    pub kind: RecommendationKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSummary {
    pub operation: OperationKind,
    pub count: usize,
    pub failed: usize,
    pub avg_ms: f64,
    pub max_ms: f64,
}

/// Everything `get_performance_report` returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub total_operations: usize,
    pub failed_operations: usize,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub max_duration_ms: f64,
    pub by_operation: Vec<OperationSummary>,
    pub slow_queries: Vec<SlowQueryStats>,
    pub health: HealthScore,
    pub recommendations: Vec<Recommendation>,
    pub pool: Option<PoolStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_components_score_100() {
        let health = HealthScore::from_components(100.0, 100.0, 100.0, 100.0);
        assert!((health.score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn weights_follow_the_documented_split() {
        let only_queries = HealthScore::from_components(100.0, 0.0, 0.0, 0.0);
        let only_connections = HealthScore::from_components(0.0, 100.0, 0.0, 0.0);
        let only_cache = HealthScore::from_components(0.0, 0.0, 100.0, 0.0);
        let only_errors = HealthScore::from_components(0.0, 0.0, 0.0, 100.0);
        assert!((only_queries.score - 40.0).abs() < 1e-9);
        assert!((only_connections.score - 30.0).abs() < 1e-9);
        assert!((only_cache.score - 20.0).abs() < 1e-9);
        assert!((only_errors.score - 10.0).abs() < 1e-9);
    }

    #[test]
    fn recommendations_serialize_with_a_kind_tag() {
        let rec = Recommendation {
            kind: RecommendationKind::IncreaseMaxConnections {
                current: 4,
                suggested: 6,
            },
            message: "pool saturated".to_string(),
        };
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["kind"], "increase_max_connections");
        assert_eq!(value["suggested"], 6);
        assert_eq!(value["message"], "pool saturated");
    }
}
