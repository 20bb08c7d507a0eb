//! # Strata Analytics
//!
//! Performance observability for a Store. It acts as the "unbiased judge" of
//! how the database integration behaves under load.
//!
//! ## Architectural Principles
//!
//! - **Observe, never act:** The `PerformanceMonitor` records timings and emits
//!   recommendations and warnings. It never changes live configuration; a
//!   caller decides whether to apply what it suggests.
//! - **Bounded memory:** Metrics live in a ring buffer evicted by capacity and
//!   by age, so a long-running Store never grows its history without bound.
//!
//! ## Public API
//!
//! - `PerformanceMonitor`: records operations, groups slow queries, computes the
//!   health score and pool recommendations.
//! - `PerformanceReport`: the snapshot handed to callers of `get_performance_report`.
//! - `AnalyticsError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod error;
pub mod monitor;
pub mod report;

// Re-export the key components to create a clean, public-facing API.
pub use error::AnalyticsError;
pub use monitor::{PerformanceMonitor, normalize_query};
pub use report::{
    HealthScore, OperationKind, OperationSummary, PerformanceMetric, PerformanceReport,
    Recommendation, RecommendationKind, SlowQueryStats,
};
