//! Time-series data access port.
//!
//! The evaluator is storage-agnostic: everything it needs from the
//! indicator store and the firing history goes through this trait. A
//! missing data point is `None`, never an error — the evaluator treats
//! gaps as "condition false" (fail-closed).

use crate::domain::ast::BandState;
use chrono::{DateTime, Utc};

pub trait DataPort: Send + Sync {
    /// Point-in-time reading for a resolved indicator key.
    fn point_value(&self, indicator_key: &str, at: DateTime<Utc>) -> Option<f64>;

    /// Categorical band membership for a resolved indicator key.
    fn band_state(&self, indicator_key: &str, at: DateTime<Utc>) -> Option<BandState>;

    /// Least-squares slope of the indicator over the trailing window.
    fn slope(&self, indicator_key: &str, window_days: u32, at: DateTime<Utc>) -> Option<f64>;

    /// When a firing with this dedupe fingerprint was last recorded.
    fn last_firing(&self, fingerprint: &str) -> Option<DateTime<Utc>>;
}
