//! Firing and activation sink port.
//!
//! Firing recording must be idempotent under the `(rule_id, fingerprint)`
//! key: recording the same pair twice returns `None` the second time and
//! must not produce a second downstream activation event.

use crate::domain::ast::Action;
use crate::domain::error::VigilError;
use crate::domain::evaluator::Evidence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable record of one rule firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringRecord {
    pub rule_id: String,
    pub fired_at: DateTime<Utc>,
    pub fingerprint: String,
    pub evidence: BTreeMap<String, Evidence>,
    pub action: Action,
}

/// Downstream activation event emitted once per new firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationEvent {
    pub rule_id: String,
    pub firing_id: String,
    pub action: Action,
    pub evidence: BTreeMap<String, Evidence>,
    pub auto_generated: bool,
}

pub trait FiringSinkPort: Send + Sync {
    /// Record a firing. Returns the new firing id, or `None` when the
    /// `(rule_id, fingerprint)` pair was already recorded.
    fn record_firing(&self, firing: &FiringRecord) -> Result<Option<String>, VigilError>;

    /// Emit the downstream activation event for a newly recorded firing.
    fn emit_activation(&self, event: &ActivationEvent) -> Result<(), VigilError>;
}
