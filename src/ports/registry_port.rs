//! Rule registry port.
//!
//! The core does not define rule storage shape, only that each rule is
//! uniquely identified, versioned, and carries its raw DSL text and a
//! validity window.

use crate::domain::error::VigilError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: String,
    pub version: u32,
    pub name: String,
    /// Raw single-line DSL text, parsed on load.
    pub dsl: String,
    pub enabled: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl RuleRecord {
    /// Whether this rule should be evaluated at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(from) = self.valid_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if now > until {
                return false;
            }
        }
        true
    }
}

pub trait RuleRegistryPort: Send + Sync {
    /// Enabled rules whose validity window covers `now`.
    fn active_rules(&self, now: DateTime<Utc>) -> Result<Vec<RuleRecord>, VigilError>;
}
