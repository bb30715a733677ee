#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use vigil::adapters::memory_store::MemoryStore;
use vigil::domain::compiler::{BandBounds, CompileContext};
use vigil::ports::registry_port::RuleRecord;

pub const HEAT_KEY: &str = "ind:heat_index";
pub const SUPPLY_KEY: &str = "ind:supply";
pub const DEMAND_KEY: &str = "ind:demand";

/// Compile context with the standard indicator fixtures registered.
pub fn make_context() -> CompileContext {
    let mut indicator_keys = HashMap::new();
    indicator_keys.insert("heat_index".to_string(), HEAT_KEY.to_string());
    indicator_keys.insert("supply".to_string(), SUPPLY_KEY.to_string());
    indicator_keys.insert("demand".to_string(), DEMAND_KEY.to_string());

    let mut band_bounds = HashMap::new();
    band_bounds.insert(
        "heat_index".to_string(),
        BandBounds {
            lower: Some(0.2),
            upper: Some(0.7),
        },
    );

    CompileContext {
        indicator_keys,
        band_bounds,
        default_cooldown_days: 7,
    }
}

pub fn make_rule(id: &str, dsl: &str) -> RuleRecord {
    RuleRecord {
        id: id.to_string(),
        version: 1,
        name: id.to_string(),
        dsl: dsl.to_string(),
        enabled: true,
        valid_from: None,
        valid_until: None,
    }
}

pub fn make_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// A fixed evaluation instant: 2025-06-15 12:00 UTC.
pub fn eval_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
}
