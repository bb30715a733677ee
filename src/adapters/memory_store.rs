//! In-memory store backing the rule registry, data source, firing sink and
//! incident label ports. Used by the scenario simulator, the backtester and
//! tests; a deployment would put database-backed adapters behind the same
//! ports.

use crate::domain::ast::BandState;
use crate::domain::error::VigilError;
use crate::domain::evaluator::day_bucket;
use crate::ports::data_port::DataPort;
use crate::ports::incident_port::IncidentPort;
use crate::ports::registry_port::{RuleRecord, RuleRegistryPort};
use crate::ports::sink_port::{ActivationEvent, FiringRecord, FiringSinkPort};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    rules: Vec<RuleRecord>,
    /// Storage key → value applied on every day without an override.
    points: HashMap<String, f64>,
    /// `(storage key, day bucket)` → value for that day; `None` models a
    /// data gap.
    point_overrides: HashMap<(String, i64), Option<f64>>,
    bands: HashMap<String, BandState>,
    slopes: HashMap<String, f64>,
    incidents: HashSet<(String, NaiveDate)>,
    firings: Vec<FiringRecord>,
    activations: Vec<ActivationEvent>,
    /// Dedupe index over `(rule_id, fingerprint)`.
    seen: HashSet<(String, String)>,
    last_by_fingerprint: HashMap<String, DateTime<Utc>>,
    next_firing_id: u64,
    fail_writes: bool,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn add_rule(&self, rule: RuleRecord) -> Result<(), VigilError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.rules.iter().any(|r| r.id == rule.id) {
            return Err(VigilError::DuplicateRuleId(rule.id));
        }
        inner.rules.push(rule);
        Ok(())
    }

    /// Replace the rule with the same id, or add it if absent.
    pub fn replace_rule(&self, rule: RuleRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.rules.retain(|r| r.id != rule.id);
        inner.rules.push(rule);
    }

    /// Set a value returned for this key on every day without an override.
    pub fn set_point(&self, key: &str, value: f64) {
        self.inner
            .lock()
            .unwrap()
            .points
            .insert(key.to_string(), value);
    }

    /// Override the value for one day bucket; `None` models missing data.
    pub fn set_point_on(&self, key: &str, bucket: i64, value: Option<f64>) {
        self.inner
            .lock()
            .unwrap()
            .point_overrides
            .insert((key.to_string(), bucket), value);
    }

    pub fn set_band(&self, key: &str, state: BandState) {
        self.inner
            .lock()
            .unwrap()
            .bands
            .insert(key.to_string(), state);
    }

    pub fn set_slope(&self, key: &str, slope: f64) {
        self.inner
            .lock()
            .unwrap()
            .slopes
            .insert(key.to_string(), slope);
    }

    pub fn add_incident(&self, channel: &str, day: NaiveDate) {
        self.inner
            .lock()
            .unwrap()
            .incidents
            .insert((channel.to_string(), day));
    }

    /// Make subsequent sink writes fail, for error-path tests.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    pub fn firings(&self) -> Vec<FiringRecord> {
        self.inner.lock().unwrap().firings.clone()
    }

    pub fn activations(&self) -> Vec<ActivationEvent> {
        self.inner.lock().unwrap().activations.clone()
    }

    pub fn clear_firings(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.firings.clear();
        inner.activations.clear();
        inner.seen.clear();
        inner.last_by_fingerprint.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistryPort for MemoryStore {
    fn active_rules(&self, now: DateTime<Utc>) -> Result<Vec<RuleRecord>, VigilError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .rules
            .iter()
            .filter(|r| r.is_active(now))
            .cloned()
            .collect())
    }
}

impl DataPort for MemoryStore {
    fn point_value(&self, key: &str, at: DateTime<Utc>) -> Option<f64> {
        let inner = self.inner.lock().unwrap();
        if let Some(value) = inner.point_overrides.get(&(key.to_string(), day_bucket(at))) {
            return *value;
        }
        inner.points.get(key).copied()
    }

    fn band_state(&self, key: &str, _at: DateTime<Utc>) -> Option<BandState> {
        self.inner.lock().unwrap().bands.get(key).copied()
    }

    fn slope(&self, key: &str, _window_days: u32, _at: DateTime<Utc>) -> Option<f64> {
        self.inner.lock().unwrap().slopes.get(key).copied()
    }

    fn last_firing(&self, fingerprint: &str) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .unwrap()
            .last_by_fingerprint
            .get(fingerprint)
            .copied()
    }
}

impl FiringSinkPort for MemoryStore {
    fn record_firing(&self, firing: &FiringRecord) -> Result<Option<String>, VigilError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(VigilError::SinkWrite {
                reason: "injected write failure".to_string(),
            });
        }
        let key = (firing.rule_id.clone(), firing.fingerprint.clone());
        if inner.seen.contains(&key) {
            return Ok(None);
        }
        inner.seen.insert(key);
        inner
            .last_by_fingerprint
            .insert(firing.fingerprint.clone(), firing.fired_at);
        inner.firings.push(firing.clone());
        inner.next_firing_id += 1;
        Ok(Some(format!("f-{}", inner.next_firing_id)))
    }

    fn emit_activation(&self, event: &ActivationEvent) -> Result<(), VigilError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(VigilError::SinkWrite {
                reason: "injected write failure".to_string(),
            });
        }
        inner.activations.push(event.clone());
        Ok(())
    }
}

impl IncidentPort for MemoryStore {
    fn incident_on(&self, channel: &str, day: NaiveDate) -> bool {
        self.inner
            .lock()
            .unwrap()
            .incidents
            .contains(&(channel.to_string(), day))
    }
}
