//! Trigger evaluation engine.
//!
//! Evaluates a compiled trigger at an instant against a pluggable data
//! source. Four checks gate a firing:
//!
//! 1. Condition: recursive tree walk at `now`; a missing data point makes
//!    that leaf false (fail-closed — data gaps cannot spuriously trigger).
//! 2. Persistence: the condition must hold for N consecutive days ending
//!    at `now`, verified by replaying the full condition one day at a time.
//! 3. Cooldown: elapsed time since the last firing of the same day-bucketed
//!    fingerprint must reach the compiled cooldown.
//! 4. Hysteresis: pluggable policy; the shipped default always passes.
//!
//! All four booleans and the evidence trail are returned regardless of
//! outcome, so audits can see why a rule did or did not fire.

use crate::domain::ast::{BandState, Condition, Expression};
use crate::domain::compiler::CompiledTrigger;
use crate::domain::timeseries::leading_true_run;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a leaf evaluation actually observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Observed {
    Point(f64),
    Slope(f64),
    Band(BandState),
    Gap(f64),
    Missing,
}

/// Per-leaf audit entry, keyed by indicator name in the evidence map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub observed: Observed,
    pub passed: bool,
}

/// Outcome of one trigger evaluation. Ephemeral: consumed immediately by
/// the worker to decide whether to record a firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub should_fire: bool,
    pub condition_met: bool,
    pub persistence_check: bool,
    pub cooldown_check: bool,
    pub hysteresis_check: bool,
    pub evidence: BTreeMap<String, Evidence>,
    pub dedupe_fingerprint: String,
}

/// Guard against rapid re-triggering near a band boundary.
///
/// The contract reserves this seam for an asymmetric dead-band check; the
/// default implementation passes unconditionally.
pub trait HysteresisPolicy {
    fn allow(&self, compiled: &CompiledTrigger, now: DateTime<Utc>, data: &dyn DataPort) -> bool;
}

/// Placeholder policy: always allows.
pub struct NoHysteresis;

impl HysteresisPolicy for NoHysteresis {
    fn allow(&self, _compiled: &CompiledTrigger, _now: DateTime<Utc>, _data: &dyn DataPort) -> bool {
        true
    }
}

/// Day-granularity bucket of an instant, used to scope fingerprints.
pub fn day_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(86_400)
}

/// The dedupe fingerprint for one evaluation instant.
pub fn dedupe_fingerprint(compiled: &CompiledTrigger, now: DateTime<Utc>) -> String {
    format!("{}|{}", compiled.fingerprint_recipe, day_bucket(now))
}

/// Evaluate a compiled trigger at `now`.
pub fn evaluate(
    compiled: &CompiledTrigger,
    now: DateTime<Utc>,
    data: &dyn DataPort,
    hysteresis: &dyn HysteresisPolicy,
) -> EvaluationResult {
    let mut evidence = BTreeMap::new();
    let condition_met = eval_condition(
        &compiled.ast.condition,
        compiled,
        now,
        data,
        Some(&mut evidence),
    );

    let persistence_check = check_persistence(compiled, now, data);
    let fingerprint = dedupe_fingerprint(compiled, now);
    let cooldown_check = check_cooldown(compiled, now, data, &fingerprint);
    let hysteresis_check = hysteresis.allow(compiled, now, data);

    EvaluationResult {
        should_fire: condition_met && persistence_check && cooldown_check && hysteresis_check,
        condition_met,
        persistence_check,
        cooldown_check,
        hysteresis_check,
        evidence,
        dedupe_fingerprint: fingerprint,
    }
}

/// Replay the full condition once per day backward from `now`, counting
/// consecutive true days starting at day 0 and stopping at the first false.
fn check_persistence(compiled: &CompiledTrigger, now: DateTime<Utc>, data: &dyn DataPort) -> bool {
    let required = compiled.persistence_days as usize;
    let daily: Vec<bool> = (0..compiled.persistence_days)
        .map(|offset| {
            let at = now - Duration::days(offset as i64);
            eval_condition(&compiled.ast.condition, compiled, at, data, None)
        })
        .collect();
    leading_true_run(&daily) >= required
}

fn check_cooldown(
    compiled: &CompiledTrigger,
    now: DateTime<Utc>,
    data: &dyn DataPort,
    fingerprint: &str,
) -> bool {
    match data.last_firing(fingerprint) {
        None => true,
        Some(last) => {
            let elapsed = (now - last).num_seconds();
            elapsed >= compiled.cooldown_seconds as i64
        }
    }
}

fn eval_condition(
    condition: &Condition,
    compiled: &CompiledTrigger,
    at: DateTime<Utc>,
    data: &dyn DataPort,
    mut evidence: Option<&mut BTreeMap<String, Evidence>>,
) -> bool {
    match condition {
        // Both children are always evaluated so the evidence trail is
        // complete even when the left side already decides the result.
        Condition::And(left, right) => {
            let l = eval_condition(left, compiled, at, data, evidence.as_deref_mut());
            let r = eval_condition(right, compiled, at, data, evidence.as_deref_mut());
            l && r
        }
        Condition::Or(left, right) => {
            let l = eval_condition(left, compiled, at, data, evidence.as_deref_mut());
            let r = eval_condition(right, compiled, at, data, evidence.as_deref_mut());
            l || r
        }
        Condition::Expr(expr) => {
            let (observed, passed) = eval_expression(expr, compiled, at, data);
            if let Some(map) = evidence {
                map.insert(expr.evidence_key(), Evidence { observed, passed });
            }
            passed
        }
    }
}

fn resolved_key<'a>(compiled: &'a CompiledTrigger, name: &'a str) -> &'a str {
    // Compilation guarantees every referenced name is present.
    compiled
        .resolved_indicators
        .get(name)
        .map(String::as_str)
        .unwrap_or(name)
}

fn eval_expression(
    expr: &Expression,
    compiled: &CompiledTrigger,
    at: DateTime<Utc>,
    data: &dyn DataPort,
) -> (Observed, bool) {
    match expr {
        Expression::Indicator {
            name, op, value, ..
        } => match data.point_value(resolved_key(compiled, name), at) {
            Some(reading) => (Observed::Point(reading), op.compare(reading, *value)),
            None => (Observed::Missing, false),
        },
        Expression::Slope {
            name,
            window_days,
            op,
            value,
        } => match data.slope(resolved_key(compiled, name), *window_days, at) {
            Some(slope) => (Observed::Slope(slope), op.compare(slope, *value)),
            None => (Observed::Missing, false),
        },
        Expression::Band { name, expected } => {
            match data.band_state(resolved_key(compiled, name), at) {
                Some(state) => (Observed::Band(state), state == *expected),
                None => (Observed::Missing, false),
            }
        }
        Expression::Gap {
            left,
            right,
            op,
            value,
        } => {
            let a = data.point_value(resolved_key(compiled, left), at);
            let b = data.point_value(resolved_key(compiled, right), at);
            match (a, b) {
                (Some(a), Some(b)) => {
                    let gap = (a - b).abs();
                    (Observed::Gap(gap), op.compare(gap, *value))
                }
                _ => (Observed::Missing, false),
            }
        }
    }
}
