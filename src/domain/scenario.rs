//! Scenario simulation.
//!
//! Synthesizes a multi-day indicator series from declared shocks and replays
//! every rule against it day by day with a relaxed scorer. The relaxed
//! scorer trades fidelity for speed: no persistence replay, no cooldown, and
//! a near-miss band so planners can see rules that almost fired.
//!
//! Scoring: a comparison leaf scores 1.0 when it passes, 0.5 when the
//! reading is within 10% (relative to the threshold) of passing, else 0.0.
//! Band leaves are categorical and score 1.0 or 0.0. `AND` takes the
//! minimum of its children, `OR` the maximum. A rule counts as firing on a
//! day when its score reaches 1.0.

use crate::domain::ast::{BandState, Condition, Expression};
use crate::domain::compiler::{compile, CompileContext, CompiledTrigger};
use crate::domain::error::VigilError;
use crate::domain::timeseries::least_squares_slope;
use crate::ports::registry_port::RuleRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

const NEAR_MISS_MARGIN: f64 = 0.10;
const FIRING_SCORE: f64 = 1.0;
const HIGH_LOAD_THRESHOLD: f64 = 0.8;

/// A synthetic disturbance applied to one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorShock {
    pub indicator: String,
    /// Offset applied to the baseline while the shock is active, in percent.
    pub offset_percent: f64,
    pub duration_days: u32,
    pub start_day: u32,
}

impl IndicatorShock {
    fn active_on(&self, day: u32) -> bool {
        day >= self.start_day && day < self.start_day + self.duration_days
    }
}

/// Pairwise co-movement: the second indicator's daily deviation is pulled
/// toward the first's in proportion to `rho`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covariance {
    pub first: String,
    pub second: String,
    /// Correlation strength in [-1, 1].
    pub rho: f64,
}

/// Scenario definition, typically loaded from a JSON file. Missing fields
/// fall back to the defaults below, so a file may declare only its shocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioInput {
    pub shocks: Vec<IndicatorShock>,
    pub covariances: Vec<Covariance>,
    /// Capacity tier → maximum projected firings counted per day; excess
    /// firings are tallied separately rather than dropped silently.
    pub capacity_constraints: HashMap<String, usize>,
    /// Indicator name → baseline value; indicators without an entry use 0.5.
    pub baselines: HashMap<String, f64>,
    pub horizon_days: u32,
    /// Daily noise amplitude outside shock windows, in percent.
    pub noise_percent: f64,
    pub seed: u64,
}

impl Default for ScenarioInput {
    fn default() -> Self {
        Self {
            shocks: Vec::new(),
            covariances: Vec::new(),
            capacity_constraints: HashMap::new(),
            baselines: HashMap::new(),
            horizon_days: 30,
            noise_percent: 2.0,
            seed: 0,
        }
    }
}

/// One projected firing in the scenario timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedFiring {
    pub day: u32,
    pub rule_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyLoad {
    pub day: u32,
    /// Mean rule score across all rules on this day.
    pub load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub firings: Vec<ProjectedFiring>,
    pub total_firings: usize,
    /// Distinct `(rule, week bucket)` pairs among the projected firings.
    pub distinct_incidents: usize,
    pub peak_load: f64,
    pub daily_load: Vec<DailyLoad>,
    /// Firings dropped by capacity constraints, per capacity tier.
    pub constrained_out: BTreeMap<String, usize>,
    pub suggested_prepositions: Vec<String>,
}

/// Run a scenario over the given rule set.
///
/// Fails with [`VigilError::NoRules`] on an empty rule set and propagates
/// parse and compile failures; a scenario over broken rules is meaningless.
pub fn run_scenario(
    rules: &[RuleRecord],
    context: &CompileContext,
    input: &ScenarioInput,
) -> Result<ScenarioResult, VigilError> {
    if rules.is_empty() {
        return Err(VigilError::NoRules);
    }
    validate_input(input)?;

    let compiled: Vec<(String, CompiledTrigger)> = rules
        .iter()
        .map(|rule| {
            let ast = crate::domain::parser::parse(&rule.dsl)?;
            Ok((rule.id.clone(), compile(ast, context)?))
        })
        .collect::<Result<_, VigilError>>()?;

    let series = synthesize(&compiled, input);
    debug!(
        indicators = series.len(),
        horizon = input.horizon_days,
        "synthetic series generated"
    );

    let mut firings = Vec::new();
    let mut daily_load = Vec::new();
    let mut constrained_out: BTreeMap<String, usize> = BTreeMap::new();
    let mut incidents: BTreeSet<(String, u32)> = BTreeSet::new();

    for day in 0..input.horizon_days {
        let mut day_scores = Vec::with_capacity(compiled.len());
        let mut day_firings: Vec<(&str, &CompiledTrigger, f64)> = Vec::new();
        for (rule_id, trigger) in &compiled {
            let score = score_condition(&trigger.ast.condition, trigger, &series, day);
            day_scores.push(score);
            if score >= FIRING_SCORE {
                day_firings.push((rule_id, trigger, score));
            }
        }

        // Capacity constraints cap how many same-day firings each tier can
        // absorb; the overflow is reported, not hidden.
        let mut tier_counts: HashMap<&str, usize> = HashMap::new();
        for (rule_id, trigger, score) in day_firings {
            let tier = trigger.ast.action.capacity.as_str();
            let count = tier_counts.entry(tier).or_insert(0);
            *count += 1;
            if let Some(&cap) = input.capacity_constraints.get(tier) {
                if *count > cap {
                    *constrained_out.entry(tier.to_string()).or_insert(0) += 1;
                    continue;
                }
            }
            incidents.insert((rule_id.to_string(), day / 7));
            firings.push(ProjectedFiring {
                day,
                rule_id: rule_id.to_string(),
                score,
            });
        }

        let load = day_scores.iter().sum::<f64>() / day_scores.len() as f64;
        daily_load.push(DailyLoad { day, load });
    }

    let total_firings = firings.len();
    let peak_load = daily_load.iter().map(|d| d.load).fold(0.0, f64::max);
    let suggested_prepositions = suggest(total_firings, peak_load);

    Ok(ScenarioResult {
        firings,
        total_firings,
        distinct_incidents: incidents.len(),
        peak_load,
        daily_load,
        constrained_out,
        suggested_prepositions,
    })
}

/// Reject inputs the synthesizer cannot handle: a negative (or NaN) noise
/// amplitude makes the sampling range empty, and `rho` outside [-1, 1]
/// has no meaning as a correlation.
fn validate_input(input: &ScenarioInput) -> Result<(), VigilError> {
    let invalid = |key: &str, reason: String| VigilError::ConfigInvalid {
        section: "scenario".to_string(),
        key: key.to_string(),
        reason,
    };
    if !(input.noise_percent >= 0.0) {
        return Err(invalid(
            "noise_percent",
            format!("must be non-negative, got {}", input.noise_percent),
        ));
    }
    for cov in &input.covariances {
        if !(-1.0..=1.0).contains(&cov.rho) {
            return Err(invalid(
                "covariances",
                format!(
                    "rho must be within [-1, 1], got {} for pair ({}, {})",
                    cov.rho, cov.first, cov.second
                ),
            ));
        }
    }
    Ok(())
}

fn suggest(total_firings: usize, peak_load: f64) -> Vec<String> {
    let mut suggestions = Vec::new();
    if total_firings > 5 {
        suggestions.push("containment_pack_tier1".to_string());
    }
    if total_firings > 10 {
        suggestions.push("readiness_plan_extended".to_string());
    }
    if peak_load > HIGH_LOAD_THRESHOLD {
        suggestions.push("cross_hub_coordination".to_string());
    }
    suggestions
}

/// Indicator name → per-day synthetic values over the horizon.
fn synthesize(
    compiled: &[(String, CompiledTrigger)],
    input: &ScenarioInput,
) -> HashMap<String, Vec<f64>> {
    let mut names: BTreeSet<String> = input.baselines.keys().cloned().collect();
    for (_, trigger) in compiled {
        names.extend(trigger.resolved_indicators.keys().cloned());
    }

    let mut rng = StdRng::seed_from_u64(input.seed);
    let noise = input.noise_percent / 100.0;

    // Relative deviation per indicator per day, before covariance coupling.
    let mut deviations: HashMap<String, Vec<f64>> = HashMap::new();
    for name in &names {
        let per_day: Vec<f64> = (0..input.horizon_days)
            .map(|day| {
                let shock = input
                    .shocks
                    .iter()
                    .find(|s| s.indicator == *name && s.active_on(day));
                match shock {
                    Some(shock) => shock.offset_percent / 100.0,
                    None => rng.gen_range(-noise..=noise),
                }
            })
            .collect();
        deviations.insert(name.clone(), per_day);
    }

    for cov in &input.covariances {
        let Some(driver) = deviations.get(&cov.first).cloned() else {
            continue;
        };
        if let Some(follower) = deviations.get_mut(&cov.second) {
            for (day, dev) in follower.iter_mut().enumerate() {
                *dev = cov.rho * driver[day] + (1.0 - cov.rho.abs()) * *dev;
            }
        }
    }

    names
        .into_iter()
        .map(|name| {
            let baseline = input.baselines.get(&name).copied().unwrap_or(0.5);
            let values = deviations[&name]
                .iter()
                .map(|dev| baseline * (1.0 + dev))
                .collect();
            (name, values)
        })
        .collect()
}

fn score_condition(
    condition: &Condition,
    trigger: &CompiledTrigger,
    series: &HashMap<String, Vec<f64>>,
    day: u32,
) -> f64 {
    match condition {
        Condition::And(left, right) => f64::min(
            score_condition(left, trigger, series, day),
            score_condition(right, trigger, series, day),
        ),
        Condition::Or(left, right) => f64::max(
            score_condition(left, trigger, series, day),
            score_condition(right, trigger, series, day),
        ),
        Condition::Expr(expr) => score_expression(expr, trigger, series, day),
    }
}

fn value_on(series: &HashMap<String, Vec<f64>>, name: &str, day: u32) -> Option<f64> {
    series.get(name).and_then(|s| s.get(day as usize)).copied()
}

/// Graded comparison: full score on a pass, half score within the relative
/// near-miss margin of the threshold.
fn graded(passes: bool, reading: f64, threshold: f64) -> f64 {
    if passes {
        return 1.0;
    }
    let margin = NEAR_MISS_MARGIN * threshold.abs().max(f64::EPSILON);
    if (reading - threshold).abs() <= margin {
        0.5
    } else {
        0.0
    }
}

fn score_expression(
    expr: &Expression,
    trigger: &CompiledTrigger,
    series: &HashMap<String, Vec<f64>>,
    day: u32,
) -> f64 {
    match expr {
        Expression::Indicator {
            name, op, value, ..
        } => match value_on(series, name, day) {
            Some(reading) => graded(op.compare(reading, *value), reading, *value),
            None => 0.0,
        },
        Expression::Slope {
            name,
            window_days,
            op,
            value,
        } => {
            let Some(values) = series.get(name) else {
                return 0.0;
            };
            let end = day as usize + 1;
            let start = end.saturating_sub(*window_days as usize);
            match least_squares_slope(&values[start..end]) {
                Some(slope) => graded(op.compare(slope, *value), slope, *value),
                None => 0.0,
            }
        }
        Expression::Band { name, expected } => {
            let Some(reading) = value_on(series, name, day) else {
                return 0.0;
            };
            let Some(bounds) = trigger.band_bounds.get(name) else {
                return 0.0;
            };
            let state = match (bounds.lower, bounds.upper) {
                (Some(lower), _) if reading < lower => BandState::Below,
                (_, Some(upper)) if reading > upper => BandState::Above,
                _ => BandState::InBand,
            };
            if state == *expected {
                1.0
            } else {
                0.0
            }
        }
        Expression::Gap {
            left,
            right,
            op,
            value,
        } => match (value_on(series, left, day), value_on(series, right, day)) {
            (Some(a), Some(b)) => {
                let gap = (a - b).abs();
                graded(op.compare(gap, *value), gap, *value)
            }
            _ => 0.0,
        },
    }
}
