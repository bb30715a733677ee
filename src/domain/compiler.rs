//! Trigger compilation.
//!
//! Resolves symbolic indicator names against a registry, captures band
//! bounds for diagnostics, computes persistence and cooldown durations, and
//! derives the deterministic fingerprint recipe used for firing
//! deduplication. Resolution failures surface here, before any evaluation
//! is attempted.

use crate::domain::ast::TriggerAst;
use crate::domain::error::VigilError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Configured band bounds for one indicator. Either edge may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandBounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// Everything compilation needs from the surrounding system.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    /// Indicator name → storage key.
    pub indicator_keys: HashMap<String, String>,
    /// Indicator name → configured band bounds. Absence is not an error.
    pub band_bounds: HashMap<String, BandBounds>,
    /// Cooldown applied when the rule carries no `COOLDOWN=` override.
    pub default_cooldown_days: u32,
}

/// A compiled trigger, ready for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTrigger {
    pub ast: TriggerAst,
    /// Every indicator name in the condition, resolved to a storage key.
    pub resolved_indicators: BTreeMap<String, String>,
    /// Bounds for referenced indicators that have them configured.
    pub band_bounds: BTreeMap<String, BandBounds>,
    /// Effective persistence requirement (options override wins).
    pub persistence_days: u32,
    pub persistence_hours: u32,
    pub cooldown_seconds: u64,
    /// Evaluation-window override, carried for downstream consumers.
    pub window_days: Option<u32>,
    /// Structural identity of this rule; day-bucketed at evaluation time.
    pub fingerprint_recipe: String,
    pub compiled_at: DateTime<Utc>,
}

/// Compile an AST against a context.
///
/// Fails with [`VigilError::UnknownIndicator`] naming the first unresolvable
/// symbol (in sorted order); never returns a partial trigger.
pub fn compile(ast: TriggerAst, context: &CompileContext) -> Result<CompiledTrigger, VigilError> {
    let mut resolved_indicators = BTreeMap::new();
    let mut band_bounds = BTreeMap::new();

    for name in ast.condition.indicator_names() {
        let key = context
            .indicator_keys
            .get(&name)
            .ok_or_else(|| VigilError::UnknownIndicator { name: name.clone() })?;
        resolved_indicators.insert(name.clone(), key.clone());
        if let Some(bounds) = context.band_bounds.get(&name) {
            band_bounds.insert(name, *bounds);
        }
    }

    let persistence_days = ast
        .options
        .persistence_days
        .unwrap_or(ast.persistence_days);
    let cooldown_days = ast
        .options
        .cooldown_days
        .unwrap_or(context.default_cooldown_days);

    let fingerprint_recipe = format!(
        "{}|{}|{}|{}",
        ast.condition.canonical(),
        persistence_days,
        ast.action.template_key,
        ast.action.capacity
    );

    Ok(CompiledTrigger {
        window_days: ast.options.window_days,
        persistence_days,
        // Grammar-valid day counts can exceed u32::MAX / 24; saturate
        // rather than overflow.
        persistence_hours: persistence_days.saturating_mul(24),
        cooldown_seconds: cooldown_days as u64 * SECONDS_PER_DAY,
        resolved_indicators,
        band_bounds,
        fingerprint_recipe,
        compiled_at: Utc::now(),
        ast,
    })
}
