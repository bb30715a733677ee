//! Backtest runner.
//!
//! Replays a rule set over real historical data against ground-truth
//! incident labels for one channel, accumulating a confusion matrix across
//! the full day-by-rule grid and deriving quality metrics. Prediction uses
//! a simplified historical evaluator: a rule predicts a fire on a day when
//! any of its band-configured indicators reads outside its band.

use crate::domain::compiler::{compile, CompileContext, CompiledTrigger};
use crate::domain::error::VigilError;
use crate::ports::data_port::DataPort;
use crate::ports::incident_port::IncidentPort;
use crate::ports::registry_port::RuleRecord;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASELINE_RATE: f64 = 0.1;
pub const DEFAULT_LEAD_WINDOW_DAYS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestInput {
    pub channel: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Naive detection rate used as the lift denominator.
    pub baseline_rate: f64,
    /// How many days before an incident a prediction counts as early
    /// detection. A rule's `WINDOW=` option overrides this per rule.
    pub lead_window_days: u32,
}

impl BacktestInput {
    pub fn new(channel: &str, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            channel: channel.to_string(),
            start,
            end,
            baseline_rate: DEFAULT_BASELINE_RATE,
            lead_window_days: DEFAULT_LEAD_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl ConfusionMatrix {
    fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub false_positive_rate: f64,
    pub lift: f64,
    pub avg_detection_lead_time_hours: f64,
}

/// Division that yields 0 instead of NaN on an empty denominator. Every
/// metric degrades to 0 on degenerate inputs rather than erroring.
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

impl BacktestMetrics {
    fn derive(matrix: &ConfusionMatrix, baseline_rate: f64, lead_times: &[f64]) -> Self {
        let tp = matrix.true_positives as f64;
        let fp = matrix.false_positives as f64;
        let tn = matrix.true_negatives as f64;
        let fn_ = matrix.false_negatives as f64;

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = ratio(2.0 * precision * recall, precision + recall);
        let false_positive_rate = ratio(fp, fp + tn);
        let lift = ratio(precision, baseline_rate);
        let avg_detection_lead_time_hours =
            ratio(lead_times.iter().sum::<f64>(), lead_times.len() as f64);

        Self {
            precision,
            recall,
            f1,
            false_positive_rate,
            lift,
            avg_detection_lead_time_hours,
        }
    }
}

/// One row of the flat tabular export: every predicted firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringRow {
    pub date: NaiveDate,
    pub rule_id: String,
    pub predicted: bool,
    pub actual: bool,
    pub lead_time_hours: Option<f64>,
}

/// Chart-ready daily point: how many rules predicted a fire, and whether an
/// incident actually occurred.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub date: NaiveDate,
    pub predicted_count: u32,
    pub actual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeeklyCount {
    pub week_start: NaiveDate,
    pub firings: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub channel: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub matrix: ConfusionMatrix,
    pub metrics: BacktestMetrics,
    pub rows: Vec<FiringRow>,
    pub timeline: Vec<TimelinePoint>,
    pub lead_times_hours: Vec<f64>,
    pub weekly_firings: Vec<WeeklyCount>,
}

fn midday(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
        .and_utc()
}

/// Whether any band-configured indicator of this rule reads outside its
/// band on `day`. Missing readings never count as outside.
fn predicts_fire(trigger: &CompiledTrigger, data: &dyn DataPort, day: NaiveDate) -> bool {
    let at = midday(day);
    trigger.band_bounds.iter().any(|(name, bounds)| {
        let Some(key) = trigger.resolved_indicators.get(name) else {
            return false;
        };
        match data.point_value(key, at) {
            Some(reading) => {
                bounds.lower.is_some_and(|lower| reading < lower)
                    || bounds.upper.is_some_and(|upper| reading > upper)
            }
            None => false,
        }
    })
}

/// Run the backtest over `[input.start, input.end]` inclusive.
pub fn run_backtest(
    rules: &[RuleRecord],
    context: &CompileContext,
    data: &dyn DataPort,
    incidents: &dyn IncidentPort,
    input: &BacktestInput,
) -> Result<BacktestResult, VigilError> {
    if rules.is_empty() {
        return Err(VigilError::NoRules);
    }
    if input.start > input.end {
        return Err(VigilError::EmptyRange {
            start: input.start.to_string(),
            end: input.end.to_string(),
        });
    }

    let compiled: Vec<(String, CompiledTrigger)> = rules
        .iter()
        .map(|rule| {
            let ast = crate::domain::parser::parse(&rule.dsl)?;
            Ok((rule.id.clone(), compile(ast, context)?))
        })
        .collect::<Result<_, VigilError>>()?;

    let days: Vec<NaiveDate> = {
        let mut days = Vec::new();
        let mut day = input.start;
        while day <= input.end {
            days.push(day);
            day += Duration::days(1);
        }
        days
    };
    debug!(
        days = days.len(),
        rules = compiled.len(),
        channel = %input.channel,
        "running backtest grid"
    );

    // Precompute the full prediction grid so lead-time attribution can look
    // backward from incident days.
    let predictions: Vec<Vec<bool>> = compiled
        .iter()
        .map(|(_, trigger)| {
            days.iter()
                .map(|&day| predicts_fire(trigger, data, day))
                .collect()
        })
        .collect();
    let actuals: Vec<bool> = days
        .iter()
        .map(|&day| incidents.incident_on(&input.channel, day))
        .collect();

    let mut matrix = ConfusionMatrix::default();
    let mut rows = Vec::new();
    let mut lead_times_hours = Vec::new();

    for (rule_idx, (rule_id, trigger)) in compiled.iter().enumerate() {
        let lead_window = trigger.window_days.unwrap_or(input.lead_window_days) as usize;
        for (day_idx, &day) in days.iter().enumerate() {
            let predicted = predictions[rule_idx][day_idx];
            let actual = actuals[day_idx];
            matrix.record(predicted, actual);

            // Lead time is attributed at episode starts: the earliest
            // prediction in the window before the incident's first day.
            let episode_start = actual && (day_idx == 0 || !actuals[day_idx - 1]);
            let lead_time_hours = if episode_start {
                let window_start = day_idx.saturating_sub(lead_window);
                (window_start..day_idx)
                    .find(|&d| predictions[rule_idx][d])
                    .map(|d| (day_idx - d) as f64 * 24.0)
            } else {
                None
            };
            if let Some(hours) = lead_time_hours {
                lead_times_hours.push(hours);
            }

            if predicted {
                rows.push(FiringRow {
                    date: day,
                    rule_id: rule_id.clone(),
                    predicted,
                    actual,
                    lead_time_hours,
                });
            }
        }
    }

    let timeline: Vec<TimelinePoint> = days
        .iter()
        .enumerate()
        .map(|(day_idx, &date)| TimelinePoint {
            date,
            predicted_count: predictions
                .iter()
                .filter(|per_rule| per_rule[day_idx])
                .count() as u32,
            actual: actuals[day_idx],
        })
        .collect();

    let weekly_firings: Vec<WeeklyCount> = days
        .chunks(7)
        .map(|week| {
            let firings = week
                .iter()
                .map(|day| {
                    let day_idx = (*day - input.start).num_days() as usize;
                    predictions
                        .iter()
                        .filter(|per_rule| per_rule[day_idx])
                        .count() as u32
                })
                .sum();
            WeeklyCount {
                week_start: week[0],
                firings,
            }
        })
        .collect();

    let metrics = BacktestMetrics::derive(&matrix, input.baseline_rate, &lead_times_hours);

    Ok(BacktestResult {
        channel: input.channel.clone(),
        start: input.start,
        end: input.end,
        matrix,
        metrics,
        rows,
        timeline,
        lead_times_hours,
        weekly_firings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::domain::compiler::BandBounds;
    use crate::domain::evaluator::day_bucket;
    use std::collections::HashMap;

    fn context() -> CompileContext {
        let mut indicator_keys = HashMap::new();
        indicator_keys.insert("heat_index".to_string(), "ind:heat_index".to_string());
        CompileContext {
            indicator_keys,
            band_bounds: HashMap::from([(
                "heat_index".to_string(),
                BandBounds {
                    lower: Some(0.2),
                    upper: Some(0.7),
                },
            )]),
            default_cooldown_days: 7,
        }
    }

    fn rule() -> RuleRecord {
        RuleRecord {
            id: "r1".to_string(),
            version: 1,
            name: "heat".to_string(),
            dsl: "IF IND(heat_index) >= 0.75 FOR 1d THEN START pack IN responsive".to_string(),
            enabled: true,
            valid_from: None,
            valid_until: None,
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn input() -> BacktestInput {
        BacktestInput::new("metro", date(1), date(10))
    }

    fn set_reading(store: &MemoryStore, day: NaiveDate, value: f64) {
        store.set_point_on("ind:heat_index", day_bucket(midday(day)), Some(value));
    }

    #[test]
    fn empty_rules_and_range_are_errors() {
        let store = MemoryStore::new();
        let err = run_backtest(&[], &context(), &store, &store, &input()).unwrap_err();
        assert!(matches!(err, VigilError::NoRules));

        let mut reversed = input();
        reversed.start = date(10);
        reversed.end = date(1);
        let err =
            run_backtest(&[rule()], &context(), &store, &store, &reversed).unwrap_err();
        assert!(matches!(err, VigilError::EmptyRange { .. }));
    }

    #[test]
    fn no_predictions_yields_zero_metrics_not_nan() {
        let store = MemoryStore::new();
        store.set_point("ind:heat_index", 0.5); // always in band
        let result = run_backtest(&[rule()], &context(), &store, &store, &input()).unwrap();
        assert_eq!(result.matrix.true_positives, 0);
        assert_eq!(result.matrix.false_positives, 0);
        assert_eq!(result.metrics.precision, 0.0);
        assert_eq!(result.metrics.recall, 0.0);
        assert_eq!(result.metrics.f1, 0.0);
        assert_eq!(result.metrics.lift, 0.0);
        assert!(result.metrics.precision.is_finite());
    }

    #[test]
    fn confusion_matrix_counts_grid() {
        let store = MemoryStore::new();
        store.set_point("ind:heat_index", 0.5);
        // Out of band on days 3-4; incident on days 4-5.
        set_reading(&store, date(3), 0.9);
        set_reading(&store, date(4), 0.9);
        store.add_incident("metro", date(4));
        store.add_incident("metro", date(5));

        let result = run_backtest(&[rule()], &context(), &store, &store, &input()).unwrap();
        assert_eq!(result.matrix.true_positives, 1); // day 4
        assert_eq!(result.matrix.false_positives, 1); // day 3
        assert_eq!(result.matrix.false_negatives, 1); // day 5
        assert_eq!(result.matrix.true_negatives, 7);
    }

    #[test]
    fn metrics_derivation() {
        let matrix = ConfusionMatrix {
            true_positives: 3,
            false_positives: 1,
            true_negatives: 5,
            false_negatives: 1,
        };
        let metrics = BacktestMetrics::derive(&matrix, 0.1, &[24.0, 48.0]);
        assert!((metrics.precision - 0.75).abs() < 1e-9);
        assert!((metrics.recall - 0.75).abs() < 1e-9);
        assert!((metrics.f1 - 0.75).abs() < 1e-9);
        assert!((metrics.false_positive_rate - 1.0 / 6.0).abs() < 1e-9);
        assert!((metrics.lift - 7.5).abs() < 1e-9);
        assert!((metrics.avg_detection_lead_time_hours - 36.0).abs() < 1e-9);
    }

    #[test]
    fn lead_time_attributed_at_episode_start() {
        let store = MemoryStore::new();
        store.set_point("ind:heat_index", 0.5);
        // Prediction two days before a two-day incident episode.
        set_reading(&store, date(3), 0.9);
        store.add_incident("metro", date(5));
        store.add_incident("metro", date(6));

        let result = run_backtest(&[rule()], &context(), &store, &store, &input()).unwrap();
        assert_eq!(result.lead_times_hours, vec![48.0]);
        assert!((result.metrics.avg_detection_lead_time_hours - 48.0).abs() < 1e-9);
    }

    #[test]
    fn lead_window_bounds_attribution() {
        let store = MemoryStore::new();
        store.set_point("ind:heat_index", 0.5);
        // Prediction five days ahead falls outside the default 3-day window.
        set_reading(&store, date(2), 0.9);
        store.add_incident("metro", date(7));

        let result = run_backtest(&[rule()], &context(), &store, &store, &input()).unwrap();
        assert!(result.lead_times_hours.is_empty());
        assert_eq!(result.metrics.avg_detection_lead_time_hours, 0.0);
    }

    #[test]
    fn window_option_overrides_lead_window() {
        let store = MemoryStore::new();
        store.set_point("ind:heat_index", 0.5);
        set_reading(&store, date(2), 0.9);
        store.add_incident("metro", date(7));

        let mut wide = rule();
        wide.dsl = "IF IND(heat_index) >= 0.75 FOR 1d THEN START pack IN responsive \
                    WITH WINDOW=6d"
            .to_string();
        let result = run_backtest(&[wide], &context(), &store, &store, &input()).unwrap();
        assert_eq!(result.lead_times_hours, vec![120.0]);
    }

    #[test]
    fn rows_cover_every_prediction() {
        let store = MemoryStore::new();
        store.set_point("ind:heat_index", 0.5);
        set_reading(&store, date(3), 0.9);
        set_reading(&store, date(4), 0.1); // below the lower bound
        store.add_incident("metro", date(4));

        let result = run_backtest(&[rule()], &context(), &store, &store, &input()).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.rows.iter().all(|r| r.predicted));
        let actual_row = result.rows.iter().find(|r| r.date == date(4)).unwrap();
        assert!(actual_row.actual);
    }

    #[test]
    fn timeline_and_weekly_series() {
        let store = MemoryStore::new();
        store.set_point("ind:heat_index", 0.5);
        set_reading(&store, date(3), 0.9);
        set_reading(&store, date(9), 0.9);
        store.add_incident("metro", date(3));

        let result = run_backtest(&[rule()], &context(), &store, &store, &input()).unwrap();
        assert_eq!(result.timeline.len(), 10);
        let day3 = &result.timeline[2];
        assert_eq!(day3.predicted_count, 1);
        assert!(day3.actual);

        assert_eq!(result.weekly_firings.len(), 2);
        assert_eq!(result.weekly_firings[0].week_start, date(1));
        assert_eq!(result.weekly_firings[0].firings, 1);
        assert_eq!(result.weekly_firings[1].firings, 1);
    }
}
