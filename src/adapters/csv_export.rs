//! CSV export adapter for backtest artifacts.
//!
//! Writes four files under the target directory: `firings.csv` (flat
//! row-per-firing table), `timeline.csv` (daily predicted counts against
//! actual incidents), `lead_times.csv` and `weekly_firings.csv`.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::VigilError;
use crate::ports::export_port::ExportPort;
use std::fs;
use std::path::Path;
use tracing::info;

pub struct CsvExportAdapter;

fn export_error(context: &str, err: impl std::fmt::Display) -> VigilError {
    VigilError::Export {
        reason: format!("{}: {}", context, err),
    }
}

impl CsvExportAdapter {
    fn write_firings(result: &BacktestResult, path: &Path) -> Result<(), VigilError> {
        let mut wtr = csv::Writer::from_path(path)
            .map_err(|e| export_error("failed to create firings.csv", e))?;
        wtr.write_record(["date", "rule_id", "predicted", "actual", "lead_time_hours"])
            .map_err(|e| export_error("write header", e))?;
        for row in &result.rows {
            wtr.write_record([
                row.date.to_string(),
                row.rule_id.clone(),
                row.predicted.to_string(),
                row.actual.to_string(),
                row.lead_time_hours
                    .map(|h| h.to_string())
                    .unwrap_or_default(),
            ])
            .map_err(|e| export_error("write firing row", e))?;
        }
        wtr.flush().map_err(|e| export_error("flush firings.csv", e))
    }

    fn write_timeline(result: &BacktestResult, path: &Path) -> Result<(), VigilError> {
        let mut wtr = csv::Writer::from_path(path)
            .map_err(|e| export_error("failed to create timeline.csv", e))?;
        wtr.write_record(["date", "predicted_count", "actual"])
            .map_err(|e| export_error("write header", e))?;
        for point in &result.timeline {
            wtr.write_record([
                point.date.to_string(),
                point.predicted_count.to_string(),
                point.actual.to_string(),
            ])
            .map_err(|e| export_error("write timeline row", e))?;
        }
        wtr.flush().map_err(|e| export_error("flush timeline.csv", e))
    }

    fn write_lead_times(result: &BacktestResult, path: &Path) -> Result<(), VigilError> {
        let mut wtr = csv::Writer::from_path(path)
            .map_err(|e| export_error("failed to create lead_times.csv", e))?;
        wtr.write_record(["lead_time_hours"])
            .map_err(|e| export_error("write header", e))?;
        for hours in &result.lead_times_hours {
            wtr.write_record([hours.to_string()])
                .map_err(|e| export_error("write lead time row", e))?;
        }
        wtr.flush()
            .map_err(|e| export_error("flush lead_times.csv", e))
    }

    fn write_weekly(result: &BacktestResult, path: &Path) -> Result<(), VigilError> {
        let mut wtr = csv::Writer::from_path(path)
            .map_err(|e| export_error("failed to create weekly_firings.csv", e))?;
        wtr.write_record(["week_start", "firings"])
            .map_err(|e| export_error("write header", e))?;
        for week in &result.weekly_firings {
            wtr.write_record([week.week_start.to_string(), week.firings.to_string()])
                .map_err(|e| export_error("write weekly row", e))?;
        }
        wtr.flush()
            .map_err(|e| export_error("flush weekly_firings.csv", e))
    }
}

impl ExportPort for CsvExportAdapter {
    fn export(&self, result: &BacktestResult, dir: &Path) -> Result<(), VigilError> {
        fs::create_dir_all(dir).map_err(|e| export_error("failed to create export dir", e))?;
        Self::write_firings(result, &dir.join("firings.csv"))?;
        Self::write_timeline(result, &dir.join("timeline.csv"))?;
        Self::write_lead_times(result, &dir.join("lead_times.csv"))?;
        Self::write_weekly(result, &dir.join("weekly_firings.csv"))?;
        info!(dir = %dir.display(), "backtest artifacts exported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::domain::backtest::{run_backtest, BacktestInput};
    use crate::domain::compiler::{BandBounds, CompileContext};
    use crate::domain::evaluator::day_bucket;
    use crate::ports::registry_port::RuleRecord;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn sample_result() -> crate::domain::backtest::BacktestResult {
        let mut indicator_keys = HashMap::new();
        indicator_keys.insert("heat_index".to_string(), "ind:heat_index".to_string());
        let context = CompileContext {
            indicator_keys,
            band_bounds: HashMap::from([(
                "heat_index".to_string(),
                BandBounds {
                    lower: Some(0.2),
                    upper: Some(0.7),
                },
            )]),
            default_cooldown_days: 7,
        };
        let rule = RuleRecord {
            id: "r1".to_string(),
            version: 1,
            name: "heat".to_string(),
            dsl: "IF IND(heat_index) >= 0.75 FOR 1d THEN START pack IN responsive".to_string(),
            enabled: true,
            valid_from: None,
            valid_until: None,
        };

        let store = MemoryStore::new();
        store.set_point("ind:heat_index", 0.5);
        let hot = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        let noon = hot
            .and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
            .and_utc();
        store.set_point_on("ind:heat_index", day_bucket(noon), Some(0.9));
        store.add_incident("metro", hot);

        let input = BacktestInput::new(
            "metro",
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
        );
        run_backtest(&[rule], &context, &store, &store, &input).unwrap()
    }

    #[test]
    fn export_writes_all_artifacts() {
        let dir = TempDir::new().unwrap();
        let result = sample_result();
        CsvExportAdapter.export(&result, dir.path()).unwrap();

        for name in [
            "firings.csv",
            "timeline.csv",
            "lead_times.csv",
            "weekly_firings.csv",
        ] {
            assert!(dir.path().join(name).exists(), "missing {}", name);
        }

        let firings = fs::read_to_string(dir.path().join("firings.csv")).unwrap();
        assert!(firings.starts_with("date,rule_id,predicted,actual,lead_time_hours"));
        assert!(firings.contains("2025-06-03,r1,true,true"));

        let timeline = fs::read_to_string(dir.path().join("timeline.csv")).unwrap();
        assert_eq!(timeline.lines().count(), 11); // header + 10 days
    }

    #[test]
    fn export_to_unwritable_path_fails() {
        let result = sample_result();
        let err = CsvExportAdapter
            .export(&result, Path::new("/proc/no-such-dir/export"))
            .unwrap_err();
        assert!(matches!(err, VigilError::Export { .. }));
    }
}
