//! CLI definition and dispatch.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::csv_export::CsvExportAdapter;
use crate::adapters::csv_series_adapter::{CsvIncidentAdapter, CsvSeriesAdapter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::memory_store::MemoryStore;
use crate::adapters::random_incident_adapter::RandomIncidentAdapter;
use crate::domain::ast::BandState;
use crate::domain::backtest::{self, BacktestInput};
use crate::domain::compiler::{compile, BandBounds, CompileContext};
use crate::domain::error::VigilError;
use crate::domain::parser;
use crate::domain::scenario::{run_scenario, ScenarioInput};
use crate::domain::worker::{self, TriggerWorker, DEFAULT_INTERVAL};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::export_port::ExportPort;
use crate::ports::incident_port::IncidentPort;
use crate::ports::registry_port::RuleRecord;

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Early-warning trigger engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse and compile every configured rule
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a backtest over historical data
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory for CSV artifacts (default: backtest_artifacts)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay rules against a synthetic shock scenario
    Scenario {
        #[arg(short, long)]
        config: PathBuf,
        /// Scenario definition (JSON)
        #[arg(short, long)]
        scenario: PathBuf,
        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the periodic evaluation worker until interrupted
    Watch {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Validate { config } => run_validate(&config),
        Command::Backtest { config, output } => run_backtest(&config, output.as_ref()),
        Command::Scenario {
            config,
            scenario,
            output,
        } => run_scenario_cmd(&config, &scenario, output.as_ref()),
        Command::Watch { config } => run_watch(&config),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = VigilError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Build the compile context from the `[indicators]` and `[bands]` sections.
pub fn build_compile_context(config: &dyn ConfigPort) -> Result<CompileContext, VigilError> {
    let indicator_keys = config.get_section("indicators");
    let mut band_bounds = HashMap::new();
    for (name, spec) in config.get_section("bands") {
        band_bounds.insert(name, parse_band_bounds(&spec)?);
    }
    let default_cooldown_days = config.get_int("worker", "default_cooldown_days", 7) as u32;
    Ok(CompileContext {
        indicator_keys,
        band_bounds,
        default_cooldown_days,
    })
}

/// Parse a `lower,upper` bounds value; either side may be blank for an open
/// edge.
fn parse_band_bounds(spec: &str) -> Result<BandBounds, VigilError> {
    let invalid = |reason: String| VigilError::ConfigInvalid {
        section: "bands".into(),
        key: spec.to_string(),
        reason,
    };
    let (lower_str, upper_str) = spec
        .split_once(',')
        .ok_or_else(|| invalid("expected lower,upper".into()))?;
    let parse_edge = |s: &str| -> Result<Option<f64>, VigilError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse()
            .map(Some)
            .map_err(|e| invalid(format!("invalid bound: {e}")))
    };
    Ok(BandBounds {
        lower: parse_edge(lower_str)?,
        upper: parse_edge(upper_str)?,
    })
}

/// Load the `[rules]` section as rule records, id-sorted.
pub fn load_rules(config: &dyn ConfigPort) -> Result<Vec<RuleRecord>, VigilError> {
    let section = config.get_section("rules");
    if section.is_empty() {
        return Err(VigilError::NoRules);
    }
    let mut rules: Vec<RuleRecord> = section
        .into_iter()
        .map(|(id, dsl)| RuleRecord {
            name: id.clone(),
            id,
            version: 1,
            dsl,
            enabled: true,
            valid_from: None,
            valid_until: None,
        })
        .collect();
    rules.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(rules)
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let context = match build_compile_context(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let rules = match load_rules(&config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    for rule in &rules {
        eprintln!("\nRule {}:", rule.id);
        let ast = match parser::parse(&rule.dsl) {
            Ok(ast) => ast,
            Err(e) => {
                eprintln!("  error: {}", e.display_with_context(&rule.dsl));
                return (&VigilError::from(e)).into();
            }
        };
        eprintln!("  Parsed: {}", ast);
        match compile(ast, &context) {
            Ok(compiled) => {
                eprintln!("  Persistence: {} days", compiled.persistence_days);
                eprintln!("  Cooldown:    {} seconds", compiled.cooldown_seconds);
                eprintln!("  Fingerprint: {}", compiled.fingerprint_recipe);
            }
            Err(e) => {
                eprintln!("  error: {e}");
                return (&e).into();
            }
        }
    }

    eprintln!("\n{} rules are valid.", rules.len());
    ExitCode::SUCCESS
}

fn build_backtest_input(config: &dyn ConfigPort) -> Result<BacktestInput, VigilError> {
    let channel =
        config
            .get_string("backtest", "channel")
            .ok_or_else(|| VigilError::ConfigMissing {
                section: "backtest".into(),
                key: "channel".into(),
            })?;
    let parse_date = |key: &str| -> Result<NaiveDate, VigilError> {
        let raw = config
            .get_string("backtest", key)
            .ok_or_else(|| VigilError::ConfigMissing {
                section: "backtest".into(),
                key: key.into(),
            })?;
        NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| VigilError::ConfigInvalid {
            section: "backtest".into(),
            key: key.into(),
            reason: "invalid date format (expected YYYY-MM-DD)".into(),
        })
    };
    Ok(BacktestInput {
        channel,
        start: parse_date("start_date")?,
        end: parse_date("end_date")?,
        baseline_rate: config.get_double("backtest", "baseline_rate", backtest::DEFAULT_BASELINE_RATE),
        lead_window_days: config.get_int(
            "backtest",
            "lead_window_days",
            backtest::DEFAULT_LEAD_WINDOW_DAYS as i64,
        ) as u32,
    })
}

/// Band bounds keyed by storage key rather than indicator name, as the data
/// adapters see them.
fn bounds_by_key(context: &CompileContext) -> HashMap<String, BandBounds> {
    context
        .band_bounds
        .iter()
        .filter_map(|(name, bounds)| {
            context
                .indicator_keys
                .get(name)
                .map(|key| (key.clone(), *bounds))
        })
        .collect()
}

fn load_series(
    config: &dyn ConfigPort,
    section: &str,
    context: &CompileContext,
) -> Result<CsvSeriesAdapter, VigilError> {
    let path = config
        .get_string(section, "data_csv")
        .ok_or_else(|| VigilError::ConfigMissing {
            section: section.into(),
            key: "data_csv".into(),
        })?;
    CsvSeriesAdapter::from_file(path, bounds_by_key(context))
}

fn run_backtest(config_path: &PathBuf, output: Option<&PathBuf>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), VigilError> {
        let context = build_compile_context(&config)?;
        let rules = load_rules(&config)?;
        let input = build_backtest_input(&config)?;
        let data = load_series(&config, "backtest", &context)?;

        let incidents: Box<dyn IncidentPort> =
            match config.get_string("backtest", "incidents_csv") {
                Some(path) => Box::new(CsvIncidentAdapter::from_file(path)?),
                None => {
                    // No labeled incident log configured: deterministic
                    // random labels. Metrics against these measure plumbing
                    // only, not rule quality.
                    let seed = config.get_int("backtest", "incident_seed", 0) as u64;
                    let rate = config.get_double("backtest", "incident_rate", 0.1);
                    eprintln!(
                        "warning: no incidents_csv configured, using random labels \
                         (seed={seed}, rate={rate})"
                    );
                    Box::new(RandomIncidentAdapter::new(seed, rate))
                }
            };

        eprintln!(
            "Running backtest: {} rules, channel {}, {} to {}",
            rules.len(),
            input.channel,
            input.start,
            input.end,
        );
        let result = backtest::run_backtest(&rules, &context, &data, incidents.as_ref(), &input)?;

        eprintln!("\n=== Confusion Matrix ===");
        eprintln!("True Positives:   {}", result.matrix.true_positives);
        eprintln!("False Positives:  {}", result.matrix.false_positives);
        eprintln!("True Negatives:   {}", result.matrix.true_negatives);
        eprintln!("False Negatives:  {}", result.matrix.false_negatives);

        eprintln!("\n=== Metrics ===");
        eprintln!("Precision:        {:.3}", result.metrics.precision);
        eprintln!("Recall:           {:.3}", result.metrics.recall);
        eprintln!("F1:               {:.3}", result.metrics.f1);
        eprintln!("FP Rate:          {:.3}", result.metrics.false_positive_rate);
        eprintln!("Lift:             {:.2}", result.metrics.lift);
        eprintln!(
            "Avg Lead Time:    {:.1}h",
            result.metrics.avg_detection_lead_time_hours
        );

        let dir = output
            .cloned()
            .unwrap_or_else(|| PathBuf::from("backtest_artifacts"));
        CsvExportAdapter.export(&result, &dir)?;
        eprintln!("\nArtifacts written to: {}", dir.display());
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn run_scenario_cmd(
    config_path: &PathBuf,
    scenario_path: &PathBuf,
    output: Option<&PathBuf>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), VigilError> {
        let context = build_compile_context(&config)?;
        let rules = load_rules(&config)?;

        let raw = fs::read_to_string(scenario_path)?;
        let input: ScenarioInput =
            serde_json::from_str(&raw).map_err(|e| VigilError::ConfigParse {
                file: scenario_path.display().to_string(),
                reason: e.to_string(),
            })?;

        eprintln!(
            "Running scenario: {} rules, {} shocks, {} day horizon",
            rules.len(),
            input.shocks.len(),
            input.horizon_days,
        );
        let result = run_scenario(&rules, &context, &input)?;

        eprintln!("\n=== Scenario Projection ===");
        eprintln!("Total Firings:      {}", result.total_firings);
        eprintln!("Distinct Incidents: {}", result.distinct_incidents);
        eprintln!("Peak Load:          {:.2}", result.peak_load);
        if !result.constrained_out.is_empty() {
            eprintln!("Constrained Out:");
            for (tier, count) in &result.constrained_out {
                eprintln!("  {}: {}", tier, count);
            }
        }
        if result.suggested_prepositions.is_empty() {
            eprintln!("Suggested Prepositions: none");
        } else {
            eprintln!("Suggested Prepositions:");
            for suggestion in &result.suggested_prepositions {
                eprintln!("  {}", suggestion);
            }
        }

        if let Some(path) = output {
            let json = serde_json::to_string_pretty(&result).map_err(|e| VigilError::Export {
                reason: format!("failed to serialize result: {e}"),
            })?;
            fs::write(path, json)?;
            eprintln!("\nResult written to: {}", path.display());
        }
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Live data reads served from the historical series, firing history from
/// the in-memory sink.
struct WatchData {
    series: CsvSeriesAdapter,
    store: Arc<MemoryStore>,
}

impl DataPort for WatchData {
    fn point_value(&self, key: &str, at: DateTime<Utc>) -> Option<f64> {
        self.series.point_value(key, at)
    }

    fn band_state(&self, key: &str, at: DateTime<Utc>) -> Option<BandState> {
        self.series.band_state(key, at)
    }

    fn slope(&self, key: &str, window_days: u32, at: DateTime<Utc>) -> Option<f64> {
        self.series.slope(key, window_days, at)
    }

    fn last_firing(&self, fingerprint: &str) -> Option<DateTime<Utc>> {
        self.store.last_firing(fingerprint)
    }
}

fn run_watch(config_path: &PathBuf) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), VigilError> {
        let context = build_compile_context(&config)?;
        let rules = load_rules(&config)?;
        let series = load_series(&config, "worker", &context)?;

        let store = Arc::new(MemoryStore::new());
        for rule in rules {
            store.add_rule(rule)?;
        }
        let data = Arc::new(WatchData {
            series,
            store: store.clone(),
        });

        let interval_minutes = config.get_int(
            "worker",
            "interval_minutes",
            DEFAULT_INTERVAL.as_secs() as i64 / 60,
        );
        let interval = Duration::from_secs(interval_minutes.max(1) as u64 * 60);

        let trigger_worker =
            TriggerWorker::new(store.clone(), data, store.clone(), context);

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let handle = worker::spawn(trigger_worker, interval);
            eprintln!(
                "Worker running every {} minutes; press Ctrl-C to stop",
                interval_minutes.max(1)
            );
            let _ = tokio::signal::ctrl_c().await;
            handle.stop().await;
        });

        eprintln!("\n{} firings recorded this session", store.firings().len());
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const BASE: &str = r#"
[indicators]
heat_index = ind:heat_index
supply = ind:supply

[bands]
heat_index = 0.2,0.7

[worker]
default_cooldown_days = 3

[rules]
heat_surge = IF IND(heat_index) >= 0.75 FOR 7d THEN START containment_pack IN responsive
"#;

    #[test]
    fn context_from_config_sections() {
        let context = build_compile_context(&config(BASE)).unwrap();
        assert_eq!(
            context.indicator_keys.get("heat_index"),
            Some(&"ind:heat_index".to_string())
        );
        assert_eq!(
            context.band_bounds.get("heat_index"),
            Some(&BandBounds {
                lower: Some(0.2),
                upper: Some(0.7),
            })
        );
        assert_eq!(context.default_cooldown_days, 3);
    }

    #[test]
    fn open_band_edges() {
        assert_eq!(
            parse_band_bounds(",0.7").unwrap(),
            BandBounds {
                lower: None,
                upper: Some(0.7),
            }
        );
        assert_eq!(
            parse_band_bounds("0.2,").unwrap(),
            BandBounds {
                lower: Some(0.2),
                upper: None,
            }
        );
    }

    #[test]
    fn malformed_band_bounds_rejected() {
        assert!(matches!(
            parse_band_bounds("0.2"),
            Err(VigilError::ConfigInvalid { .. })
        ));
        assert!(matches!(
            parse_band_bounds("low,high"),
            Err(VigilError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn rules_loaded_and_sorted() {
        let content = r#"
[rules]
b_rule = IF IND(x) > 1 FOR 1d THEN START pack IN responsive
a_rule = IF IND(y) > 1 FOR 1d THEN START pack IN responsive
"#;
        let rules = load_rules(&config(content)).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "a_rule");
        assert_eq!(rules[1].id, "b_rule");
        assert!(rules.iter().all(|r| r.enabled && r.version == 1));
    }

    #[test]
    fn no_rules_section_is_error() {
        let err = load_rules(&config("[worker]\n")).unwrap_err();
        assert!(matches!(err, VigilError::NoRules));
    }

    #[test]
    fn backtest_input_from_config() {
        let content = r#"
[backtest]
channel = metro
start_date = 2025-01-01
end_date = 2025-03-31
baseline_rate = 0.2
"#;
        let input = build_backtest_input(&config(content)).unwrap();
        assert_eq!(input.channel, "metro");
        assert_eq!(input.start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(input.baseline_rate, 0.2);
        assert_eq!(input.lead_window_days, backtest::DEFAULT_LEAD_WINDOW_DAYS);
    }

    #[test]
    fn backtest_input_missing_keys() {
        let err = build_backtest_input(&config("[backtest]\nchannel = metro\n")).unwrap_err();
        assert!(matches!(err, VigilError::ConfigMissing { .. }));

        let err = build_backtest_input(&config(
            "[backtest]\nchannel = metro\nstart_date = nope\nend_date = 2025-01-01\n",
        ))
        .unwrap_err();
        assert!(matches!(err, VigilError::ConfigInvalid { .. }));
    }

    #[test]
    fn bounds_remapped_to_storage_keys() {
        let context = build_compile_context(&config(BASE)).unwrap();
        let by_key = bounds_by_key(&context);
        assert!(by_key.contains_key("ind:heat_index"));
        assert!(!by_key.contains_key("heat_index"));
    }
}
