//! CSV-backed historical data adapters.
//!
//! `CsvSeriesAdapter` loads daily indicator readings from a CSV file with
//! `indicator,date,value` rows and serves the data-source contract for
//! backtests. It carries no firing history, so `last_firing` is always
//! absent. `CsvIncidentAdapter` loads ground-truth incident labels from
//! `channel,date` rows.

use crate::domain::ast::BandState;
use crate::domain::compiler::BandBounds;
use crate::domain::error::VigilError;
use crate::domain::timeseries::least_squares_slope;
use crate::ports::data_port::DataPort;
use crate::ports::incident_port::IncidentPort;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

pub struct CsvSeriesAdapter {
    series: HashMap<String, BTreeMap<NaiveDate, f64>>,
    bounds: HashMap<String, BandBounds>,
}

impl CsvSeriesAdapter {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        bounds: HashMap<String, BandBounds>,
    ) -> Result<Self, VigilError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| VigilError::DataSource {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_reader(content.as_bytes(), bounds)
    }

    pub fn from_reader<R: std::io::Read>(
        reader: R,
        bounds: HashMap<String, BandBounds>,
    ) -> Result<Self, VigilError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut series: HashMap<String, BTreeMap<NaiveDate, f64>> = HashMap::new();

        for result in rdr.records() {
            let record = result.map_err(|e| VigilError::DataSource {
                reason: format!("CSV parse error: {}", e),
            })?;

            let indicator = record.get(0).ok_or_else(|| VigilError::DataSource {
                reason: "missing indicator column".into(),
            })?;
            let date_str = record.get(1).ok_or_else(|| VigilError::DataSource {
                reason: "missing date column".into(),
            })?;
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
                VigilError::DataSource {
                    reason: format!("invalid date format: {}", e),
                }
            })?;
            let value: f64 = record
                .get(2)
                .ok_or_else(|| VigilError::DataSource {
                    reason: "missing value column".into(),
                })?
                .parse()
                .map_err(|e| VigilError::DataSource {
                    reason: format!("invalid value: {}", e),
                })?;

            series
                .entry(indicator.to_string())
                .or_default()
                .insert(date, value);
        }

        Ok(Self { series, bounds })
    }

    pub fn indicator_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.series.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl DataPort for CsvSeriesAdapter {
    fn point_value(&self, key: &str, at: DateTime<Utc>) -> Option<f64> {
        self.series.get(key)?.get(&at.date_naive()).copied()
    }

    fn band_state(&self, key: &str, at: DateTime<Utc>) -> Option<BandState> {
        let reading = self.point_value(key, at)?;
        let bounds = self.bounds.get(key)?;
        if bounds.lower.is_some_and(|lower| reading < lower) {
            return Some(BandState::Below);
        }
        if bounds.upper.is_some_and(|upper| reading > upper) {
            return Some(BandState::Above);
        }
        Some(BandState::InBand)
    }

    fn slope(&self, key: &str, window_days: u32, at: DateTime<Utc>) -> Option<f64> {
        let series = self.series.get(key)?;
        let end = at.date_naive();
        let start = end - Duration::days(window_days as i64 - 1);
        let values: Vec<f64> = series
            .range(start..=end)
            .map(|(_, value)| *value)
            .collect();
        least_squares_slope(&values)
    }

    fn last_firing(&self, _fingerprint: &str) -> Option<DateTime<Utc>> {
        None
    }
}

pub struct CsvIncidentAdapter {
    incidents: HashSet<(String, NaiveDate)>,
}

impl CsvIncidentAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VigilError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| VigilError::DataSource {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_reader(content.as_bytes())
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, VigilError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut incidents = HashSet::new();

        for result in rdr.records() {
            let record = result.map_err(|e| VigilError::DataSource {
                reason: format!("CSV parse error: {}", e),
            })?;
            let channel = record.get(0).ok_or_else(|| VigilError::DataSource {
                reason: "missing channel column".into(),
            })?;
            let date_str = record.get(1).ok_or_else(|| VigilError::DataSource {
                reason: "missing date column".into(),
            })?;
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
                VigilError::DataSource {
                    reason: format!("invalid date format: {}", e),
                }
            })?;
            incidents.insert((channel.to_string(), date));
        }

        Ok(Self { incidents })
    }
}

impl IncidentPort for CsvIncidentAdapter {
    fn incident_on(&self, channel: &str, day: NaiveDate) -> bool {
        self.incidents.contains(&(channel.to_string(), day))
    }
}
