//! Backtest artifact export port.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::VigilError;
use std::path::Path;

pub trait ExportPort {
    /// Write the row-per-firing table and chart-ready series under `dir`.
    fn export(&self, result: &BacktestResult, dir: &Path) -> Result<(), VigilError>;
}
