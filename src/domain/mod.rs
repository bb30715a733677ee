//! Core domain types and logic.

pub mod ast;
pub mod parser;
pub mod compiler;
pub mod evaluator;
pub mod worker;
pub mod scenario;
pub mod backtest;
pub mod timeseries;
pub mod error;
