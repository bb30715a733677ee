//! vigil — early-warning trigger engine over time-series indicators.
//!
//! A trigger rule is one line of DSL text: a condition over indicators, a
//! persistence requirement, an action to start, and tuning options. The
//! core parses and compiles rules, evaluates them with an audit trail, runs
//! them on a periodic schedule, and validates them with scenario simulation
//! and historical backtests.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in
//! [`ports`], concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
