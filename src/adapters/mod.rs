//! Concrete adapter implementations for ports.

pub mod csv_export;
pub mod csv_series_adapter;
pub mod file_config_adapter;
pub mod memory_store;
pub mod random_incident_adapter;
