//! Capability port traits consumed and produced by the core.

pub mod config_port;
pub mod data_port;
pub mod registry_port;
pub mod sink_port;
pub mod incident_port;
pub mod export_port;
