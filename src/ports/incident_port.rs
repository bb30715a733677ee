//! Ground-truth incident label port for backtesting.

use chrono::NaiveDate;

pub trait IncidentPort: Send + Sync {
    /// Whether a labeled incident occurred on this day for this channel.
    fn incident_on(&self, channel: &str, day: NaiveDate) -> bool;
}
