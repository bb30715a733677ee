//! INI file configuration adapter.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::collections::HashMap;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }

    fn get_section(&self, section: &str) -> HashMap<String, String> {
        self.config
            .get_map_ref()
            .get(&section.to_lowercase())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(key, value)| {
                        value.as_ref().map(|v| (key.clone(), v.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[worker]
interval_minutes = 15

[rules]
default_cooldown_days = 7

[indicators]
heat_index = ind:heat_index
supply = ind:supply
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(adapter.get_int("worker", "interval_minutes", 0), 15);
        assert_eq!(adapter.get_int("rules", "default_cooldown_days", 0), 7);
        assert_eq!(
            adapter.get_string("indicators", "heat_index"),
            Some("ind:heat_index".to_string())
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[worker]\ninterval_minutes = 15\n").unwrap();
        assert_eq!(adapter.get_string("worker", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_default_for_non_numeric() {
        let adapter =
            FileConfigAdapter::from_string("[worker]\ninterval_minutes = abc\n").unwrap();
        assert_eq!(adapter.get_int("worker", "interval_minutes", 42), 42);
    }

    #[test]
    fn get_double_returns_value() {
        let adapter =
            FileConfigAdapter::from_string("[backtest]\nbaseline_rate = 0.15\n").unwrap();
        assert_eq!(adapter.get_double("backtest", "baseline_rate", 0.0), 0.15);
    }

    #[test]
    fn get_double_returns_default_for_missing() {
        let adapter = FileConfigAdapter::from_string("[backtest]\n").unwrap();
        assert_eq!(adapter.get_double("backtest", "missing", 99.9), 99.9);
    }

    #[test]
    fn get_bool_values() {
        let adapter =
            FileConfigAdapter::from_string("[worker]\na = true\nb = no\nc = 1\n").unwrap();
        assert!(adapter.get_bool("worker", "a", false));
        assert!(!adapter.get_bool("worker", "b", true));
        assert!(adapter.get_bool("worker", "c", false));
        assert!(adapter.get_bool("worker", "missing", true));
    }

    #[test]
    fn get_section_returns_all_pairs() {
        let content = "[indicators]\nheat_index = ind:heat_index\nsupply = ind:supply\n";
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        let section = adapter.get_section("indicators");
        assert_eq!(section.len(), 2);
        assert_eq!(
            section.get("heat_index"),
            Some(&"ind:heat_index".to_string())
        );
        assert_eq!(section.get("supply"), Some(&"ind:supply".to_string()));
    }

    #[test]
    fn get_section_missing_is_empty() {
        let adapter = FileConfigAdapter::from_string("[worker]\n").unwrap();
        assert!(adapter.get_section("indicators").is_empty());
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[worker]\ninterval_minutes = 5\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(adapter.get_int("worker", "interval_minutes", 0), 5);
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(result.is_err());
    }
}
