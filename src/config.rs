use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read once from `STAYDESK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Journal appends between compactions.
    pub compact_threshold: u64,
    /// Guest requests start Confirmed instead of Pending.
    pub guest_auto_confirm: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            guest_auto_confirm: false,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("STAYDESK_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "STAYDESK_PORT").unwrap_or(defaults.port),
            data_dir: lookup("STAYDESK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "STAYDESK_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "STAYDESK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            guest_auto_confirm: flag(&lookup, "STAYDESK_GUEST_AUTO_CONFIRM")
                .unwrap_or(defaults.guest_auto_confirm),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("staydesk.journal")
    }
}

/// Dashboard sync settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let poll_interval = parsed::<u64>(&lookup, "STAYDESK_POLL_INTERVAL_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(Self::default().poll_interval);
        Self { poll_interval }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(ServerConfig::from_lookup(env(&[])), ServerConfig::default());
        assert_eq!(SyncConfig::from_lookup(env(&[])).poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn reads_overrides() {
        let cfg = ServerConfig::from_lookup(env(&[
            ("STAYDESK_BIND", "127.0.0.1"),
            ("STAYDESK_PORT", "9000"),
            ("STAYDESK_DATA_DIR", "/var/lib/staydesk"),
            ("STAYDESK_METRICS_PORT", "9100"),
            ("STAYDESK_COMPACT_THRESHOLD", "50"),
            ("STAYDESK_GUEST_AUTO_CONFIRM", "true"),
        ]));
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.journal_path(), PathBuf::from("/var/lib/staydesk/staydesk.journal"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.compact_threshold, 50);
        assert!(cfg.guest_auto_confirm);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = ServerConfig::from_lookup(env(&[
            ("STAYDESK_PORT", "http"),
            ("STAYDESK_GUEST_AUTO_CONFIRM", "nah"),
        ]));
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.guest_auto_confirm);

        let sync = SyncConfig::from_lookup(env(&[("STAYDESK_POLL_INTERVAL_MS", "0")]));
        assert_eq!(sync.poll_interval, Duration::from_secs(5));
        let sync = SyncConfig::from_lookup(env(&[("STAYDESK_POLL_INTERVAL_MS", "250")]));
        assert_eq!(sync.poll_interval, Duration::from_millis(250));
    }
}
