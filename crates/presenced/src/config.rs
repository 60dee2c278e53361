use chrono::NaiveTime;
use presence_core::{BoundaryError, PunctualityClassifier};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key}: invalid time {value:?} (expected HH:MM or HH:MM:SS)")]
    InvalidTime { key: &'static str, value: String },
    #[error("{key}: unknown bus {value:?} (expected \"system\" or \"session\")")]
    InvalidBus { key: &'static str, value: String },
    #[error("punctuality boundaries: {0}")]
    Boundaries(#[from] BoundaryError),
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    System,
    Session,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory where submitted images live for the duration of one check-in.
    pub staging_dir: PathBuf,
    /// Face verification helper program.
    pub verifier_program: PathBuf,
    /// Fixed arguments passed to the helper before the two image paths.
    pub verifier_args: Vec<String>,
    /// Timeout in seconds for one verification.
    pub verify_timeout_secs: u64,
    /// Start of the working day; earlier check-ins are `early`.
    pub work_start: NaiveTime,
    /// Last instant that still counts as `on_time`.
    pub grace_end: NaiveTime,
    /// Wall-clock time of the daily initialization.
    pub init_at: NaiveTime,
    /// Also initialize once when the daemon starts.
    pub init_on_startup: bool,
    /// Skip initialization on Saturdays and Sundays.
    pub skip_weekends: bool,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = get("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let db_path = get("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("attendance.db"));

        let staging_dir = get("PRESENCE_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("staging"));

        let bus = match get("PRESENCE_BUS").as_deref() {
            None | Some("system") => BusKind::System,
            Some("session") => BusKind::Session,
            Some(other) => {
                return Err(ConfigError::InvalidBus {
                    key: "PRESENCE_BUS",
                    value: other.to_string(),
                })
            }
        };

        let config = Self {
            db_path,
            staging_dir,
            verifier_program: get("PRESENCE_VERIFIER_PROGRAM")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("presence-face-verify")),
            verifier_args: get("PRESENCE_VERIFIER_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            verify_timeout_secs: env_u64(&get, "PRESENCE_VERIFY_TIMEOUT_SECS", 30),
            work_start: env_time(&get, "PRESENCE_WORK_START", "08:00:00")?,
            grace_end: env_time(&get, "PRESENCE_GRACE_END", "08:15:00")?,
            init_at: env_time(&get, "PRESENCE_INIT_AT", "00:05:00")?,
            init_on_startup: env_flag(&get, "PRESENCE_INIT_ON_STARTUP", true),
            skip_weekends: env_flag(&get, "PRESENCE_SKIP_WEEKENDS", false),
            bus,
        };

        // Fail at startup rather than on the first check-in.
        config.classifier()?;
        Ok(config)
    }

    pub fn classifier(&self) -> Result<PunctualityClassifier, BoundaryError> {
        PunctualityClassifier::new(self.work_start, self.grace_end)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

fn env_u64(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    get(key).map(|v| v != "0").unwrap_or(default)
}

fn env_time(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<NaiveTime, ConfigError> {
    let raw = get(key).unwrap_or_else(|| default.to_string());
    parse_time(&raw).ok_or(ConfigError::InvalidTime { key, value: raw })
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("HOME", "/home/an")]).unwrap();
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/an/.local/share/presence/attendance.db")
        );
        assert_eq!(
            config.staging_dir,
            PathBuf::from("/home/an/.local/share/presence/staging")
        );
        assert_eq!(config.work_start, t(8, 0, 0));
        assert_eq!(config.grace_end, t(8, 15, 0));
        assert_eq!(config.init_at, t(0, 5, 0));
        assert_eq!(config.verify_timeout(), Duration::from_secs(30));
        assert!(config.init_on_startup);
        assert!(!config.skip_weekends);
        assert_eq!(config.bus, BusKind::System);
        assert!(config.verifier_args.is_empty());
    }

    #[test]
    fn test_xdg_data_home_wins() {
        let config = load(&[("XDG_DATA_HOME", "/srv/data"), ("HOME", "/home/an")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/data/presence/attendance.db"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PRESENCE_DB_PATH", "/var/lib/presence/a.db"),
            ("PRESENCE_WORK_START", "09:00"),
            ("PRESENCE_GRACE_END", "09:10:30"),
            ("PRESENCE_SKIP_WEEKENDS", "1"),
            ("PRESENCE_INIT_ON_STARTUP", "0"),
            ("PRESENCE_VERIFIER_PROGRAM", "/usr/libexec/face-verify"),
            ("PRESENCE_VERIFIER_ARGS", "--model  ArcFace --detector retinaface"),
            ("PRESENCE_VERIFY_TIMEOUT_SECS", "12"),
            ("PRESENCE_BUS", "session"),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/presence/a.db"));
        assert_eq!(config.work_start, t(9, 0, 0));
        assert_eq!(config.grace_end, t(9, 10, 30));
        assert!(config.skip_weekends);
        assert!(!config.init_on_startup);
        assert_eq!(config.verifier_program, PathBuf::from("/usr/libexec/face-verify"));
        assert_eq!(
            config.verifier_args,
            vec!["--model", "ArcFace", "--detector", "retinaface"]
        );
        assert_eq!(config.verify_timeout_secs, 12);
        assert_eq!(config.bus, BusKind::Session);
    }

    #[test]
    fn test_malformed_number_falls_back() {
        let config = load(&[("PRESENCE_VERIFY_TIMEOUT_SECS", "soon")]).unwrap();
        assert_eq!(config.verify_timeout_secs, 30);
    }

    #[test]
    fn test_malformed_time_is_an_error() {
        let err = load(&[("PRESENCE_GRACE_END", "quarter past eight")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTime { key: "PRESENCE_GRACE_END", .. }));
    }

    #[test]
    fn test_inverted_boundaries_rejected() {
        let err = load(&[
            ("PRESENCE_WORK_START", "09:00"),
            ("PRESENCE_GRACE_END", "08:45"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Boundaries(_)));
    }

    #[test]
    fn test_unknown_bus_rejected() {
        let err = load(&[("PRESENCE_BUS", "tcp")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBus { .. }));
    }
}
