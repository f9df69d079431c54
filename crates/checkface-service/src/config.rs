use crate::auth::DigestGate;
use crate::policy::{CheckInPolicy, DedupPolicy};
use checkface_core::{AdminGate, DenyAll};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Optional settings file. Every field may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    corpus_dir: Option<PathBuf>,
    inbox_dir: Option<PathBuf>,
    photo_extension: Option<String>,
    poll_interval_ms: Option<u64>,
    match_timeout_secs: Option<u64>,
    report_window_days: Option<u32>,
    dedup_policy: Option<DedupPolicy>,
    checkin_policy: Option<CheckInPolicy>,
    admin_gate: Option<bool>,
    admin_secret_sha256: Option<String>,
    matcher_command: Option<String>,
}

/// Runtime configuration: defaults, overlaid by the file named in
/// `CHECKFACE_CONFIG`, overlaid by `CHECKFACE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding one photo per enrolled identity.
    pub corpus_dir: PathBuf,
    /// Directory a capture tool drops frames into for `watch`.
    pub inbox_dir: PathBuf,
    /// Image format of corpus photos, by extension.
    pub photo_extension: String,
    /// How often the frame source is polled.
    pub poll_interval: Duration,
    /// Upper bound on a single match.
    pub match_timeout: Duration,
    pub report_window_days: u32,
    pub dedup_policy: DedupPolicy,
    pub checkin_policy: CheckInPolicy,
    /// Whether administrative commands require a secret.
    pub admin_gate: bool,
    /// Hex SHA-256 of the admin secret.
    pub admin_secret_sha256: Option<String>,
    /// External program used as the face matcher.
    pub matcher_command: Option<String>,
}

impl Config {
    /// Load configuration from the optional file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("CHECKFACE_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = env("CHECKFACE_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&env));

        let db_path = env("CHECKFACE_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("face_info.db"));
        let corpus_dir = env("CHECKFACE_CORPUS_DIR")
            .map(PathBuf::from)
            .or(file.corpus_dir)
            .unwrap_or_else(|| data_dir.join("face_list"));
        let inbox_dir = env("CHECKFACE_INBOX_DIR")
            .map(PathBuf::from)
            .or(file.inbox_dir)
            .unwrap_or_else(|| data_dir.join("inbox"));

        let dedup_policy = match env("CHECKFACE_DEDUP_POLICY") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "CHECKFACE_DEDUP_POLICY",
                value: v,
            })?,
            None => file.dedup_policy.unwrap_or_default(),
        };
        let checkin_policy = match env("CHECKFACE_CHECKIN_POLICY") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "CHECKFACE_CHECKIN_POLICY",
                value: v,
            })?,
            None => file.checkin_policy.unwrap_or_default(),
        };

        Ok(Self {
            db_path,
            corpus_dir,
            inbox_dir,
            photo_extension: env("CHECKFACE_PHOTO_EXT")
                .or(file.photo_extension)
                .unwrap_or_else(|| "jpg".to_string()),
            poll_interval: Duration::from_millis(env_parse(
                &env,
                "CHECKFACE_POLL_INTERVAL_MS",
                file.poll_interval_ms.unwrap_or(50),
            )),
            match_timeout: Duration::from_secs(env_parse(
                &env,
                "CHECKFACE_MATCH_TIMEOUT_SECS",
                file.match_timeout_secs.unwrap_or(30),
            )),
            report_window_days: env_parse(
                &env,
                "CHECKFACE_REPORT_WINDOW_DAYS",
                file.report_window_days.unwrap_or(3),
            ),
            dedup_policy,
            checkin_policy,
            admin_gate: env("CHECKFACE_ADMIN_GATE")
                .map(|v| v != "0")
                .or(file.admin_gate)
                .unwrap_or(true),
            admin_secret_sha256: env("CHECKFACE_ADMIN_SECRET_SHA256").or(file.admin_secret_sha256),
            matcher_command: env("CHECKFACE_MATCHER").or(file.matcher_command),
        })
    }

    /// The admin gate to enforce, or `None` when gating is switched off.
    ///
    /// With gating on but no usable digest configured, every secret is refused.
    pub fn admin_gate(&self) -> Option<Box<dyn AdminGate>> {
        if !self.admin_gate {
            return None;
        }
        match self.admin_secret_sha256.as_deref().and_then(DigestGate::from_hex) {
            Some(gate) => Some(Box::new(gate)),
            None => {
                tracing::warn!("admin gate enabled but no valid CHECKFACE_ADMIN_SECRET_SHA256; admin commands are locked");
                Some(Box::new(DenyAll))
            }
        }
    }
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("checkface")
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "unparsable setting; using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::resolve(FileConfig::default(), env_of(&[("HOME", "/home/ann")])).unwrap();
        let data = PathBuf::from("/home/ann/.local/share/checkface");
        assert_eq!(cfg.db_path, data.join("face_info.db"));
        assert_eq!(cfg.corpus_dir, data.join("face_list"));
        assert_eq!(cfg.inbox_dir, data.join("inbox"));
        assert_eq!(cfg.photo_extension, "jpg");
        assert_eq!(cfg.poll_interval, Duration::from_millis(50));
        assert_eq!(cfg.match_timeout, Duration::from_secs(30));
        assert_eq!(cfg.report_window_days, 3);
        assert_eq!(cfg.dedup_policy, DedupPolicy::NameAndId);
        assert_eq!(cfg.checkin_policy, CheckInPolicy::AllowMultiple);
        assert!(cfg.admin_gate);
        assert!(cfg.matcher_command.is_none());
    }

    #[test]
    fn test_file_then_env_precedence() {
        let file: FileConfig = toml::from_str(
            r#"
            data_dir = "/srv/attendance"
            checkin_policy = "once-per-day"
            report_window_days = 7
            matcher_command = "/usr/bin/match-file"
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(
            file,
            env_of(&[("CHECKFACE_REPORT_WINDOW_DAYS", "5"), ("CHECKFACE_ADMIN_GATE", "0")]),
        )
        .unwrap();

        assert_eq!(cfg.db_path, PathBuf::from("/srv/attendance/face_info.db"));
        assert_eq!(cfg.checkin_policy, CheckInPolicy::OncePerDay);
        assert_eq!(cfg.report_window_days, 5);
        assert_eq!(cfg.matcher_command.as_deref(), Some("/usr/bin/match-file"));
        assert!(!cfg.admin_gate);
        assert!(cfg.admin_gate().is_none());
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = 2").is_err());
    }

    #[test]
    fn test_bad_policy_env() {
        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOME", "/h"), ("CHECKFACE_DEDUP_POLICY", "fuzzy")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CHECKFACE_DEDUP_POLICY", .. }));
    }

    #[test]
    fn test_bad_number_falls_back() {
        let cfg = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOME", "/h"), ("CHECKFACE_POLL_INTERVAL_MS", "soon")]),
        )
        .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_admin_gate_without_digest_denies() {
        let cfg = Config::resolve(FileConfig::default(), env_of(&[("HOME", "/h")])).unwrap();
        let gate = cfg.admin_gate().unwrap();
        assert!(!gate.authenticate("admin"));
    }

    #[test]
    fn test_admin_gate_with_digest() {
        let digest = crate::auth::hex_digest("s3cret");
        let cfg = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOME", "/h"), ("CHECKFACE_ADMIN_SECRET_SHA256", &digest)]),
        )
        .unwrap();
        let gate = cfg.admin_gate().unwrap();
        assert!(gate.authenticate("s3cret"));
        assert!(!gate.authenticate("admin"));
    }
}
