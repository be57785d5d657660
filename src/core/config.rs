//! Configuration: TOML file + `DAH_*` environment overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DahError, Result};
use crate::core::paths::resolve_absolute_path;
use crate::logger::jsonl::JsonlConfig;

/// Largest page the listing endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 1_000;
/// Largest page the permission endpoint accepts.
pub const MAX_PERMISSION_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub download: DownloadConfig,
    pub resume: ResumeConfig,
    pub remediation: RemediationSettings,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Fresh metadata download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadConfig {
    pub page_size: u32,
    pub permission_page_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResumeConfig {
    /// Pause between per-record refetches, in milliseconds.
    pub sleep_ms: u64,
}

/// Bulk mutation runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemediationSettings {
    /// Account whose `owner` permission gates dedup and orphan removal.
    pub account_email: Option<String>,
    pub dry_run: bool,
    /// Pause between mutating calls, in milliseconds.
    pub delay_ms: u64,
    /// Stop after this many applied mutations.
    pub max_batch: Option<usize>,
}

/// Activity log behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
    pub fallback_log: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            permission_page_size: MAX_PERMISSION_PAGE_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 32 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 5,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[DAH-CONFIG] WARNING: HOME not set, using /tmp for dah paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let data = home.join(".local").join("share").join("dah");
        Self {
            config_file: home.join(".config").join("dah").join("config.toml"),
            activity_log: data.join("activity.jsonl"),
            fallback_log: Some(env::temp_dir().join("dah-activity.jsonl")),
        }
    }
}

impl RemediationSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Config {
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load from an explicit path or the default location, then apply env overrides.
    ///
    /// A missing file at the default location yields defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw =
                fs::read_to_string(&path_buf).map_err(|source| DahError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(DahError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(|name| env::var(name).ok())?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-process stable FNV-1a hash of the effective configuration.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let hash = canonical
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |acc, byte| {
                (acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
            });
        Ok(format!("{hash:016x}"))
    }

    /// Writer settings for the activity log.
    pub fn jsonl_config(&self) -> JsonlConfig {
        JsonlConfig {
            path: self.paths.activity_log.clone(),
            fallback_path: self.paths.fallback_log.clone(),
            max_size_bytes: self.logging.max_size_bytes,
            max_rotated_files: self.logging.max_rotated_files,
            fsync_interval: Duration::from_secs(self.logging.fsync_interval_secs),
        }
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = var("DAH_DOWNLOAD_PAGE_SIZE") {
            self.download.page_size = parse_env("DAH_DOWNLOAD_PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = var("DAH_DOWNLOAD_PERMISSION_PAGE_SIZE") {
            self.download.permission_page_size =
                parse_env("DAH_DOWNLOAD_PERMISSION_PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = var("DAH_RESUME_SLEEP_MS") {
            self.resume.sleep_ms = parse_env("DAH_RESUME_SLEEP_MS", &raw)?;
        }
        if let Some(raw) = var("DAH_REMEDIATION_ACCOUNT_EMAIL") {
            self.remediation.account_email = Some(raw.trim().to_string());
        }
        if let Some(raw) = var("DAH_REMEDIATION_DRY_RUN") {
            self.remediation.dry_run = parse_env("DAH_REMEDIATION_DRY_RUN", &raw)?;
        }
        if let Some(raw) = var("DAH_REMEDIATION_DELAY_MS") {
            self.remediation.delay_ms = parse_env("DAH_REMEDIATION_DELAY_MS", &raw)?;
        }
        if let Some(raw) = var("DAH_REMEDIATION_MAX_BATCH") {
            self.remediation.max_batch = Some(parse_env("DAH_REMEDIATION_MAX_BATCH", &raw)?);
        }
        if let Some(raw) = var("DAH_LOGGING_ENABLED") {
            self.logging.enabled = parse_env("DAH_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = var("DAH_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        Ok(())
    }

    fn normalize_paths(&mut self) {
        self.paths.activity_log = resolve_absolute_path(&self.paths.activity_log);
        if let Some(fallback) = self.paths.fallback_log.as_mut() {
            *fallback = resolve_absolute_path(fallback);
        }
        if let Some(email) = self.remediation.account_email.as_mut() {
            *email = email.trim().to_ascii_lowercase();
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |details: String| Err(DahError::InvalidConfig { details });

        if !(1..=MAX_PAGE_SIZE).contains(&self.download.page_size) {
            return invalid(format!(
                "download.page_size must be in [1, {MAX_PAGE_SIZE}], got {}",
                self.download.page_size
            ));
        }
        if !(1..=MAX_PERMISSION_PAGE_SIZE).contains(&self.download.permission_page_size) {
            return invalid(format!(
                "download.permission_page_size must be in [1, {MAX_PERMISSION_PAGE_SIZE}], got {}",
                self.download.permission_page_size
            ));
        }
        if let Some(email) = &self.remediation.account_email
            && (email.is_empty() || !email.contains('@'))
        {
            return invalid(format!(
                "remediation.account_email must be an email address, got {email:?}"
            ));
        }
        if self.remediation.max_batch == Some(0) {
            return invalid("remediation.max_batch must be >= 1 when set".to_string());
        }
        if self.logging.max_size_bytes < 4096 {
            return invalid(format!(
                "logging.max_size_bytes must be >= 4096, got {}",
                self.logging.max_size_bytes
            ));
        }
        if self.paths.activity_log.as_os_str().is_empty() {
            return invalid("paths.activity_log must not be empty".to_string());
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| DahError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn page_size_bounds_enforced() {
        let mut cfg = Config::default();
        cfg.download.page_size = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("page_size"));
        cfg.download.page_size = MAX_PAGE_SIZE + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.download.permission_page_size = 101;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("permission_page_size"));
    }

    #[test]
    fn account_email_must_look_like_an_address() {
        let mut cfg = Config::default();
        cfg.remediation.account_email = Some("nobody".to_string());
        assert!(cfg.validate().unwrap_err().to_string().contains("account_email"));
        cfg.remediation.account_email = Some("me@example.org".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_max_batch_rejected() {
        let mut cfg = Config::default();
        cfg.remediation.max_batch = Some(0);
        assert!(cfg.validate().unwrap_err().to_string().contains("max_batch"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let env = vars(&[
            ("DAH_DOWNLOAD_PAGE_SIZE", "250"),
            ("DAH_RESUME_SLEEP_MS", "15"),
            ("DAH_REMEDIATION_ACCOUNT_EMAIL", " Me@Example.org "),
            ("DAH_REMEDIATION_DRY_RUN", "true"),
            ("DAH_REMEDIATION_MAX_BATCH", "7"),
            ("DAH_LOGGING_ENABLED", ""),
        ]);
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap();
        cfg.normalize_paths();

        assert_eq!(cfg.download.page_size, 250);
        assert_eq!(cfg.resume.sleep_ms, 15);
        assert_eq!(cfg.remediation.account_email.as_deref(), Some("me@example.org"));
        assert!(cfg.remediation.dry_run);
        assert_eq!(cfg.remediation.max_batch, Some(7));
        assert!(cfg.logging.enabled, "blank values are ignored");
    }

    #[test]
    fn invalid_env_value_names_the_variable() {
        let mut cfg = Config::default();
        let env = vars(&[("DAH_REMEDIATION_DRY_RUN", "maybe")]);
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap_err();
        match err {
            DahError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("DAH_REMEDIATION_DRY_RUN"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_reads_toml_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[download]\npage_size = 100\n\n[remediation]\naccount_email = \"ops@example.org\"\ndelay_ms = 250\n",
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.download.page_size, 100);
        assert_eq!(cfg.download.permission_page_size, MAX_PERMISSION_PAGE_SIZE);
        assert_eq!(cfg.remediation.delay(), Duration::from_millis(250));
        assert_eq!(cfg.paths.config_file, path);
        assert!(cfg.paths.activity_log.is_absolute());
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[download\npage_size = ").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert_eq!(err.code(), "DAH-1003");
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/dah/config.toml"))).unwrap_err();
        assert!(matches!(err, DahError::MissingConfig { .. }));
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let a = Config::default();
        let mut b = Config::default();
        assert_eq!(a.stable_hash().unwrap(), b.stable_hash().unwrap());
        b.resume.sleep_ms = 1;
        assert_ne!(a.stable_hash().unwrap(), b.stable_hash().unwrap());
    }

    #[test]
    fn jsonl_config_mirrors_logging_section() {
        let mut cfg = Config::default();
        cfg.logging.max_rotated_files = 9;
        cfg.logging.fsync_interval_secs = 2;
        let jsonl = cfg.jsonl_config();
        assert_eq!(jsonl.path, cfg.paths.activity_log);
        assert_eq!(jsonl.max_rotated_files, 9);
        assert_eq!(jsonl.fsync_interval, Duration::from_secs(2));
    }
}
