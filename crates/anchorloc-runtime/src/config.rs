//! Localizer configuration – reads/writes `~/.anchorloc/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anchorloc_geometry::FilterSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Persisted localizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizerConfig {
    /// Run corrections through the map's pose filter before applying them.
    #[serde(default = "default_true")]
    pub use_filtering: bool,

    /// Reset all filter histories when the localized map changes.
    #[serde(default)]
    pub reset_on_map_change: bool,

    /// Period of the background localization loop.
    #[serde(default = "default_interval_ms")]
    pub localize_interval_ms: u64,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub filter: FilterSettings,
}

/// Remote localization service settings.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub base_url: String,

    /// Developer token sent with every request.  Stored as plain text; the
    /// file is written owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    /// Client-side request budget.  `0` disables the limiter.
    #[serde(default = "default_requests_per_second")]
    pub max_requests_per_second: u32,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("base_url", &self.base_url)
            .field(
                "token",
                if self.token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("max_requests_per_second", &self.max_requests_per_second)
            .finish()
    }
}

fn default_true() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    2000
}
fn default_server_url() -> String {
    "https://api.immersal.com".to_string()
}
fn default_requests_per_second() -> u32 {
    2
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            use_filtering: default_true(),
            reset_on_map_change: false,
            localize_interval_ms: default_interval_ms(),
            server: ServerConfig::default(),
            filter: FilterSettings::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_server_url(),
            token: String::new(),
            max_requests_per_second: default_requests_per_second(),
        }
    }
}

impl LocalizerConfig {
    pub fn localize_interval(&self) -> Duration {
        Duration::from_millis(self.localize_interval_ms.max(1))
    }
}

/// Return the path to `~/.anchorloc/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".anchorloc").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<LocalizerConfig>, ConfigError> {
    load_from(&config_path())
}

/// Load the config from `path` and apply environment overrides.
pub fn load_from(path: &Path) -> Result<Option<LocalizerConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: LocalizerConfig = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ANCHORLOC_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ANCHORLOC_SERVER_URL` | `server.base_url` |
/// | `ANCHORLOC_TOKEN` | `server.token` |
/// | `ANCHORLOC_INTERVAL_MS` | `localize_interval_ms` |
/// | `ANCHORLOC_USE_FILTERING` | `use_filtering` |
pub fn apply_env_overrides(cfg: &mut LocalizerConfig) {
    if let Ok(v) = std::env::var("ANCHORLOC_SERVER_URL") {
        cfg.server.base_url = v;
    }
    if let Ok(v) = std::env::var("ANCHORLOC_TOKEN") {
        cfg.server.token.zeroize();
        cfg.server.token = v;
    }
    if let Ok(v) = std::env::var("ANCHORLOC_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.localize_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("ANCHORLOC_USE_FILTERING")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.use_filtering = flag;
    }
}

/// Save the config, creating `~/.anchorloc/` if necessary.
pub fn save(cfg: &LocalizerConfig) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Save the config to `path`, owner-only on Unix.
pub fn save_to(cfg: &LocalizerConfig, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = LocalizerConfig::default();
        assert!(cfg.use_filtering);
        assert!(!cfg.reset_on_map_change);
        assert_eq!(cfg.localize_interval(), Duration::from_secs(2));
        assert_eq!(cfg.server.max_requests_per_second, 2);
        assert_eq!(cfg.filter, FilterSettings::default());
    }

    #[test]
    fn debug_redacts_token() {
        let mut cfg = LocalizerConfig::default();
        cfg.server.token = "tok-super-secret".to_string();
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("tok-super-secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn debug_shows_not_set_for_empty_token() {
        let debug_str = format!("{:?}", LocalizerConfig::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: LocalizerConfig = toml::from_str(
            "reset_on_map_change = true\n[filter]\nwindow = 4\n",
        )
        .unwrap();
        assert!(cfg.reset_on_map_change);
        assert!(cfg.use_filtering);
        assert_eq!(cfg.filter.window, 4);
        assert_eq!(cfg.filter.max_consecutive_outliers, 3);
        assert_eq!(cfg.server.base_url, "https://api.immersal.com");
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&LocalizerConfig::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = LocalizerConfig::default();
        cfg.reset_on_map_change = true;
        cfg.filter.window = 12;
        cfg.filter.jump_threshold = 0.5;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert!(loaded.reset_on_map_change);
        assert_eq!(loaded.filter.window, 12);
        assert_eq!(loaded.filter.jump_threshold, 0.5);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_anchorloc_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".anchorloc"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn env_overrides() {
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("ANCHORLOC_SERVER_URL", "http://localhost:9000");
            std::env::set_var("ANCHORLOC_INTERVAL_MS", "250");
            std::env::set_var("ANCHORLOC_USE_FILTERING", "false");
        }
        let mut untouched = LocalizerConfig::default();
        untouched.localize_interval_ms = 7;
        // SAFETY: as above.
        unsafe { std::env::set_var("ANCHORLOC_INTERVAL_MS", "soon") };
        apply_env_overrides(&mut untouched);
        assert_eq!(untouched.localize_interval_ms, 7);
        unsafe { std::env::set_var("ANCHORLOC_INTERVAL_MS", "250") };

        let mut cfg = LocalizerConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.server.base_url, "http://localhost:9000");
        assert_eq!(cfg.localize_interval_ms, 250);
        assert!(!cfg.use_filtering);
        unsafe {
            std::env::remove_var("ANCHORLOC_SERVER_URL");
            std::env::remove_var("ANCHORLOC_INTERVAL_MS");
            std::env::remove_var("ANCHORLOC_USE_FILTERING");
        }
    }

    #[test]
    fn env_override_sets_token() {
        // SAFETY: this variable is only touched by this test.
        unsafe { std::env::set_var("ANCHORLOC_TOKEN", "from-env") };
        let mut cfg = LocalizerConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.server.token, "from-env");
        unsafe { std::env::remove_var("ANCHORLOC_TOKEN") };
    }
}
