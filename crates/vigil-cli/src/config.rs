//! Configuration – reads/writes `~/.vigil/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use vigil_runtime::SystemConfig;
use vigil_types::{LinkEvent, VigilError};

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "VIGIL_CONFIG";

/// One step of the simulated link: wait `after_ms`, then deliver `event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStep {
    pub after_ms: u64,
    pub event: LinkEvent,
}

/// Persisted user configuration stored in `~/.vigil/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Stop after this many seconds; run until Ctrl-C when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_for_secs: Option<u64>,

    /// The simulated board.
    #[serde(default)]
    pub board: SystemConfig,

    /// Link events delivered to the simulated network, in order.
    #[serde(default = "default_link_script")]
    pub link_script: Vec<LinkStep>,
}

fn default_link_script() -> Vec<LinkStep> {
    vec![LinkStep {
        after_ms: 1_000,
        event: LinkEvent::Up,
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_for_secs: None,
            board: SystemConfig::default(),
            link_script: default_link_script(),
        }
    }
}

/// Return the config path: `$VIGIL_CONFIG` if set, else
/// `~/.vigil/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".vigil").join("config.toml")
}

/// Load the config, writing the defaults first if the file does not exist,
/// then apply environment overrides.  Returns the config and whether the
/// file was freshly created.
pub fn load_or_create() -> Result<(Config, bool), VigilError> {
    let path = config_path();
    let (mut cfg, created) = match load_from(&path)? {
        Some(cfg) => (cfg, false),
        None => {
            save_to(&Config::default(), &path)?;
            (Config::default(), true)
        }
    };
    apply_env_overrides(&mut cfg);
    Ok((cfg, created))
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, VigilError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        VigilError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| VigilError::Config(format!("failed to parse config: {e}")))
}

/// Apply `VIGIL_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `VIGIL_CHECK_PERIOD_MS` | `board.check_period_ms` |
/// | `VIGIL_ERROR_PERIOD_MS` | `board.error_period_ms` |
/// | `VIGIL_IP_ADDR` | `board.network.ip` |
/// | `VIGIL_UDP_CLI_PORT` | `board.udp_cli_port` |
/// | `VIGIL_ECHO_CLIENTS` | `board.echo_clients` (`true`/`false`/`1`/`0`) |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    let board = &mut cfg.board;
    if let Ok(v) = std::env::var("VIGIL_CHECK_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        board.check_period_ms = ms;
    }
    if let Ok(v) = std::env::var("VIGIL_ERROR_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        board.error_period_ms = ms;
    }
    if let Ok(v) = std::env::var("VIGIL_IP_ADDR")
        && let Ok(ip) = v.parse()
    {
        board.network.ip = ip;
    }
    if let Ok(v) = std::env::var("VIGIL_UDP_CLI_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        board.udp_cli_port = port;
    }
    if let Ok(v) = std::env::var("VIGIL_ECHO_CLIENTS") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => board.echo_clients = true,
            "0" | "false" | "no" => board.echo_clients = false,
            _ => {}
        }
    }
}

/// Save the config to a specific path, creating its directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), VigilError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            VigilError::Config(format!("failed to create config directory: {e}"))
        })?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                VigilError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| VigilError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| VigilError::Config(format!("failed to write config at {}: {e}", path.display()));
    // Write the file with owner-only read/write (rw-------) on Unix.
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
