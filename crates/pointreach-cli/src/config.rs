//! Configuration – reads/writes `~/.pointreach/config.toml`.

use pointreach_middleware::BridgeTopics;
use pointreach_runtime::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline tick period in milliseconds.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Orchestrator polling period in milliseconds.
    #[serde(default = "default_idle_period_ms")]
    pub idle_period_ms: u64,

    /// Permitted polling periods between autonomous idle motions. `0`
    /// leaves motions to the console.
    #[serde(default = "default_motion_every")]
    pub motion_every: u32,

    /// Frame the depth camera reports in.
    #[serde(default = "default_camera_frame")]
    pub camera_frame: String,

    /// Frame target points are published in.
    #[serde(default = "default_base_frame")]
    pub base_frame: String,

    /// Listen address of the driver WebSocket bridge.
    #[serde(default = "default_bridge_addr")]
    pub bridge_addr: String,

    /// Base URL of the task orchestrator. Empty means no orchestrator.
    #[serde(default = "default_orchestrator_url")]
    pub orchestrator_url: String,

    /// Per-request timeout for orchestrator status queries.
    #[serde(default = "default_orchestrator_timeout_ms")]
    pub orchestrator_timeout_ms: u64,

    /// How long to wait for the camera driver to announce its calibration.
    #[serde(default = "default_intrinsics_timeout_secs")]
    pub intrinsics_timeout_secs: u64,

    /// Idle gestures, addressed by index from the console.
    #[serde(default = "default_idle_motions")]
    pub idle_motions: Vec<String>,

    /// External topic names routed by the bridge.
    #[serde(default)]
    pub topics: BridgeTopics,
}

fn default_period_ms() -> u64 {
    20
}
fn default_idle_period_ms() -> u64 {
    500
}
fn default_motion_every() -> u32 {
    pointreach_kernel::DEFAULT_MOTION_EVERY
}
fn default_camera_frame() -> String {
    "depth_camera".to_string()
}
fn default_base_frame() -> String {
    "base_link".to_string()
}
fn default_bridge_addr() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_orchestrator_url() -> String {
    "http://127.0.0.1:8090".to_string()
}
fn default_orchestrator_timeout_ms() -> u64 {
    300
}
fn default_intrinsics_timeout_secs() -> u64 {
    10
}
fn default_idle_motions() -> Vec<String> {
    ["wave", "look_around", "stretch"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            idle_period_ms: default_idle_period_ms(),
            motion_every: default_motion_every(),
            camera_frame: default_camera_frame(),
            base_frame: default_base_frame(),
            bridge_addr: default_bridge_addr(),
            orchestrator_url: default_orchestrator_url(),
            orchestrator_timeout_ms: default_orchestrator_timeout_ms(),
            intrinsics_timeout_secs: default_intrinsics_timeout_secs(),
            idle_motions: default_idle_motions(),
            topics: BridgeTopics::default(),
        }
    }
}

impl Config {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            period: Duration::from_millis(self.period_ms.max(1)),
            camera_frame: self.camera_frame.clone(),
            base_frame: self.base_frame.clone(),
            output_topic: self.topics.target.clone(),
        }
    }

    pub fn bridge_socket_addr(&self) -> Result<SocketAddr, String> {
        self.bridge_addr
            .parse()
            .map_err(|e| format!("Invalid bridge_addr '{}': {}", self.bridge_addr, e))
    }

    pub fn idle_period(&self) -> Duration {
        Duration::from_millis(self.idle_period_ms.max(1))
    }

    pub fn orchestrator_timeout(&self) -> Duration {
        Duration::from_millis(self.orchestrator_timeout_ms)
    }

    pub fn intrinsics_timeout(&self) -> Duration {
        Duration::from_secs(self.intrinsics_timeout_secs)
    }
}

/// Return the path to `~/.pointreach/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".pointreach").join("config.toml")
}

/// Load the config from disk with environment overrides applied. Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// Apply `POINTREACH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `POINTREACH_PERIOD_MS` | `period_ms` |
/// | `POINTREACH_BASE_FRAME` | `base_frame` |
/// | `POINTREACH_CAMERA_FRAME` | `camera_frame` |
/// | `POINTREACH_BRIDGE_ADDR` | `bridge_addr` |
/// | `POINTREACH_ORCHESTRATOR_URL` | `orchestrator_url` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("POINTREACH_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.period_ms = ms;
    }
    if let Ok(v) = std::env::var("POINTREACH_BASE_FRAME") {
        cfg.base_frame = v;
    }
    if let Ok(v) = std::env::var("POINTREACH_CAMERA_FRAME") {
        cfg.camera_frame = v;
    }
    if let Ok(v) = std::env::var("POINTREACH_BRIDGE_ADDR") {
        cfg.bridge_addr = v;
    }
    if let Ok(v) = std::env::var("POINTREACH_ORCHESTRATOR_URL") {
        cfg.orchestrator_url = v;
    }
}

/// Save the config to disk, creating `~/.pointreach/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
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
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
