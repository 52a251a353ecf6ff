use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::util::{env_bool, env_optional};

pub const DEFAULT_ARCHIVE_PATH: &str = "chatgate/archive.sqlite";
const DEFAULT_TOOL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_PENDING_CAPACITY: usize = 256;
const DEFAULT_TRACKED_CAPACITY: usize = 4096;
const DEFAULT_AUDIT_RING: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One JSON document per line.
    #[default]
    Lines,
    /// 4-byte little-endian length, then the JSON body.
    LengthPrefixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub self_destructing: bool,
    pub view_once: bool,
    pub vanishing: bool,
    pub pending_capacity: usize,
    /// Announced messages remembered for purge correlation; oldest captured
    /// entries are forgotten first.
    pub tracked_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            self_destructing: true,
            view_once: true,
            vanishing: true,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            tracked_capacity: DEFAULT_TRACKED_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub archive_path: PathBuf,
    pub audit_dir: Option<PathBuf>,
    pub stdio: bool,
    pub ipc: bool,
    pub ipc_socket: Option<PathBuf>,
    pub ipc_framing: Framing,
    pub tool_timeout_ms: u64,
    pub max_frame_bytes: usize,
    /// SQLite `synchronous = FULL`. Capture acks are only as durable as this.
    pub durable_writes: bool,
    pub audit_ring_capacity: usize,
    pub capture: CaptureConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            archive_path: PathBuf::from(DEFAULT_ARCHIVE_PATH),
            audit_dir: None,
            stdio: true,
            ipc: true,
            ipc_socket: None,
            ipc_framing: Framing::Lines,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            durable_writes: true,
            audit_ring_capacity: DEFAULT_AUDIT_RING,
            capture: CaptureConfig::default(),
        }
    }
}

impl GatewayConfig {
    fn archive_dir(&self) -> PathBuf {
        self.archive_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.audit_dir
            .clone()
            .unwrap_or_else(|| self.archive_dir().join("audit"))
    }

    pub fn ipc_socket(&self) -> PathBuf {
        self.ipc_socket
            .clone()
            .unwrap_or_else(|| self.archive_dir().join("chatgate.sock"))
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms.max(1))
    }

    /// `CHATGATE_ARCHIVE`, `CHATGATE_SOCKET`, `CHATGATE_TIMEOUT_MS`,
    /// `CHATGATE_DURABLE` override whatever the file said.
    pub fn apply_env(&mut self) {
        if let Some(path) = env_optional("CHATGATE_ARCHIVE") {
            self.archive_path = PathBuf::from(path);
        }
        if let Some(path) = env_optional("CHATGATE_SOCKET") {
            self.ipc_socket = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_optional("CHATGATE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.tool_timeout_ms = ms;
        }
        self.durable_writes = env_bool("CHATGATE_DURABLE", self.durable_writes);
    }
}

/// Missing file means defaults; a present but malformed file is an error.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(GatewayConfig::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };
    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn save_config(path: &Path, config: &GatewayConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chatgate_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("config_{}_{name}.json", std::process::id()))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = temp_config_path("missing");
        let _ = std::fs::remove_file(&path);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.tool_timeout_ms, DEFAULT_TOOL_TIMEOUT_MS);
        assert!(cfg.capture.view_once);
        assert_eq!(cfg.ipc_framing, Framing::Lines);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = temp_config_path("partial");
        std::fs::write(
            &path,
            r#"{"tool_timeout_ms": 250, "ipc_framing": "length_prefixed", "capture": {"view_once": false}}"#,
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.tool_timeout_ms, 250);
        assert_eq!(cfg.ipc_framing, Framing::LengthPrefixed);
        assert!(!cfg.capture.view_once);
        assert!(cfg.capture.self_destructing);
        assert!(cfg.capture.vanishing);
        assert_eq!(cfg.capture.pending_capacity, DEFAULT_PENDING_CAPACITY);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = temp_config_path("malformed");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn save_then_load() {
        let path = temp_config_path("roundtrip");
        let mut cfg = GatewayConfig::default();
        cfg.ipc_socket = Some(PathBuf::from("/tmp/x.sock"));
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.ipc_socket, cfg.ipc_socket);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn derived_paths_follow_archive_dir() {
        let mut cfg = GatewayConfig::default();
        cfg.archive_path = PathBuf::from("/var/lib/gate/archive.sqlite");
        assert_eq!(cfg.audit_dir(), PathBuf::from("/var/lib/gate/audit"));
        assert_eq!(cfg.ipc_socket(), PathBuf::from("/var/lib/gate/chatgate.sock"));
        cfg.archive_path = PathBuf::from("archive.sqlite");
        assert_eq!(cfg.ipc_socket(), PathBuf::from("./chatgate.sock"));
    }
}
