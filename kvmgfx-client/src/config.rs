//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the receiver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Shared-memory transport.
    pub shm: ShmConfig,
    /// Remote-display control connection.
    pub remote: RemoteConfig,
    /// Window settings.
    pub display: DisplayConfig,
    /// Input forwarding.
    pub input: InputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Shared-memory transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmConfig {
    /// ivshmem-server socket.
    pub socket_path: String,
    /// Interrupt vector frames are signalled on.
    pub vector: u16,
    /// How long one interrupt wait lasts before the guest is prompted.
    pub wait_timeout_ms: u64,
    /// Sleep between passes while the guest has not initialised the region.
    pub invalid_backoff_ms: u64,
}

/// Remote-display control connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

/// Window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    /// Initial window size, replaced by the first frame's.
    pub width: u32,
    pub height: u32,
    /// Hide the local cursor over the window.
    pub hide_cursor: bool,
    /// Open the window without decorations.
    pub borderless: bool,
}

/// Input forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// USB HID usage of the pointer-mode hotkey (Scroll Lock).
    pub toggle_key: u32,
    /// Event poll cadence in milliseconds.
    pub poll_interval_ms: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
    /// Optional log file.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/ivshmem_socket".into(),
            vector: 0,
            wait_timeout_ms: 1000,
            invalid_backoff_ms: 1,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5900,
            password: String::new(),
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "KVM-GFX Test".into(),
            width: 100,
            height: 100,
            hide_cursor: true,
            borderless: true,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            toggle_key: kvmgfx_core::input::SCROLL_LOCK,
            poll_interval_ms: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// The default configuration as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Apply a `host:port` override.
    pub fn set_remote(&mut self, addr: &str) -> Result<(), String> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got {addr:?}"))?;
        let port = port.parse().map_err(|e| format!("invalid port in {addr:?}: {e}"))?;
        self.remote.host = host.trim_matches(['[', ']']).to_string();
        self.remote.port = port;
        Ok(())
    }
}

impl ShmConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn invalid_backoff(&self) -> Duration {
        Duration::from_millis(self.invalid_backoff_ms)
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl InputConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────
