//! Configuration for the gateway service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings.
    pub network: NetworkConfig,
    /// Screen push settings.
    pub screen: ScreenConfig,
    /// Frame admission control.
    pub limiter: LimiterConfig,
    /// Filesystem locations.
    pub storage: StorageConfig,
    /// Capability provider settings.
    pub providers: ProvidersConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both listeners bind to.
    pub bind_address: String,
    /// TCP port of the RPC listener.
    pub rpc_port: u16,
    /// TCP port of the WebSocket push listener.
    pub push_port: u16,
}

/// Screen push configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Start the capture pipeline and push listener.
    pub enabled: bool,
    /// Capture producer: "test-pattern" or "none".
    pub source: String,
    /// Width of produced frames in pixels.
    pub width: u32,
    /// Height of produced frames in pixels.
    pub height: u32,
    /// Frames per second offered by the producer.
    pub fps: u32,
    /// Linear downscale factor before encoding.
    pub scale: f64,
    /// JPEG quality (1..=100).
    pub quality: u8,
    /// Frames queued per viewer before frames are dropped for it.
    pub client_queue_depth: usize,
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// "token-bucket" or "fixed-window".
    pub kind: String,
    /// Bucket capacity, or the per-window limit for "fixed-window".
    pub capacity: u64,
    /// Token refill rate per second.
    pub refill_per_sec: u64,
    /// Window length for "fixed-window", in milliseconds.
    pub window_ms: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory served by the media-store service.
    pub media_root: PathBuf,
    /// Directory installed packages are committed into.
    pub install_dir: PathBuf,
    /// Directory for in-flight package uploads.
    pub staging_dir: PathBuf,
}

/// Capability provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Upper bound on a single provider call, in milliseconds.
    pub timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            rpc_port: 9999,
            push_port: 10000,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: "test-pattern".into(),
            width: 720,
            height: 1280,
            fps: 30,
            scale: gdroid_core::pipeline::DEFAULT_SCALE,
            quality: gdroid_core::pipeline::DEFAULT_QUALITY,
            client_queue_depth: gdroid_core::broadcast::DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            kind: "token-bucket".into(),
            capacity: gdroid_core::limiter::DEFAULT_CAPACITY,
            refill_per_sec: gdroid_core::limiter::DEFAULT_REFILL_PER_SEC,
            window_ms: 1000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("gdroid");
        Self {
            media_root: base.join("media"),
            install_dir: base.join("packages"),
            staging_dir: base.join("staging"),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl GatewayConfig {
    /// Load configuration from a TOML file. An unreadable or missing file
    /// yields the defaults; a file that does not parse is an error.
    pub fn load(path: &Path) -> Result<Self, toml::de::Error> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Default configuration rendered as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Write the default configuration to `path` (`--write-config`).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.rpc_port)
    }

    pub fn push_addr(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.push_port)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.providers.timeout_ms.max(1))
    }

    /// Interval between produced frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.screen.fps.clamp(1, 60) as f64)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = GatewayConfig::default_toml().unwrap();
        assert!(text.contains("rpc_port"));
        assert!(text.contains("refill_per_sec"));
        assert!(text.contains("media_root"));
    }

    #[test]
    fn roundtrip_config() {
        let text = GatewayConfig::default_toml().unwrap();
        let parsed = GatewayConfig::parse(&text).unwrap();
        assert_eq!(parsed.network.rpc_port, 9999);
        assert_eq!(parsed.network.push_port, 10000);
        assert_eq!(parsed.limiter.capacity, 30);
        assert_eq!(parsed.limiter.refill_per_sec, 15);
        assert_eq!(parsed.screen.quality, 60);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed = GatewayConfig::parse("[network]\nrpc_port = 7000\n").unwrap();
        assert_eq!(parsed.network.rpc_port, 7000);
        assert_eq!(parsed.network.push_port, 10000);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn missing_file_is_default_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GatewayConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.network.rpc_port, 9999);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "network = 5").unwrap();
        assert!(GatewayConfig::load(&bad).is_err());
    }

    #[test]
    fn written_default_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gdroid-gateway.toml");
        GatewayConfig::write_default(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, GatewayConfig::default_toml().unwrap());
        let cfg = GatewayConfig::load(&path).unwrap();
        assert_eq!(cfg.network.rpc_port, 9999);
        assert_eq!(cfg.storage.media_root, GatewayConfig::default().storage.media_root);
    }

    #[test]
    fn frame_interval_clamps_fps() {
        let mut cfg = GatewayConfig::default();
        cfg.screen.fps = 0;
        assert_eq!(cfg.frame_interval(), Duration::from_secs(1));
        cfg.screen.fps = 500;
        assert_eq!(cfg.frame_interval(), Duration::from_secs_f64(1.0 / 60.0));
    }
}
