//! Configuration for the streaming host.

use std::path::Path;

use serde::{Deserialize, Serialize};

use lumen_core::pacing::PacingConfig;
use lumen_core::predictor::PredictorConfig;
use lumen_core::session::{AuthGate, StreamConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub network: NetworkConfig,
    /// Initial encoder configuration and client request bounds.
    pub stream: StreamConfig,
    pub predictor: PredictorConfig,
    pub pacing: PacingConfig,
    pub source: SourceConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub port: u16,
    /// Concurrent client sessions; each owns its own predictor and queue.
    pub max_connections: u32,
    /// How long a new client has to complete the auth exchange.
    pub auth_timeout_ms: u64,
}

/// Synthetic capture producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Frames per second the producer renders, independent of encode rate.
    pub fps: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub credentials: Vec<Credential>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "trace", "debug", "info", "warn" or "error"; `RUST_LOG` wins.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 7340,
            max_connections: 4,
            auth_timeout_ms: 10_000,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { fps: 60 }
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

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
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

    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.port)
    }

    /// Stream configuration with the auth flag taken from `[auth]` and the
    /// frame rate kept in step with pacing.
    pub fn to_stream_config(&self) -> StreamConfig {
        let mut stream = self.stream.clone();
        stream.auth_required = self.auth.enabled;
        stream.frame_rate = stream.frame_rate.clamp(1, 240);
        stream
    }

    pub fn to_pacing_config(&self) -> PacingConfig {
        PacingConfig {
            frame_rate: self.to_stream_config().frame_rate as f64,
            ..self.pacing
        }
    }

    pub fn to_predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            frame_rate: self.to_stream_config().frame_rate as f64,
            ..self.predictor.clone()
        }
    }

    pub fn auth_gate(&self) -> AuthGate {
        if self.auth.enabled {
            AuthGate::new(
                self.auth
                    .credentials
                    .iter()
                    .map(|c| (c.id.clone(), c.key.clone())),
            )
        } else {
            AuthGate::disabled()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
