//! Environment-driven daemon configuration.

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::transcoder::{TranscoderConfig, DEFAULT_PROGRAM};

/// Default listener port.
pub const DEFAULT_PORT: u16 = 3010;

/// Default bind address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default RTMP base URL; each session publishes to `<base>/<session id>`.
pub const DEFAULT_RTMP_BASE_URL: &str = "rtmp://localhost/live";

/// Runtime configuration of the relay daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub rtmp_base_url: String,
    pub transcoder_program: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            rtmp_base_url: DEFAULT_RTMP_BASE_URL.to_string(),
            transcoder_program: DEFAULT_PROGRAM.to_string(),
        }
    }
}

impl RelayConfig {
    /// Reads `PORT`, `RELAY_HOST`, `RTMP_BASE_URL` and `FFMPEG_PATH`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPort` if `PORT` is set but is not a
    /// valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RelayConfig::from_env`] with an injectable variable lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            None => defaults.port,
        };

        Ok(Self {
            host: get("RELAY_HOST").unwrap_or(defaults.host),
            port,
            rtmp_base_url: get("RTMP_BASE_URL").unwrap_or(defaults.rtmp_base_url),
            transcoder_program: get("FFMPEG_PATH").unwrap_or(defaults.transcoder_program),
        })
    }

    /// The ffmpeg invocation for this configuration.
    pub fn transcoder_config(&self) -> TranscoderConfig {
        TranscoderConfig::ffmpeg(&self.transcoder_program, &self.rtmp_base_url)
    }

    /// Listener address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidHost` if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Configuration errors, all fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("PORT must be a number between 0 and 65535, got {0:?}")]
    InvalidPort(String),

    #[error("RELAY_HOST must be an IP address, got {0:?}")]
    InvalidHost(String),
}
