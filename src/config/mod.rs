use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result, bail};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

pub const DEFAULT_SESSION_COOKIE: &str = "forum.session_token";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("FORUM_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("FORUM_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: Config) -> Result<Self> {
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("database.url must be specified");
        }
        if self.server.port == 0 {
            bail!("server.port must be greater than zero");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be positive");
        }
        if self.database.max_connections > 128 {
            bail!("database.max_connections exceeds 128");
        }
        if let Some(min) = self.database.min_connections {
            if min > self.database.max_connections {
                bail!("database.min_connections must not exceed max_connections");
            }
        }
        self.session.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie carrying the session token when no bearer header is sent.
    #[serde(default = "SessionConfig::default_cookie_name")]
    pub cookie_name: String,
}

impl SessionConfig {
    fn ensure_bounds(&self) -> Result<()> {
        let name = self.cookie_name.trim();
        if name.is_empty() {
            bail!("session.cookie_name must not be empty");
        }
        if name.contains([';', '=', ' ']) {
            bail!("session.cookie_name contains reserved characters");
        }
        Ok(())
    }

    fn default_cookie_name() -> String {
        DEFAULT_SESSION_COOKIE.to_string()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: Self::default_cookie_name(),
        }
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
