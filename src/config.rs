use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::models::ConnectionConfig;

const DEFAULT_CONFIG_FILE: &str = "pilot.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    /// Controllers registered at startup, keyed by name
    #[serde(default)]
    pub controllers: BTreeMap<String, ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load `.env`, then the file named by `PILOT_CONFIG` (default `pilot.toml`) if present
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let path = env::var("PILOT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load(&path)
    }

    /// Defaults, then the optional TOML file at `path`, then the environment
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("logging.level", "info")?
            .add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(false),
            )
            // PILOT__SERVER__PORT=8080, PILOT__CONTROLLERS__PG__HOST=db, ...
            .add_source(
                config::Environment::with_prefix("PILOT")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|e| config::ConfigError::Message(format!("Invalid PORT {:?}: {}", port, e)))?;
            builder = builder.set_override("server.port", port)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
