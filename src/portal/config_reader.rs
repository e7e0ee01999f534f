use crate::portal::*;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://coopvote.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    #[serde(rename = "maxConnections")]
    pub max_connections: Option<u32>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsSettings {
    #[serde(rename = "pollIntervalSeconds")]
    pub poll_interval_seconds: Option<u64>,
}

/// The portal configuration file. Every field is optional.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    #[serde(default)]
    pub results: ResultsSettings,
}

impl PortalConfig {
    pub fn database_url(&self) -> String {
        self.database
            .as_ref()
            .and_then(|d| d.url.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
    }

    pub fn max_connections(&self) -> u32 {
        match self.database.as_ref().and_then(|d| d.max_connections) {
            Some(x) if x > 0 => x,
            _ => DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn poll_interval_seconds(&self) -> u64 {
        match self.results.poll_interval_seconds {
            Some(x) if x > 0 => x,
            _ => DEFAULT_POLL_INTERVAL_SECONDS,
        }
    }
}

pub fn read_config(path: &str) -> PortalResult<PortalConfig> {
    let config_str = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: PortalConfig = serde_json::from_str(&config_str).context(ParsingJsonSnafu {})?;
    info!("config: {:?}", config);
    Ok(config)
}
