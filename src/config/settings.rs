use serde::Deserialize;

use super::dsn::{ConnectionConfig, ConnectionOptions, DEFAULT_HOST, DEFAULT_PORT};
use crate::routing::{Route, RouteTable};
use crate::utils::Result;

/// Top-level configuration settings for the application.
///
/// Includes the gateway connection, the application identity, and the
/// route table consumed by the consumers.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub connection: ConnectionSettings,
    pub application: ApplicationSettings,
    pub routes: Vec<Route>,
}

/// Where the command gateway lives and how to reach it.
///
/// A `dsn`, when present, overrides the individual fields.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSettings {
    pub dsn: Option<String>,
    pub host: String,
    pub port: u16,
    pub lazy: bool,
    pub redelivery_delay_secs: u64,
}

/// Identity used to derive client/component names, and the log level.
#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub name: String,
    pub log_level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub connection: Option<PartialConnectionSettings>,
    pub application: Option<PartialApplicationSettings>,
    pub routes: Option<Vec<Route>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialConnectionSettings {
    pub dsn: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub lazy: Option<bool>,
    pub redelivery_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialApplicationSettings {
    pub name: Option<String>,
    pub log_level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings {
                dsn: None,
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
                lazy: true,
                redelivery_delay_secs: 300,
            },
            application: ApplicationSettings {
                name: "cmdq".to_string(),
                log_level: "info".to_string(),
            },
            routes: Vec::new(),
        }
    }
}

impl Settings {
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        ConnectionConfig::from_options(ConnectionOptions {
            dsn: self.connection.dsn.clone(),
            host: Some(self.connection.host.clone()),
            port: Some(self.connection.port),
            lazy: Some(self.connection.lazy),
            redelivery_delay: Some(self.connection.redelivery_delay_secs),
            ..ConnectionOptions::default()
        })
    }

    pub fn route_table(&self) -> RouteTable {
        RouteTable::new(self.routes.clone())
    }
}
