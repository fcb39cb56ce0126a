//! Connection configuration
//!
//! A connection is described by a DSN of the form
//! `cmdq[+ext]://[user][:password@]host[:port][/path][?options]`, by an
//! options mapping (which may itself carry a `dsn` entry), or by defaults.
//! Query options are overridden by explicit URL components; DSN values are
//! merged over the rest of an options mapping.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::utils::{GatewayError, Result};

pub const SCHEME: &str = "cmdq";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8124;
pub const DEFAULT_REDELIVERY_DELAY_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub scheme: String,
    pub scheme_extensions: Vec<String>,
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
    pub password: Option<String>,
    pub lazy: bool,
    pub redelivery_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scheme: SCHEME.to_string(),
            scheme_extensions: Vec::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: None,
            password: None,
            lazy: true,
            redelivery_delay: Duration::from_secs(DEFAULT_REDELIVERY_DELAY_SECS),
        }
    }
}

/// Partially specified connection options; unset fields keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectionOptions {
    pub dsn: Option<String>,
    pub scheme_extensions: Option<Vec<String>>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub password: Option<String>,
    pub lazy: Option<bool>,
    pub redelivery_delay: Option<u64>,
}

impl ConnectionOptions {
    /// Fill every unset field of `self` from `fallback`.
    fn or(self, fallback: ConnectionOptions) -> ConnectionOptions {
        ConnectionOptions {
            dsn: None,
            scheme_extensions: self.scheme_extensions.or(fallback.scheme_extensions),
            host: self.host.or(fallback.host),
            port: self.port.or(fallback.port),
            path: self.path.or(fallback.path),
            password: self.password.or(fallback.password),
            lazy: self.lazy.or(fallback.lazy),
            redelivery_delay: self.redelivery_delay.or(fallback.redelivery_delay),
        }
    }

    pub fn parse_dsn(dsn: &str) -> Result<ConnectionOptions> {
        let url = Url::parse(dsn)
            .map_err(|e| GatewayError::Configuration(format!("invalid DSN \"{dsn}\": {e}")))?;

        let mut scheme = url.scheme().split('+');
        let protocol = scheme.next().unwrap_or_default();
        if protocol != SCHEME {
            return Err(GatewayError::Configuration(format!(
                "The given scheme protocol \"{protocol}\" is not supported. It must be \"{SCHEME}\""
            )));
        }

        let mut options = ConnectionOptions {
            scheme_extensions: Some(scheme.map(String::from).collect()),
            ..ConnectionOptions::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "host" => options.host = Some(value.into_owned()),
                "port" => options.port = Some(parse_number(&key, &value)?),
                "path" => options.path = Some(value.into_owned()),
                "password" => options.password = Some(value.into_owned()),
                "lazy" => options.lazy = Some(parse_bool(&key, &value)?),
                "redelivery_delay" => options.redelivery_delay = Some(parse_number(&key, &value)?),
                other => debug!("ignoring unknown DSN option {other}"),
            }
        }

        if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
            options.host = Some(host.to_string());
        }
        if let Some(port) = url.port() {
            options.port = Some(port);
        }
        if !url.path().is_empty() && url.path() != "/" {
            options.path = Some(url.path().to_string());
        }
        let user = Some(url.username()).filter(|u| !u.is_empty());
        if let Some(password) = url.password().or(user) {
            options.password = Some(password.to_string());
        }

        Ok(options)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| GatewayError::Configuration(format!("option {key} is not a number: {value}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GatewayError::Configuration(format!(
            "option {key} is not a boolean: {value}"
        ))),
    }
}

impl ConnectionConfig {
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        Ok(Self::default().with(ConnectionOptions::parse_dsn(dsn)?))
    }

    /// Build from an options mapping; a `dsn` entry is parsed and wins over
    /// the other entries.
    pub fn from_options(mut options: ConnectionOptions) -> Result<Self> {
        let merged = match options.dsn.take() {
            Some(dsn) => ConnectionOptions::parse_dsn(&dsn)?.or(options),
            None => options,
        };
        Ok(Self::default().with(merged))
    }

    fn with(self, options: ConnectionOptions) -> Self {
        Self {
            scheme: self.scheme,
            scheme_extensions: options.scheme_extensions.unwrap_or(self.scheme_extensions),
            host: options.host.unwrap_or(self.host),
            port: options.port.unwrap_or(self.port),
            path: options.path.or(self.path),
            password: options.password.or(self.password),
            lazy: options.lazy.unwrap_or(self.lazy),
            redelivery_delay: options
                .redelivery_delay
                .map(Duration::from_secs)
                .unwrap_or(self.redelivery_delay),
        }
    }

    /// `host:port` of the gateway.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for ConnectionConfig {
    type Err = GatewayError;

    fn from_str(dsn: &str) -> Result<Self> {
        Self::from_dsn(dsn)
    }
}
