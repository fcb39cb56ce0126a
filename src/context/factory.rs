use std::sync::Arc;

use tracing::debug;

use super::Context;
use crate::config::{ConnectionConfig, ConnectionOptions};
use crate::gateway::{CommandService, GatewayConnection};
use crate::routing::RouteTable;
use crate::transport::WsCommandClient;
use crate::utils::Result;

/// Builds contexts for one gateway.
///
/// Configured from a DSN, an options mapping, or a pre-built client handle
/// that bypasses connection-string handling entirely.
pub struct ConnectionFactory {
    config: ConnectionConfig,
    client: Option<Arc<dyn CommandService>>,
}

impl ConnectionFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn from_dsn(dsn: &str) -> Result<Self> {
        Ok(Self::new(ConnectionConfig::from_dsn(dsn)?))
    }

    pub fn from_options(options: ConnectionOptions) -> Result<Self> {
        Ok(Self::new(ConnectionConfig::from_options(options)?))
    }

    pub fn with_client(client: Arc<dyn CommandService>) -> Self {
        Self {
            config: ConnectionConfig::default(),
            client: Some(client),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Lazy configurations defer building the client until the first
    /// dispatch or stream; otherwise it is built here.
    pub fn create_context(&self, app_name: impl Into<String>, routes: RouteTable) -> Context {
        let connection = match &self.client {
            Some(client) => GatewayConnection::with_client(client.clone()),
            None if self.config.lazy => {
                let config = self.config.clone();
                GatewayConnection::lazy(move || {
                    Ok(Arc::new(WsCommandClient::from_config(&config)) as Arc<dyn CommandService>)
                })
            }
            None => GatewayConnection::with_client(Arc::new(WsCommandClient::from_config(
                &self.config,
            ))),
        };
        debug!(endpoint = %self.config.endpoint(), lazy = self.config.lazy, "creating context");

        Context::new(connection, app_name, routes, self.config.redelivery_delay)
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("config", &self.config)
            .field("prebuilt_client", &self.client.is_some())
            .finish()
    }
}
