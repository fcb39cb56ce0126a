use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{Command, CommandResponse, CommandService, CommandStream};
use crate::utils::{GatewayError, Result};

/// Builds the client handle on first use.
pub type ClientFactory = Box<dyn Fn() -> Result<Arc<dyn CommandService>> + Send + Sync>;

/// Owns the client handle of one context.
///
/// The handle is either injected up front or produced by a factory the first
/// time it is needed; once resolved it is reused for the lifetime of the
/// connection. A factory failure is reported as a configuration error and is
/// not cached, so the next call runs the factory again.
pub struct GatewayConnection {
    client: Mutex<Option<Arc<dyn CommandService>>>,
    factory: Option<ClientFactory>,
}

impl GatewayConnection {
    pub fn with_client(client: Arc<dyn CommandService>) -> Self {
        Self {
            client: Mutex::new(Some(client)),
            factory: None,
        }
    }

    pub fn lazy<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn CommandService>> + Send + Sync + 'static,
    {
        Self {
            client: Mutex::new(None),
            factory: Some(Box::new(factory)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn CommandService>>> {
        self.client.lock().expect("client slot lock poisoned")
    }

    pub fn is_resolved(&self) -> bool {
        self.slot().is_some()
    }

    /// The lock is held while the factory runs, so concurrent callers share
    /// one client.
    pub fn resolve_client(&self) -> Result<Arc<dyn CommandService>> {
        let mut slot = self.slot();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let factory = self.factory.as_ref().ok_or_else(|| {
            GatewayError::Configuration("no client handle or factory configured".into())
        })?;
        debug!("resolving command service client from factory");
        let client = factory().map_err(|e| match e {
            GatewayError::Configuration(_) => e,
            other => GatewayError::Configuration(format!(
                "the client factory did not return a usable client: {other}"
            )),
        })?;
        *slot = Some(client.clone());
        Ok(client)
    }

    pub async fn dispatch(&self, command: Command) -> Result<Option<CommandResponse>> {
        let client = self.resolve_client()?;
        client.dispatch(command).await
    }

    pub async fn open_stream(&self) -> Result<CommandStream> {
        let client = self.resolve_client()?;
        client.open_stream().await
    }
}

impl std::fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("resolved", &self.is_resolved())
            .field("lazy", &self.factory.is_some())
            .finish()
    }
}
