//! Connection manager
//!
//! Registry of live provider connections keyed by provider name. At most one
//! connection per name; get-or-connect is serialized per name so concurrent
//! callers never spawn duplicate subprocesses.

use crate::config::ProviderConfig;
use crate::error::OrchestrationError;
use crate::models::HealthState;
use crate::providers::connection::ToolProviderConnection;
use crate::providers::transport::TransportFactory;
use crate::Result;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outcome of one provider in `connect_all`
#[derive(Debug)]
pub struct ConnectAttempt {
    pub provider: String,
    pub result: Result<Vec<String>>,
}

/// Point-in-time view of a registered connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub health: HealthState,
    pub operations: Vec<String>,
}

pub struct ConnectionManager {
    providers: Vec<ProviderConfig>,
    factory: Arc<dyn TransportFactory>,
    connections: RwLock<HashMap<String, Arc<ToolProviderConnection>>>,
    connect_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectionManager {
    pub fn new(providers: Vec<ProviderConfig>, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            providers,
            factory,
            connections: RwLock::new(HashMap::new()),
            connect_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    fn provider_config(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                OrchestrationError::ConfigError(format!("Unknown provider '{}'", name))
            })
    }

    async fn healthy_entry(&self, name: &str) -> Option<Arc<ToolProviderConnection>> {
        let existing = {
            let connections = self.connections.read().await;
            connections.get(name).cloned()
        }?;

        if existing.is_healthy().await {
            Some(existing)
        } else {
            None
        }
    }

    async fn connect_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.connect_locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return the healthy connection for `name`, creating it if needed.
    pub async fn connect(&self, name: &str) -> Result<Arc<ToolProviderConnection>> {
        if let Some(connection) = self.healthy_entry(name).await {
            return Ok(connection);
        }

        let config = self.provider_config(name)?.clone();

        let lock = self.connect_lock(name).await;
        let _guard = lock.lock().await;

        // Another caller may have connected while we waited.
        if let Some(connection) = self.healthy_entry(name).await {
            return Ok(connection);
        }

        // Drop a stale entry before replacing it.
        let stale = self.connections.write().await.remove(name);
        if let Some(stale) = stale {
            debug!(provider = %name, "Replacing stale connection");
            if let Err(e) = stale.close().await {
                debug!(provider = %name, error = %e, "Stale connection close failed");
            }
        }

        debug!(provider = %name, state = ?HealthState::Connecting, "Connecting provider");

        let transport = self.factory.open(&config).await?;
        let connection = Arc::new(ToolProviderConnection::open(name, transport).await?);

        self.connections
            .write()
            .await
            .insert(name.to_string(), connection.clone());

        Ok(connection)
    }

    /// Concurrent connect to every configured provider. Failures are reported
    /// per provider and never block the others.
    pub async fn connect_all(&self) -> Vec<ConnectAttempt> {
        let attempts = self.providers.iter().map(|p| async move {
            let result = self
                .connect(&p.name)
                .await
                .map(|conn| conn.operations().names());

            if let Err(e) = &result {
                warn!(provider = %p.name, error = %e, "Provider failed to connect");
            }

            ConnectAttempt {
                provider: p.name.clone(),
                result,
            }
        });

        join_all(attempts).await
    }

    /// Probe a registered connection; evict it on failure.
    pub async fn health_check(&self, name: &str) -> Result<()> {
        let connection = {
            let connections = self.connections.read().await;
            connections.get(name).cloned()
        }
        .ok_or_else(|| OrchestrationError::NotConnected(name.to_string()))?;

        if let Err(e) = connection.ping().await {
            warn!(provider = %name, error = %e, "Health check failed; evicting connection");
            self.evict(name, &connection).await;
            return Err(e);
        }

        Ok(())
    }

    /// Run an operation on a registered connection.
    pub async fn execute_operation(
        &self,
        name: &str,
        operation: &str,
        args: &Map<String, Value>,
    ) -> Result<Value> {
        let connection = {
            let connections = self.connections.read().await;
            connections.get(name).cloned()
        }
        .ok_or_else(|| OrchestrationError::NotConnected(name.to_string()))?;

        let result = connection.execute(operation, args).await;

        if let Err(e) = &result {
            if e.breaks_channel() {
                self.evict(name, &connection).await;
            }
        }

        result
    }

    /// Evict `name` whose channel can no longer be trusted (e.g. an abandoned
    /// in-flight call).
    pub async fn mark_unhealthy(&self, name: &str) {
        let connection = {
            let connections = self.connections.read().await;
            connections.get(name).cloned()
        };

        if let Some(connection) = connection {
            self.evict(name, &connection).await;
        }
    }

    /// Remove `connection` only if it is still the registered entry.
    async fn evict(&self, name: &str, connection: &Arc<ToolProviderConnection>) {
        connection.mark_disconnected().await;

        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(name) {
                Some(current) if Arc::ptr_eq(current, connection) => connections.remove(name),
                _ => None,
            }
        };

        if let Some(removed) = removed {
            if let Err(e) = removed.close().await {
                debug!(provider = %name, error = %e, "Close after eviction failed");
            }
        }
    }

    /// Close every connection; errors are collected, never short-circuit.
    pub async fn disconnect_all(&self) -> Vec<(String, OrchestrationError)> {
        let drained: Vec<(String, Arc<ToolProviderConnection>)> = {
            let mut connections = self.connections.write().await;
            connections.drain().collect()
        };

        let mut errors = Vec::new();

        for (name, connection) in drained {
            match connection.close().await {
                Ok(()) => debug!(provider = %name, "Provider disconnected"),
                Err(e) => {
                    warn!(provider = %name, error = %e, "Failed to disconnect provider");
                    errors.push((name, e));
                }
            }
        }

        info!(failures = errors.len(), "All providers disconnected");
        errors
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.healthy_entry(name).await.is_some()
    }

    pub async fn connected_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn status(&self) -> Vec<ProviderStatus> {
        let entries: Vec<Arc<ToolProviderConnection>> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };

        let mut statuses = Vec::with_capacity(entries.len());
        for connection in entries {
            statuses.push(ProviderStatus {
                name: connection.name().to_string(),
                health: connection.health().await,
                operations: connection.operations().names(),
            });
        }

        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}
