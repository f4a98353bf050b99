//! One live channel to a tool provider

use crate::error::OrchestrationError;
use crate::models::HealthState;
use crate::providers::protocol::{self, JsonRpcRequest};
use crate::providers::registry::OperationRegistry;
use crate::providers::transport::RpcTransport;
use crate::Result;
use serde_json::{Map, Value};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Transport plus request-id counter; guarded together so a request and its
/// reply can never interleave with another call.
struct Channel {
    transport: Box<dyn RpcTransport>,
    next_id: u64,
}

pub struct ToolProviderConnection {
    name: String,
    channel: Mutex<Channel>,
    operations: OperationRegistry,
    server_info: Value,
    health: RwLock<HealthState>,
}

impl ToolProviderConnection {
    /// Handshake and discover operations over a fresh transport.
    ///
    /// Any failure closes the transport and is reported as a `TransportError`.
    pub async fn open(name: &str, transport: Box<dyn RpcTransport>) -> Result<Self> {
        let mut channel = Channel {
            transport,
            next_id: 1,
        };

        match Self::handshake(name, &mut channel).await {
            Ok((server_info, operations)) => {
                info!(
                    provider = %name,
                    operations = operations.len(),
                    "Provider connected"
                );

                Ok(Self {
                    name: name.to_string(),
                    channel: Mutex::new(channel),
                    operations,
                    server_info,
                    health: RwLock::new(HealthState::Connected),
                })
            }
            Err(e) => {
                if let Err(close_err) = channel.transport.close().await {
                    debug!(provider = %name, error = %close_err, "Close after failed handshake");
                }

                Err(match e {
                    OrchestrationError::TransportError(msg) => OrchestrationError::TransportError(
                        format!("Handshake with '{}' failed: {}", name, msg),
                    ),
                    other => OrchestrationError::TransportError(format!(
                        "Handshake with '{}' failed: {}",
                        name, other
                    )),
                })
            }
        }
    }

    async fn handshake(name: &str, channel: &mut Channel) -> Result<(Value, OperationRegistry)> {
        let init = Self::roundtrip(
            channel,
            protocol::METHOD_INITIALIZE,
            Some(protocol::initialize_params()),
        )
        .await?;

        let notification =
            JsonRpcRequest::notification(protocol::METHOD_INITIALIZED, Some(serde_json::json!({})));
        channel.transport.send(&notification.to_value()?).await?;

        let server_info = init
            .get("serverInfo")
            .cloned()
            .unwrap_or(Value::Object(Map::new()));

        let listing = Self::roundtrip(channel, protocol::METHOD_LIST, None).await?;
        let operations = OperationRegistry::from_discovery(name, &listing)?;

        Ok((server_info, operations))
    }

    /// Send one request and wait for its reply.
    ///
    /// Server notifications and requests that arrive in between are handled
    /// and skipped, as are late replies to earlier requests. Any other id
    /// means the channel is out of step and is reported as a `TransportError`.
    async fn roundtrip(channel: &mut Channel, method: &str, params: Option<Value>) -> Result<Value> {
        let id = channel.next_id;
        channel.next_id += 1;

        let request = JsonRpcRequest::call(id, method, params);
        channel.transport.send(&request.to_value()?).await?;

        loop {
            let message = channel.transport.receive().await?;

            if protocol::is_server_message(&message) {
                if let Some(reply) = protocol::server_request_reply(&message) {
                    debug!(method = ?message.get("method"), "Answering server request");
                    channel.transport.send(&reply).await?;
                }
                continue;
            }

            match protocol::response_id(&message) {
                Some(got) if got == id => return protocol::decode_response(message, id),
                Some(got) if got < id => {
                    debug!(expected = id, got, "Dropping stale reply");
                    continue;
                }
                _ => {
                    return Err(OrchestrationError::TransportError(format!(
                        "Reply id {:?} does not match request id {}; channel out of sync",
                        message.get("id"),
                        id
                    )))
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    pub async fn health(&self) -> HealthState {
        *self.health.read().await
    }

    pub async fn is_healthy(&self) -> bool {
        self.health().await == HealthState::Connected
    }

    pub async fn mark_disconnected(&self) {
        *self.health.write().await = HealthState::Disconnected;
    }

    /// Run one operation. Calls on the same connection are serialized.
    pub async fn execute(&self, operation: &str, args: &Map<String, Value>) -> Result<Value> {
        if !self.is_healthy().await {
            return Err(OrchestrationError::NotConnected(self.name.clone()));
        }

        self.operations.check_call(operation, args)?;

        let start = Instant::now();
        let params = protocol::call_params(operation, &Value::Object(args.clone()));

        let outcome = {
            let mut channel = self.channel.lock().await;
            Self::roundtrip(&mut channel, protocol::METHOD_CALL, Some(params)).await
        }
        .and_then(protocol::decode_call_result);

        match &outcome {
            Ok(_) => debug!(
                provider = %self.name,
                operation = %operation,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Operation succeeded"
            ),
            Err(e) => {
                warn!(provider = %self.name, operation = %operation, error = %e, "Operation failed");
                if e.breaks_channel() {
                    self.mark_disconnected().await;
                }
            }
        }

        outcome
    }

    /// Lightweight discovery call used as a liveness probe
    pub async fn ping(&self) -> Result<()> {
        let result = {
            let mut channel = self.channel.lock().await;
            Self::roundtrip(&mut channel, protocol::METHOD_LIST, None).await
        };

        if let Err(e) = result {
            self.mark_disconnected().await;
            return Err(e);
        }

        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.mark_disconnected().await;
        let mut channel = self.channel.lock().await;
        channel.transport.close().await
    }
}
