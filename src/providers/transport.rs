//! Provider transports
//!
//! A transport moves whole JSON messages in both directions. The stdio
//! transport owns the provider subprocess; tests plug in their own transports
//! through `TransportFactory`.

use crate::config::ProviderConfig;
use crate::error::OrchestrationError;
use crate::Result;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Duplex message channel to one provider
#[async_trait::async_trait]
pub trait RpcTransport: Send {
    async fn send(&mut self, message: &Value) -> Result<()>;

    /// Next JSON message from the provider
    async fn receive(&mut self) -> Result<Value>;

    async fn close(&mut self) -> Result<()>;
}

/// Creates transports for configured providers
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, config: &ProviderConfig) -> Result<Box<dyn RpcTransport>>;
}

/// Newline-delimited JSON over a child process's stdin/stdout
pub struct StdioTransport {
    name: String,
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    read_timeout: Duration,
}

impl StdioTransport {
    pub fn spawn(config: &ProviderConfig, read_timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(|e| {
            OrchestrationError::TransportError(format!(
                "Failed to spawn provider '{}' (command: {}): {}",
                config.name, config.command, e
            ))
        })?;

        let stdin = process.stdin.take().ok_or_else(|| {
            OrchestrationError::TransportError(format!(
                "Failed to capture stdin for provider '{}'",
                config.name
            ))
        })?;

        let stdout = process.stdout.take().ok_or_else(|| {
            OrchestrationError::TransportError(format!(
                "Failed to capture stdout for provider '{}'",
                config.name
            ))
        })?;

        debug!(provider = %config.name, pid = ?process.id(), "Provider process spawned");

        Ok(Self {
            name: config.name.clone(),
            process,
            stdin,
            stdout: BufReader::new(stdout),
            read_timeout,
        })
    }
}

#[async_trait::async_trait]
impl RpcTransport for StdioTransport {
    async fn send(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| {
                OrchestrationError::TransportError(format!(
                    "Failed to write to provider '{}': {}",
                    self.name, e
                ))
            })?;

        self.stdin.flush().await.map_err(|e| {
            OrchestrationError::TransportError(format!(
                "Failed to flush provider '{}' stdin: {}",
                self.name, e
            ))
        })
    }

    async fn receive(&mut self) -> Result<Value> {
        let mut line = String::new();

        // Providers may log to stdout; skip anything that is not a JSON object.
        loop {
            line.clear();

            let bytes_read = tokio::time::timeout(self.read_timeout, self.stdout.read_line(&mut line))
                .await
                .map_err(|_| {
                    OrchestrationError::TimeoutError(format!(
                        "No reply from provider '{}' within {:?}",
                        self.name, self.read_timeout
                    ))
                })?
                .map_err(|e| {
                    OrchestrationError::TransportError(format!(
                        "Failed to read from provider '{}': {}",
                        self.name, e
                    ))
                })?;

            if bytes_read == 0 {
                return Err(OrchestrationError::TransportError(format!(
                    "Provider '{}' closed stdout (process may have exited)",
                    self.name
                )));
            }

            let trimmed = line.trim();
            if !trimmed.starts_with('{') {
                continue;
            }

            return serde_json::from_str(trimmed).map_err(|e| {
                OrchestrationError::ProtocolError(format!(
                    "Provider '{}' sent malformed JSON: {}",
                    self.name, e
                ))
            });
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.stdin.shutdown().await {
            debug!(provider = %self.name, error = %e, "stdin already closed");
        }

        match self.process.kill().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(provider = %self.name, error = %e, "Failed to stop provider process");
                Err(OrchestrationError::TransportError(format!(
                    "Failed to stop provider '{}': {}",
                    self.name, e
                )))
            }
        }
    }
}

/// Spawns one subprocess per `open`
pub struct StdioTransportFactory {
    read_timeout: Duration,
}

impl StdioTransportFactory {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

#[async_trait::async_trait]
impl TransportFactory for StdioTransportFactory {
    async fn open(&self, config: &ProviderConfig) -> Result<Box<dyn RpcTransport>> {
        let transport = StdioTransport::spawn(config, self.read_timeout)?;
        Ok(Box::new(transport))
    }
}
