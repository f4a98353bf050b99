//! In-process fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use market_analysis_orchestrator::config::{EngineSettings, ProviderConfig};
use market_analysis_orchestrator::context::SessionContext;
use market_analysis_orchestrator::gemini::LanguageModel;
use market_analysis_orchestrator::planner::Planner;
use market_analysis_orchestrator::providers::{ConnectionManager, RpcTransport, TransportFactory};
use market_analysis_orchestrator::{OrchestrationError, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a fake provider does with one `tools/call`
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    ProviderError(String),
    /// The pipe breaks mid-call
    Broken,
    /// Never answers
    Hang,
    /// Raw messages written to the stream before the reply
    Preceded(Vec<Value>, Box<Reply>),
    /// A raw message written in place of the reply
    Raw(Value),
}

pub type Handler = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

struct FakeProvider {
    operations: Vec<String>,
    handler: Handler,
    fail_close: bool,
}

#[derive(Default)]
struct Shared {
    opened: HashMap<String, usize>,
    kill_switches: HashMap<String, Vec<Arc<AtomicBool>>>,
}

/// Factory of fake transports. Providers not registered fail to open.
pub struct FakeFactory {
    providers: HashMap<String, FakeProvider>,
    shared: Mutex<Shared>,
    calls: Arc<AtomicUsize>,
    client_replies: Arc<Mutex<Vec<Value>>>,
    cancel_after: Option<(usize, CancellationToken)>,
    open_delay: Duration,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            shared: Mutex::new(Shared::default()),
            calls: Arc::new(AtomicUsize::new(0)),
            client_replies: Arc::new(Mutex::new(Vec::new())),
            cancel_after: None,
            open_delay: Duration::ZERO,
        }
    }

    pub fn provider(
        mut self,
        name: &str,
        operations: &[&str],
        handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    ) -> Self {
        self.providers.insert(
            name.to_string(),
            FakeProvider {
                operations: operations.iter().map(|s| s.to_string()).collect(),
                handler: Arc::new(handler),
                fail_close: false,
            },
        );
        self
    }

    /// Closing this provider's transport reports an error
    pub fn failing_close(mut self, name: &str) -> Self {
        if let Some(provider) = self.providers.get_mut(name) {
            provider.fail_close = true;
        }
        self
    }

    /// Cancel `token` when the `calls`-th operation call arrives
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Transports opened so far for `name`
    pub fn opened(&self, name: &str) -> usize {
        self.shared
            .lock()
            .unwrap()
            .opened
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Operation calls received across every transport
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Replies the client sent back to server-initiated requests
    pub fn client_replies(&self) -> Vec<Value> {
        self.client_replies.lock().unwrap().clone()
    }

    /// Simulate the most recent subprocess for `name` dying
    pub fn kill_latest(&self, name: &str) {
        let shared = self.shared.lock().unwrap();
        if let Some(flag) = shared.kill_switches.get(name).and_then(|v| v.last()) {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn open(&self, config: &ProviderConfig) -> Result<Box<dyn RpcTransport>> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let provider = self.providers.get(&config.name).ok_or_else(|| {
            OrchestrationError::TransportError(format!("No such program: {}", config.command))
        })?;

        let killed = Arc::new(AtomicBool::new(false));
        {
            let mut shared = self.shared.lock().unwrap();
            *shared.opened.entry(config.name.clone()).or_default() += 1;
            shared
                .kill_switches
                .entry(config.name.clone())
                .or_default()
                .push(killed.clone());
        }

        Ok(Box::new(FakeTransport {
            name: config.name.clone(),
            operations: provider.operations.clone(),
            handler: provider.handler.clone(),
            fail_close: provider.fail_close,
            killed,
            outbox: VecDeque::new(),
            calls: self.calls.clone(),
            client_replies: self.client_replies.clone(),
            cancel_after: self.cancel_after.clone(),
        }))
    }
}

struct FakeTransport {
    name: String,
    operations: Vec<String>,
    handler: Handler,
    fail_close: bool,
    killed: Arc<AtomicBool>,
    outbox: VecDeque<Value>,
    calls: Arc<AtomicUsize>,
    client_replies: Arc<Mutex<Vec<Value>>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl FakeTransport {
    fn broken(&self) -> OrchestrationError {
        OrchestrationError::TransportError(format!("{}: broken pipe", self.name))
    }

    fn reply(&mut self, id: &Value, result: Value) {
        self.outbox
            .push_back(json!({ "jsonrpc": "2.0", "id": id, "result": result }));
    }

    fn answer(&mut self, id: &Value, reply: Reply) -> Result<()> {
        match reply {
            Reply::Ok(payload) => self.reply(
                id,
                json!({ "content": [{ "type": "text", "text": payload.to_string() }] }),
            ),
            Reply::ProviderError(message) => self.reply(
                id,
                json!({ "content": [{ "type": "text", "text": message }], "isError": true }),
            ),
            Reply::Broken => {
                self.killed.store(true, Ordering::SeqCst);
                return Err(self.broken());
            }
            Reply::Hang => {}
            Reply::Preceded(messages, reply) => {
                self.outbox.extend(messages);
                return self.answer(id, *reply);
            }
            Reply::Raw(message) => self.outbox.push_back(message),
        }
        Ok(())
    }
}

#[async_trait]
impl RpcTransport for FakeTransport {
    async fn send(&mut self, message: &Value) -> Result<()> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(self.broken());
        }

        let Some(id) = message.get("id").cloned() else {
            return Ok(());
        };

        if message.get("method").is_none() {
            self.client_replies.lock().unwrap().push(message.clone());
            return Ok(());
        }

        match message["method"].as_str().unwrap_or_default() {
            "initialize" => self.reply(
                &id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": self.name, "version": "test" }
                }),
            ),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .operations
                    .iter()
                    .map(|op| json!({ "name": op, "inputSchema": { "type": "object" } }))
                    .collect();
                self.reply(&id, json!({ "tools": tools }));
            }
            "tools/call" => {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some((after, token)) = &self.cancel_after {
                    if n == *after {
                        token.cancel();
                    }
                }

                let operation = message["params"]["name"].as_str().unwrap_or_default();
                let arguments = message["params"]["arguments"].clone();

                let reply = (self.handler)(operation, &arguments);
                self.answer(&id, reply)?;
            }
            other => {
                self.outbox.push_back(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": format!("Unknown method {}", other) }
                }));
            }
        }

        Ok(())
    }

    async fn receive(&mut self) -> Result<Value> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(self.broken());
        }
        match self.outbox.pop_front() {
            Some(message) => Ok(message),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(OrchestrationError::TransportError(format!(
                "{}: kill failed",
                self.name
            )));
        }
        Ok(())
    }
}

pub fn provider_config(name: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        command: format!("{}-provider", name),
        args: vec![],
        env: HashMap::new(),
    }
}

pub fn manager(factory: Arc<FakeFactory>, names: &[&str]) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        names.iter().map(|n| provider_config(n)).collect(),
        factory,
    ))
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        step_timeout: Duration::from_millis(500),
        ..EngineSettings::default()
    }
}

/// Price payload the heuristic analyzer can judge
pub fn price_payload(entity: &str, change: f64) -> Value {
    json!({ entity: { "usd": 100.0, "usd_24h_change": change } })
}

/// Planner returning a fixed document, or failing
pub struct FixedPlanner(pub std::result::Result<String, String>);

impl FixedPlanner {
    pub fn document(doc: Value) -> Box<Self> {
        Box::new(Self(Ok(doc.to_string())))
    }

    pub fn failing() -> Box<Self> {
        Box::new(Self(Err("planner offline".to_string())))
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn create_plan(&self, _context: &SessionContext) -> Result<String> {
        self.0.clone().map_err(OrchestrationError::LlmError)
    }
}

/// Language model replaying canned replies in order; the last one repeats
pub struct ScriptedModel {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<std::result::Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        reply
            .unwrap_or_else(|| Err("no scripted reply".to_string()))
            .map_err(OrchestrationError::LlmError)
    }
}

/// Plan document with one `market/get_price` step per entity listed
pub fn price_plan(entities: &[&str]) -> Value {
    let steps: Vec<Value> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| {
            json!({
                "id": i + 1,
                "provider": "market",
                "operation": "get_price",
                "parameters": { "coin_id": e },
                "target_entity": e
            })
        })
        .collect();

    json!({ "analysis_kind": "comprehensive", "priority": 3, "steps": steps })
}
