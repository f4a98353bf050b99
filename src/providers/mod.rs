//! Tool providers
//!
//! Providers are external subprocesses (price, market data, news) reached over
//! JSON-RPC on stdio. The `ConnectionManager` owns every live connection.

pub mod connection;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use connection::ToolProviderConnection;
pub use manager::{ConnectAttempt, ConnectionManager, ProviderStatus};
pub use registry::{OperationInfo, OperationRegistry};
pub use transport::{RpcTransport, StdioTransport, StdioTransportFactory, TransportFactory};
