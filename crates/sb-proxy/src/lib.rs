//! Virtual MCP proxy core
//!
//! A proxy presents a group of upstream MCP servers (targets) as one virtual
//! MCP server. Client requests are dispatched through a routing table that
//! maps exposed tool/resource/prompt names back to the target that owns them.

pub mod bridge;
pub mod core;
pub mod protocol;
pub mod routers;
pub mod store;
pub mod target;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::core::{ProxyCore, TargetStatus};
pub use protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use store::ProxyStore;
pub use target::TargetConnection;
pub use transport::{DefaultTransportFactory, Transport, TransportFactory};
