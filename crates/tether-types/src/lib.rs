//! Shared types and error hierarchy for Tether.

pub mod descriptor;
pub mod error;
pub mod jsonrpc;

pub use descriptor::{
    ResourceContents, ResourceDescriptor, ToolContent, ToolDescriptor, ToolResult,
};
pub use error::{ClientError, ErrorKind};
pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
