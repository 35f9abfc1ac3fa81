//! Shared types for Switchboard crates.

mod errors;
mod mcp_types;
mod slug;

pub use errors::{AppError, AppResult};
pub use mcp_types::{McpPrompt, McpPromptArgument, McpResource, McpResourceTemplate, McpTool};
pub use slug::slugify;
