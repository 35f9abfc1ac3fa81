//! Proxy definition storage
//!
//! Handles loading and saving the persisted proxy document: a JSON array of
//! proxy definitions keyed by slug id. All mutation goes through the proxy
//! store's CRUD API; nothing else writes the backing file.

mod paths;
mod storage;
mod types;

pub use paths::default_config_path;
pub use storage::{load_proxies, save_proxies};
pub use types::*;
