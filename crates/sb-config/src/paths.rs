use std::path::PathBuf;

use sb_types::{AppError, AppResult};

/// Default location of the proxy document: `<config dir>/switchboard/proxies.json`
pub fn default_config_path() -> AppResult<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not determine config directory".to_string()))?;
    Ok(base.join("switchboard").join("proxies.json"))
}
