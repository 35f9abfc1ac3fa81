use std::path::Path;

use tokio::sync::Mutex;
use tracing::{debug, info};

use sb_types::{AppError, AppResult};

use crate::types::ProxyDefinition;

// Serializes writes to the proxy document so concurrent saves cannot
// interleave and corrupt the file.
static SAVE_LOCK: Mutex<()> = Mutex::const_new(());

/// Load all proxy definitions from disk.
///
/// A missing file is not an error; it reads as an empty list.
pub async fn load_proxies(path: &Path) -> AppResult<Vec<ProxyDefinition>> {
    if !path.exists() {
        debug!("No proxy document at {}, starting empty", path.display());
        return Ok(Vec::new());
    }

    let contents = tokio::fs::read_to_string(path).await?;
    let proxies: Vec<ProxyDefinition> = serde_json::from_str(&contents)
        .map_err(|e| AppError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

    // Duplicate ids would make routing ambiguous; reject the whole document.
    let mut seen = std::collections::HashSet::new();
    for proxy in &proxies {
        if !seen.insert(proxy.id.as_str()) {
            return Err(AppError::Config(format!(
                "Duplicate proxy id '{}' in {}",
                proxy.id,
                path.display()
            )));
        }
    }

    info!("Loaded {} proxies from {}", proxies.len(), path.display());
    Ok(proxies)
}

/// Save all proxy definitions to disk, creating parent directories as needed.
pub async fn save_proxies(path: &Path, proxies: &[ProxyDefinition]) -> AppResult<()> {
    let _guard = SAVE_LOCK.lock().await;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let contents = serde_json::to_string_pretty(proxies)?;
    tokio::fs::write(path, contents).await?;

    debug!("Saved {} proxies to {}", proxies.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ServerDefinition, TransportConfig};

    fn sample_proxies() -> Vec<ProxyDefinition> {
        vec![ProxyDefinition {
            id: "dev-tools".to_string(),
            name: "Dev Tools".to_string(),
            description: None,
            servers: vec![ServerDefinition {
                name: "fetch".to_string(),
                transport: TransportConfig::Stdio {
                    command: "uvx mcp-server-fetch".to_string(),
                    args: vec![],
                    env: vec![],
                },
            }],
        }]
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.json");
        let proxies = load_proxies(&path).await.unwrap();
        assert!(proxies.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("proxies.json");

        let proxies = sample_proxies();
        save_proxies(&path, &proxies).await.unwrap();

        let loaded = load_proxies(&path).await.unwrap();
        assert_eq!(loaded, proxies);
    }

    #[tokio::test]
    async fn test_load_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.json");

        let mut proxies = sample_proxies();
        proxies.push(proxies[0].clone());
        save_proxies(&path, &proxies).await.unwrap();

        let err = load_proxies(&path).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = load_proxies(&path).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
