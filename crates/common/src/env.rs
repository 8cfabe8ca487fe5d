//! Environment/runtime helpers
//!
//! Sanity checks run once at startup.

use std::path::Path;

use tracing::info;

/// Make sure the directory holding a file-backed document exists.
pub async fn ensure_data_dir(file: &str) -> anyhow::Result<()> {
    let Some(dir) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if tokio::fs::metadata(dir).await.is_err() {
        info!(dir = %dir.display(), "creating data directory");
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", dir.display()))?;
    Ok(())
}
