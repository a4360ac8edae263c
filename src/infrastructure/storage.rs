use crate::config::StorageConfig;
use crate::services::storage::LocalStorageService;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// Creates the storage root if needed and opens it for every client.
pub async fn setup_storage(config: &StorageConfig) -> anyhow::Result<Arc<LocalStorageService>> {
    let root = &config.storage_root;

    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("failed to create storage root {:?}", root))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(root, std::fs::Permissions::from_mode(0o777))
            .await
            .with_context(|| format!("failed to set permissions on {:?}", root))?;
    }

    info!("📁 Local Storage: {:?}", root);
    Ok(Arc::new(LocalStorageService::new(root.clone())))
}
