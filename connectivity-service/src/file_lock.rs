use anyhow::{Context, anyhow};
use fs2::FileExt;
use std::fs::File;

/// Holds the single-instance lock for as long as the returned file lives.
pub fn acquire_service_lock() -> anyhow::Result<File> {
    let mut lock_path = dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or(std::env::temp_dir());
    lock_path.push("connectivity-service.lock");

    let file = File::create(&lock_path)
        .with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;

    // Exclusive lock; fails if another instance holds it
    file.try_lock_exclusive()
        .map_err(|_| anyhow!("Another instance is already running"))?;

    Ok(file)
}
