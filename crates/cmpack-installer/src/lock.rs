use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use fs2::FileExt;
use log::{debug, info};

use crate::PackRootLayout;

/// Advisory lock on the pack-root, held for the duration of a command.
/// Concurrent invocations against the same pack-root serialize on it;
/// the lock is released when the guard drops.
#[derive(Debug)]
pub struct PackRootLock {
    file: File,
    path: PathBuf,
}

impl PackRootLock {
    pub fn acquire(layout: &PackRootLayout) -> Result<PackRootLock> {
        let path = layout.lock_path();
        let file = File::create(&path)
            .with_context(|| format!("failed to create lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            info!(
                "pack root is in use by another process, waiting for {}",
                path.display()
            );
            file.lock_exclusive()
                .with_context(|| format!("failed to lock {}", path.display()))?;
        }

        debug!("acquired pack root lock {}", path.display());
        Ok(PackRootLock { file, path })
    }
}

impl Drop for PackRootLock {
    fn drop(&mut self) {
        if FileExt::unlock(&self.file).is_err() {
            debug!("failed to release pack root lock {}", self.path.display());
        }
    }
}
