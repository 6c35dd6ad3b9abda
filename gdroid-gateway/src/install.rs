//! Package installs into a directory: data is staged under a temporary
//! name and renamed into the install directory on commit.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use gdroid_core::{GatewayError, InstallBackend, InstallTransaction, Result};

pub struct StagingInstaller {
    staging_dir: PathBuf,
    install_dir: PathBuf,
    sequence: AtomicU64,
}

impl StagingInstaller {
    pub fn new(staging_dir: impl Into<PathBuf>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            install_dir: install_dir.into(),
            sequence: AtomicU64::new(1),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }
}

#[async_trait]
impl InstallBackend for StagingInstaller {
    async fn begin(&self, label: Option<&str>) -> Result<Box<dyn InstallTransaction>> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        tokio::fs::create_dir_all(&self.install_dir).await?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = package_name(label, seq);
        let staged = self
            .staging_dir
            .join(format!("{name}.{}.{seq}.part", std::process::id()));
        let file = File::create(&staged).await?;

        Ok(Box::new(StagedPackage {
            target: self.install_dir.join(&name),
            staged,
            file: Some(file),
            committed: false,
        }))
    }
}

/// File name a package is installed under. Only the last path component
/// of the client label is used.
fn package_name(label: Option<&str>, seq: u64) -> String {
    label
        .and_then(|l| Path::new(l).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("package-{seq}.apk"))
}

struct StagedPackage {
    staged: PathBuf,
    target: PathBuf,
    file: Option<File>,
    committed: bool,
}

#[async_trait]
impl InstallTransaction for StagedPackage {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| GatewayError::protocol("install transaction closed"))?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.staged, &self.target).await?;
        self.committed = true;
        info!("installed package {}", self.target.display());
        Ok(())
    }
}

impl Drop for StagedPackage {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.staged) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to discard staged package {}: {e}", self.staged.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[tokio::test]
    async fn commit_moves_package_into_place() {
        let root = tempfile::tempdir().unwrap();
        let installer = StagingInstaller::new(root.path().join("staging"), root.path().join("apps"));

        let mut tx = installer.begin(Some("/sdcard/Download/app.apk")).await.unwrap();
        tx.write(b"PK\x03\x04").await.unwrap();
        tx.write(b"rest").await.unwrap();
        tx.commit().await.unwrap();

        let installed = root.path().join("apps/app.apk");
        assert_eq!(std::fs::read(installed).unwrap(), b"PK\x03\x04rest");
        assert!(dir_is_empty(&root.path().join("staging")));
    }

    #[tokio::test]
    async fn dropped_transaction_discards_staging() {
        let root = tempfile::tempdir().unwrap();
        let installer = StagingInstaller::new(root.path().join("staging"), root.path().join("apps"));

        let mut tx = installer.begin(None).await.unwrap();
        tx.write(b"partial").await.unwrap();
        drop(tx);

        assert!(dir_is_empty(&root.path().join("staging")));
        assert!(dir_is_empty(&root.path().join("apps")));
    }

    #[test]
    fn package_name_strips_directories() {
        assert_eq!(package_name(Some("../../etc/x.apk"), 1), "x.apk");
        assert_eq!(package_name(Some(""), 2), "package-2.apk");
        assert_eq!(package_name(None, 3), "package-3.apk");
    }
}
