//! Client-streaming upload sessions.
//!
//! One [`UploadSession`] exists per in-flight upload call. The first
//! inbound chunk opens the sink (a file for [`UploadMode::Save`], an
//! install transaction for [`UploadMode::Install`]); every chunk payload,
//! the first one included, is appended in arrival order. Completion
//! flushes the sink and, for installs, commits the transaction.
//!
//! ```text
//!  Idle ──first chunk──► Receiving ──finish──► Succeeded
//!    │                      │
//!    └──open error──► Failed ◄──write error
//! ```
//!
//! Any failure aborts the session. Sinks are owned guards: a partially
//! written file is removed and an uncommitted install transaction is
//! aborted whenever the session is dropped without succeeding (error,
//! cancellation, or the peer vanishing mid-stream).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::protocol::UploadChunk;
use crate::rpc::Inbound;

// ── Install sink abstraction ─────────────────────────────────────

/// Opens install transactions for uploaded packages.
#[async_trait]
pub trait InstallBackend: Send + Sync {
    /// Begin a new install transaction. `label` is the client-supplied
    /// path metadata, if any.
    async fn begin(&self, label: Option<&str>) -> Result<Box<dyn InstallTransaction>>;
}

/// An open install transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) must
/// abort it and discard any staged data.
#[async_trait]
pub trait InstallTransaction: Send {
    /// Append package bytes.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Finalise and commit the install.
    async fn commit(self: Box<Self>) -> Result<()>;
}

// ── UploadMode / UploadState ─────────────────────────────────────

/// What to do with the uploaded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Write to the path given by the first chunk.
    Save,
    /// Stream into an install transaction.
    Install,
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Receiving,
    Succeeded,
    Failed(String),
}

/// Summary of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub mode: UploadMode,
    pub destination: Option<PathBuf>,
    pub bytes_written: u64,
    pub chunks: u64,
}

// ── Sinks ────────────────────────────────────────────────────────

/// A file being written by an upload. Removed on drop unless kept.
struct PartialFile {
    path: PathBuf,
    file: Option<File>,
    keep: bool,
}

impl PartialFile {
    /// Replace whatever exists at `path` with a fresh, empty file.
    async fn replace(path: &Path) -> Result<Self> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| io_context(e, "delete previous file", path))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| io_context(e, "create new file", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            keep: false,
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| GatewayError::protocol("upload file already closed"))?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        self.keep = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        drop(self.file.take());
        if !self.keep {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to discard partial upload {}: {e}", self.path.display());
                }
            }
        }
    }
}

enum UploadSink {
    File(PartialFile),
    Install(Box<dyn InstallTransaction>),
}

impl UploadSink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            UploadSink::File(file) => file.write(data).await,
            UploadSink::Install(tx) => tx.write(data).await,
        }
    }

    async fn close(self) -> Result<()> {
        match self {
            UploadSink::File(file) => file.close().await,
            UploadSink::Install(tx) => tx.commit().await,
        }
    }
}

// ── UploadSession ────────────────────────────────────────────────

/// Per-call upload state machine.
pub struct UploadSession {
    mode: UploadMode,
    installer: Option<Arc<dyn InstallBackend>>,
    destination: Option<PathBuf>,
    sink: Option<UploadSink>,
    state: UploadState,
    bytes_written: u64,
    chunks: u64,
}

impl UploadSession {
    /// A session that saves the upload to the path named by the first chunk.
    pub fn save() -> Self {
        Self::new(UploadMode::Save, None)
    }

    /// A session that streams the upload into `installer`.
    pub fn install(installer: Arc<dyn InstallBackend>) -> Self {
        Self::new(UploadMode::Install, Some(installer))
    }

    fn new(mode: UploadMode, installer: Option<Arc<dyn InstallBackend>>) -> Self {
        Self {
            mode,
            installer,
            destination: None,
            sink: None,
            state: UploadState::Idle,
            bytes_written: 0,
            chunks: 0,
        }
    }

    pub fn mode(&self) -> UploadMode {
        self.mode
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Destination resolved from the first chunk.
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Consume one inbound chunk.
    pub async fn accept(&mut self, chunk: UploadChunk) -> Result<()> {
        match &self.state {
            UploadState::Idle => {
                if let Err(e) = self.open(chunk.path.as_deref()).await {
                    return Err(self.fail(e));
                }
                self.state = UploadState::Receiving;
            }
            UploadState::Receiving => {}
            UploadState::Succeeded | UploadState::Failed(_) => {
                return Err(GatewayError::protocol("upload session is no longer receiving"));
            }
        }

        if chunk.data.is_empty() {
            self.chunks += 1;
            return Ok(());
        }

        let Some(sink) = self.sink.as_mut() else {
            return Err(self.fail(GatewayError::protocol("upload sink is not open")));
        };
        if let Err(e) = sink.write(&chunk.data).await {
            return Err(self.fail(e));
        }
        self.bytes_written += chunk.data.len() as u64;
        self.chunks += 1;
        Ok(())
    }

    /// Complete the session: flush and close the sink, commit installs.
    pub async fn finish(mut self) -> Result<UploadOutcome> {
        match &self.state {
            UploadState::Idle => {
                return Err(self.fail(GatewayError::protocol(
                    "upload stream ended before any chunk arrived",
                )));
            }
            UploadState::Failed(message) => return Err(GatewayError::Other(message.clone())),
            UploadState::Succeeded => {
                return Err(GatewayError::protocol("upload session already finished"));
            }
            UploadState::Receiving => {}
        }

        let sink = self
            .sink
            .take()
            .ok_or_else(|| GatewayError::protocol("upload sink is not open"))?;
        if let Err(e) = sink.close().await {
            return Err(self.fail(e));
        }

        self.state = UploadState::Succeeded;
        debug!(
            mode = ?self.mode,
            bytes = self.bytes_written,
            chunks = self.chunks,
            "upload complete"
        );
        Ok(UploadOutcome {
            mode: self.mode,
            destination: self.destination.take(),
            bytes_written: self.bytes_written,
            chunks: self.chunks,
        })
    }

    /// Drive the session from an inbound message stream until the client
    /// half-closes, then [`finish`](Self::finish).
    pub async fn consume(mut self, inbound: &mut Inbound) -> Result<UploadOutcome> {
        while let Some(message) = inbound.next().await {
            let chunk = UploadChunk::from_bytes(&message)?;
            self.accept(chunk).await?;
        }
        self.finish().await
    }

    async fn open(&mut self, path: Option<&str>) -> Result<()> {
        match self.mode {
            UploadMode::Save => {
                let path = match path {
                    Some(p) if !p.is_empty() => PathBuf::from(p),
                    Some(_) => return Err(GatewayError::protocol("upload path is empty")),
                    None => {
                        return Err(GatewayError::protocol(
                            "first upload chunk carries no destination path",
                        ));
                    }
                };
                debug!("upload destination: {}", path.display());
                let file = PartialFile::replace(&path).await?;
                self.destination = Some(path);
                self.sink = Some(UploadSink::File(file));
            }
            UploadMode::Install => {
                let installer = self
                    .installer
                    .as_ref()
                    .ok_or_else(|| GatewayError::Configuration("no install backend".into()))?;
                let label = path.filter(|p| !p.is_empty());
                let tx = installer.begin(label).await?;
                self.destination = label.map(PathBuf::from);
                self.sink = Some(UploadSink::Install(tx));
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: GatewayError) -> GatewayError {
        warn!(mode = ?self.mode, "upload failed: {err}");
        self.state = UploadState::Failed(err.to_string());
        self.sink = None;
        err
    }
}

fn io_context(e: std::io::Error, action: &str, path: &Path) -> GatewayError {
    GatewayError::Io(std::io::Error::new(
        e.kind(),
        format!("{action} failed for {}: {e}", path.display()),
    ))
}

// ── Tests ────────────────────────────────────────────────────────
