//! `filesystem` service: uploads, downloads and plain file operations on
//! absolute device paths.

use std::io::ErrorKind;
use std::path::Path;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use gdroid_core::protocol::{
    DirEntry, DirListing, ListDirRequest, OperationStatus, PathPair, PathRequest, TextReply,
    TextRequest, UploadReceipt,
};
use gdroid_core::{
    CallContext, GatewayError, MethodDescriptor, Result, Service, TransferFramer, UploadSession,
};

/// Largest file `read-text` will return.
pub const MAX_TEXT_SIZE: u64 = 1024 * 1024;

const METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::client_streaming("upload"),
    MethodDescriptor::server_streaming("download"),
    MethodDescriptor::unary("list-dir"),
    MethodDescriptor::unary("create-file"),
    MethodDescriptor::unary("delete-file"),
    MethodDescriptor::unary("mkdir"),
    MethodDescriptor::unary("rmdir"),
    MethodDescriptor::unary("move"),
    MethodDescriptor::unary("rename"),
    MethodDescriptor::unary("copy"),
    MethodDescriptor::unary("read-text"),
    MethodDescriptor::unary("write-text"),
    MethodDescriptor::unary("append-text"),
];

#[derive(Debug, Default)]
pub struct FilesystemService;

#[async_trait]
impl Service for FilesystemService {
    fn methods(&self) -> &'static [MethodDescriptor] {
        METHODS
    }

    async fn call(&self, ctx: &mut CallContext) -> Result<()> {
        match ctx.method() {
            "upload" => {
                let outcome = UploadSession::save().consume(ctx.inbound()).await?;
                let receipt = UploadReceipt {
                    path: outcome.destination.map(|p| p.display().to_string()),
                    bytes_written: outcome.bytes_written,
                };
                ctx.reply(receipt.to_bytes()?).await
            }
            "download" => {
                let req = PathRequest::from_bytes(ctx.request())?;
                send_file(ctx, Path::new(&req.path)).await
            }
            "list-dir" => {
                let req = ListDirRequest::from_bytes(ctx.request())?;
                let listing = list_dir(Path::new(&req.path), req.include_hidden).await?;
                ctx.reply(listing.to_bytes()?).await
            }
            "read-text" => {
                let req = PathRequest::from_bytes(ctx.request())?;
                let text = read_text(Path::new(&req.path)).await?;
                ctx.reply(TextReply { text }.to_bytes()?).await
            }
            method => {
                let status = match method {
                    "create-file" => create_file(&PathRequest::from_bytes(ctx.request())?.path).await?,
                    "delete-file" => delete_file(&PathRequest::from_bytes(ctx.request())?.path).await?,
                    "mkdir" => mkdir(&PathRequest::from_bytes(ctx.request())?.path).await?,
                    "rmdir" => rmdir(&PathRequest::from_bytes(ctx.request())?.path).await?,
                    "move" | "rename" => rename(&PathPair::from_bytes(ctx.request())?).await?,
                    "copy" => copy(PathPair::from_bytes(ctx.request())?).await?,
                    "write-text" => write_text(&TextRequest::from_bytes(ctx.request())?, false).await?,
                    "append-text" => write_text(&TextRequest::from_bytes(ctx.request())?, true).await?,
                    _ => return Err(ctx.unknown_method()),
                };
                ctx.reply(status.to_bytes()?).await
            }
        }
    }
}

/// Stream `path` through the transfer framer with its size declared.
pub(crate) async fn send_file(ctx: &mut CallContext, path: &Path) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| missing(e, path))?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(GatewayError::Other(format!(
            "not a regular file: {}",
            path.display()
        )));
    }
    let len = meta.len();
    debug!("download {} ({len} bytes)", path.display());
    TransferFramer::new(file)
        .with_declared_length(len)
        .drive(ctx.sink())
        .await?;
    Ok(())
}

/// `NotFound` for absent paths, `Io` for everything else.
pub(crate) fn missing(e: std::io::Error, path: &Path) -> GatewayError {
    if e.kind() == ErrorKind::NotFound {
        GatewayError::not_found(path.display().to_string())
    } else {
        GatewayError::Io(e)
    }
}

pub(crate) async fn list_dir(path: &Path, include_hidden: bool) -> Result<DirListing> {
    let mut dir = tokio::fs::read_dir(path).await.map_err(|e| missing(e, path))?;
    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !include_hidden && name.starts_with('.') {
            continue;
        }
        let meta = entry.metadata().await?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        entries.push(DirEntry {
            name,
            path: entry.path().display().to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_directory: meta.is_dir(),
            modified,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(DirListing { entries })
}

async fn read_text(path: &Path) -> Result<String> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| missing(e, path))?;
    if meta.len() >= MAX_TEXT_SIZE {
        return Err(GatewayError::Other(format!(
            "file too large: {} ({} bytes)",
            path.display(),
            meta.len()
        )));
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn create_file(path: &str) -> Result<OperationStatus> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    Ok(OperationStatus::ok(format!("created {path}")))
}

async fn delete_file(path: &str) -> Result<OperationStatus> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| missing(e, Path::new(path)))?;
    Ok(OperationStatus::ok(format!("deleted {path}")))
}

async fn mkdir(path: &str) -> Result<OperationStatus> {
    tokio::fs::create_dir_all(path).await?;
    Ok(OperationStatus::ok(format!("created directory {path}")))
}

async fn rmdir(path: &str) -> Result<OperationStatus> {
    tokio::fs::remove_dir_all(path)
        .await
        .map_err(|e| missing(e, Path::new(path)))?;
    Ok(OperationStatus::ok(format!("removed directory {path}")))
}

/// Move or rename, replacing an existing destination file.
async fn rename(pair: &PathPair) -> Result<OperationStatus> {
    let from = Path::new(&pair.from);
    if !tokio::fs::try_exists(from).await.unwrap_or(false) {
        return Err(GatewayError::not_found(pair.from.clone()));
    }
    tokio::fs::rename(from, &pair.to).await?;
    Ok(OperationStatus::ok(format!("{} -> {}", pair.from, pair.to)))
}

/// Copy a file or a directory tree. An existing destination is left alone.
async fn copy(pair: PathPair) -> Result<OperationStatus> {
    let from = Path::new(&pair.from);
    let meta = tokio::fs::metadata(from).await.map_err(|e| missing(e, from))?;
    if tokio::fs::try_exists(&pair.to).await.unwrap_or(false) {
        return Ok(OperationStatus::ok(format!("{} already exists", pair.to)));
    }

    if meta.is_dir() {
        let (from, to) = (pair.from.clone(), pair.to.clone());
        tokio::task::spawn_blocking(move || copy_tree(Path::new(&from), Path::new(&to)))
            .await
            .map_err(|e| GatewayError::Other(format!("copy task failed: {e}")))??;
    } else {
        tokio::fs::copy(from, &pair.to).await?;
    }
    Ok(OperationStatus::ok(format!("copied {} -> {}", pair.from, pair.to)))
}

/// Copy the contents of `from` into a new directory `to`.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    let options = fs_extra::dir::CopyOptions::new().content_only(true);
    fs_extra::dir::copy(from, to, &options)
        .map_err(|e| GatewayError::Other(format!("copy {} failed: {e}", from.display())))?;
    Ok(())
}

async fn write_text(req: &TextRequest, append: bool) -> Result<OperationStatus> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(&req.path)
        .await?;
    file.write_all(req.text.as_bytes()).await?;
    file.flush().await?;
    let verb = if append { "appended" } else { "wrote" };
    Ok(OperationStatus::ok(format!(
        "{verb} {} bytes to {}",
        req.text.len(),
        req.path
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdroid_core::rpc::{Inbound, ResponseSink};
    use tokio_util::sync::CancellationToken;

    fn s(p: &Path) -> String {
        p.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn list_dir_hides_dotfiles_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"12345").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let listing = list_dir(dir.path(), false).await.unwrap();
        let names: Vec<_> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b.txt"]);
        assert!(listing.entries[0].is_directory);
        assert_eq!(listing.entries[1].size, 5);

        assert_eq!(list_dir(dir.path(), true).await.unwrap().entries.len(), 3);
    }

    #[tokio::test]
    async fn list_dir_of_missing_path_is_not_found() {
        let err = list_dir(Path::new("/no/such/dir/here"), false).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn write_then_append_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = s(&dir.path().join("notes.txt"));

        let req = |text: &str| TextRequest {
            path: path.clone(),
            text: text.to_string(),
        };
        write_text(&req("old contents"), false).await.unwrap();
        write_text(&req("one"), false).await.unwrap();
        write_text(&req(" two"), true).await.unwrap();
        assert_eq!(read_text(Path::new(&path)).await.unwrap(), "one two");
    }

    #[tokio::test]
    async fn read_text_refuses_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, vec![b'x'; MAX_TEXT_SIZE as usize]).unwrap();
        let err = read_text(&path).await.unwrap_err();
        assert!(err.to_string().contains("file too large"));
    }

    #[tokio::test]
    async fn copy_directory_tree_and_skip_existing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("nested/f.txt"), b"data").unwrap();
        let dst = dir.path().join("dst");

        copy(PathPair::new(s(&src), s(&dst))).await.unwrap();
        assert_eq!(std::fs::read(dst.join("nested/f.txt")).unwrap(), b"data");

        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"new").unwrap();
        let existing = dir.path().join("existing.txt");
        std::fs::write(&existing, b"old").unwrap();
        let status = copy(PathPair::new(s(&file), s(&existing))).await.unwrap();
        assert!(status.message.contains("already exists"));
        assert_eq!(std::fs::read(&existing).unwrap(), b"old");
    }

    #[tokio::test]
    async fn rename_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"A").unwrap();
        std::fs::write(&b, b"B").unwrap();

        rename(&PathPair::new(s(&a), s(&b))).await.unwrap();
        assert!(!a.exists());
        assert_eq!(std::fs::read(&b).unwrap(), b"A");

        let err = rename(&PathPair::new(s(&a), s(&b))).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn mkdir_and_rmdir_are_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("x/y/z");
        mkdir(&s(&deep)).await.unwrap();
        std::fs::write(deep.join("f"), b"").unwrap();

        rmdir(&s(&dir.path().join("x"))).await.unwrap();
        assert!(!dir.path().join("x").exists());
        assert!(matches!(
            delete_file(&s(&deep.join("f"))).await.unwrap_err(),
            GatewayError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn downloading_a_directory_fails_before_any_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let request = PathRequest::new(s(dir.path())).to_bytes().unwrap();
        let mut ctx = CallContext::new(
            1,
            "filesystem",
            "download",
            request,
            Inbound::empty(),
            ResponseSink::new(1, tx),
            CancellationToken::new(),
        );

        let err = FilesystemService.call(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("not a regular file"), "{err}");
        assert!(rx.try_recv().is_err());
    }
}
