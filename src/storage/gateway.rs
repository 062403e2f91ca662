use super::{
    resolver::{validate_name, PathResolver, ResolvedPath},
    DeleteFailure, DeleteOutcome, Entry, EntryKind, Listing, TreeNode, UploadOutcome,
};
use crate::errors::{is_missing, map_io_error, AppError, AppResult};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{fmt::Display, io, path::Path};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_stream::wrappers::ReadDirStream;
use tracing::{debug, info, warn};

const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// Operation surface over a single storage root.
#[derive(Debug, Clone)]
pub struct StorageGateway {
    resolver: PathResolver,
}

impl StorageGateway {
    pub fn new(root: &Path) -> AppResult<Self> {
        Ok(Self { resolver: PathResolver::new(root)? })
    }

    pub async fn list_content(&self, path: &str) -> AppResult<Listing> {
        let dir = self.existing_dir(path).await?;
        let rd = fs::read_dir(&dir.abs).await.map_err(|e| map_io_error(e, &dir.rel))?;
        let mut entries = ReadDirStream::new(rd);
        let mut listing = Listing::default();
        while let Some(item) = entries.next().await {
            let item = item.map_err(|e| map_io_error(e, &dir.rel))?;
            let name = match item.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(dir = %dir.rel, name = ?raw, "skipping entry with non UTF-8 name");
                    continue;
                }
            };
            if let Err(e) = validate_name(&name) {
                warn!(dir = %dir.rel, name = %name, error = %e, "skipping entry that cannot be addressed");
                continue;
            }
            let mut ft = match item.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if ft.is_symlink() {
                // dangling links are skipped
                match fs::metadata(item.path()).await {
                    Ok(md) => ft = md.file_type(),
                    Err(_) => continue,
                }
            }
            if ft.is_dir() {
                listing.dirs.push(Entry::new(&dir.rel, &name, EntryKind::Dir));
            } else if ft.is_file() {
                listing.files.push(Entry::new(&dir.rel, &name, EntryKind::File));
            }
        }
        debug!(path = %dir.rel, files = listing.files.len(), dirs = listing.dirs.len(), "listed");
        Ok(listing)
    }

    /// Fails with `AlreadyExists` when `name` is already taken in the parent.
    pub async fn create_directory(&self, parent_path: &str, name: &str) -> AppResult<Entry> {
        validate_name(name)?;
        let parent = self.existing_dir(parent_path).await?;
        let target = self.resolver.resolve_child(&parent, name)?;
        fs::create_dir(&target.abs).await.map_err(|e| map_io_error(e, &target.rel))?;
        info!(path = %target.rel, "directory created");
        Ok(Entry::new(&parent.rel, name, EntryKind::Dir))
    }

    pub async fn rename(&self, target_path: &str, new_name: &str) -> AppResult<Entry> {
        validate_name(new_name)?;
        let target = self.resolver.resolve(target_path)?;
        if target.is_root() {
            return Err(AppError::InvalidArgument("the storage root cannot be renamed".into()));
        }
        let md = fs::symlink_metadata(&target.abs).await.map_err(|e| map_io_error(e, &target.rel))?;
        let kind = if md.is_dir() { EntryKind::Dir } else { EntryKind::File };
        let parent = self.resolver.resolve(target.parent_rel())?;
        let dest = self.resolver.resolve_child(&parent, new_name)?;
        if dest.abs == target.abs {
            return Ok(Entry::new(&parent.rel, new_name, kind));
        }
        // no rename-without-replace primitive; concurrent writers can still race here
        if fs::symlink_metadata(&dest.abs).await.is_ok() {
            return Err(AppError::AlreadyExists(dest.rel));
        }
        fs::rename(&target.abs, &dest.abs).await.map_err(|e| map_io_error(e, &target.rel))?;
        info!(from = %target.rel, to = %dest.rel, "renamed");
        Ok(Entry::new(&parent.rel, new_name, kind))
    }

    /// Deletes each path in order. Every path is resolved before anything is removed,
    /// so a single containment violation aborts the whole call untouched.
    pub async fn delete(&self, paths: &[String]) -> AppResult<DeleteOutcome> {
        if paths.is_empty() {
            return Err(AppError::InvalidArgument("no paths given".into()));
        }
        let mut targets = Vec::with_capacity(paths.len());
        for p in paths {
            let resolved = self.resolver.resolve(p)?;
            if resolved.is_root() {
                return Err(AppError::InvalidArgument("the storage root cannot be deleted".into()));
            }
            targets.push(resolved);
        }

        let mut outcome = DeleteOutcome::default();
        for target in targets {
            match remove_entry(&target).await {
                Ok(()) => outcome.deleted.push(target.rel),
                Err(e) => {
                    warn!(path = %target.rel, code = e.code(), error = %e, "delete failed");
                    outcome.failed.push(DeleteFailure { path: target.rel, code: e.code().to_string(), message: e.to_string() });
                }
            }
        }
        info!(deleted = outcome.deleted.len(), failed = outcome.failed.len(), "delete finished");
        Ok(outcome)
    }

    /// Opens `parent_path` for receiving uploads.
    pub async fn upload_target(&self, parent_path: &str) -> AppResult<UploadTarget> {
        let dir = self.existing_dir(parent_path).await?;
        Ok(UploadTarget { resolver: self.resolver.clone(), dir })
    }

    /// Writes every named stream into `parent_path`, returning relative paths in input order.
    pub async fn upload<S, E>(&self, parent_path: &str, streams: Vec<(String, S)>) -> AppResult<UploadOutcome>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        for (name, _) in &streams {
            validate_name(name)?;
        }
        let target = self.upload_target(parent_path).await?;
        let mut outcome = UploadOutcome::default();
        for (name, stream) in streams {
            outcome.uploaded.push(target.write(&name, stream).await?);
        }
        Ok(outcome)
    }

    pub async fn download(&self, path: &str) -> AppResult<Download> {
        let target = self.resolver.resolve(path)?;
        let md = fs::metadata(&target.abs).await.map_err(|e| map_io_error(e, &target.rel))?;
        if !md.is_file() {
            return Err(AppError::NotFound(format!("{} is not a file", display_rel(&target.rel))));
        }
        let file = fs::File::open(&target.abs).await.map_err(|e| map_io_error(e, &target.rel))?;
        debug!(path = %target.rel, len = md.len(), "download opened");
        Ok(Download { file_name: target.name().to_string(), len: md.len(), file })
    }

    /// Hierarchical view is not provided; the path is still gated and checked.
    pub async fn open_tree(&self, path: &str) -> AppResult<Vec<TreeNode>> {
        self.existing_dir(path).await?;
        Ok(Vec::new())
    }

    async fn existing_dir(&self, path: &str) -> AppResult<ResolvedPath> {
        let dir = self.resolver.resolve(path)?;
        match fs::metadata(&dir.abs).await {
            Ok(md) if md.is_dir() => Ok(dir),
            Ok(_) => Err(AppError::NotFound(format!("{} is not a directory", display_rel(&dir.rel)))),
            Err(e) => Err(map_io_error(e, &dir.rel)),
        }
    }
}

async fn remove_entry(target: &ResolvedPath) -> AppResult<()> {
    let md = match fs::symlink_metadata(&target.abs).await {
        Ok(md) => md,
        Err(e) if is_missing(&e) => return Ok(()),
        Err(e) => return Err(map_io_error(e, &target.rel)),
    };
    let res = if md.is_dir() { fs::remove_dir_all(&target.abs).await } else { fs::remove_file(&target.abs).await };
    match res {
        Ok(()) => Ok(()),
        Err(e) if is_missing(&e) => Ok(()),
        Err(e) => Err(map_io_error(e, &target.rel)),
    }
}

fn display_rel(rel: &str) -> &str {
    if rel.is_empty() { "/" } else { rel }
}

/// An existing directory receiving uploaded files.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    resolver: PathResolver,
    dir: ResolvedPath,
}

impl UploadTarget {
    /// Streams into a hidden sibling first and renames over `name` only once the
    /// stream completed, so a broken upload never shows up as a finished file.
    pub async fn write<S, E>(&self, name: &str, stream: S) -> AppResult<String>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let dest = self.resolver.resolve_child(&self.dir, name)?;
        // fixed length so names close to the filesystem limit still fit
        let tmp = self.dir.abs.join(format!(".upload-{}", uuid::Uuid::new_v4().simple()));
        match copy_stream(&tmp, stream, &dest.rel).await {
            Ok(bytes) => {
                if let Err(e) = fs::rename(&tmp, &dest.abs).await {
                    let _ = fs::remove_file(&tmp).await;
                    return Err(map_io_error(e, &dest.rel));
                }
                info!(path = %dest.rel, bytes = bytes, "file uploaded");
                Ok(dest.rel)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                warn!(path = %dest.rel, error = %e, "upload aborted");
                Err(e)
            }
        }
    }
}

async fn copy_stream<S, E>(tmp: &Path, stream: S, rel: &str) -> AppResult<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    futures::pin_mut!(stream);
    let mut file = fs::File::create(tmp).await.map_err(|e| map_io_error(e, rel))?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::Io(format!("{rel}: upload stream failed: {e}")))?;
        file.write_all(&chunk).await.map_err(|e| map_io_error(e, rel))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| map_io_error(e, rel))?;
    file.sync_all().await.map_err(|e| map_io_error(e, rel))?;
    Ok(written)
}

/// An opened file ready to be streamed out. The handle closes when dropped.
#[derive(Debug)]
pub struct Download {
    pub file_name: String,
    pub len: u64,
    file: fs::File,
}

impl Download {
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let mut file = self.file;
        async_stream::try_stream! {
            let mut buf = vec![0u8; DOWNLOAD_CHUNK];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        }
    }
}
