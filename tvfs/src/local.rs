//! A local-filesystem `TvfsEngine` backend, grounded on
//! `examples/original_source/src/filezilla/tvfs/backends/local_filesys.cpp`
//! (`SPEC_FULL.md` module A). Requests paths already normalized by the HTTP
//! layer (`spec.md` §4.5 "normalized to an absolute UNIX-style path"); this
//! backend only has to strip the leading `/` and join it under its root,
//! rejecting anything that would escape the root after normalization.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::engine::{EntryType, FsEntry, FsError, FsErrorKind, FsResult, OpenMode, OpenedFile, TvfsEngine};

pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a normalized UNIX-style virtual path (always starting with
    /// `/`) onto a native path under `root`, refusing any `..` component
    /// that would otherwise have survived normalization (defense in depth;
    /// the HTTP layer's `normalize_path` already resolves these).
    fn native_path(&self, virtual_path: &str) -> FsResult<PathBuf> {
        let trimmed = virtual_path.trim_start_matches('/');
        let mut out = self.root.clone();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(c) => out.push(c),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(FsError::new(FsErrorKind::Invalid, "path escapes root"))
                }
                _ => return Err(FsError::new(FsErrorKind::Invalid, "invalid path component")),
            }
        }
        Ok(out)
    }

    fn entry_type(meta: &std::fs::Metadata) -> EntryType {
        if meta.is_dir() {
            EntryType::Directory
        } else if meta.is_file() {
            EntryType::File
        } else if meta.file_type().is_symlink() {
            EntryType::Symlink
        } else {
            EntryType::Unknown
        }
    }
}

#[async_trait::async_trait]
impl TvfsEngine for LocalFilesystem {
    async fn open_file(&self, path: &str, mode: OpenMode) -> FsResult<OpenedFile> {
        let native = self.native_path(path)?;
        match mode {
            OpenMode::Reading => {
                let file = fs::File::open(&native).await?;
                let meta = file.metadata().await?;
                if meta.is_dir() {
                    return Err(FsError::new(FsErrorKind::NoFile, "is a directory"));
                }
                Ok(OpenedFile::Read {
                    size: meta.len(),
                    modified: meta.modified().ok(),
                    reader: Box::new(file),
                })
            }
            OpenMode::Writing => {
                if let Some(parent) = native.parent() {
                    fs::create_dir_all(parent).await.ok();
                }
                let file = fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&native)
                    .await?;
                Ok(OpenedFile::Write {
                    writer: Box::new(file),
                })
            }
        }
    }

    async fn get_entry(&self, path: &str) -> FsResult<FsEntry> {
        let native = self.native_path(path)?;
        let meta = fs::metadata(&native).await?;
        let name = native
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FsEntry {
            name,
            entry_type: Self::entry_type(&meta),
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    async fn get_entries(&self, path: &str) -> FsResult<Vec<FsEntry>> {
        let native = self.native_path(path)?;
        let meta = fs::metadata(&native).await?;
        if !meta.is_dir() {
            return Err(FsError::new(FsErrorKind::NoDir, "not a directory"));
        }

        let mut out = Vec::new();
        let mut rd = fs::read_dir(&native).await?;
        while let Some(entry) = rd.next_entry().await? {
            let meta = entry.metadata().await?;
            out.push(FsEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                entry_type: Self::entry_type(&meta),
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from = self.native_path(from)?;
        let to = self.native_path(to)?;
        fs::rename(from, to).await?;
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        let native = self.native_path(path)?;
        let meta = fs::metadata(&native).await?;
        if meta.is_dir() {
            return Err(FsError::new(FsErrorKind::NoFile, "is a directory"));
        }
        fs::remove_file(native).await?;
        Ok(())
    }

    async fn remove_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        let native = self.native_path(path)?;
        if recursive {
            fs::remove_dir_all(native).await?;
        } else {
            fs::remove_dir(native).await?;
        }
        Ok(())
    }

    async fn make_directory(&self, path: &str) -> FsResult<()> {
        let native = self.native_path(path)?;
        match fs::create_dir(native).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(FsError::new(FsErrorKind::AlreadyExists, "already exists"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Used by the NDJSON/plain/HTML listing renderers; not part of the trait
/// since it is only ever needed for display, never for dispatch.
pub fn modified_to_epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());

        match fs.open_file("/hello.txt", OpenMode::Writing).await.unwrap() {
            OpenedFile::Write { mut writer } => {
                writer.write_all(b"hello").await.unwrap();
            }
            _ => panic!("expected writer"),
        }

        match fs.open_file("/hello.txt", OpenMode::Reading).await.unwrap() {
            OpenedFile::Read { mut reader, size, .. } => {
                assert_eq!(size, 5);
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await.unwrap();
                assert_eq!(buf, b"hello");
            }
            _ => panic!("expected reader"),
        }
    }

    #[tokio::test]
    async fn mkdir_twice_reports_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        fs.make_directory("/sub").await.unwrap();
        let err = fs.make_directory("/sub").await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let err = fs.get_entry("/../../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::Invalid);
    }

    #[tokio::test]
    async fn delete_falls_back_from_file_to_directory_at_call_site() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        fs.make_directory("/sub").await.unwrap();
        let err = fs.remove_file("/sub").await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::NoFile);
        fs.remove_directory("/sub", false).await.unwrap();
    }
}
