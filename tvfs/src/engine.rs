//! `TvfsEngine`: the operation set the HTTP file handlers are written
//! against (`spec.md` §3, §6). A real deployment would back this with the
//! mount-tree/impersonation machinery `SPEC_FULL.md` calls out as out of
//! scope; this crate only needs the trait to be narrow and the one backend
//! in [`crate::local`] to be correct.

use std::time::SystemTime;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Filesystem result kinds (`spec.md` §3, §7). `AlreadyExists` and
/// `NotImplemented` are not in the spec's headline taxonomy but are the
/// "raw" distinctions the file-server error mapping (`spec.md` §4.7) and
/// idempotent-mkdir behavior (`SPEC_FULL.md` §C.5) need to tell apart from
/// a generic `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    Invalid,
    NoPerm,
    NoFile,
    NoDir,
    NoSpace,
    ResourceLimit,
    AlreadyExists,
    NotImplemented,
    Other,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct FsError {
    pub kind: FsErrorKind,
    pub message: String,
}

impl FsError {
    pub fn new(kind: FsErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        let kind = match e.kind() {
            NotFound => FsErrorKind::NoFile,
            PermissionDenied => FsErrorKind::NoPerm,
            AlreadyExists => FsErrorKind::AlreadyExists,
            _ => FsErrorKind::Other,
        };
        FsError::new(kind, e.to_string())
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Entry "type" letter used by the NDJSON listing format (`spec.md` §6:
/// `d|f|l|u`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Directory,
    File,
    Symlink,
    Unknown,
}

impl EntryType {
    pub fn as_letter(self) -> char {
        match self {
            EntryType::Directory => 'd',
            EntryType::File => 'f',
            EntryType::Symlink => 'l',
            EntryType::Unknown => 'u',
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FsEntry {
    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Reading,
    Writing,
}

/// What `open_file` hands back: either end of a byte stream, plus the
/// metadata the responder needs (`spec.md` §3 "open_file(path, mode)").
pub enum OpenedFile {
    Read {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
        modified: Option<SystemTime>,
    },
    Write {
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    },
}

/// The external virtual-filesystem interface consumed by the file/entries
/// handlers (`spec.md` §3, §6). A real deployment mounts this over a
/// per-user tree with impersonation; `SPEC_FULL.md` module A scopes that
/// machinery out and keeps only this trait plus [`crate::local::LocalFilesystem`].
#[async_trait::async_trait]
pub trait TvfsEngine: Send + Sync {
    async fn open_file(&self, path: &str, mode: OpenMode) -> FsResult<OpenedFile>;
    async fn get_entry(&self, path: &str) -> FsResult<FsEntry>;
    async fn get_entries(&self, path: &str) -> FsResult<Vec<FsEntry>>;
    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;
    async fn remove_file(&self, path: &str) -> FsResult<()>;
    async fn remove_directory(&self, path: &str, recursive: bool) -> FsResult<()>;
    async fn make_directory(&self, path: &str) -> FsResult<()>;
}
