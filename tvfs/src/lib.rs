//! The narrow virtual-filesystem collaborator the HTTP file handlers are
//! written against (`spec.md` §3 "TVFS file/entry (external)", §6). Out of
//! scope per `spec.md` §1 beyond the one concrete backend needed to drive
//! the handlers end to end (`SPEC_FULL.md` module A).

pub mod engine;
pub mod local;

pub use engine::{
    EntryType, FsEntry, FsError, FsErrorKind, OpenMode, OpenedFile, TvfsEngine,
};
pub use local::LocalFilesystem;
