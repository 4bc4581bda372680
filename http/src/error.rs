//! HTTP-layer error type. Parse errors carry the status they should
//! produce if the responder hasn't advanced past `waiting_for_code_and_reason`
//! yet (`spec.md` §7 "Propagation policy").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{reason} ({status})")]
    Parse { status: u16, reason: &'static str },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Fs(#[from] fileport_tvfs::FsError),
    #[error("programming error: {0}")]
    Protocol(&'static str),
}

impl HttpError {
    pub fn bad_request(reason: &'static str) -> Self {
        HttpError::Parse { status: 400, reason }
    }

    pub fn internal(reason: &'static str) -> Self {
        HttpError::Parse { status: 500, reason }
    }

    /// `(status, reason)` to send if nothing has been sent yet; `None`
    /// means the session should just shut down silently (the client has
    /// already committed to a prior response).
    pub fn response_status(&self) -> (u16, &'static str) {
        match self {
            HttpError::Parse { status, reason } => (*status, reason),
            HttpError::Io(_) => (500, "Internal Server Error"),
            HttpError::Fs(_) => (500, "Internal Server Error"),
            HttpError::Protocol(_) => (500, "Internal Server Error"),
        }
    }
}

/// Maps a [`fileport_tvfs::FsErrorKind`] to the status code the file
/// server sends for it (`spec.md` §4.7 "Error mapping").
pub fn fs_error_status(err: &fileport_tvfs::FsError) -> (u16, &'static str) {
    use fileport_tvfs::FsErrorKind::*;
    match err.kind {
        NoPerm => (403, "Forbidden"),
        NoFile | NoDir => (404, "Not Found"),
        AlreadyExists => (409, "Conflict"),
        NotImplemented => (501, "Not Implemented"),
        Invalid | NoSpace | ResourceLimit | Other => (500, "Internal Server Error"),
    }
}
