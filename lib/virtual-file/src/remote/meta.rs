use std::io;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::glob::GlobSpec;
use crate::{DirEntry, FsError, Metadata, RelativePath, ScanOptions};

/// A serialized [`Request`] and where to send the serialized [`Response`].
pub(crate) type Frame = (Vec<u8>, Sender<Vec<u8>>);

/// Largest chunk handed out by a single [`Request::Read`].
pub(crate) const MAX_READ_CHUNK: u32 = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Request {
    Describe,
    Metadata {
        path: RelativePath,
    },
    ReadDir {
        path: RelativePath,
    },
    Open {
        path: RelativePath,
        no_follow: bool,
    },
    Read {
        handle: u64,
        len: u32,
    },
    Close {
        handle: u64,
    },
    ReadLink {
        path: RelativePath,
    },
    IsDescendant {
        path: RelativePath,
    },
    HasSymlink {
        path: RelativePath,
    },
    Canonical {
        path: RelativePath,
    },
    CanRead {
        path: RelativePath,
    },
    Scan {
        path: RelativePath,
        pattern: GlobSpec,
        options: ScanOptions,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Response {
    Describe {
        uri: String,
        absolute: String,
        capabilities: u8,
    },
    Metadata(Metadata),
    DirEntries(Vec<DirEntry>),
    Handle(u64),
    Data(Vec<u8>),
    Link(Option<String>),
    Bool(bool),
    Text(String),
    Paths(Vec<String>),
    None,
    Error(WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum WireErrorKind {
    NotFound,
    IllegalSymlink,
    IllegalArgument,
    BreaksOut,
    Unsupported,
    NotADirectory,
    IsADirectory,
    PermissionDenied,
    Io,
    Archive,
    Remote,
}

/// An [`FsError`] on its way over the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

impl WireError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self {
            kind: WireErrorKind::Remote,
            message: message.into(),
        }
    }
}

impl From<FsError> for WireError {
    fn from(err: FsError) -> Self {
        let (kind, message) = match err {
            FsError::NotFound(m) => (WireErrorKind::NotFound, m),
            FsError::IllegalSymlink(m) => (WireErrorKind::IllegalSymlink, m),
            FsError::IllegalArgument(m) => (WireErrorKind::IllegalArgument, m),
            err @ FsError::BreaksOut { .. } => (WireErrorKind::BreaksOut, err.to_string()),
            FsError::Unsupported(m) => (WireErrorKind::Unsupported, m.to_string()),
            FsError::Io(e) => {
                let kind = match e.kind() {
                    io::ErrorKind::NotADirectory => WireErrorKind::NotADirectory,
                    io::ErrorKind::IsADirectory => WireErrorKind::IsADirectory,
                    io::ErrorKind::PermissionDenied => WireErrorKind::PermissionDenied,
                    io::ErrorKind::NotFound => WireErrorKind::NotFound,
                    _ => WireErrorKind::Io,
                };
                (kind, e.to_string())
            }
            FsError::Archive(m) => (WireErrorKind::Archive, m),
            FsError::Remote(m) => (WireErrorKind::Remote, m),
        };
        Self { kind, message }
    }
}

impl From<WireError> for FsError {
    fn from(err: WireError) -> Self {
        let WireError { kind, message } = err;
        let io_kind = match kind {
            WireErrorKind::NotFound => return FsError::NotFound(message),
            WireErrorKind::IllegalSymlink => return FsError::IllegalSymlink(message),
            WireErrorKind::IllegalArgument => return FsError::IllegalArgument(message),
            WireErrorKind::BreaksOut | WireErrorKind::Archive => {
                return FsError::Archive(message);
            }
            WireErrorKind::Remote => return FsError::Remote(message),
            WireErrorKind::Unsupported => io::ErrorKind::Unsupported,
            WireErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            WireErrorKind::IsADirectory => io::ErrorKind::IsADirectory,
            WireErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            WireErrorKind::Io => io::ErrorKind::Other,
        };
        FsError::Io(io::Error::new(io_kind, message))
    }
}
