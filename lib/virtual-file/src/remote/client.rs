use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Sender, bounded};
use tracing::trace;
use url::Url;

use super::meta::{Frame, MAX_READ_CHUNK, Request, Response, WireError};
use super::server::RemoteConnector;
use crate::guard::normalize_path;
use crate::{
    Capabilities, DirEntry, FileSystem, FsError, GlobPattern, Metadata, RelativePath, Result,
    ScanOptions,
};

/// A [`FileSystem`] served by a [`RemoteAgent`](super::RemoteAgent),
/// possibly on another thread.
///
/// URIs and absolute paths are computed locally from what the agent reported
/// when connecting. Every other call is a blocking round trip, and recursive
/// listings run entirely on the agent's side.
#[derive(Debug)]
pub struct RemoteFileSystem {
    common: RemoteCommon,
    root_uri: Url,
    root_absolute: PathBuf,
    capabilities: Capabilities,
}

#[derive(Debug, Clone)]
struct RemoteCommon {
    tx: Sender<Frame>,
}

static REQUEST_SEED: AtomicU64 = AtomicU64::new(1);

impl RemoteCommon {
    fn io_iface(&self, req: Request) -> Response {
        let req_id = REQUEST_SEED.fetch_add(1, Ordering::Relaxed);
        trace!(req_id, ?req, "remote request");
        let data = match bincode::serialize(&req) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!("failed to serialize message - {}", err);
                return Response::Error(WireError::remote(err.to_string()));
            }
        };
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send((data, reply_tx)).is_err() {
            return Response::Error(WireError::remote("remote agent is gone"));
        }
        let Ok(data) = reply_rx.recv() else {
            return Response::Error(WireError::remote("remote agent dropped the request"));
        };
        bincode::deserialize(&data).unwrap_or_else(|err| {
            tracing::warn!("failed to deserialize message - {}", err);
            Response::Error(WireError::remote(err.to_string()))
        })
    }
}

fn unexpected() -> FsError {
    FsError::Remote("unexpected response".to_string())
}

impl RemoteFileSystem {
    pub fn connect(connector: RemoteConnector) -> Result<Self> {
        let common = RemoteCommon { tx: connector.tx };
        let (uri, absolute, capabilities) = match common.io_iface(Request::Describe) {
            Response::Error(err) => return Err(err.into()),
            Response::Describe {
                uri,
                absolute,
                capabilities,
            } => (uri, absolute, capabilities),
            _ => return Err(unexpected()),
        };
        let root_uri = Url::parse(&uri)
            .map_err(|e| FsError::Remote(format!("agent sent an invalid uri '{uri}': {e}")))?;
        Ok(Self {
            common,
            root_uri,
            root_absolute: PathBuf::from(absolute),
            capabilities: Capabilities::from_bits_truncate(capabilities)
                | Capabilities::QUICK_RECURSIVE_LISTING,
        })
    }

    fn expect_bool(&self, req: Request) -> Result<bool> {
        match self.common.io_iface(req) {
            Response::Error(err) => Err(err.into()),
            Response::Bool(value) => Ok(value),
            _ => Err(unexpected()),
        }
    }
}

impl FileSystem for RemoteFileSystem {
    fn uri(&self, path: &RelativePath) -> Url {
        let mut url = self.root_uri.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            for _ in 0..path.ups() {
                segments.pop();
            }
            segments.extend(path.segments());
        }
        url
    }

    fn absolute(&self, path: &RelativePath) -> String {
        normalize_path(&path.to_path(&self.root_absolute))
            .to_string_lossy()
            .into_owned()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn metadata(&self, path: &RelativePath) -> Result<Metadata> {
        match self
            .common
            .io_iface(Request::Metadata { path: path.clone() })
        {
            Response::Error(err) => Err(err.into()),
            Response::Metadata(meta) => Ok(meta),
            _ => Err(unexpected()),
        }
    }

    fn read_dir(&self, path: &RelativePath) -> Result<Vec<DirEntry>> {
        match self.common.io_iface(Request::ReadDir { path: path.clone() }) {
            Response::Error(err) => Err(err.into()),
            Response::DirEntries(entries) => Ok(entries),
            _ => Err(unexpected()),
        }
    }

    fn open(&self, path: &RelativePath, no_follow: bool) -> Result<Box<dyn Read + Send>> {
        let req = Request::Open {
            path: path.clone(),
            no_follow,
        };
        match self.common.io_iface(req) {
            Response::Error(err) => Err(err.into()),
            Response::Handle(handle) => Ok(Box::new(RemoteReader {
                common: self.common.clone(),
                handle,
                eof: false,
            })),
            _ => Err(unexpected()),
        }
    }

    fn read_link(&self, path: &RelativePath) -> Result<Option<String>> {
        match self.common.io_iface(Request::ReadLink { path: path.clone() }) {
            Response::Error(err) => Err(err.into()),
            Response::Link(target) => Ok(target),
            _ => Err(unexpected()),
        }
    }

    fn is_descendant(&self, path: &RelativePath) -> Result<bool> {
        self.expect_bool(Request::IsDescendant { path: path.clone() })
    }

    fn has_symlink(&self, path: &RelativePath) -> Result<bool> {
        self.expect_bool(Request::HasSymlink { path: path.clone() })
    }

    fn canonical(&self, path: &RelativePath) -> Result<String> {
        match self.common.io_iface(Request::Canonical { path: path.clone() }) {
            Response::Error(err) => Err(err.into()),
            Response::Text(canonical) => Ok(canonical),
            _ => Err(unexpected()),
        }
    }

    fn can_read(&self, path: &RelativePath) -> bool {
        self.expect_bool(Request::CanRead { path: path.clone() })
            .unwrap_or(false)
    }

    fn scan(
        &self,
        path: &RelativePath,
        pattern: &GlobPattern,
        options: ScanOptions,
    ) -> Result<Vec<String>> {
        let req = Request::Scan {
            path: path.clone(),
            pattern: pattern.spec().clone(),
            options,
        };
        match self.common.io_iface(req) {
            Response::Error(err) => Err(err.into()),
            Response::Paths(paths) => Ok(paths),
            _ => Err(unexpected()),
        }
    }
}

/// Content streamed from the agent in chunks. The handle is released on
/// drop.
struct RemoteReader {
    common: RemoteCommon,
    handle: u64,
    eof: bool,
}

impl Read for RemoteReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        let len = u32::try_from(buf.len()).unwrap_or(MAX_READ_CHUNK);
        let req = Request::Read {
            handle: self.handle,
            len: len.min(MAX_READ_CHUNK),
        };
        match self.common.io_iface(req) {
            Response::Error(err) => Err(FsError::from(err).into()),
            Response::Data(data) => {
                if data.is_empty() {
                    self.eof = true;
                }
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            _ => Err(unexpected().into()),
        }
    }
}

impl Drop for RemoteReader {
    fn drop(&mut self) {
        if let Response::Error(err) = self.common.io_iface(Request::Close {
            handle: self.handle,
        }) {
            trace!(handle = self.handle, error = ?err, "failed to close remote handle");
        }
    }
}
