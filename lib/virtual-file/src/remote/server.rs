use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, trace, warn};

use super::meta::{Frame, MAX_READ_CHUNK, Request, Response, WireError};
use crate::{FileSystem, Result};

/// The half of a remote pair a client connects through.
#[derive(Debug, Clone)]
pub struct RemoteConnector {
    pub(crate) tx: Sender<Frame>,
}

/// Serves a [`FileSystem`] to [`RemoteFileSystem`](super::RemoteFileSystem)
/// clients.
///
/// The agent owns the open read handles. It answers requests one at a time
/// until every connector and client is gone.
pub struct RemoteAgent {
    inner: Arc<dyn FileSystem>,
    rx: Receiver<Frame>,
    handles: HashMap<u64, Box<dyn Read + Send>>,
    handle_seed: u64,
}

impl RemoteAgent {
    pub fn new(inner: Arc<dyn FileSystem>) -> (Self, RemoteConnector) {
        let (tx, rx) = unbounded();
        let agent = Self {
            inner,
            rx,
            handles: HashMap::new(),
            handle_seed: 0,
        };
        (agent, RemoteConnector { tx })
    }

    /// Answers requests until the last client hangs up.
    pub fn run(mut self) {
        debug!(fs = ?self.inner, "remote agent started");
        while let Ok((data, reply)) = self.rx.recv() {
            let res = match bincode::deserialize::<Request>(&data) {
                Ok(req) => self.process(req),
                Err(err) => {
                    warn!("failed to deserialize request - {}", err);
                    Response::Error(WireError::remote(format!("malformed request: {err}")))
                }
            };
            let data = match bincode::serialize(&res) {
                Ok(data) => data,
                Err(err) => {
                    warn!("failed to serialize response - {}", err);
                    continue;
                }
            };
            if reply.send(data).is_err() {
                trace!("client went away before the response was sent");
            }
        }
        debug!(open_handles = self.handles.len(), "remote agent stopped");
    }

    fn process(&mut self, req: Request) -> Response {
        trace!(?req, "remote request");
        match self.try_process(req) {
            Ok(res) => res,
            Err(err) => Response::Error(err.into()),
        }
    }

    fn try_process(&mut self, req: Request) -> Result<Response> {
        let fs = &self.inner;
        let root = crate::RelativePath::root();
        Ok(match req {
            Request::Describe => Response::Describe {
                uri: fs.uri(&root).to_string(),
                absolute: fs.absolute(&root),
                capabilities: fs.capabilities().bits(),
            },
            Request::Metadata { path } => Response::Metadata(fs.metadata(&path)?),
            Request::ReadDir { path } => Response::DirEntries(fs.read_dir(&path)?),
            Request::Open { path, no_follow } => {
                let reader = fs.open(&path, no_follow)?;
                self.handle_seed += 1;
                let handle = self.handle_seed;
                self.handles.insert(handle, reader);
                Response::Handle(handle)
            }
            Request::Read { handle, len } => {
                let Some(reader) = self.handles.get_mut(&handle) else {
                    return Ok(Response::Error(WireError::remote(format!(
                        "unknown handle {handle}"
                    ))));
                };
                let mut buf = vec![0; len.min(MAX_READ_CHUNK) as usize];
                let read = reader.read(&mut buf)?;
                buf.truncate(read);
                Response::Data(buf)
            }
            Request::Close { handle } => {
                self.handles.remove(&handle);
                Response::None
            }
            Request::ReadLink { path } => Response::Link(fs.read_link(&path)?),
            Request::IsDescendant { path } => Response::Bool(fs.is_descendant(&path)?),
            Request::HasSymlink { path } => Response::Bool(fs.has_symlink(&path)?),
            Request::Canonical { path } => Response::Text(fs.canonical(&path)?),
            Request::CanRead { path } => Response::Bool(fs.can_read(&path)),
            Request::Scan {
                path,
                pattern,
                options,
            } => {
                let pattern = pattern.compile()?;
                Response::Paths(fs.scan(&path, &pattern, options)?)
            }
        })
    }
}
