//! Serving a tree over a channel.
//!
//! A [`RemoteAgent`] owns the real [`FileSystem`] and answers bincode
//! encoded requests. A [`RemoteFileSystem`] is the client side and can be
//! used anywhere a local backend can.

mod client;
mod meta;
mod server;

use std::sync::Arc;

pub use self::client::RemoteFileSystem;
pub use self::server::{RemoteAgent, RemoteConnector};
use crate::{FileSystem, Result};

/// Starts an agent for `fs` on its own thread and connects to it.
///
/// The agent stops once the returned client and every reader it handed out
/// are dropped.
pub fn spawn(fs: Arc<dyn FileSystem>) -> Result<RemoteFileSystem> {
    let (agent, connector) = RemoteAgent::new(fs);
    std::thread::Builder::new()
        .name("virtual-file-agent".to_string())
        .spawn(move || agent.run())?;
    RemoteFileSystem::connect(connector)
}
