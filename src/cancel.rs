//! Out-of-band query cancellation.
use bytes::BytesMut;
use std::io;
use tokio::io::AsyncWriteExt;

use crate::{
    connection::Config,
    net::Socket,
    protocol::{backend::BackendKeyData, frontend::CancelRequest},
};

/// Everything needed to ask the server to abort the query running on one
/// connection: the endpoint and the `(process_id, secret_key)` pair captured
/// from `BackendKeyData`.
///
/// The request travels on a connection of its own and shares no state with
/// the connection being cancelled. It is inherently best-effort: the server
/// acts on it only if the target query is still running, and the cancelled
/// connection learns about it through a regular `57014` error followed by
/// `ReadyForQuery`.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    config: Config,
    process_id: i32,
    secret_key: i32,
}

impl CancelHandle {
    pub(crate) fn new(config: Config, key: BackendKeyData) -> Self {
        Self {
            config,
            process_id: key.process_id,
            secret_key: key.secret_key,
        }
    }

    /// The process ID of the backend this handle targets.
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Open a fresh connection, dispatch the 16-byte cancel request and close.
    ///
    /// Resolving means the request bytes were handed to the server, not that
    /// anything was cancelled.
    pub async fn send(self) -> io::Result<()> {
        let mut socket = match self.config.socket_path() {
            Some(path) => Socket::connect_unix(path).await?,
            None => Socket::connect_tcp(self.config.host(), self.config.port()).await?,
        };

        let mut buf = BytesMut::with_capacity(16);
        CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        }
        .write(&mut buf);

        socket.write_all(&buf).await?;
        socket.shutdown().await
    }
}
