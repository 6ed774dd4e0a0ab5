// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! An embeddable HTTP/1.x server engine. Connections are accepted on a
//! [`TcpListener`] and every request is handed to a [`Handler`].

mod body;
mod config;
mod handler;
mod multipart;
mod read;
mod request;
pub mod responses;
mod session;
mod write;

#[cfg(test)]
mod test_support;

pub use body::{is_body_stall, BodyStalled, BoundedInput};
pub use config::{ServerConfig, Settings};
pub use handler::Handler;
pub use multipart::{serve_ranges, MultipartRangeStream};
pub use read::{body_framing, read_request_head, BodyFraming, ByteSource, RequestHead};
pub use request::Request;
pub use session::{serve_connection, serve_connection_until, Session, SessionEvent, SessionState};
pub use write::{gzip_bytes, OutputWrapper};

use std::{future::Future, io};

use tokio::{
    net::TcpListener,
    sync::watch,
    task::{self, JoinSet},
};
use tracing::{debug, info, warn};

/// Indicates the maximum length of a certain HTTP entity.
pub(crate) struct MaximumLength(pub usize);

impl MaximumLength {
    /// The maximum length of a method name.
    pub const METHOD: MaximumLength = MaximumLength(16);

    /// The maximum number of hexadecimal digits of a chunk size.
    pub const CHUNK_SIZE_DIGITS: MaximumLength = MaximumLength(16);

    /// The maximum length of the extensions of a single chunk.
    pub const CHUNK_EXTENSION: MaximumLength = MaximumLength(1024);

    /// The maximum length of the trailer section of a chunked body.
    pub const TRAILER_SECTION: MaximumLength = MaximumLength(8192);
}

#[cfg(unix)]
const ERRNO_EMFILE: i32 = 24;

/// Start the HTTP/1.x server on the given address, serving until the process
/// ends.
pub async fn start(address: &str, config: ServerConfig) -> io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "started listening");

    serve(listener, config, std::future::pending()).await
}

/// Accepts connections until `shutdown` completes. Afterwards, idle
/// connections are closed and the exchanges in progress are allowed to
/// finish before this function returns.
pub async fn serve<F>(listener: TcpListener, config: ServerConfig, shutdown: F) -> io::Result<()>
        where F: Future<Output = ()> {
    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    let mut sessions = JoinSet::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(error) = finished {
                    warn!(%error, "connection task failed");
                }
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        #[cfg(unix)]
                        if error.raw_os_error() == Some(ERRNO_EMFILE) {
                            task::yield_now().await;
                            continue;
                        }

                        warn!(%error, "failed to accept connection");
                        continue;
                    }
                };

                debug!(%peer, "accepted connection");
                let config = config.clone();
                let shutdown = shutdown_receiver.clone();
                sessions.spawn(async move {
                    serve_connection_until(stream, &config, shutdown).await;
                    debug!(%peer, "connection closed");
                });
            }
        }
    }

    info!(connections = sessions.len(), "shutting down");
    _ = shutdown_sender.send(true);
    while let Some(finished) = sessions.join_next().await {
        if let Err(error) = finished {
            warn!(%error, "connection task failed");
        }
    }

    Ok(())
}
