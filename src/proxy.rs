//! Per-camera TCP stream proxy.
//!
//! A pure byte relay between a camera's advertised `(ip, port)` and the real
//! recorder. No RTSP/HTTP awareness: whatever the client and recorder say to
//! each other is forwarded verbatim in both directions. Every camera gets
//! its own listener bound to its own address; a shared-port multiplexer
//! would collapse distinct cameras into one apparent stream.

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::{Result, ServerError};

pub struct StreamProxy {
    pub name: String,
    task: JoinHandle<()>,
    pub local_addr: SocketAddr,
}

impl StreamProxy {
    /// Bind `bind_addr` and relay every accepted connection to `target`.
    /// Bind failure is fatal for this camera's proxy only.
    pub async fn spawn(name: String, bind_addr: String, target: String) -> Result<StreamProxy> {
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::bind(format!("Proxy '{}' listen {}: {}", name, bind_addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        info!(proxy = %name, listen = %local_addr, target = %target, "Stream proxy started");

        let task_name = name.clone();
        let task = tokio::spawn(async move {
            loop {
                let (client, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(proxy = %task_name, "Accept error: {}", e);
                        continue;
                    }
                };
                debug!(proxy = %task_name, peer = %peer, "Client connected");

                let target = target.clone();
                let conn_name = task_name.clone();
                tokio::spawn(async move {
                    relay(conn_name, client, peer, target).await;
                });
            }
        });

        Ok(StreamProxy { name, task, local_addr })
    }

    pub fn stop(self) {
        self.task.abort();
        debug!(proxy = %self.name, "Stream proxy stopped");
    }
}

/// Open the upstream leg and pipe bytes both ways until either side closes.
/// An unreachable recorder closes the client side cleanly instead of
/// leaving it hanging.
async fn relay(name: String, mut client: TcpStream, peer: SocketAddr, target: String) {
    let mut upstream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(proxy = %name, peer = %peer, target = %target, "Upstream connect failed: {}", e);
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((to_upstream, to_client)) => {
            debug!(
                proxy = %name,
                peer = %peer,
                "Connection closed ({} bytes up, {} bytes down)",
                to_upstream, to_client
            );
        }
        Err(e) => {
            debug!(proxy = %name, peer = %peer, "Relay ended: {}", e);
        }
    }
}
