//! TCP front end for the simulated host.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::host::SimHost;

/// Serves a [`SimHost`] to proxy clients over TCP.
pub struct TcpHostServer {
    listener: TcpListener,
    host: SimHost,
}

impl TcpHostServer {
    /// Bind the listener; port 0 picks a free port.
    pub async fn bind(addr: impl ToSocketAddrs, host: SimHost) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(TcpHostServer { listener, host })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn host(&self) -> &SimHost {
        &self.host
    }

    /// Accept clients until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.listener.local_addr()?, "simulated radio host listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "failed to set TCP_NODELAY");
            }
            info!(%peer, "proxy client connected");
            let host = self.host.clone();
            tokio::spawn(async move {
                match host.serve(stream).await {
                    Ok(()) => info!(%peer, "proxy client disconnected"),
                    Err(e) => warn!(%peer, error = %e, "proxy connection error"),
                }
            });
        }
    }
}
