//! Intercom TCP listener.
//!
//! Accepts connections until the shutdown flag is raised and spawns one
//! handler task per connection. The accept wait is bounded so a raised
//! flag is noticed within three seconds even when nobody connects.

use crate::net::handler::{self, HandlerContext};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const ACCEPT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct IntercomListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

enum Step {
    Accepted(tokio::net::TcpStream, SocketAddr),
    Idle,
    Check,
    Stop,
}

impl IntercomListener {
    /// Bind the listening socket. `host = None` picks the host's
    /// outbound interface address; port 0 asks the OS for a free port.
    pub async fn bind(host: Option<IpAddr>, port: u16) -> anyhow::Result<Self> {
        let ip = match host {
            Some(ip) => ip,
            None => outbound_ip().await,
        };
        let addr = SocketAddr::new(ip, port);
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(128)?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "intercom listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until shutdown. Every accepted connection is served by
    /// its own task; a handler panic never takes the listener down.
    pub async fn run(self, ctx: Arc<HandlerContext>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let step = tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender means the runtime is gone.
                    if changed.is_err() { Step::Stop } else { Step::Check }
                }
                accepted = tokio::time::timeout(ACCEPT_TIMEOUT, self.listener.accept()) => {
                    match accepted {
                        Ok(Ok((stream, peer))) => Step::Accepted(stream, peer),
                        Ok(Err(err)) => {
                            warn!(error = %err, "accept failed");
                            Step::Idle
                        }
                        Err(_) => Step::Idle,
                    }
                }
            };
            match step {
                Step::Accepted(stream, peer) => {
                    debug!(%peer, "connection accepted");
                    tokio::spawn(handler::handle_connection(stream, ctx.clone()));
                }
                Step::Idle => {}
                Step::Check => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                Step::Stop => break,
            }
        }
        info!("intercom listener stopped");
    }
}

/// Best-effort guess of the host's outbound IP: a connected UDP socket
/// to a public address reveals the local interface without sending any
/// packet. Falls back to loopback.
async fn outbound_ip() -> IpAddr {
    let probe = async {
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect("8.8.8.8:80").await?;
        socket.local_addr().map(|addr| addr.ip())
    };
    match probe.await {
        Ok(ip) => ip,
        Err(err) => {
            warn!(error = %err, "could not determine outbound address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
