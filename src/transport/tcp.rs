use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ClientConfig, ServerConfig};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::status::StatusCode;
use crate::transport::connection::UacpConnection;

/// Default port for `opc.tcp` endpoints
pub const DEFAULT_PORT: u16 = 4840;

const URL_SCHEME: &str = "opc.tcp://";

/// Extract `host:port` from an `opc.tcp://host[:port][/path]` endpoint URL.
pub fn endpoint_address(endpoint_url: &str) -> Result<String> {
    let rest = endpoint_url
        .strip_prefix(URL_SCHEME)
        .ok_or_else(|| invalid_url(endpoint_url))?;
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid_url(endpoint_url));
    }

    // bracketed IPv6 literals carry colons of their own
    let has_port = match authority.rfind(']') {
        Some(end) => authority[end..].contains(':'),
        None => authority.contains(':'),
    };
    if has_port {
        Ok(authority.to_string())
    } else {
        Ok(format!("{authority}:{DEFAULT_PORT}"))
    }
}

fn invalid_url(endpoint_url: &str) -> ProtocolError {
    ProtocolError::violation(
        StatusCode::BAD_TCP_ENDPOINT_URL_INVALID,
        &format!("Invalid endpoint URL: {endpoint_url}"),
    )
}

/// Open a TCP connection to `config.endpoint_url` and complete the handshake.
#[instrument(skip(config), fields(endpoint_url = %config.endpoint_url))]
pub async fn connect_tcp(config: &ClientConfig) -> Result<UacpConnection<TcpStream>> {
    let address = endpoint_address(&config.endpoint_url)?;
    let stream = TcpStream::connect(&address).await?;
    disable_nagle(&stream);
    debug!(%address, "TCP connected");
    UacpConnection::connect(stream, config).await
}

/// Builds the dispatcher for each accepted connection.
pub type DispatcherFactory = Arc<dyn Fn() -> Dispatcher + Send + Sync>;

/// Accepts `opc.tcp` connections and serves each with a dispatcher.
pub struct UacpListener {
    listener: TcpListener,
    config: ServerConfig,
}

impl UacpListener {
    #[instrument(skip(config))]
    pub async fn bind(addr: &str, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "Listening for UACP connections");
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and run the server handshake on it.
    pub async fn accept(&self) -> Result<(UacpConnection<TcpStream>, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        disable_nagle(&stream);
        let connection = UacpConnection::accept(stream, &self.config).await?;
        Ok((connection, peer))
    }

    /// Serve connections until `shutdown_rx` fires, then wait up to ten
    /// seconds for open connections to finish.
    #[instrument(skip(self, dispatchers, shutdown_rx))]
    pub async fn serve_with_shutdown(
        self,
        dispatchers: DispatcherFactory,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let active_connections = Arc::new(AtomicU32::new(0));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down listener. Waiting for connections to close...");
                    wait_for_drain(&active_connections, Duration::from_secs(10)).await;
                    return Ok(());
                }

                accept_result = self.listener.accept() => {
                    let (stream, peer) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                            continue;
                        }
                    };

                    let config = self.config.clone();
                    let dispatcher = dispatchers();
                    let active = Arc::clone(&active_connections);
                    active.fetch_add(1, Ordering::Relaxed);

                    tokio::spawn(async move {
                        handle_connection(stream, peer, config, dispatcher).await;
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: ServerConfig,
    dispatcher: Dispatcher,
) {
    disable_nagle(&stream);
    let mut connection = match UacpConnection::accept(stream, &config).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!(%peer, error = %e, "Handshake failed");
            return;
        }
    };
    debug!(%peer, limits = ?connection.limits(), "Connection open");

    match connection.serve(&dispatcher).await {
        Ok(()) => debug!(%peer, "Connection finished"),
        Err(ProtocolError::RemoteError { code, reason }) => {
            debug!(%peer, %code, %reason, "Peer closed connection");
        }
        Err(e) => warn!(%peer, error = %e, "Connection failed"),
    }
}

/// Chunks go out as soon as they are written.
fn disable_nagle(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "Could not set TCP_NODELAY");
    }
}

async fn wait_for_drain(active: &AtomicU32, timeout: Duration) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!("Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                let connections = active.load(Ordering::Relaxed);
                if connections == 0 {
                    info!("All connections closed, shutting down");
                    return;
                }
                debug!(connections, "Waiting for connections to close");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_address() {
        assert_eq!(
            endpoint_address("opc.tcp://wow.its.easy:11111/UA/Server").unwrap(),
            "wow.its.easy:11111"
        );
        assert_eq!(endpoint_address("opc.tcp://localhost").unwrap(), "localhost:4840");
        assert_eq!(endpoint_address("opc.tcp://[::1]/UA").unwrap(), "[::1]:4840");
        assert_eq!(endpoint_address("opc.tcp://[::1]:48010").unwrap(), "[::1]:48010");
        assert!(endpoint_address("http://localhost:4840").is_err());
        assert!(endpoint_address("opc.tcp:///UA").is_err());
    }
}
