//! SMTP server engine.
//!
//! The server accepts TCP connections and runs one task per client. Each
//! task speaks the protocol, enforces the configured limits, and drives a
//! [`Session`](crate::backend::Session) obtained from the [`Backend`].

mod auth;
mod conn;
mod data;

use crate::backend::Backend;
use crate::error::Result;
use conn::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Engine settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Domain announced in the greeting.
    pub domain: String,
    /// Address passed to [`TcpListener::bind`] by [`Server::listen_and_serve`].
    pub addr: String,
    /// Maximum wait for a line from the client.
    pub read_timeout: Duration,
    /// Maximum wait for a reply to be written.
    pub write_timeout: Duration,
    /// Largest accepted message, in bytes after dot-unstuffing.
    pub max_message_bytes: usize,
    /// Most recipients accepted per transaction.
    pub max_recipients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            addr: "0.0.0.0:1025".to_string(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_message_bytes: 1024 * 1024,
            max_recipients: 50,
        }
    }
}

/// SMTP server.
pub struct Server<B: Backend> {
    backend: Arc<B>,
    config: Arc<ServerConfig>,
}

impl<B: Backend> Clone for Server<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Server<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Server<B> {
    /// Creates a server for the given backend.
    #[must_use]
    pub fn new(backend: B, config: ServerConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config: Arc::new(config),
        }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Binds the configured address and serves forever.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn listen_and_serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        info!(addr = %self.config.addr, domain = %self.config.domain, "SMTP server listening");
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    ///
    /// Accept failures are logged and retried; this only returns if the
    /// listener itself cannot report its address.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address is unavailable.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "Accepting SMTP connections");

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept SMTP connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            debug!(%peer_addr, "SMTP connection accepted");
            let conn = Connection::new(
                stream,
                peer_addr,
                Arc::clone(&self.backend),
                Arc::clone(&self.config),
            );

            tokio::spawn(async move {
                match conn.run().await {
                    Ok(()) => debug!(%peer_addr, "SMTP connection closed"),
                    Err(e) if e.is_disconnect() => {
                        debug!(%peer_addr, "SMTP client disconnected");
                    }
                    Err(e) => warn!(%peer_addr, error = %e, "SMTP connection ended with error"),
                }
            });
        }
    }
}
