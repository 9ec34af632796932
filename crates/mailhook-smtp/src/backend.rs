//! Pluggable backend driven by the server engine.
//!
//! A [`Backend`] authenticates connections and hands out one [`Session`]
//! per authenticated client. The engine calls the session for every
//! transaction step and writes any [`SessionError`] back to the client.

use crate::command::MailParams;
use crate::types::{Reply, ReplyCode};
use async_trait::async_trait;
use std::net::SocketAddr;

/// What the engine knows about a connection when it asks for a session.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address of the client.
    pub peer_addr: SocketAddr,
    /// Hostname the client announced with HELO/EHLO.
    pub hostname: String,
}

/// An SMTP-level rejection, written verbatim to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code} {message}")]
pub struct SessionError {
    /// Reply code.
    pub code: ReplyCode,
    /// Reply text.
    pub message: String,
}

impl SessionError {
    /// Creates a session error.
    #[must_use]
    pub fn new(code: ReplyCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The reply to send for this error.
    #[must_use]
    pub fn reply(&self) -> Reply {
        Reply::line(self.code, self.message.clone())
    }
}

/// Creates sessions for connecting clients.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Session type produced on successful login.
    type Session: Session;

    /// Authenticates a client that issued AUTH.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the credentials are rejected.
    async fn login(
        &self,
        info: &ConnectionInfo,
        username: &str,
        password: &str,
    ) -> Result<Self::Session, SessionError>;

    /// Called when a client starts a transaction without authenticating.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when anonymous use is not allowed.
    async fn anonymous_login(&self, info: &ConnectionInfo) -> Result<Self::Session, SessionError>;
}

/// One client's mail transactions.
#[async_trait]
pub trait Session: Send + 'static {
    /// Sets the envelope sender.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the sender is refused.
    async fn mail(&mut self, from: &str, params: &MailParams) -> Result<(), SessionError>;

    /// Adds an envelope recipient.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the recipient is refused.
    async fn rcpt(&mut self, to: &str) -> Result<(), SessionError>;

    /// Handles the message content of a transaction.
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the message is not accepted.
    async fn data(&mut self, data: Vec<u8>) -> Result<(), SessionError>;

    /// Discards the current transaction.
    fn reset(&mut self);

    /// Releases the session; called once when the connection ends.
    async fn logout(&mut self);
}
