//! The ingestion pipeline behind the SMTP engine.
//!
//! [`IngestBackend`] authenticates clients against the configured
//! credentials. Each [`IngestSession`] turns a completed transaction into
//! a stored [`MailRecord`] and a webhook notification:
//!
//! ```text
//! DATA ─→ decode ─→ MailStore::insert ─→ Notifier::notify
//!          │ 554        │ 451                 │ 554 (record kept)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use mailhook_mime::DecodedMail;
use mailhook_smtp::{Backend, ConnectionInfo, MailParams, ReplyCode, Session, SessionError};
use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_TIMEZONE};
use crate::notify::{NotifyError, Notifier};
use crate::record::{MailId, MailRecord};
use crate::routing::{StaticWebhook, WebhookResolver};
use crate::store::MailStore;

/// Why a transaction was not fully processed.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The payload is not a readable message. Nothing was stored.
    #[error("Failed to decode message: {0}")]
    Decode(#[from] mailhook_mime::Error),

    /// The record could not be persisted.
    #[error("Failed to store message: {0}")]
    Store(#[source] crate::Error),

    /// The record was persisted but the webhook did not accept it.
    #[error("Message {id} stored but webhook notification failed: {source}")]
    Notify {
        /// Identity of the persisted record.
        id: MailId,
        /// Notification failure.
        source: NotifyError,
    },

    /// DATA arrived before any recipient resolved a webhook.
    #[error("No webhook resolved for this transaction")]
    NoWebhook,
}

impl IngestError {
    /// SMTP reply code reported to the client.
    #[must_use]
    pub const fn reply_code(&self) -> ReplyCode {
        match self {
            Self::Decode(_) | Self::Notify { .. } => ReplyCode::TRANSACTION_FAILED,
            Self::Store(_) => ReplyCode::LOCAL_ERROR,
            Self::NoWebhook => ReplyCode::BAD_SEQUENCE,
        }
    }

    /// The reply written to the client.
    #[must_use]
    pub fn to_session_error(&self) -> SessionError {
        let message = match self {
            Self::Decode(_) => "Transaction failed: message could not be decoded",
            Self::Store(_) => "Requested action aborted: local error in processing",
            Self::Notify { .. } => "Transaction failed: webhook notification failed",
            Self::NoWebhook => "Bad sequence of commands: no recipient",
        };
        SessionError::new(self.reply_code(), message)
    }
}

impl From<IngestError> for SessionError {
    fn from(err: IngestError) -> Self {
        err.to_session_error()
    }
}

#[derive(Clone)]
struct Shared {
    store: Arc<dyn MailStore>,
    notifier: Arc<dyn Notifier>,
    resolver: Arc<dyn WebhookResolver>,
    username: String,
    password: String,
    timezone: Tz,
}

/// SMTP backend that stores and announces every accepted message.
///
/// Cloning is cheap; all clones share the store, notifier and resolver.
#[derive(Clone)]
pub struct IngestBackend {
    shared: Arc<Shared>,
}

impl IngestBackend {
    /// Creates a backend accepting `username`/`password` and announcing
    /// every message to `webhook_url`.
    #[must_use]
    pub fn new(
        store: Arc<dyn MailStore>,
        notifier: Arc<dyn Notifier>,
        webhook_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                notifier,
                resolver: Arc::new(StaticWebhook::new(webhook_url)),
                username: username.into(),
                password: password.into(),
                timezone: DEFAULT_TIMEZONE,
            }),
        }
    }

    /// Creates a backend from start-up configuration.
    #[must_use]
    pub fn from_config(
        config: &Config,
        store: Arc<dyn MailStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(
            store,
            notifier,
            config.webhook_url.clone(),
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        )
        .with_timezone(config.timezone)
    }

    /// Replaces the webhook resolver.
    #[must_use]
    pub fn with_resolver(self, resolver: Arc<dyn WebhookResolver>) -> Self {
        self.map_shared(|shared| Shared { resolver, ..shared })
    }

    /// Sets the zone used to render record dates.
    #[must_use]
    pub fn with_timezone(self, timezone: Tz) -> Self {
        self.map_shared(|shared| Shared { timezone, ..shared })
    }

    fn map_shared(self, f: impl FnOnce(Shared) -> Shared) -> Self {
        Self {
            shared: Arc::new(f(Arc::unwrap_or_clone(self.shared))),
        }
    }

    /// Starts a session without going through SMTP authentication.
    #[must_use]
    pub fn session(&self) -> IngestSession {
        IngestSession {
            shared: Arc::clone(&self.shared),
            sender: None,
            webhook: None,
        }
    }
}

impl std::fmt::Debug for IngestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestBackend")
            .field("username", &self.shared.username)
            .field("timezone", &self.shared.timezone)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for IngestBackend {
    type Session = IngestSession;

    async fn login(
        &self,
        info: &ConnectionInfo,
        username: &str,
        password: &str,
    ) -> Result<IngestSession, SessionError> {
        if username != self.shared.username || password != self.shared.password {
            warn!(peer = %info.peer_addr, "Rejected login for '{username}'");
            return Err(SessionError::new(
                ReplyCode::AUTH_FAILED,
                "Invalid username or password",
            ));
        }

        debug!(peer = %info.peer_addr, "Authenticated '{username}'");
        Ok(self.session())
    }

    async fn anonymous_login(&self, info: &ConnectionInfo) -> Result<IngestSession, SessionError> {
        debug!(peer = %info.peer_addr, "Rejected anonymous transaction");
        Err(SessionError::new(
            ReplyCode::AUTH_REQUIRED,
            "Authentication required",
        ))
    }
}

/// One authenticated client's transactions.
pub struct IngestSession {
    shared: Arc<Shared>,
    sender: Option<String>,
    webhook: Option<String>,
}

impl IngestSession {
    /// Envelope sender of the current transaction.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Webhook resolved for the current transaction.
    #[must_use]
    pub fn webhook(&self) -> Option<&str> {
        self.webhook.as_deref()
    }

    /// Decodes, stores and announces one message.
    ///
    /// The record is written before the webhook is called, so a
    /// [`IngestError::Notify`] still leaves exactly one stored record.
    ///
    /// # Errors
    ///
    /// Returns an error naming the step that failed.
    pub async fn deliver(&mut self, raw: &[u8]) -> Result<MailId, IngestError> {
        let webhook = self.webhook.clone().ok_or(IngestError::NoWebhook)?;

        let decoded = DecodedMail::decode(raw)?;
        let record = MailRecord::new(decoded, raw, Utc::now(), self.shared.timezone);

        let id = self
            .shared
            .store
            .insert(&record)
            .await
            .map_err(IngestError::Store)?;

        self.shared
            .notifier
            .notify(&webhook, &record.data)
            .await
            .map_err(|source| IngestError::Notify { id, source })?;

        Ok(id)
    }
}

impl std::fmt::Debug for IngestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestSession")
            .field("sender", &self.sender)
            .field("webhook", &self.webhook)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Session for IngestSession {
    async fn mail(&mut self, from: &str, _params: &MailParams) -> Result<(), SessionError> {
        self.sender = Some(from.to_string());
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> Result<(), SessionError> {
        // The first recipient picks the webhook for the transaction.
        if self.webhook.is_some() {
            return Ok(());
        }

        match self.shared.resolver.resolve(to) {
            Ok(url) => {
                self.webhook = Some(url);
                Ok(())
            }
            Err(e) => {
                warn!("Rejected recipient: {e}");
                Err(SessionError::new(
                    ReplyCode::MAILBOX_UNAVAILABLE,
                    "Mailbox unavailable",
                ))
            }
        }
    }

    async fn data(&mut self, data: Vec<u8>) -> Result<(), SessionError> {
        let result = self.deliver(&data).await;
        let sender = self.sender.as_deref().unwrap_or_default();

        match result {
            Ok(id) => {
                info!(%id, from = %sender, bytes = data.len(), "Accepted message");
                Ok(())
            }
            Err(e) => {
                match &e {
                    IngestError::Store(_) => error!(from = %sender, "{e}"),
                    IngestError::Notify { id, .. } => {
                        warn!(%id, from = %sender, "{e}");
                    }
                    IngestError::Decode(_) | IngestError::NoWebhook => {
                        warn!(from = %sender, "Rejected message: {e}");
                    }
                }
                Err(e.into())
            }
        }
    }

    fn reset(&mut self) {
        self.sender = None;
        self.webhook = None;
    }

    async fn logout(&mut self) {
        self.reset();
    }
}
