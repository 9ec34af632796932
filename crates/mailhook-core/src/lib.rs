//! # mailhook-core
//!
//! The mail ingestion pipeline behind the `mailhook` SMTP server.
//!
//! This crate provides:
//! - **Ingest** - the SMTP [`Backend`](mailhook_smtp::Backend) that turns
//!   each accepted message into a stored record and a webhook call
//! - **Store** - append-only `SQLite` persistence of mail records
//! - **Notify** - JSON webhook notification
//! - **Routing** - recipient-to-webhook resolution
//! - **Config** - start-up configuration from the environment

#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod ingest;
pub mod notify;
pub mod record;
pub mod routing;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{IngestBackend, IngestError, IngestSession};
pub use notify::{DEFAULT_WEBHOOK_TIMEOUT, Notifier, NotifyError, WebhookNotifier};
pub use record::{MailId, MailRecord, StoredMail};
pub use routing::{RecipientAddress, RouteError, RoutedWebhook, StaticWebhook, WebhookResolver};
pub use store::{MailStore, SqliteMailStore};
