//! Persisted mail record model.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use mailhook_mime::DecodedMail;
use serde::{Deserialize, Serialize};

/// Display format of [`MailRecord::date`] (`month/day/year hour:min:sec`).
pub const DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Store-assigned identity of a mail record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MailId(pub i64);

impl MailId {
    /// Create a new mail ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One received message, as persisted.
///
/// Decoded fields are a projection of `data`, which holds the raw
/// message and is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailRecord {
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// `received_at` in the configured timezone, formatted with [`DATE_FORMAT`].
    pub date: String,
    /// Decoded `Subject` header.
    pub subject: String,
    /// Decoded `To` header.
    pub to: String,
    /// Decoded `From` header.
    pub from: String,
    /// Body text with its transfer encoding removed.
    pub body: String,
    /// Decoded `Cc` header.
    pub cc: String,
    /// Decoded `Bcc` header.
    pub bcc: String,
    /// Recipient address taken from the `To` header.
    pub rcpt: String,
    /// `Mime-Version` header.
    pub mime_version: String,
    /// `Content-Type` header.
    pub content_type: String,
    /// Whether the message is still unread.
    pub unread: bool,
    /// The raw RFC 5322 message.
    pub data: String,
}

impl MailRecord {
    /// Builds an unread record from a decoded message and its raw bytes.
    #[must_use]
    pub fn new(decoded: DecodedMail, raw: &[u8], received_at: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            received_at,
            date: format_date(received_at, timezone),
            subject: decoded.subject,
            to: decoded.to,
            from: decoded.from,
            body: decoded.body,
            cc: decoded.cc,
            bcc: decoded.bcc,
            rcpt: decoded.rcpt,
            mime_version: decoded.mime_version,
            content_type: decoded.content_type,
            unread: true,
            data: String::from_utf8_lossy(raw).into_owned(),
        }
    }
}

/// Renders a timestamp in `timezone` using [`DATE_FORMAT`].
#[must_use]
pub fn format_date(at: DateTime<Utc>, timezone: Tz) -> String {
    at.with_timezone(&timezone).format(DATE_FORMAT).to_string()
}

/// A record together with its identity, as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMail {
    /// Store-assigned identity.
    pub id: MailId,
    /// The record.
    #[serde(flatten)]
    pub record: MailRecord,
}
