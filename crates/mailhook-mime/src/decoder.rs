//! Field extraction for inbound mail payloads.

use crate::error::Result;
use crate::message::Message;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)] // literal pattern
static ANGLE_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>]*)>").expect("angle-address pattern is valid"));

/// The decoded fields of one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMail {
    /// `Subject` header.
    pub subject: String,
    /// `To` header.
    pub to: String,
    /// `From` header.
    pub from: String,
    /// `Cc` header.
    pub cc: String,
    /// `Bcc` header.
    pub bcc: String,
    /// `Content-Type` header, as sent.
    pub content_type: String,
    /// `Mime-Version` header.
    pub mime_version: String,
    /// Body with its transfer encoding removed.
    pub body: String,
    /// Address pulled out of the `To` header (see [`extract_rcpt`]).
    pub rcpt: String,
}

impl DecodedMail {
    /// Decodes a raw message payload.
    ///
    /// Header fields have their encoded-words decoded; absent headers are
    /// empty strings. The body is decoded per [`Message::body_text`].
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is empty, the header section is
    /// malformed, or a header holds an encoded-word that cannot be decoded.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let message = Message::parse(raw)?;
        let headers = &message.headers;

        let to = headers.decoded("To")?;
        let rcpt = extract_rcpt(&to);

        Ok(Self {
            subject: headers.decoded("Subject")?,
            from: headers.decoded("From")?,
            cc: headers.decoded("Cc")?,
            bcc: headers.decoded("Bcc")?,
            content_type: headers.decoded("Content-Type")?,
            mime_version: headers.decoded("Mime-Version")?,
            body: message.body_text(),
            rcpt,
            to,
        })
    }
}

/// Returns the address inside the first `<...>` of a `To` value.
///
/// Without angle brackets the whole value is returned unchanged.
#[must_use]
pub fn extract_rcpt(to: &str) -> String {
    ANGLE_ADDR
        .captures(to)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| to.to_string(), |m| m.as_str().to_string())
}
