//! RFC 5322 message structure and body decoding.

use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

/// A parsed message: header section plus the undecoded body bytes.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message headers.
    pub headers: Headers,
    /// Body exactly as transmitted.
    pub body: Vec<u8>,
}

impl Message {
    /// Parses a raw message.
    ///
    /// The header section ends at the first empty line; everything after
    /// it is the body. A message without an empty line is all headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is empty or the header section is
    /// malformed.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let (head, body) = split_header_body(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(head))?;

        Ok(Self {
            headers,
            body: body.to_vec(),
        })
    }

    /// Gets the content type, falling back to `text/plain` when the header
    /// is absent or unparsable.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|value| ContentType::parse(value).ok())
            .unwrap_or_else(ContentType::default_text)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Removes the transfer encoding from the body.
    ///
    /// Base64 bodies are base64-decoded and binary bodies are returned
    /// as-is. Every other body goes through the quoted-printable filter.
    /// When decoding fails the raw body is returned unchanged.
    #[must_use]
    pub fn decode_body(&self) -> Vec<u8> {
        let decoded = match self.transfer_encoding() {
            TransferEncoding::Binary => return self.body.clone(),
            TransferEncoding::Base64 => decode_base64(&String::from_utf8_lossy(&self.body)),
            TransferEncoding::QuotedPrintable
            | TransferEncoding::SevenBit
            | TransferEncoding::EightBit => decode_quoted_printable(&self.body),
        };
        decoded.unwrap_or_else(|_| self.body.clone())
    }

    /// Gets the decoded body as text.
    ///
    /// A `charset` parameter naming a known encoding other than US-ASCII
    /// is honoured; otherwise the bytes are read as UTF-8, with invalid
    /// sequences replaced.
    #[must_use]
    pub fn body_text(&self) -> String {
        let bytes = self.decode_body();
        let content_type = self.content_type();

        content_type
            .charset()
            .filter(|charset| !is_ascii_label(charset))
            .and_then(|charset| decode_charset(charset, &bytes).ok())
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn is_ascii_label(charset: &str) -> bool {
    matches!(
        charset.trim().to_ascii_lowercase().as_str(),
        "us-ascii" | "ascii" | "utf-8" | "utf8"
    )
}

/// Splits at the first empty line (`\r\n` or `\n` terminated).
fn split_header_body(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut pos = 0;
    while pos < raw.len() {
        let line_end = raw[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(raw.len(), |i| pos + i + 1);
        let line = &raw[pos..line_end];
        if line == b"\r\n" || line == b"\n" {
            return (&raw[..pos], &raw[line_end..]);
        }
        pos = line_end;
    }
    (raw, &[])
}
