//! # mailhook-mime
//!
//! Decoding of inbound RFC 5322 messages for the mailhook ingest pipeline.
//!
//! ## Features
//!
//! - **Header parsing**: unfolding, case-insensitive lookup
//! - **Encoded-words**: RFC 2047 `B` and `Q` words in any WHATWG charset
//! - **Bodies**: Base64, Quoted-Printable and charset conversion
//! - **Field extraction**: [`DecodedMail`] with the recipient address
//!
//! ## Quick Start
//!
//! ```
//! use mailhook_mime::DecodedMail;
//!
//! let raw = b"To: Inbox <inbox@example.com>\r\n\
//!             Subject: =?UTF-8?B?TWVyaGFiYQ==?=\r\n\
//!             \r\n\
//!             Hello!";
//!
//! let mail = DecodedMail::decode(raw)?;
//! assert_eq!(mail.subject, "Merhaba");
//! assert_eq!(mail.rcpt, "inbox@example.com");
//! assert_eq!(mail.body, "Hello!");
//! # Ok::<(), mailhook_mime::Error>(())
//! ```

#![forbid(unsafe_code)]

mod content_type;
mod decoder;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content_type::ContentType;
pub use decoder::{DecodedMail, extract_rcpt};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, TransferEncoding};
