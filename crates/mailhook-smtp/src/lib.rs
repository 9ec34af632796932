//! # mailhook-smtp
//!
//! An embeddable SMTP server engine implementing the receiving side of
//! RFC 5321.
//!
//! ## Features
//!
//! - **Pluggable backend**: authentication and delivery live behind the
//!   [`Backend`] and [`Session`] traits
//! - **Authentication**: AUTH PLAIN and AUTH LOGIN over plaintext
//! - **Extensions**: PIPELINING, 8BITMIME, SIZE
//! - **Limits**: read/write timeouts, message size and recipient count
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailhook_smtp::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> mailhook_smtp::Result<()> {
//!     let config = ServerConfig {
//!         domain: "mail.example.com".to_string(),
//!         addr: "0.0.0.0:1025".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     Server::new(MyBackend::default(), config)
//!         .listen_and_serve()
//!         .await
//! }
//! ```
//!
//! ## Session Flow
//!
//! ```text
//! greeting ─ EHLO ─ AUTH ──→ Backend::login ──→ Session
//!                 └ MAIL ──→ Backend::anonymous_login
//!
//! Session: mail() ─→ rcpt()* ─→ data() ─→ reset() ─→ ... ─→ logout()
//! ```
//!
//! ## Modules
//!
//! - [`backend`]: Backend and session traits
//! - [`command`]: SMTP commands
//! - [`parser`]: Command line parser
//! - [`server`]: Listener and per-connection state machine
//! - [`types`]: Replies and extensions

#![forbid(unsafe_code)]

pub mod backend;
pub mod command;
mod error;
pub mod parser;
pub mod server;
pub mod types;

pub use backend::{Backend, ConnectionInfo, Session, SessionError};
pub use command::{Command, MailParams};
pub use error::{Error, Result};
pub use server::{Server, ServerConfig};
pub use types::{AuthMechanism, Extension, Reply, ReplyCode};
