//! Per-connection protocol state machine.

use super::ServerConfig;
use super::data::{DataOutcome, DotDecoder};
use crate::backend::{Backend, ConnectionInfo, Session};
use crate::command::{Command, MailParams};
use crate::error::{Error, Result};
use crate::parser::parse_command;
use crate::types::{AuthMechanism, Extension, Reply, ReplyCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Longest accepted command line, including CRLF.
const MAX_LINE_LEN: usize = 2000;

/// Read granularity while receiving message data.
const DATA_CHUNK_LEN: usize = 64 * 1024;

#[derive(Debug, Default)]
struct Transaction {
    from: Option<String>,
    recipients: Vec<String>,
}

pub(super) struct Connection<B: Backend, S> {
    pub(super) stream: BufReader<S>,
    pub(super) backend: Arc<B>,
    pub(super) config: Arc<ServerConfig>,
    pub(super) info: ConnectionInfo,
    pub(super) session: Option<B::Session>,
    transaction: Transaction,
}

impl<B, S> Connection<B, S>
where
    B: Backend,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(super) fn new(
        stream: S,
        peer_addr: SocketAddr,
        backend: Arc<B>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            stream: BufReader::new(stream),
            backend,
            config,
            info: ConnectionInfo {
                peer_addr,
                hostname: String::new(),
            },
            session: None,
            transaction: Transaction::default(),
        }
    }

    /// Runs the connection to completion and logs the session out.
    pub(super) async fn run(mut self) -> Result<()> {
        let greeting = Reply::line(
            ReplyCode::SERVICE_READY,
            format!("{} ESMTP Service Ready", self.config.domain),
        );
        self.write_reply(&greeting).await?;

        let result = self.command_loop().await;

        if let Some(session) = self.session.as_mut() {
            session.logout().await;
        }

        if let Err(Error::Timeout(_)) = &result {
            let reply = Reply::line(
                ReplyCode::SERVICE_UNAVAILABLE,
                "Idle timeout, closing connection",
            );
            // Best effort: the client may already be gone.
            let _ = self.write_reply(&reply).await;
        }

        result
    }

    async fn command_loop(&mut self) -> Result<()> {
        loop {
            let Some(line) = self.read_line(MAX_LINE_LEN, "command").await? else {
                return Ok(());
            };
            if !line.ends_with(b"\n") && line.len() >= MAX_LINE_LEN {
                self.discard_line().await?;
                self.write_reply(&Reply::line(ReplyCode::SYNTAX_ERROR, "Line too long"))
                    .await?;
                continue;
            }

            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if line.get(..4).is_some_and(|verb| verb.eq_ignore_ascii_case("AUTH")) {
                debug!(peer = %self.info.peer_addr, "SMTP <= AUTH ...");
            } else {
                debug!(peer = %self.info.peer_addr, line, "SMTP <=");
            }

            match parse_command(line) {
                Err(e) => self.write_reply(&e.reply()).await?,
                Ok(Command::Quit) => {
                    self.write_reply(&Reply::line(ReplyCode::CLOSING, "Bye"))
                        .await?;
                    return Ok(());
                }
                Ok(command) => self.handle(command).await?,
            }
        }
    }

    async fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Helo { hostname } => {
                self.reset_transaction();
                let reply = Reply::line(ReplyCode::OK, format!("Hello {hostname}"));
                self.info.hostname = hostname;
                self.write_reply(&reply).await
            }
            Command::Ehlo { hostname } => {
                self.reset_transaction();
                let reply = self.ehlo_reply(&hostname);
                self.info.hostname = hostname;
                self.write_reply(&reply).await
            }
            Command::StartTls => {
                self.write_reply(&Reply::line(ReplyCode::NOT_IMPLEMENTED, "TLS not supported"))
                    .await
            }
            Command::Auth {
                mechanism,
                initial_response,
            } => self.handle_auth(&mechanism, initial_response).await,
            Command::MailFrom { from, params } => self.handle_mail(from, &params).await,
            Command::RcptTo { to } => self.handle_rcpt(to).await,
            Command::Data => self.handle_data().await,
            Command::Rset => {
                self.reset_transaction();
                self.write_reply(&Reply::line(ReplyCode::OK, "Session reset"))
                    .await
            }
            Command::Vrfy { .. } => {
                self.write_reply(&Reply::line(
                    ReplyCode::CANNOT_VERIFY,
                    "Cannot VRFY user, but will accept message",
                ))
                .await
            }
            Command::Noop => self.write_reply(&Reply::line(ReplyCode::OK, "OK")).await,
            // Answered by the command loop.
            Command::Quit => Ok(()),
        }
    }

    fn ehlo_reply(&self, hostname: &str) -> Reply {
        let extensions = [
            Extension::Pipelining,
            Extension::EightBitMime,
            Extension::Size(self.config.max_message_bytes),
            Extension::Auth(vec![AuthMechanism::Plain, AuthMechanism::Login]),
        ];

        let mut lines = vec![format!("Hello {hostname}")];
        lines.extend(extensions.iter().map(ToString::to_string));
        Reply::new(ReplyCode::OK, lines)
    }

    async fn handle_mail(&mut self, from: String, params: &MailParams) -> Result<()> {
        if self.info.hostname.is_empty() {
            return self.bad_sequence("Please introduce yourself first").await;
        }
        if self.transaction.from.is_some() {
            return self.bad_sequence("Nested MAIL command").await;
        }
        if params
            .size
            .is_some_and(|size| size > self.config.max_message_bytes)
        {
            return self
                .write_reply(&Reply::line(
                    ReplyCode::EXCEEDED_STORAGE,
                    "Maximum message size exceeded",
                ))
                .await;
        }

        if self.session.is_none() {
            match self.backend.anonymous_login(&self.info).await {
                Ok(session) => self.session = Some(session),
                Err(e) => return self.write_reply(&e.reply()).await,
            }
        }
        let Some(session) = self.session.as_mut() else {
            return self.bad_sequence("No session").await;
        };

        if let Err(e) = session.mail(&from, params).await {
            return self.write_reply(&e.reply()).await;
        }

        let reply = Reply::line(ReplyCode::OK, format!("Roger, accepting mail from <{from}>"));
        self.transaction.from = Some(from);
        self.write_reply(&reply).await
    }

    async fn handle_rcpt(&mut self, to: String) -> Result<()> {
        if self.transaction.from.is_none() {
            return self.bad_sequence("Missing MAIL FROM command").await;
        }
        if self.transaction.recipients.len() >= self.config.max_recipients {
            let reply = Reply::line(
                ReplyCode::INSUFFICIENT_STORAGE,
                format!(
                    "Maximum limit of {} recipients reached",
                    self.config.max_recipients
                ),
            );
            return self.write_reply(&reply).await;
        }
        let Some(session) = self.session.as_mut() else {
            return self.bad_sequence("No session").await;
        };

        if let Err(e) = session.rcpt(&to).await {
            return self.write_reply(&e.reply()).await;
        }

        let reply = Reply::line(ReplyCode::OK, format!("I'll make sure <{to}> gets this"));
        self.transaction.recipients.push(to);
        self.write_reply(&reply).await
    }

    async fn handle_data(&mut self) -> Result<()> {
        if self.transaction.recipients.is_empty() {
            return self.bad_sequence("Missing RCPT TO command").await;
        }

        self.write_reply(&Reply::line(
            ReplyCode::START_DATA,
            "Go ahead. End your data with <CR><LF>.<CR><LF>",
        ))
        .await?;

        let mut decoder = DotDecoder::new(self.config.max_message_bytes);
        loop {
            let Some(chunk) = self.read_line(DATA_CHUNK_LEN, "message data").await? else {
                return Err(Error::ConnectionClosed);
            };
            if decoder.feed(&chunk) {
                break;
            }
        }

        let reply = match decoder.finish() {
            DataOutcome::TooLarge => {
                warn!(peer = %self.info.peer_addr, "Rejected message over size limit");
                Reply::line(ReplyCode::EXCEEDED_STORAGE, "Maximum message size exceeded")
            }
            DataOutcome::Complete(body) => {
                let size = body.len();
                match self.session.as_mut() {
                    Some(session) => match session.data(body).await {
                        Ok(()) => {
                            info!(peer = %self.info.peer_addr, size, "Message accepted");
                            Reply::line(ReplyCode::OK, "OK: queued")
                        }
                        Err(e) => e.reply(),
                    },
                    None => Reply::line(ReplyCode::BAD_SEQUENCE, "No session"),
                }
            }
        };

        self.reset_transaction();
        self.write_reply(&reply).await
    }

    fn reset_transaction(&mut self) {
        self.transaction = Transaction::default();
        if let Some(session) = self.session.as_mut() {
            session.reset();
        }
    }

    pub(super) async fn bad_sequence(&mut self, message: &str) -> Result<()> {
        self.write_reply(&Reply::line(ReplyCode::BAD_SEQUENCE, message))
            .await
    }

    /// Skips the remainder of an overlong line.
    async fn discard_line(&mut self) -> Result<()> {
        loop {
            match self.read_line(MAX_LINE_LEN, "command").await? {
                None => return Err(Error::ConnectionClosed),
                Some(rest) if rest.ends_with(b"\n") => return Ok(()),
                Some(_) => {}
            }
        }
    }

    /// Reads up to `limit` bytes through the next LF; `None` on EOF.
    pub(super) async fn read_line(
        &mut self,
        limit: usize,
        waiting_for: &'static str,
    ) -> Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let mut reader = (&mut self.stream).take(limit as u64);
        let n = timeout(self.config.read_timeout, reader.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| Error::Timeout(waiting_for))??;

        Ok((n > 0).then_some(buf))
    }

    pub(super) async fn write_reply(&mut self, reply: &Reply) -> Result<()> {
        debug!(peer = %self.info.peer_addr, code = %reply.code, "SMTP =>");
        let bytes = reply.serialize();
        let stream = self.stream.get_mut();
        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        timeout(self.config.write_timeout, write)
            .await
            .map_err(|_| Error::Timeout("reply write"))??;
        Ok(())
    }
}
