//! AUTH PLAIN (RFC 4616) and AUTH LOGIN exchanges.

use super::conn::Connection;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{AuthMechanism, Reply, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Longest accepted SASL response line.
const MAX_AUTH_LINE_LEN: usize = 4096;

/// Base64 of "Username:".
const USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
/// Base64 of "Password:".
const PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

/// Credentials, or the reply that ends the exchange without them.
type Exchange = std::result::Result<(String, String), Reply>;

impl<B, S> Connection<B, S>
where
    B: Backend,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(super) async fn handle_auth(
        &mut self,
        mechanism: &str,
        initial_response: Option<String>,
    ) -> Result<()> {
        if self.info.hostname.is_empty() {
            return self.bad_sequence("Please introduce yourself first").await;
        }
        if self.session.is_some() {
            return self.bad_sequence("Already authenticated").await;
        }
        let Some(mechanism) = AuthMechanism::parse(mechanism) else {
            return self
                .write_reply(&Reply::line(
                    ReplyCode::PARAMETER_NOT_IMPLEMENTED,
                    "Unsupported authentication mechanism",
                ))
                .await;
        };

        let exchange = match mechanism {
            AuthMechanism::Plain => self.plain_exchange(initial_response).await?,
            AuthMechanism::Login => self.login_exchange(initial_response).await?,
        };
        let (username, password) = match exchange {
            Ok(credentials) => credentials,
            Err(reply) => return self.write_reply(&reply).await,
        };

        match self.backend.login(&self.info, &username, &password).await {
            Ok(session) => {
                debug!(peer = %self.info.peer_addr, %username, "SMTP client authenticated");
                self.session = Some(session);
                self.write_reply(&Reply::line(
                    ReplyCode::AUTH_SUCCESS,
                    "Authentication succeeded",
                ))
                .await
            }
            Err(e) => {
                warn!(peer = %self.info.peer_addr, %username, "SMTP authentication rejected");
                self.write_reply(&e.reply()).await
            }
        }
    }

    async fn plain_exchange(&mut self, initial_response: Option<String>) -> Result<Exchange> {
        let response = match initial_response {
            Some(response) if response == "=" => String::new(),
            Some(response) => response,
            None => match self.challenge("").await? {
                Ok(response) => response,
                Err(reply) => return Ok(Err(reply)),
            },
        };

        let Some(decoded) = decode_response(&response) else {
            return Ok(Err(invalid_base64()));
        };

        // authzid NUL authcid NUL passwd
        let mut parts = decoded.split('\0');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(username), Some(password), None) => {
                Ok(Ok((username.to_string(), password.to_string())))
            }
            _ => Ok(Err(Reply::line(
                ReplyCode::PARAMETER_ERROR,
                "Invalid PLAIN response",
            ))),
        }
    }

    async fn login_exchange(&mut self, initial_response: Option<String>) -> Result<Exchange> {
        let username = match initial_response {
            Some(response) => response,
            None => match self.challenge(USERNAME_CHALLENGE).await? {
                Ok(response) => response,
                Err(reply) => return Ok(Err(reply)),
            },
        };
        let Some(username) = decode_response(&username) else {
            return Ok(Err(invalid_base64()));
        };

        let password = match self.challenge(PASSWORD_CHALLENGE).await? {
            Ok(response) => response,
            Err(reply) => return Ok(Err(reply)),
        };
        let Some(password) = decode_response(&password) else {
            return Ok(Err(invalid_base64()));
        };

        Ok(Ok((username, password)))
    }

    /// Sends a `334` challenge and reads the client's response line.
    ///
    /// A `*` response cancels the exchange.
    async fn challenge(&mut self, text: &str) -> Result<std::result::Result<String, Reply>> {
        self.write_reply(&Reply::line(ReplyCode::AUTH_CONTINUE, text))
            .await?;

        let Some(line) = self
            .read_line(MAX_AUTH_LINE_LEN, "authentication response")
            .await?
        else {
            return Err(Error::ConnectionClosed);
        };
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches(['\r', '\n']).trim();

        if line == "*" {
            return Ok(Err(Reply::line(
                ReplyCode::PARAMETER_ERROR,
                "Authentication cancelled",
            )));
        }
        Ok(Ok(line.to_string()))
    }
}

fn decode_response(response: &str) -> Option<String> {
    let bytes = B64.decode(response.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

fn invalid_base64() -> Reply {
    Reply::line(ReplyCode::PARAMETER_ERROR, "Invalid base64 data")
}
