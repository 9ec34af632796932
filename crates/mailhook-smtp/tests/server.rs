//! Integration tests for the SMTP server engine.
//!
//! Each test starts a server on a loopback port with a recording backend
//! and talks to it over real TCP.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use mailhook_smtp::{
    Backend, ConnectionInfo, MailParams, ReplyCode, Server, ServerConfig, Session,
    SessionError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Login(String),
    Mail(String),
    Rcpt(String),
    Data(Vec<u8>),
    Reset,
    Logout,
}

#[derive(Debug, Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    fn deliveries(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Data(data) => Some(data),
                _ => None,
            })
            .collect()
    }
}

struct RecordingBackend {
    events: Recorder,
}

struct RecordingSession {
    events: Recorder,
}

#[async_trait]
impl Backend for RecordingBackend {
    type Session = RecordingSession;

    async fn login(
        &self,
        _info: &ConnectionInfo,
        username: &str,
        password: &str,
    ) -> Result<RecordingSession, SessionError> {
        if username == "user" && password == "pass" {
            self.events.push(Event::Login(username.to_string()));
            Ok(RecordingSession {
                events: self.events.clone(),
            })
        } else {
            Err(SessionError::new(
                ReplyCode::AUTH_FAILED,
                "Invalid username or password",
            ))
        }
    }

    async fn anonymous_login(&self, _info: &ConnectionInfo) -> Result<RecordingSession, SessionError> {
        Err(SessionError::new(
            ReplyCode::AUTH_REQUIRED,
            "Authentication required",
        ))
    }
}

#[async_trait]
impl Session for RecordingSession {
    async fn mail(&mut self, from: &str, _params: &MailParams) -> Result<(), SessionError> {
        self.events.push(Event::Mail(from.to_string()));
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> Result<(), SessionError> {
        if to.starts_with("blocked@") {
            return Err(SessionError::new(
                ReplyCode::MAILBOX_UNAVAILABLE,
                "Mailbox unavailable",
            ));
        }
        self.events.push(Event::Rcpt(to.to_string()));
        Ok(())
    }

    async fn data(&mut self, data: Vec<u8>) -> Result<(), SessionError> {
        let rejected = data.windows(6).any(|w| w == b"reject");
        self.events.push(Event::Data(data));
        if rejected {
            return Err(SessionError::new(
                ReplyCode::TRANSACTION_FAILED,
                "Rejected by backend",
            ));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.events.push(Event::Reset);
    }

    async fn logout(&mut self) {
        self.events.push(Event::Logout);
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        domain: "test.local".to_string(),
        addr: "127.0.0.1:0".to_string(),
        max_message_bytes: 1024,
        max_recipients: 3,
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> (SocketAddr, Recorder) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let events = Recorder::default();
    let server = Server::new(
        RecordingBackend {
            events: events.clone(),
        },
        config,
    );
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (addr, events)
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> (Self, (u16, Vec<String>)) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
        };
        let greeting = client.reply().await;
        (client, greeting)
    }

    async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    async fn reply(&mut self) -> (u16, Vec<String>) {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "server closed the connection");

            let line = line.trim_end();
            let code = line[..3].parse().unwrap();
            lines.push(line.get(4..).unwrap_or_default().to_string());
            if line.as_bytes().get(3) != Some(&b'-') {
                return (code, lines);
            }
        }
    }

    async fn cmd(&mut self, line: &str) -> (u16, Vec<String>) {
        self.send(&format!("{line}\r\n")).await;
        self.reply().await
    }

    async fn code(&mut self, line: &str) -> u16 {
        self.cmd(line).await.0
    }

    async fn login(&mut self) {
        assert_eq!(self.code("EHLO client.test").await, 250);
        let token = B64.encode(b"\0user\0pass");
        assert_eq!(self.code(&format!("AUTH PLAIN {token}")).await, 235);
    }

    /// Waits for the server to close the connection.
    async fn closed(&mut self) {
        let mut rest = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "unexpected data: {rest}");
    }
}

#[tokio::test]
async fn test_greeting_and_ehlo() {
    let (addr, _) = start_server(test_config()).await;
    let (mut client, greeting) = TestClient::connect(addr).await;

    assert_eq!(greeting, (220, vec!["test.local ESMTP Service Ready".to_string()]));

    let (code, lines) = client.cmd("EHLO client.test").await;
    assert_eq!(code, 250);
    assert_eq!(lines[0], "Hello client.test");

    assert_eq!(
        &lines[1..],
        ["PIPELINING", "8BITMIME", "SIZE 1024", "AUTH PLAIN LOGIN"]
    );

    assert_eq!(client.code("HELO again.test").await, 250);
}

#[tokio::test]
async fn test_authenticated_delivery() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    client.login().await;
    assert_eq!(client.code("MAIL FROM:<sender@example.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<inbox@example.com>").await, 250);
    assert_eq!(client.code("DATA").await, 354);
    client
        .send("Subject: hi\r\n\r\n..starts with a dot\r\nbye\r\n.\r\n")
        .await;
    assert_eq!(client.reply().await.0, 250);
    assert_eq!(client.code("QUIT").await, 221);
    client.closed().await;

    assert_eq!(
        events.events(),
        vec![
            Event::Login("user".to_string()),
            Event::Mail("sender@example.com".to_string()),
            Event::Rcpt("inbox@example.com".to_string()),
            Event::Data(b"Subject: hi\n\n.starts with a dot\nbye\n".to_vec()),
            Event::Reset,
            Event::Logout,
        ]
    );
}

#[tokio::test]
async fn test_auth_plain_with_continuation() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    assert_eq!(client.code("EHLO client.test").await, 250);
    assert_eq!(client.cmd("AUTH PLAIN").await, (334, vec![String::new()]));
    assert_eq!(client.code(&B64.encode(b"\0user\0pass")).await, 235);
    assert_eq!(client.code("AUTH PLAIN").await, 503);
    assert_eq!(events.events(), vec![Event::Login("user".to_string())]);
}

#[tokio::test]
async fn test_auth_login_exchange() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    assert_eq!(client.code("EHLO client.test").await, 250);
    assert_eq!(
        client.cmd("AUTH LOGIN").await,
        (334, vec!["VXNlcm5hbWU6".to_string()])
    );
    assert_eq!(
        client.cmd(&B64.encode("user")).await,
        (334, vec!["UGFzc3dvcmQ6".to_string()])
    );
    assert_eq!(client.code(&B64.encode("pass")).await, 235);
    assert_eq!(events.events(), vec![Event::Login("user".to_string())]);
}

#[tokio::test]
async fn test_auth_failures() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    assert_eq!(client.code("AUTH PLAIN").await, 503); // before EHLO
    assert_eq!(client.code("EHLO client.test").await, 250);

    let bad = B64.encode(b"\0user\0wrong");
    assert_eq!(
        client.cmd(&format!("AUTH PLAIN {bad}")).await,
        (535, vec!["Invalid username or password".to_string()])
    );
    assert_eq!(client.code("AUTH PLAIN !!!").await, 501);
    assert_eq!(client.code("AUTH CRAM-MD5").await, 504);

    assert_eq!(client.code("AUTH LOGIN").await, 334);
    assert_eq!(client.code("*").await, 501);

    // Still usable after failures.
    let good = B64.encode(b"\0user\0pass");
    assert_eq!(client.code(&format!("AUTH PLAIN {good}")).await, 235);
    assert_eq!(events.events(), vec![Event::Login("user".to_string())]);
}

#[tokio::test]
async fn test_anonymous_mail_is_relayed_to_backend() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    assert_eq!(client.code("EHLO client.test").await, 250);
    assert_eq!(
        client.cmd("MAIL FROM:<sender@example.com>").await,
        (530, vec!["Authentication required".to_string()])
    );
    assert_eq!(client.code("RCPT TO:<inbox@example.com>").await, 503);
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_command_sequencing() {
    let (addr, _) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 503);
    client.login().await;
    assert_eq!(client.code("RCPT TO:<b@example.com>").await, 503);
    assert_eq!(client.code("DATA").await, 503);
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 503);
    assert_eq!(client.code("DATA").await, 503);
    assert_eq!(client.code("RSET").await, 250);
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
}

#[tokio::test]
async fn test_misc_commands() {
    let (addr, _) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    assert_eq!(client.code("NOOP").await, 250);
    assert_eq!(client.code("VRFY postmaster").await, 252);
    assert_eq!(client.code("STARTTLS").await, 502);
    assert_eq!(client.code("TURN").await, 500);
    assert_eq!(client.code("MAIL TO:<x@example.com>").await, 501);
    assert_eq!(client.code("QUIT").await, 221);
    client.closed().await;
}

#[tokio::test]
async fn test_recipient_limit_and_rejection() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    client.login().await;
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<blocked@example.com>").await, 550);
    for i in 0..3 {
        assert_eq!(client.code(&format!("RCPT TO:<r{i}@example.com>")).await, 250);
    }
    assert_eq!(client.code("RCPT TO:<r3@example.com>").await, 452);

    let rcpts = events
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Rcpt(_)))
        .count();
    assert_eq!(rcpts, 3);
}

#[tokio::test]
async fn test_size_limits() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    client.login().await;
    assert_eq!(client.code("MAIL FROM:<a@example.com> SIZE=4096").await, 552);
    assert_eq!(client.code("MAIL FROM:<a@example.com> SIZE=100").await, 250);
    assert_eq!(client.code("RCPT TO:<b@example.com>").await, 250);
    assert_eq!(client.code("DATA").await, 354);

    let line = "x".repeat(100);
    let mut body = String::new();
    for _ in 0..20 {
        body.push_str(&line);
        body.push_str("\r\n");
    }
    body.push_str(".\r\n");
    client.send(&body).await;
    assert_eq!(client.reply().await.0, 552);

    // Transaction was reset; a small message goes through.
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<b@example.com>").await, 250);
    assert_eq!(client.code("DATA").await, 354);
    client.send("small\r\n.\r\n").await;
    assert_eq!(client.reply().await.0, 250);

    assert_eq!(events.deliveries(), vec![b"small\n".to_vec()]);
}

#[tokio::test]
async fn test_long_line_crlf_across_read_boundary() {
    let (addr, events) = start_server(ServerConfig {
        max_message_bytes: 256 * 1024,
        ..test_config()
    })
    .await;
    let (mut client, _) = TestClient::connect(addr).await;

    client.login().await;
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<b@example.com>").await, 250);
    assert_eq!(client.code("DATA").await, 354);

    // The CR is the last byte of one 64 KiB read and the LF the first of the next.
    let line = "x".repeat(64 * 1024 - 1);
    client.send(&format!("{line}\r\nnext\r\n.\r\n")).await;
    assert_eq!(client.reply().await.0, 250);

    let deliveries = events.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(!deliveries[0].contains(&b'\r'));
    assert_eq!(deliveries[0], format!("{line}\nnext\n").into_bytes());
}

#[tokio::test]
async fn test_backend_rejection_resets_transaction() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    client.login().await;
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<b@example.com>").await, 250);
    assert_eq!(client.code("DATA").await, 354);
    client.send("please reject me\r\n.\r\n").await;
    assert_eq!(
        client.reply().await,
        (554, vec!["Rejected by backend".to_string()])
    );

    assert_eq!(client.code("RCPT TO:<b@example.com>").await, 503);
    assert_eq!(events.deliveries().len(), 1);
}

#[tokio::test]
async fn test_pipelined_transaction() {
    let (addr, events) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    client.login().await;
    client
        .send("MAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nRCPT TO:<c@example.com>\r\nDATA\r\n")
        .await;
    assert_eq!(client.reply().await.0, 250);
    assert_eq!(client.reply().await.0, 250);
    assert_eq!(client.reply().await.0, 250);
    assert_eq!(client.reply().await.0, 354);
    client.send("pipelined\r\n.\r\nQUIT\r\n").await;
    assert_eq!(client.reply().await.0, 250);
    assert_eq!(client.reply().await.0, 221);
    client.closed().await;

    assert_eq!(events.deliveries(), vec![b"pipelined\n".to_vec()]);
}

#[tokio::test]
async fn test_concurrent_connections() {
    let (addr, events) = start_server(test_config()).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        handles.push(tokio::spawn(async move {
            let (mut client, _) = TestClient::connect(addr).await;
            client.login().await;
            assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
            assert_eq!(client.code("RCPT TO:<b@example.com>").await, 250);
            assert_eq!(client.code("DATA").await, 354);
            client.send(&format!("message {i}\r\n.\r\n")).await;
            assert_eq!(client.reply().await.0, 250);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut deliveries = events.deliveries();
    deliveries.sort();
    let expected: Vec<Vec<u8>> = (0..4).map(|i| format!("message {i}\n").into_bytes()).collect();
    assert_eq!(deliveries, expected);
}

#[tokio::test]
async fn test_idle_timeout() {
    let config = ServerConfig {
        read_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let (addr, _) = start_server(config).await;
    let (mut client, _) = TestClient::connect(addr).await;

    let (code, _) = client.reply().await;
    assert_eq!(code, 421);
    client.closed().await;
}

#[tokio::test]
async fn test_overlong_command_line() {
    let (addr, _) = start_server(test_config()).await;
    let (mut client, _) = TestClient::connect(addr).await;

    client.send(&format!("{}\r\n", "A".repeat(5000))).await;
    assert_eq!(
        client.reply().await,
        (500, vec!["Line too long".to_string()])
    );
    assert_eq!(client.code("NOOP").await, 250);
}
