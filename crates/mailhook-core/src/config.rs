//! Start-up configuration.

use std::fmt;
use std::time::Duration;

use chrono_tz::Tz;
use mailhook_smtp::ServerConfig;

use crate::notify::DEFAULT_WEBHOOK_TIMEOUT;
use crate::store::validate_table_name;
use crate::{Error, Result};

/// Default store connection URI.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:mailhook.db?mode=rwc";
/// Default table for mail records.
pub const DEFAULT_MAIL_TABLE: &str = "mails";
/// Default SMTP listen port.
pub const DEFAULT_SMTP_PORT: u16 = 1025;
/// Default SMTP listen host.
pub const DEFAULT_SMTP_BIND: &str = "0.0.0.0";
/// Default domain announced in greetings.
pub const DEFAULT_HOST: &str = "localhost";
/// Default zone for rendering record dates.
pub const DEFAULT_TIMEZONE: Tz = Tz::Europe__Istanbul;

/// Service configuration, built once at start-up.
#[derive(Clone)]
pub struct Config {
    /// Store connection URI.
    pub database_url: String,
    /// Table holding mail records.
    pub mail_table: String,
    /// Webhook every message is announced to.
    pub webhook_url: String,
    /// Bound on each webhook request.
    pub webhook_timeout: Duration,
    /// Username accepted by AUTH.
    pub smtp_username: String,
    /// Password accepted by AUTH.
    pub smtp_password: String,
    /// SMTP listen port.
    pub smtp_port: u16,
    /// SMTP listen host.
    pub smtp_bind: String,
    /// Domain announced in greetings.
    pub host: String,
    /// Zone used for [`MailRecord::date`](crate::MailRecord::date).
    pub timezone: Tz,
}

impl Config {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to
    /// its value. Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| get(key).ok_or_else(|| Error::Config(format!("{key} must be set")));

        let mail_table = get("MAIL_TABLE").unwrap_or_else(|| DEFAULT_MAIL_TABLE.to_string());
        validate_table_name(&mail_table)?;

        let webhook_url = get("WEBHOOK_URL")
            .or_else(|| get("DISCORD_WEBHOOK"))
            .ok_or_else(|| Error::Config("WEBHOOK_URL must be set".to_string()))?;

        let webhook_timeout = match get("WEBHOOK_TIMEOUT_SECS") {
            Some(secs) => secs
                .trim()
                .parse()
                .ok()
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| Error::Config(format!("Invalid WEBHOOK_TIMEOUT_SECS: '{secs}'")))?,
            None => DEFAULT_WEBHOOK_TIMEOUT,
        };

        let smtp_port = match get("SMTP_PORT") {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("Invalid SMTP_PORT: '{port}'")))?,
            None => DEFAULT_SMTP_PORT,
        };

        let timezone = match get("MAIL_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("Unknown MAIL_TIMEZONE: '{name}'")))?,
            None => DEFAULT_TIMEZONE,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            mail_table,
            webhook_url,
            webhook_timeout,
            smtp_username: required("SMTP_USERNAME")?,
            smtp_password: required("SMTP_PASSWORD")?,
            smtp_port,
            smtp_bind: get("SMTP_BIND").unwrap_or_else(|| DEFAULT_SMTP_BIND.to_string()),
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            timezone,
        })
    }

    /// Address the SMTP listener binds.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        if self.smtp_bind.contains(':') && !self.smtp_bind.starts_with('[') {
            format!("[{}]:{}", self.smtp_bind, self.smtp_port)
        } else {
            format!("{}:{}", self.smtp_bind, self.smtp_port)
        }
    }

    /// Engine settings for this configuration.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            domain: self.host.clone(),
            addr: self.listen_addr(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_message_bytes: 1024 * 1024,
            max_recipients: 50,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("mail_table", &self.mail_table)
            .field("webhook_url", &self.webhook_url)
            .field("webhook_timeout", &self.webhook_timeout)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"<redacted>")
            .field("smtp_port", &self.smtp_port)
            .field("smtp_bind", &self.smtp_bind)
            .field("host", &self.host)
            .field("timezone", &self.timezone)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("WEBHOOK_URL", "https://hooks.example/x"),
        ("SMTP_USERNAME", "user"),
        ("SMTP_PASSWORD", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(MINIMAL)).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.mail_table, "mails");
        assert_eq!(config.smtp_port, 1025);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.timezone, Tz::Europe__Istanbul);
        assert_eq!(config.webhook_timeout, Duration::from_secs(10));
        assert_eq!(config.listen_addr(), "0.0.0.0:1025");
    }

    #[test]
    fn test_overrides() {
        let mut vars = MINIMAL.to_vec();
        vars.extend([
            ("SMTP_PORT", "2525"),
            ("SMTP_BIND", "127.0.0.1"),
            ("HOST", "mail.example.com"),
            ("MAIL_TABLE", "inbox"),
            ("MAIL_TIMEZONE", "UTC"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("WEBHOOK_TIMEOUT_SECS", "3"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.smtp_port, 2525);
        assert_eq!(config.mail_table, "inbox");
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.webhook_timeout, Duration::from_secs(3));

        let server = config.server_config();
        assert_eq!(server.domain, "mail.example.com");
        assert_eq!(server.addr, "127.0.0.1:2525");
        assert_eq!(server.read_timeout, Duration::from_secs(10));
        assert_eq!(server.max_message_bytes, 1024 * 1024);
        assert_eq!(server.max_recipients, 50);
    }

    #[test]
    fn test_webhook_alias() {
        let vars = [
            ("DISCORD_WEBHOOK", "https://discord.example/hook"),
            ("SMTP_USERNAME", "user"),
            ("SMTP_PASSWORD", "secret"),
        ];
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.webhook_url, "https://discord.example/hook");
    }

    #[test]
    fn test_missing_required() {
        for skip in ["WEBHOOK_URL", "SMTP_USERNAME", "SMTP_PASSWORD"] {
            let vars: Vec<_> = MINIMAL.iter().copied().filter(|(k, _)| *k != skip).collect();
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, Error::Config(ref m) if m.contains(skip)), "{err}");
        }

        let mut vars = MINIMAL.to_vec();
        vars.push(("SMTP_PASSWORD", ""));
        vars.remove(2);
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("SMTP_PORT", "not-a-port"),
            ("SMTP_PORT", "70000"),
            ("MAIL_TABLE", "mails; drop"),
            ("MAIL_TIMEZONE", "Mars/Olympus"),
            ("WEBHOOK_TIMEOUT_SECS", "soon"),
            ("WEBHOOK_TIMEOUT_SECS", "0"),
        ] {
            let mut vars = MINIMAL.to_vec();
            vars.push((key, value));
            let result = Config::from_lookup(lookup(&vars));
            assert!(matches!(result, Err(Error::Config(_))), "{key}={value}");
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Config::from_lookup(lookup(MINIMAL)).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("SMTP_BIND", "::1"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.listen_addr(), "[::1]:1025");
    }
}
