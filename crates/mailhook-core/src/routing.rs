//! Recipient-to-webhook routing.
//!
//! A [`WebhookResolver`] picks the webhook a transaction is announced to,
//! once per accepted recipient. [`StaticWebhook`] sends everything to one
//! URL; [`RoutedWebhook`] looks the recipient up in a
//! `(tld, domain, user)` table.

use std::collections::HashMap;
use std::fmt;

/// Errors from resolving a recipient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The recipient is not a `user@domain.tld` address.
    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    /// No webhook is configured for the recipient.
    #[error("No webhook for recipient: {0}")]
    NoRoute(String),
}

/// Picks the webhook URL for a recipient.
pub trait WebhookResolver: Send + Sync {
    /// Returns the webhook for `recipient`.
    ///
    /// # Errors
    ///
    /// Returns an error if no webhook applies to the recipient.
    fn resolve(&self, recipient: &str) -> Result<String, RouteError>;
}

/// Sends every recipient to the same webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticWebhook(pub String);

impl StaticWebhook {
    /// Creates a resolver for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }
}

impl WebhookResolver for StaticWebhook {
    fn resolve(&self, _recipient: &str) -> Result<String, RouteError> {
        Ok(self.0.clone())
    }
}

/// A recipient split into user, domain and top-level part.
///
/// The host is split at its first dot, so `ops@alert.example.com` has
/// domain `alert` and tld `example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientAddress {
    /// Local part.
    pub user: String,
    /// Host label before the first dot.
    pub domain: String,
    /// Everything after the first dot of the host.
    pub tld: String,
}

impl RecipientAddress {
    /// Parses `user@domain.tld`, with or without angle brackets.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidAddress`] if there is no `@`, any part
    /// is empty, or the host has no dot.
    pub fn parse(addr: &str) -> Result<Self, RouteError> {
        let trimmed = addr.trim();
        let bare = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed);
        let invalid = || RouteError::InvalidAddress(addr.to_string());

        let (user, host) = bare.rsplit_once('@').ok_or_else(invalid)?;
        let (domain, tld) = host.split_once('.').ok_or_else(invalid)?;

        if user.is_empty() || domain.is_empty() || tld.is_empty() {
            return Err(invalid());
        }
        if host.chars().any(|c| c.is_whitespace() || c == '@') {
            return Err(invalid());
        }

        Ok(Self {
            user: user.to_string(),
            domain: domain.to_string(),
            tld: tld.to_string(),
        })
    }

    fn key(&self) -> RouteKey {
        RouteKey::new(&self.tld, &self.domain, &self.user)
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}.{}", self.user, self.domain, self.tld)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    tld: String,
    domain: String,
    user: String,
}

impl RouteKey {
    fn new(tld: &str, domain: &str, user: &str) -> Self {
        Self {
            tld: tld.to_ascii_lowercase(),
            domain: domain.to_ascii_lowercase(),
            user: user.to_ascii_lowercase(),
        }
    }
}

/// Routes recipients through a `(tld, domain, user)` table.
///
/// Matching ignores ASCII case. Recipients with no route, or that do not
/// parse, go to the fallback webhook when one is set.
#[derive(Debug, Clone, Default)]
pub struct RoutedWebhook {
    routes: HashMap<RouteKey, String>,
    fallback: Option<String>,
}

impl RoutedWebhook {
    /// Creates an empty table without a fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the webhook used when no route matches.
    #[must_use]
    pub fn with_fallback(mut self, url: impl Into<String>) -> Self {
        self.fallback = Some(url.into());
        self
    }

    /// Adds a route for `user@domain.tld`.
    #[must_use]
    pub fn route(mut self, tld: &str, domain: &str, user: &str, url: impl Into<String>) -> Self {
        self.routes.insert(RouteKey::new(tld, domain, user), url.into());
        self
    }

    /// Number of configured routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn fallback_for(&self, recipient: &str) -> Result<String, RouteError> {
        self.fallback
            .clone()
            .ok_or_else(|| RouteError::NoRoute(recipient.to_string()))
    }
}

impl WebhookResolver for RoutedWebhook {
    fn resolve(&self, recipient: &str) -> Result<String, RouteError> {
        let Ok(addr) = RecipientAddress::parse(recipient) else {
            return self.fallback_for(recipient);
        };

        match self.routes.get(&addr.key()) {
            Some(url) => Ok(url.clone()),
            None => self.fallback_for(recipient),
        }
    }
}
