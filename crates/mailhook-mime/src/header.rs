//! RFC 5322 header section handling.

use crate::encoding::decode_rfc2047;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Collection of message headers, keyed case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        let value = value.into();
        self.headers.entry(name).or_default().push(value);
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets the first value for a header with RFC 2047 encoded-words decoded.
    ///
    /// An absent header yields an empty string.
    ///
    /// # Errors
    ///
    /// Returns an error if an encoded-word in the value cannot be decoded.
    pub fn decoded(&self, name: &str) -> Result<String> {
        self.get(name).map_or_else(|| Ok(String::new()), decode_rfc2047)
    }

    /// Parses a header section from raw text.
    ///
    /// Parsing stops at the first empty line. Folded lines (starting with
    /// space or tab) are unfolded into the previous header with a single
    /// space.
    ///
    /// ```text
    /// Header-Name: value
    ///   continuation
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if a line has no colon, a field name is empty or
    /// contains whitespace/control characters, or the section starts with
    /// a continuation line.
    pub fn parse(text: &str) -> Result<Self> {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                let Some((_, value)) = current.as_mut() else {
                    return Err(Error::MalformedHeader(line.to_string()));
                };
                let folded = line.trim();
                if !folded.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(folded);
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }

            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::MalformedHeader(line.to_string()));
            };
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) {
                return Err(Error::MalformedHeader(line.to_string()));
            }
            current = Some((name.to_string(), value.trim().to_string()));
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        Ok(headers)
    }
}
