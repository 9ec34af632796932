//! MIME decoding utilities.
//!
//! Supports Base64, Quoted-Printable, charset conversion and RFC 2047
//! encoded-word header decoding.

use crate::error::{Error, Result};
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::Encoding;

/// Standard alphabet, accepting input with or without trailing padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT_BASE64.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045, section 6.7).
///
/// Handles `=XX` escapes and soft line breaks (`=` followed by optional
/// transport padding and a line ending). A lone `=` at the very end of
/// the input is treated as a soft break.
///
/// # Errors
///
/// Returns an error if an escape sequence is not two hex digits.
pub fn decode_quoted_printable(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];
        if byte != b'=' {
            out.push(byte);
            i += 1;
            continue;
        }

        // Soft line break, possibly with trailing spaces/tabs before the newline.
        let mut j = i + 1;
        while j < input.len() && matches!(input[j], b' ' | b'\t') {
            j += 1;
        }
        if j >= input.len() {
            break;
        }
        if input[j] == b'\n' {
            i = j + 1;
            continue;
        }
        if input[j] == b'\r' && input.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }

        match (input.get(i + 1), input.get(i + 2)) {
            (Some(&hi), Some(&lo)) => {
                out.push(hex_pair(hi, lo)?);
                i += 3;
            }
            _ => {
                return Err(Error::InvalidEncoding(
                    "Incomplete escape sequence".to_string(),
                ));
            }
        }
    }

    Ok(out)
}

/// Decodes the `Q` flavour used inside encoded-words (RFC 2047, section 4.2).
fn decode_q(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' => match (bytes.get(i + 1), bytes.get(i + 2)) {
                (Some(&hi), Some(&lo)) => {
                    out.push(hex_pair(hi, lo)?);
                    i += 3;
                }
                _ => {
                    return Err(Error::InvalidEncoding(
                        "Incomplete escape sequence".to_string(),
                    ));
                }
            },
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    Ok(out)
}

fn hex_pair(hi: u8, lo: u8) -> Result<u8> {
    let digit = |b: u8| -> Result<u8> {
        char::from(b)
            .to_digit(16)
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| {
                Error::InvalidEncoding(format!("Invalid hex: ={}{}", char::from(hi), char::from(lo)))
            })
    };
    Ok((digit(hi)? << 4) | digit(lo)?)
}

/// Converts bytes in the given charset to a `String`.
///
/// Labels are resolved through the WHATWG encoding registry, so aliases
/// such as `latin1`, `iso-8859-9` or `utf8` are accepted. Malformed byte
/// sequences are replaced with U+FFFD.
///
/// # Errors
///
/// Returns an error if the charset label is unknown.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> Result<String> {
    let encoding = Encoding::for_label(charset.trim().as_bytes())
        .ok_or_else(|| Error::UnknownCharset(charset.to_string()))?;
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    Ok(text.into_owned())
}

/// A structurally valid `=?charset?encoding?text?=` token.
struct EncodedWord<'a> {
    charset: &'a str,
    encoding: u8,
    text: &'a str,
    /// Byte length of the whole token including delimiters.
    len: usize,
}

impl<'a> EncodedWord<'a> {
    /// Recognises an encoded-word at the start of `s` (which begins with `=?`).
    fn recognise(s: &'a str) -> Option<Self> {
        let inner = s.strip_prefix("=?")?;
        let charset_end = inner.find('?')?;
        let charset = &inner[..charset_end];
        if charset.is_empty() || charset.contains(char::is_whitespace) {
            return None;
        }

        let after = &inner[charset_end + 1..];
        let bytes = after.as_bytes();
        let encoding = *bytes.first()?;
        if !encoding.is_ascii() || bytes.get(1) != Some(&b'?') {
            return None;
        }

        let payload = &after[2..];
        let text_end = payload.find("?=")?;
        let text = &payload[..text_end];
        if text.contains(char::is_whitespace) {
            return None;
        }

        Some(Self {
            charset,
            encoding,
            text,
            len: 2 + charset_end + 1 + 2 + text_end + 2,
        })
    }

    fn decode(&self) -> Result<String> {
        let bytes = match self.encoding.to_ascii_uppercase() {
            b'B' => decode_base64(self.text)?,
            b'Q' => decode_q(self.text)?,
            other => {
                return Err(Error::InvalidEncoding(format!(
                    "Unknown encoded-word encoding: {}",
                    char::from(other)
                )));
            }
        };

        // RFC 2231 language suffix: charset*lang
        let charset = self.charset.split('*').next().unwrap_or(self.charset);
        decode_charset(charset, &bytes)
    }
}

/// Decodes every RFC 2047 encoded-word in a header value.
///
/// Plain text passes through untouched. Whitespace that only separates
/// two adjacent encoded-words is dropped, as RFC 2047 section 6.2
/// requires. Text that starts with `=?` but is not a complete
/// encoded-word is kept literally.
///
/// # Errors
///
/// Returns an error if an encoded-word names an unknown charset or
/// encoding, or if its payload cannot be decoded.
pub fn decode_rfc2047(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let Some(word) = EncodedWord::recognise(&rest[start..]) else {
            out.push_str(&rest[..start + 2]);
            rest = &rest[start + 2..];
            after_word = false;
            continue;
        };

        let gap = &rest[..start];
        if !(after_word && gap.chars().all(char::is_whitespace)) {
            out.push_str(gap);
        }
        out.push_str(&word.decode()?);

        rest = &rest[start + word.len..];
        after_word = true;
    }

    out.push_str(rest);
    Ok(out)
}
