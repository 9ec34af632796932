//! SMTP command line parser.

use crate::command::{Command, MailParams};
use crate::types::{Reply, ReplyCode};

/// Why a command line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Verb not recognised.
    #[error("Command unrecognized: {0}")]
    Unknown(String),

    /// Verb recognised but its arguments are malformed.
    #[error("Syntax error: {0}")]
    Syntax(&'static str),
}

impl ParseError {
    /// The reply to send for this error (`500` or `501`).
    #[must_use]
    pub fn reply(&self) -> Reply {
        match self {
            Self::Unknown(_) => Reply::line(ReplyCode::SYNTAX_ERROR, "Command not recognized"),
            Self::Syntax(message) => Reply::line(ReplyCode::PARAMETER_ERROR, *message),
        }
    }
}

/// Parses one command line (without the trailing CRLF).
///
/// Verbs are case-insensitive. Unknown ESMTP parameters on `MAIL FROM`
/// are ignored.
///
/// # Errors
///
/// Returns [`ParseError::Unknown`] for an unrecognised verb and
/// [`ParseError::Syntax`] for malformed arguments.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (verb, args) = line
        .split_once(' ')
        .map_or((line, ""), |(verb, args)| (verb, args.trim()));

    match verb.to_uppercase().as_str() {
        "HELO" => Ok(Command::Helo {
            hostname: hostname_arg(args, "Domain/address argument required for HELO")?,
        }),
        "EHLO" => Ok(Command::Ehlo {
            hostname: hostname_arg(args, "Domain/address argument required for EHLO")?,
        }),
        "STARTTLS" => Ok(Command::StartTls),
        "AUTH" => {
            let mut parts = args.split_whitespace();
            let mechanism = parts
                .next()
                .ok_or(ParseError::Syntax("Missing authentication mechanism"))?;
            Ok(Command::Auth {
                mechanism: mechanism.to_uppercase(),
                initial_response: parts.next().map(str::to_string),
            })
        }
        "MAIL" => {
            let rest = strip_prefix_ignore_case(args, "FROM:")
                .ok_or(ParseError::Syntax("Was expecting MAIL arg syntax of FROM:<address>"))?;
            let (from, params) = parse_path(rest)?;
            Ok(Command::MailFrom {
                from,
                params: parse_mail_params(params)?,
            })
        }
        "RCPT" => {
            let rest = strip_prefix_ignore_case(args, "TO:")
                .ok_or(ParseError::Syntax("Was expecting RCPT arg syntax of TO:<address>"))?;
            let (to, _) = parse_path(rest)?;
            if to.is_empty() {
                return Err(ParseError::Syntax("Missing recipient address"));
            }
            Ok(Command::RcptTo { to })
        }
        "DATA" => Ok(Command::Data),
        "RSET" => Ok(Command::Rset),
        "VRFY" => {
            if args.is_empty() {
                return Err(ParseError::Syntax("Missing address"));
            }
            Ok(Command::Vrfy {
                address: args.to_string(),
            })
        }
        "NOOP" => Ok(Command::Noop),
        "QUIT" => Ok(Command::Quit),
        _ => Err(ParseError::Unknown(verb.to_string())),
    }
}

fn hostname_arg(args: &str, message: &'static str) -> Result<String, ParseError> {
    args.split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or(ParseError::Syntax(message))
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| s[prefix.len()..].trim_start())
}

/// Splits `<address> params` (brackets optional) into address and the rest.
fn parse_path(s: &str) -> Result<(String, &str), ParseError> {
    if let Some(inner) = s.strip_prefix('<') {
        let end = inner
            .find('>')
            .ok_or(ParseError::Syntax("Unterminated address"))?;
        return Ok((inner[..end].trim().to_string(), inner[end + 1..].trim()));
    }

    let (address, rest) = s.split_once(' ').unwrap_or((s, ""));
    if address.is_empty() {
        return Err(ParseError::Syntax("Missing address"));
    }
    Ok((address.to_string(), rest.trim()))
}

fn parse_mail_params(s: &str) -> Result<MailParams, ParseError> {
    let mut params = MailParams::default();

    for param in s.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        match key.to_uppercase().as_str() {
            "SIZE" => {
                let size = value
                    .parse()
                    .map_err(|_| ParseError::Syntax("Invalid SIZE parameter"))?;
                params.size = Some(size);
            }
            "BODY" => params.body = Some(value.to_uppercase()),
            _ => {}
        }
    }

    Ok(params)
}
