//! DATA phase decoding (RFC 5321, section 4.5.2).

/// Result of receiving a message.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum DataOutcome {
    /// The unstuffed message.
    Complete(Vec<u8>),
    /// The message was longer than the limit and was discarded.
    TooLarge,
}

/// Incremental dot-unstuffing decoder.
///
/// Fed one read at a time (normally a whole line). Line endings are
/// normalised to LF, including a CRLF split across two reads. Once the
/// limit is crossed the content is dropped but input is still consumed up
/// to the terminating `.` line.
#[derive(Debug)]
pub(super) struct DotDecoder {
    body: Vec<u8>,
    max_len: usize,
    too_large: bool,
    at_line_start: bool,
    /// A read ended in `\r`; resolved against the next read's first byte.
    pending_cr: bool,
}

impl DotDecoder {
    pub(super) const fn new(max_len: usize) -> Self {
        Self {
            body: Vec::new(),
            max_len,
            too_large: false,
            at_line_start: true,
            pending_cr: false,
        }
    }

    /// Consumes one chunk; returns true once the terminator was seen.
    pub(super) fn feed(&mut self, chunk: &[u8]) -> bool {
        let complete = chunk.ends_with(b"\n");
        if self.at_line_start && (chunk == b".\r\n" || chunk == b".\n") {
            return true;
        }

        let held_cr = std::mem::take(&mut self.pending_cr);

        if !self.too_large {
            let mut content = chunk;
            if self.at_line_start && content.first() == Some(&b'.') {
                content = &content[1..];
            }
            let content = content
                .strip_suffix(b"\r\n")
                .or_else(|| content.strip_suffix(b"\n"))
                .unwrap_or(content);
            let (content, trailing_cr) = match content.strip_suffix(b"\r") {
                Some(rest) if !complete => (rest, true),
                _ => (content, false),
            };
            let lone_cr = held_cr && chunk.first() != Some(&b'\n');
            let added = usize::from(lone_cr) + content.len() + usize::from(complete);

            if self.body.len() + added > self.max_len {
                self.too_large = true;
                self.body = Vec::new();
            } else {
                if lone_cr {
                    self.body.push(b'\r');
                }
                self.body.extend_from_slice(content);
                self.pending_cr = trailing_cr;
                if complete {
                    self.body.push(b'\n');
                }
            }
        }

        self.at_line_start = complete;
        false
    }

    pub(super) fn finish(self) -> DataOutcome {
        if self.too_large {
            DataOutcome::TooLarge
        } else {
            DataOutcome::Complete(self.body)
        }
    }
}
