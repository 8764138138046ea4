//! Incremental HTTP/1.0 response parser.
//!
//! [`ResponseParser`] is a byte-driven state machine that writes the status
//! line, headers and body straight into a [`ResponseSink`]. It keeps its
//! state between reads, so a response may arrive in chunks of any size. The
//! socket read buffer is owned by the parser and reused for every read of
//! the hop.
//!
//! Parsing pauses once the header section ends, which lets the caller decide
//! on redirects before any body byte is consumed.

use std::io::{self, Read};

use tracing::{debug, trace};

use super::TransferError;
use super::cancel::CancellationToken;
use super::connection::cancelled_or;
use crate::sink::ResponseSink;

/// Position of the parser inside the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Version,
    Status,
    Description,
    HeaderKey,
    HeaderValue,
    Body,
    Done,
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// The whole chunk was consumed; more input is needed.
    NeedMore,
    /// The header section just ended after `consumed` bytes of the chunk.
    HeadersComplete { consumed: usize },
    /// The response is complete after `consumed` bytes of the chunk.
    Done { consumed: usize },
}

/// Response state machine plus its reusable read buffer.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParserState,
    token: Vec<u8>,
    value: Vec<u8>,
    content_length: Option<u64>,
    received: u64,
    buf: Vec<u8>,
    /// Unconsumed bytes in `buf` left over when headers completed.
    pending: std::ops::Range<usize>,
}

impl ResponseParser {
    /// Creates a parser whose socket reads use a `buffer_size` byte buffer.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            state: ParserState::Version,
            token: Vec::new(),
            value: Vec::new(),
            content_length: None,
            received: 0,
            buf: vec![0; buffer_size.max(1)],
            pending: 0..0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// `Content-Length` of the response, once headers are parsed.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Runs `chunk` through the state machine.
    ///
    /// Stops early at the end of the header section and at the end of a
    /// sized body; the returned [`Feed`] says how many bytes were used.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::MalformedResponse`] for an unparseable status
    /// line or `Content-Length`.
    pub fn feed(&mut self, chunk: &[u8], sink: &ResponseSink) -> Result<Feed, TransferError> {
        let mut pos = 0;
        while pos < chunk.len() {
            match self.state {
                ParserState::Done => return Ok(Feed::Done { consumed: pos }),
                ParserState::Body => {
                    let taken = self.take_body(&chunk[pos..], sink);
                    pos += taken;
                    if self.state == ParserState::Done {
                        return Ok(Feed::Done { consumed: pos });
                    }
                }
                _ => {
                    let byte = chunk[pos];
                    pos += 1;
                    if self.step(byte, sink)? {
                        return Ok(match self.state {
                            ParserState::Done => Feed::Done { consumed: pos },
                            _ => Feed::HeadersComplete { consumed: pos },
                        });
                    }
                }
            }
        }
        Ok(if self.state == ParserState::Done {
            Feed::Done { consumed: pos }
        } else {
            Feed::NeedMore
        })
    }

    /// Advances the header state machine by one byte.
    ///
    /// Returns `true` when the header section has just ended.
    fn step(&mut self, byte: u8, sink: &ResponseSink) -> Result<bool, TransferError> {
        match self.state {
            ParserState::Version => match byte {
                b' ' => {
                    let version = self.take_token();
                    trace!(version = %version, "version parsed");
                    sink.set_version(version);
                    self.state = ParserState::Status;
                }
                b'\r' | b'\n' => {
                    return Err(TransferError::malformed_response(
                        "status line ended inside the version",
                    ));
                }
                _ => self.token.push(byte),
            },
            ParserState::Status => match byte {
                b' ' if self.token.is_empty() => {}
                b' ' => {
                    self.finish_status(sink)?;
                    self.state = ParserState::Description;
                }
                b'\r' => {}
                b'\n' => {
                    self.finish_status(sink)?;
                    self.state = ParserState::HeaderKey;
                }
                _ => self.token.push(byte),
            },
            ParserState::Description => match byte {
                b'\r' => {}
                b'\n' => {
                    let description = self.take_token();
                    trace!(description = %description, "description parsed");
                    sink.set_description(description);
                    self.state = ParserState::HeaderKey;
                }
                _ => self.token.push(byte),
            },
            ParserState::HeaderKey => match byte {
                b'\r' => {}
                b'\n' if self.token.is_empty() => {
                    self.finish_headers(sink);
                    return Ok(true);
                }
                b'\n' => {
                    // A line without a colon: keep the name with an empty value.
                    self.finish_header(sink)?;
                }
                b':' => self.state = ParserState::HeaderValue,
                _ => self.token.push(byte),
            },
            ParserState::HeaderValue => match byte {
                b'\r' => {}
                b'\n' => {
                    self.finish_header(sink)?;
                    self.state = ParserState::HeaderKey;
                }
                _ => self.value.push(byte),
            },
            ParserState::Body | ParserState::Done => {}
        }
        Ok(false)
    }

    fn take_token(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.token).into_owned();
        self.token.clear();
        text
    }

    fn finish_status(&mut self, sink: &ResponseSink) -> Result<(), TransferError> {
        let raw = self.take_token();
        let status: u16 = raw
            .parse()
            .map_err(|_| TransferError::malformed_response(format!("invalid status code '{raw}'")))?;
        trace!(status, "status parsed");
        sink.set_status(status);
        Ok(())
    }

    fn finish_header(&mut self, sink: &ResponseSink) -> Result<(), TransferError> {
        let key = self.take_token().trim().to_string();
        let value = String::from_utf8_lossy(&self.value).trim().to_string();
        self.value.clear();
        if key.is_empty() {
            return Ok(());
        }
        if key.eq_ignore_ascii_case("content-length") {
            let length = value.parse::<u64>().map_err(|_| {
                TransferError::malformed_response(format!("invalid Content-Length '{value}'"))
            })?;
            self.content_length = Some(length);
        }
        trace!(key = %key, value = %value, "header parsed");
        sink.add_header(key, value);
        Ok(())
    }

    fn finish_headers(&mut self, sink: &ResponseSink) {
        match self.content_length {
            Some(0) => {
                sink.set_body_size(0);
                self.state = ParserState::Done;
            }
            Some(length) => {
                sink.set_body_size(length);
                self.state = ParserState::Body;
            }
            None => self.state = ParserState::Body,
        }
        debug!(body_size = ?self.content_length, "headers complete");
    }

    /// Appends as much of `bytes` as the body still needs; returns the count.
    fn take_body(&mut self, bytes: &[u8], sink: &ResponseSink) -> usize {
        let wanted = match self.content_length {
            Some(length) => {
                let remaining = length.saturating_sub(self.received);
                usize::try_from(remaining).map_or(bytes.len(), |r| r.min(bytes.len()))
            }
            None => bytes.len(),
        };
        sink.append_body(&bytes[..wanted]);
        self.received += wanted as u64;
        if self.content_length.is_some_and(|length| self.received >= length) {
            self.state = ParserState::Done;
        }
        wanted
    }

    /// Handles end of stream.
    fn finish_at_eof(&mut self, sink: &ResponseSink) -> Result<(), TransferError> {
        match (self.state, self.content_length) {
            (ParserState::Done, _) => Ok(()),
            (ParserState::Body, None) => {
                debug!(bytes = self.received, "body ended at connection close");
                sink.set_body_size(self.received);
                self.state = ParserState::Done;
                Ok(())
            }
            (ParserState::Body, Some(expected)) => Err(TransferError::IncompleteBody {
                expected,
                received: self.received,
            }),
            _ => Err(TransferError::IncompleteResponse),
        }
    }

    /// Reads until the header section is complete.
    ///
    /// Bytes read past the headers are kept for [`read_body`](Self::read_body).
    ///
    /// # Errors
    ///
    /// Socket failures become [`TransferError::StreamRead`] (or `Cancelled`),
    /// a close before the blank line becomes [`TransferError::IncompleteResponse`].
    pub fn read_headers<R: Read>(
        &mut self,
        stream: &mut R,
        sink: &ResponseSink,
        token: &CancellationToken,
    ) -> Result<(), TransferError> {
        while matches!(
            self.state,
            ParserState::Version
                | ParserState::Status
                | ParserState::Description
                | ParserState::HeaderKey
                | ParserState::HeaderValue
        ) {
            let n = self.fill(stream, token)?;
            if n == 0 {
                return self.finish_at_eof(sink);
            }
            match self.feed_buffered(0..n, sink)? {
                Feed::NeedMore => {}
                Feed::HeadersComplete { consumed } | Feed::Done { consumed } => {
                    self.pending = consumed..n;
                }
            }
        }
        Ok(())
    }

    /// Reads the body until `Content-Length` bytes arrived or the peer closed.
    ///
    /// The sink is flushed after every chunk.
    ///
    /// # Errors
    ///
    /// Socket failures become [`TransferError::StreamRead`] (or `Cancelled`);
    /// a short sized body becomes [`TransferError::IncompleteBody`]; sink
    /// write failures become [`TransferError::SinkIo`].
    pub fn read_body<R: Read>(
        &mut self,
        stream: &mut R,
        sink: &ResponseSink,
        token: &CancellationToken,
    ) -> Result<(), TransferError> {
        let leftover = std::mem::replace(&mut self.pending, 0..0);
        if !leftover.is_empty() && self.state == ParserState::Body {
            self.feed_buffered(leftover, sink)?;
            sink.flush()?;
        }

        while self.state == ParserState::Body {
            let n = self.fill(stream, token)?;
            if n == 0 {
                self.finish_at_eof(sink)?;
                break;
            }
            self.feed_buffered(0..n, sink)?;
            sink.flush()?;
            trace!(bytes = n, total = self.received, "body chunk");
        }
        sink.flush()?;
        debug!(bytes = self.received, "body complete");
        Ok(())
    }

    /// Feeds a range of the owned read buffer.
    fn feed_buffered(
        &mut self,
        range: std::ops::Range<usize>,
        sink: &ResponseSink,
    ) -> Result<Feed, TransferError> {
        let buf = std::mem::take(&mut self.buf);
        let fed = self.feed(&buf[range], sink);
        self.buf = buf;
        fed
    }

    /// One socket read into the owned buffer. Clean closes read as zero.
    fn fill<R: Read>(
        &mut self,
        stream: &mut R,
        token: &CancellationToken,
    ) -> Result<usize, TransferError> {
        loop {
            token.check()?;
            match stream.read(&mut self.buf) {
                Ok(0) => {
                    // A cancelled socket reads as closed.
                    token.check()?;
                    return Ok(0);
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // TLS peers that close without close_notify.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    token.check()?;
                    return Ok(0);
                }
                Err(source) => {
                    return Err(cancelled_or(token, TransferError::StreamRead { source }));
                }
            }
        }
    }
}
