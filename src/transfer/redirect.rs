//! Status evaluation after each header parse.

use tracing::{debug, warn};

use super::TransferError;
use crate::sink::ResponseSink;
use crate::url::Url;

/// What the worker does with a response whose headers are parsed.
#[derive(Debug)]
pub enum StatusAction {
    /// Read the body; this response is the final one.
    Accept,
    /// Drop the connection and start over at the given URL.
    Redirect(Url),
    /// Stop without reading the body.
    Abort(TransferError),
}

/// Counts redirect hops against a limit.
#[derive(Debug, Clone)]
pub struct RedirectController {
    limit: u32,
    followed: u32,
}

impl RedirectController {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self { limit, followed: 0 }
    }

    /// Hops followed so far.
    #[must_use]
    pub fn followed(&self) -> u32 {
        self.followed
    }

    /// Decides what to do with the response currently in `sink`.
    ///
    /// 4xx and 5xx abort before any redirect logic. A 3xx needs a `Location`
    /// header and must stay within the hop limit.
    pub fn evaluate(&mut self, sink: &ResponseSink, current: &Url) -> StatusAction {
        let status = sink.status();
        if status >= 500 {
            return StatusAction::Abort(TransferError::ServerError {
                status,
                description: sink.description(),
            });
        }
        if status >= 400 {
            return StatusAction::Abort(TransferError::ClientError {
                status,
                description: sink.description(),
            });
        }
        if status < 300 {
            return StatusAction::Accept;
        }

        let hop = self.followed + 1;
        if hop > self.limit {
            warn!(limit = self.limit, url = %current, "redirect limit exceeded");
            return StatusAction::Abort(TransferError::RedirectLimitExceeded { limit: self.limit });
        }
        let Some(location) = sink.header("location").filter(|l| !l.trim().is_empty()) else {
            return StatusAction::Abort(TransferError::MissingRedirectLocation { status });
        };
        match current.join(&location) {
            Ok(next) => {
                self.followed = hop;
                debug!(status, hop, from = %current, to = %next, "following redirect");
                StatusAction::Redirect(next)
            }
            Err(error) => StatusAction::Abort(error.into()),
        }
    }
}
