//! Error types for the transfer module.
//!
//! Every failure on the worker thread ends up as a [`TransferError`] inside a
//! [`Completion`](super::Completion); nothing escapes the worker unobserved.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::url::UrlError;

/// Errors that terminate a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The target (or redirect) URL could not be split.
    #[error(transparent)]
    MalformedUrl(#[from] UrlError),

    /// Name resolution failed or every resolved address refused the connection.
    #[error("unable to connect to {target}: {source}")]
    Connection {
        /// `host:port` that was being connected to.
        target: String,
        /// The last underlying error.
        #[source]
        source: io::Error,
    },

    /// The proxy answered the CONNECT request with something other than 200.
    #[error("proxy {proxy} refused tunnel: {status_line}")]
    ProxyTunnel {
        /// `host:port` of the proxy.
        proxy: String,
        /// First line of the proxy's reply.
        status_line: String,
    },

    /// The TLS handshake failed, including certificate verification.
    #[error("TLS handshake with {host} failed: {source}")]
    TlsHandshake {
        /// Server name presented in SNI.
        host: String,
        /// The underlying handshake error.
        #[source]
        source: io::Error,
    },

    /// The TLS client configuration could not be built.
    #[error("invalid TLS configuration: {0}")]
    TlsConfig(#[source] rustls::Error),

    /// More redirect hops than the configured limit.
    #[error("redirected more than {limit} times")]
    RedirectLimitExceeded {
        /// The configured hop limit.
        limit: u32,
    },

    /// A 3xx response carried no `Location` header.
    #[error("HTTP {status} redirect without a Location header")]
    MissingRedirectLocation {
        /// The redirect status code.
        status: u16,
    },

    /// The server answered with a 4xx status.
    #[error("HTTP {status} {description}")]
    ClientError {
        /// The status code.
        status: u16,
        /// The reason phrase.
        description: String,
    },

    /// The server answered with a 5xx (or higher) status.
    #[error("HTTP {status} {description}")]
    ServerError {
        /// The status code.
        status: u16,
        /// The reason phrase.
        description: String,
    },

    /// Reading from the connection failed for a reason other than a clean close.
    #[error("error reading response: {source}")]
    StreamRead {
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Writing the request to the connection failed.
    #[error("error sending request: {source}")]
    StreamWrite {
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The status line or headers could not be parsed.
    #[error("malformed response: {reason}")]
    MalformedResponse {
        /// What was wrong with the response.
        reason: String,
    },

    /// The connection closed before the header section ended.
    #[error("connection closed before the response headers were complete")]
    IncompleteResponse,

    /// The connection closed before `Content-Length` body bytes arrived.
    #[error("connection closed after {received} of {expected} body bytes")]
    IncompleteBody {
        /// Declared body size.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// The file-backed sink could not write the body.
    #[error("error writing response body to {path}: {source}")]
    SinkIo {
        /// File being written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The transfer was cancelled through its token.
    #[error("transfer cancelled")]
    Cancelled,

    /// The worker thread panicked.
    #[error("transfer worker panicked")]
    WorkerPanicked,
}

/// Broad origin of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, proxy or TLS failure before or while talking HTTP.
    Transport,
    /// The server answered, but with an unusable or failing response.
    Protocol,
    /// Failure on this side: bad input, local IO, cancellation.
    Local,
}

impl TransferError {
    /// Creates a connection error for `target`.
    pub fn connection(target: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            target: target.into(),
            source,
        }
    }

    /// Creates a handshake error for `host`.
    pub fn tls_handshake(host: impl Into<String>, source: io::Error) -> Self {
        Self::TlsHandshake {
            host: host.into(),
            source,
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed_response(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Creates a sink write error.
    pub fn sink_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::SinkIo {
            path: path.into(),
            source,
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection { .. }
            | Self::ProxyTunnel { .. }
            | Self::TlsHandshake { .. }
            | Self::StreamRead { .. }
            | Self::StreamWrite { .. }
            | Self::IncompleteResponse
            | Self::IncompleteBody { .. } => FailureKind::Transport,
            Self::RedirectLimitExceeded { .. }
            | Self::MissingRedirectLocation { .. }
            | Self::ClientError { .. }
            | Self::ServerError { .. }
            | Self::MalformedResponse { .. } => FailureKind::Protocol,
            Self::MalformedUrl(_)
            | Self::TlsConfig(_)
            | Self::SinkIo { .. }
            | Self::Cancelled
            | Self::WorkerPanicked => FailureKind::Local,
        }
    }

    #[must_use]
    pub fn is_transport(&self) -> bool {
        self.kind() == FailureKind::Transport
    }

    #[must_use]
    pub fn is_protocol(&self) -> bool {
        self.kind() == FailureKind::Protocol
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ClientError { status, .. }
            | Self::ServerError { status, .. }
            | Self::MissingRedirectLocation { status } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised by the engine itself rather than by a transfer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn transfer worker: {0}")]
    WorkerSpawn(#[source] io::Error),
}
