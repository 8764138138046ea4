//! anetd core library
//!
//! A small HTTP/1.0 client transfer engine with HTTPS, proxy tunneling and
//! redirect handling. Each transfer runs on its own worker thread with
//! blocking IO and reports back through a future and a callback posted onto
//! a caller-chosen dispatch context.
//!
//! # Architecture
//!
//! - [`url`](crate::url) - absolute URL parsing and redirect resolution
//! - [`config`] - timeouts, redirect limit, proxy and TLS settings
//! - [`sink`] - shared response sinks (memory or file)
//! - [`transfer`] - connection, request, parser, redirects and the engine

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod sink;
pub mod transfer;
pub mod url;

// Re-export commonly used types
pub use config::{EngineConfig, ProxySettings, TlsSettings};
pub use sink::{ResponseSink, ResponseSnapshot, SinkKind};
pub use transfer::{
    CancellationToken, Completion, Credentials, Dispatch, Engine, EngineError, FailureKind,
    RequestSpec, TransferError, TransferHandle,
};
pub use self::url::{Scheme, Url, UrlError};
