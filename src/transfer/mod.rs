//! HTTP/1.0 transfer engine.
//!
//! One transfer runs on one worker thread with blocking socket IO:
//!
//! - [`connection`] resolves, connects, tunnels through proxies and runs TLS
//! - [`request`] serializes the request for each hop
//! - [`parser`] turns the byte stream into sink updates
//! - [`redirect`] decides between body, redirect and abort
//! - [`engine`] ties it together and reports through a future and a callback
//!
//! # Example
//!
//! ```no_run
//! use anetd_core::transfer::{Engine, dispatch::Inline};
//! use anetd_core::ResponseSink;
//!
//! let mut engine = Engine::new(Inline);
//! engine.set_argument("q", "rust, http");
//! let completion = engine
//!     .start(ResponseSink::in_memory("http://example.com/search"))
//!     .map(|handle| handle.wait());
//! if let Ok(done) = completion {
//!     println!("{} {}", done.sink().status(), done.sink().description());
//! }
//! ```

pub mod cancel;
pub mod connection;
pub mod constants;
pub mod dispatch;
mod engine;
mod error;
pub mod parser;
pub mod redirect;
pub mod request;
pub mod tls;

pub use cancel::CancellationToken;
pub use connection::{Connection, ProxyKind, Route, TransportKind, connect};
pub use dispatch::{Dispatch, Inline};
pub use engine::{Callback, Completion, Engine, TransferHandle};
pub use error::{EngineError, FailureKind, TransferError};
pub use parser::{ParserState, ResponseParser};
pub use redirect::{RedirectController, StatusAction};
pub use request::{Credentials, RequestSpec, build};
