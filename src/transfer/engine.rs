//! Transfer orchestration.
//!
//! An [`Engine`] owns one transfer. [`Engine::start`] consumes it and spawns
//! a dedicated worker thread that runs connect, send, parse and redirect
//! with blocking IO. When the transfer ends, successfully or not, the worker
//! finalizes the sink, posts the callback onto the caller's dispatch context
//! and then resolves the [`TransferHandle`].
//!
//! # Example
//!
//! ```no_run
//! use anetd_core::{Engine, ResponseSink};
//!
//! # async fn example() {
//! let mut engine = Engine::new(tokio::runtime::Handle::current());
//! engine.set_callback(|done| println!("finished: {}", done.sink().status()));
//! let handle = engine
//!     .start(ResponseSink::in_memory("http://example.com/"))
//!     .expect("worker thread");
//! let completion = handle.await;
//! assert!(completion.is_success());
//! # }
//! ```

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use super::cancel::CancellationToken;
use super::connection::{self, Connection, cancelled_or};
use super::dispatch::Dispatch;
use super::parser::ResponseParser;
use super::redirect::{RedirectController, StatusAction};
use super::request::{self, Credentials, RequestSpec};
use super::{EngineError, TransferError};
use crate::config::EngineConfig;
use crate::sink::ResponseSink;
use crate::url::Url;

const WORKER_THREAD_NAME: &str = "anetd-transfer";

/// Completion callback; runs on the engine's dispatch context.
pub type Callback = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Final outcome of a transfer.
///
/// The sink always reflects the last status line received, including on
/// failure.
#[derive(Debug, Clone)]
pub struct Completion {
    sink: ResponseSink,
    error: Option<Arc<TransferError>>,
    redirects: u32,
}

impl Completion {
    fn lost(sink: ResponseSink) -> Self {
        if let Err(error) = sink.completed() {
            warn!(url = %sink.url(), %error, "failed to finalize sink");
        }
        Self {
            sink,
            error: Some(Arc::new(TransferError::WorkerPanicked)),
            redirects: 0,
        }
    }

    #[must_use]
    pub fn sink(&self) -> &ResponseSink {
        &self.sink
    }

    #[must_use]
    pub fn into_sink(self) -> ResponseSink {
        self.sink
    }

    #[must_use]
    pub fn error(&self) -> Option<&TransferError> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Redirect hops followed before the final response.
    #[must_use]
    pub fn redirects(&self) -> u32 {
        self.redirects
    }

    /// Converts into the sink on success.
    ///
    /// # Errors
    ///
    /// Returns the transfer error when the transfer failed.
    pub fn into_result(self) -> Result<ResponseSink, Arc<TransferError>> {
        match self.error {
            None => Ok(self.sink),
            Some(error) => Err(error),
        }
    }
}

/// A configured, not yet started transfer.
pub struct Engine {
    dispatch: Arc<dyn Dispatch>,
    config: EngineConfig,
    request: RequestSpec,
    callback: Option<Callback>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("request", &self.request)
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine posting callbacks to `dispatch`, with proxies taken
    /// from the environment.
    pub fn new(dispatch: impl Dispatch) -> Self {
        Self::with_config(dispatch, EngineConfig::from_env())
    }

    pub fn with_config(dispatch: impl Dispatch, config: EngineConfig) -> Self {
        Self {
            dispatch: Arc::new(dispatch),
            config,
            request: RequestSpec::default(),
            callback: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn request(&self) -> &RequestSpec {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestSpec {
        &mut self.request
    }

    #[must_use]
    pub fn with_request(mut self, request: RequestSpec) -> Self {
        self.request = request;
        self
    }

    /// Registers the completion callback, replacing any previous one.
    pub fn set_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn set_http_auth(&mut self, username: impl Into<String>, password: impl Into<String>) -> &mut Self {
        self.request.set_http_auth(username, password);
        self
    }

    pub fn set_proxy_auth(&mut self, username: impl Into<String>, password: impl Into<String>) -> &mut Self {
        self.request.set_proxy_auth(username, password);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.request.set_header(name, value);
        self
    }

    pub fn set_argument(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.request.set_argument(name, value);
        self
    }

    pub fn set_method(&mut self, method: impl Into<String>) -> &mut Self {
        self.request.set_method(method);
        self
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.request.set_body(body);
        self
    }

    /// Starts the transfer into `sink` on a new worker thread.
    ///
    /// The engine is consumed, so one engine never runs two transfers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::WorkerSpawn`] if the thread cannot be created.
    pub fn start(self, sink: ResponseSink) -> Result<TransferHandle, EngineError> {
        let Self {
            dispatch,
            config,
            request,
            callback,
        } = self;
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let worker = Worker {
            config,
            request,
            sink: sink.clone(),
            token: token.clone(),
        };

        info!(url = %sink.url(), "starting transfer");
        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let completion = worker.finish();
                if let Some(callback) = callback {
                    let for_callback = completion.clone();
                    dispatch.post(Box::new(move || callback(for_callback)));
                }
                if tx.send(completion).is_err() {
                    debug!("transfer handle dropped before completion");
                }
            })
            .map_err(EngineError::WorkerSpawn)?;

        Ok(TransferHandle {
            rx,
            sink,
            token,
            thread,
        })
    }
}

/// Handle to a running transfer.
///
/// Await it (it is a [`Future`]) or call [`wait`](Self::wait) from a
/// synchronous thread. Dropping the handle does not stop the transfer.
#[derive(Debug)]
pub struct TransferHandle {
    rx: oneshot::Receiver<Completion>,
    sink: ResponseSink,
    token: CancellationToken,
    thread: JoinHandle<()>,
}

impl TransferHandle {
    /// The live sink, for polling progress while the transfer runs.
    #[must_use]
    pub fn sink(&self) -> &ResponseSink {
        &self.sink
    }

    /// Requests cancellation; the transfer completes with
    /// [`TransferError::Cancelled`] at its next blocking step.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the worker thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks the current thread until the transfer completes.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; await
    /// the handle there instead.
    #[must_use]
    pub fn wait(self) -> Completion {
        let sink = self.sink.clone();
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Completion::lost(sink))
    }
}

impl Future for TransferHandle {
    type Output = Completion;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Completion::lost(this.sink.clone())))
    }
}

/// State moved onto the worker thread.
struct Worker {
    config: EngineConfig,
    request: RequestSpec,
    sink: ResponseSink,
    token: CancellationToken,
}

impl Worker {
    /// Runs the transfer to its end and finalizes the sink.
    fn finish(self) -> Completion {
        let mut redirects = RedirectController::new(self.config.max_redirects);
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(&mut redirects)));
        self.token.release();

        let mut error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(_) => {
                warn!("transfer worker panicked");
                Some(TransferError::WorkerPanicked)
            }
        };
        if let Err(sink_error) = self.sink.completed()
            && error.is_none()
        {
            error = Some(sink_error);
        }

        match &error {
            None => info!(
                url = %self.sink.url(),
                status = self.sink.status(),
                bytes = self.sink.progress(),
                redirects = redirects.followed(),
                "transfer complete"
            ),
            Some(error) => warn!(
                url = %self.sink.url(),
                status = self.sink.status(),
                %error,
                "transfer failed"
            ),
        }

        Completion {
            sink: self.sink,
            error: error.map(Arc::new),
            redirects: redirects.followed(),
        }
    }

    /// Connect, send and receive until a final response or an error.
    #[instrument(skip(self, redirects), fields(url = %self.sink.url()))]
    fn run(&self, redirects: &mut RedirectController) -> Result<(), TransferError> {
        loop {
            self.token.check()?;
            let url = Url::parse(&self.sink.url())?;
            let request = self.request_for(&url);

            let mut conn =
                connection::connect(&url, &self.config, request.active_proxy_auth(), &self.token)?;
            // the previous hop's status stays visible until a new exchange starts
            self.sink.reset();
            let outcome = self.exchange(&mut conn, &request, &url, redirects);
            conn.shutdown();

            match outcome? {
                Some(next) => self.sink.set_url(next.to_string()),
                None => return Ok(()),
            }
        }
    }

    /// One hop: send the request, parse headers, then read the body or
    /// return the redirect target.
    fn exchange(
        &self,
        conn: &mut Connection,
        request: &RequestSpec,
        url: &Url,
        redirects: &mut RedirectController,
    ) -> Result<Option<Url>, TransferError> {
        let bytes = request::build(request, url, conn.proxy_kind());
        self.token.check()?;
        conn.write_all(&bytes)
            .and_then(|()| conn.flush())
            .map_err(|source| cancelled_or(&self.token, TransferError::StreamWrite { source }))?;
        debug!(bytes = bytes.len(), method = %request.method, "request sent");

        let mut parser = ResponseParser::new(self.config.read_buffer_size);
        parser.read_headers(conn, &self.sink, &self.token)?;
        debug!(
            status = self.sink.status(),
            description = %self.sink.description(),
            "response headers received"
        );

        match redirects.evaluate(&self.sink, url) {
            StatusAction::Accept => {
                parser.read_body(conn, &self.sink, &self.token)?;
                Ok(None)
            }
            StatusAction::Redirect(next) => {
                info!(to = %next, hop = redirects.followed(), "redirected");
                Ok(Some(next))
            }
            StatusAction::Abort(error) => Err(error),
        }
    }

    /// The request for this hop, filling credentials from URL userinfo when
    /// none were set explicitly.
    fn request_for(&self, url: &Url) -> Cow<'_, RequestSpec> {
        let mut request = Cow::Borrowed(&self.request);
        let has_http_auth = self.request.http_auth.as_ref().is_some_and(|c| !c.is_empty());
        if !has_http_auth && let Some(credentials) = Credentials::from_url(url) {
            request.to_mut().http_auth = Some(credentials);
        }
        if self.request.active_proxy_auth().is_none()
            && let Some(credentials) = self
                .config
                .proxy
                .for_scheme(url.scheme())
                .and_then(Credentials::from_url)
        {
            request.to_mut().proxy_auth = Some(credentials);
        }
        request
    }
}
