//! Transport boundary: what the core needs from the wire, nothing more.
//!
//! The lifecycle core never touches a socket. It consumes an [`Inbound`]
//! (the parsed request plus its collected body bytes), accumulates the
//! outgoing state in an [`Outbound`], and hands the result back as a plain
//! `http::Response`. The server module owns the hyper plumbing on both
//! sides of that boundary.

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use tokio::sync::oneshot;

/// A streaming response body: chunks of bytes, produced lazily.
///
/// The finalizer connects a stream body to the transport without buffering;
/// back-pressure and completion are delegated to hyper. `Sync` because the
/// boxed hyper body demands it; channel- and iterator-backed streams
/// qualify.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// The concrete body type of every response allium produces.
pub type ResponseBody = BoxBody<Bytes, io::Error>;

// ── Inbound ──────────────────────────────────────────────────────────────────

/// One parsed inbound request, body already collected.
///
/// Plain data at the boundary — fields are public so alternative transports
/// (and tests) can construct one directly.
pub struct Inbound {
    pub method: Method,
    /// The raw request-target as received; captured into `original_url`
    /// before any middleware can rewrite the working url.
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Inbound {
    /// Builds an `Inbound` from hyper request parts plus collected bytes.
    pub fn from_http(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// What `end` recorded: the terminal output of one request.
pub(crate) enum Payload {
    None,
    Full(Bytes),
    Stream(ByteStream),
}

/// The outgoing side of the transport pair.
///
/// Accumulates status and headers while the chain runs; [`end`](Self::end)
/// terminates it. The first `end` wins — later calls are no-ops, which is
/// what makes the finalizer and the error fallback safe to race.
pub struct Outbound {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) headers_sent: bool,
    finished: bool,
    payload: Payload,
}

impl Outbound {
    pub(crate) fn new() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            headers_sent: false,
            finished: false,
            payload: Payload::None,
        }
    }

    /// False once the output has been terminated.
    pub(crate) fn writable(&self) -> bool {
        !self.finished
    }

    /// Terminates the output. Idempotent: only the first call records a
    /// payload.
    pub(crate) fn end(&mut self, payload: Payload) {
        if self.finished {
            return;
        }
        self.headers_sent = true;
        self.finished = true;
        self.payload = payload;
    }

    /// Drops the body-describing headers. Used for the no-body status class
    /// (204/205/304), which must not advertise an entity.
    pub(crate) fn strip_entity_headers(&mut self) {
        self.headers.remove(CONTENT_TYPE);
        self.headers.remove(CONTENT_LENGTH);
        self.headers.remove(TRANSFER_ENCODING);
    }

    /// Converts the accumulated state into the response hyper will write.
    pub(crate) fn into_http(self) -> http::Response<ResponseBody> {
        let body = match self.payload {
            Payload::None => Empty::new().map_err(|never| match never {}).boxed(),
            Payload::Full(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed(),
            // Qualified call: StreamExt also has a `boxed`.
            Payload::Stream(stream) => {
                BodyExt::boxed(StreamBody::new(stream.map(|chunk| chunk.map(Frame::data))))
            }
        };

        let mut res = http::Response::new(body);
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

impl Default for Outbound {
    fn default() -> Self {
        Self::new()
    }
}

// ── Completion observer ──────────────────────────────────────────────────────

/// Transport-completion observer: resolves if the underlying connection
/// finishes before the chain settles, routing that condition through the
/// same error path as an in-chain failure.
///
/// hyper cancels abandoned requests by dropping their futures, so the stock
/// server passes [`Closed::never`]. [`Closed::pair`] exists for transports
/// that surface close events explicitly — and for tests.
pub struct Closed {
    rx: Option<oneshot::Receiver<()>>,
}

impl Closed {
    /// An observer that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// An armed observer plus the handle that fires it.
    pub fn pair() -> (CloseHandle, Self) {
        let (tx, rx) = oneshot::channel();
        (CloseHandle { tx }, Self { rx: Some(rx) })
    }

    /// Resolves when the transport reports completion. Dropping the
    /// [`CloseHandle`] without calling `close` is not a completion signal.
    pub(crate) async fn wait(self) {
        match self.rx {
            Some(rx) => {
                if rx.await.is_err() {
                    // Sender dropped silently: the connection outlived the
                    // handle. Treat as "never closes".
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Fires the paired [`Closed`] observer.
pub struct CloseHandle {
    tx: oneshot::Sender<()>,
}

impl CloseHandle {
    /// Signals that the connection finished (closed, aborted, or errored).
    pub fn close(self) {
        let _ = self.tx.send(());
    }
}
