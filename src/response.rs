//! Per-request response view and the [`Body`] value.
//!
//! The view accumulates what the middleware chain decided — status, message,
//! body, headers — without writing anything. The finalizer reads it once,
//! after the chain settles, and terminates the transport.

use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;

use crate::app::Templates;
use crate::context::{Context, ContextInner};
use crate::request::Request;
use crate::transport::{ByteStream, Outbound};

// ── Body ─────────────────────────────────────────────────────────────────────

/// The computed response body.
///
/// The variants matter to the finalizer: bytes and text go out verbatim, a
/// stream is connected to the transport unbuffered, structured values are
/// JSON-serialized, and `None` triggers a synthesized status-text body.
pub enum Body {
    None,
    Bytes(Bytes),
    Text(String),
    Json(Value),
    Stream(ByteStream),
}

impl Body {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

impl From<ByteStream> for Body {
    fn from(s: ByteStream) -> Self {
        Self::Stream(s)
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// The response view of one request. Clones are handles to the same
/// underlying response.
#[derive(Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

struct ResponseInner {
    state: Mutex<State>,
    /// The raw outgoing transport, borrowed for the request's duration.
    /// Status and headers live there — the view delegates.
    transport: Arc<Mutex<Outbound>>,
    templates: Arc<Templates>,
    ctx: OnceLock<Weak<ContextInner>>,
}

struct State {
    /// True once middleware set the status on purpose. Setting a body with
    /// no explicit status flips the default 404 to the implicit 200.
    explicit_status: bool,
    message: Option<String>,
    body: Body,
}

impl Response {
    pub(crate) fn new(transport: Arc<Mutex<Outbound>>, templates: Arc<Templates>) -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                state: Mutex::new(State {
                    explicit_status: false,
                    message: None,
                    body: Body::None,
                }),
                transport,
                templates,
                ctx: OnceLock::new(),
            }),
        }
    }

    /// Wires the back-reference to the owning context. Called exactly once
    /// by the context factory.
    pub(crate) fn attach(&self, ctx: Weak<ContextInner>) {
        let _ = self.inner.ctx.set(ctx);
    }

    pub(crate) fn transport(&self) -> Arc<Mutex<Outbound>> {
        Arc::clone(&self.inner.transport)
    }

    pub(crate) fn text_type(&self) -> &'static str {
        self.inner.templates.response.text_type
    }

    // ── Status and message ───────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode {
        self.inner.transport.lock().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.inner.transport.lock().status = status;
        self.inner.state.lock().explicit_status = true;
    }

    /// The explicit status message, if one was set. The finalizer falls
    /// back to the decimal status code when this is `None`.
    pub fn message(&self) -> Option<String> {
        self.inner.state.lock().message.clone()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.inner.state.lock().message = Some(message.into());
    }

    // ── Body ─────────────────────────────────────────────────────────────────

    /// Sets the response body.
    ///
    /// If no status was set explicitly, the default 404 becomes 200 — a body
    /// means the request was handled. If no content-type header is present,
    /// one is inferred from the body variant.
    pub fn set_body(&self, body: impl Into<Body>) {
        let body = body.into();

        let mut out = self.inner.transport.lock();
        let mut state = self.inner.state.lock();
        if !state.explicit_status {
            out.status = self.inner.templates.response.implicit_status;
        }
        if !out.headers.contains_key(CONTENT_TYPE) {
            let inferred = match &body {
                Body::None => None,
                Body::Text(_) => Some(self.inner.templates.response.text_type),
                Body::Json(_) => Some(self.inner.templates.response.json_type),
                Body::Bytes(_) | Body::Stream(_) => {
                    Some(self.inner.templates.response.binary_type)
                }
            };
            if let Some(mime) = inferred {
                out.headers.insert(CONTENT_TYPE, HeaderValue::from_static(mime));
            }
        }
        state.body = body;
    }

    /// Takes the body out, leaving `Body::None`. The finalizer consumes it
    /// exactly once.
    pub(crate) fn take_body(&self) -> Body {
        std::mem::replace(&mut self.inner.state.lock().body, Body::None)
    }

    // ── Headers ──────────────────────────────────────────────────────────────

    /// Header lookup on the outgoing transport.
    pub fn header(&self, name: &str) -> Option<String> {
        self.inner
            .transport
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Sets a header on the outgoing transport. Invalid names or values are
    /// dropped with a warning rather than failing the request.
    pub fn set_header(&self, name: &str, value: &str) {
        let parsed = name
            .parse::<http::header::HeaderName>()
            .ok()
            .zip(HeaderValue::from_str(value).ok());
        match parsed {
            Some((name, value)) => {
                self.inner.transport.lock().headers.insert(name, value);
            }
            None => tracing::warn!(name, value, "dropped invalid response header"),
        }
    }

    pub fn remove_header(&self, name: &str) {
        self.inner.transport.lock().headers.remove(name);
    }

    /// Whether response headers have already gone out. Once true, the
    /// finalizer stops adjusting content headers.
    pub fn headers_sent(&self) -> bool {
        self.inner.transport.lock().headers_sent
    }

    /// Whether the transport can still accept output.
    pub fn writable(&self) -> bool {
        self.inner.transport.lock().writable()
    }

    // ── Associations ─────────────────────────────────────────────────────────

    /// The owning context. `None` once the request has been finalized and
    /// the context dropped.
    pub fn context(&self) -> Option<Context> {
        self.inner
            .ctx
            .get()
            .and_then(Weak::upgrade)
            .map(Context::from_inner)
    }

    /// The sibling request view.
    pub fn request(&self) -> Option<Request> {
        self.context().map(|ctx| ctx.request().clone())
    }
}
