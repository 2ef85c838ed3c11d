//! Per-request context: one composite object per inbound request.
//!
//! The context owns its [`Request`] and [`Response`] views and the
//! free-form state bag middleware use to talk to each other. Views hold
//! non-owning (`Weak`) back-references to the context, so `request.context()`
//! and `response.request()` resolve without reference cycles — the whole
//! graph is dropped when the request finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::HeaderValue;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use parking_lot::Mutex;
use serde_json::Value;

use crate::app::Templates;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::transport::{Inbound, Outbound, Payload};

/// The per-request context handle passed to every middleware.
///
/// Clones are cheap and refer to the same request. Exactly one logical
/// context exists per inbound request; contexts are never shared across
/// requests.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    request: Request,
    response: Response,
    state: Mutex<HashMap<String, Value>>,
    /// Bypass flag: set false to take full control of the transport and
    /// skip finalization entirely.
    respond: AtomicBool,
    templates: Arc<Templates>,
}

impl Context {
    /// The context factory: builds one context over a raw transport pair.
    ///
    /// Synchronous by contract — it must not suspend. All cross-references
    /// (context↔request, context↔response, request↔response) are wired
    /// before the context is handed to the first middleware.
    pub(crate) fn new(
        templates: Arc<Templates>,
        inbound: &Inbound,
        transport: Arc<Mutex<Outbound>>,
    ) -> Self {
        let request = Request::new(inbound, Arc::clone(&templates));
        let response = Response::new(transport, Arc::clone(&templates));

        let inner = Arc::new(ContextInner {
            request,
            response,
            state: Mutex::new(HashMap::new()),
            respond: AtomicBool::new(true),
            templates,
        });
        inner.request.attach(Arc::downgrade(&inner));
        inner.response.attach(Arc::downgrade(&inner));

        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn response(&self) -> &Response {
        &self.inner.response
    }

    /// The application environment string (`APP_ENV`, default
    /// `"development"`).
    pub fn env(&self) -> &str {
        &self.inner.templates.context.env
    }

    // ── State bag ────────────────────────────────────────────────────────────

    /// Reads a value from the request-scoped state bag.
    pub fn state(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().get(key).cloned()
    }

    /// Writes a value into the request-scoped state bag. The bag is
    /// free-form and exists for inter-middleware communication; it is never
    /// shared across requests.
    pub fn set_state(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.state.lock().insert(key.into(), value.into());
    }

    // ── Finalization control ─────────────────────────────────────────────────

    pub fn respond(&self) -> bool {
        self.inner.respond.load(Ordering::SeqCst)
    }

    /// Setting this false tells the finalizer to write nothing — the
    /// middleware has taken full control of the transport.
    pub fn set_respond(&self, respond: bool) {
        self.inner.respond.store(respond, Ordering::SeqCst);
    }

    // ── Error fallback ───────────────────────────────────────────────────────

    /// Maps an escaped error onto the transport, when it is still writable:
    /// clears accumulated headers, sets the error's status, and writes a
    /// plain-text body (the error message when exposed, the canonical
    /// reason phrase otherwise).
    pub(crate) fn on_error(&self, err: &Error) {
        let transport = self.inner.response.transport();
        let mut out = transport.lock();
        if !out.writable() {
            return;
        }

        let status = err.status();
        let message = if err.is_exposed() {
            err.to_string()
        } else {
            status
                .canonical_reason()
                .map(str::to_owned)
                .unwrap_or_else(|| status.as_u16().to_string())
        };

        out.headers.clear();
        out.status = status;
        out.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(self.inner.templates.response.text_type),
        );
        out.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(message.len() as u64));
        out.end(Payload::Full(Bytes::from(message)));
    }
}
