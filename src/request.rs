//! Per-request request view.
//!
//! A cheap-clone handle over the captured inbound data. Shared behavior the
//! view inherits from the application (proxy trust, subdomain offset) lives
//! in the request template — one immutable struct per application, not
//! copied per request.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use http::{HeaderMap, Method, Version};
use parking_lot::Mutex;

use crate::app::Templates;
use crate::context::{Context, ContextInner};
use crate::response::Response;
use crate::transport::Inbound;

/// The request view of one inbound request.
///
/// Clones are handles to the same underlying request.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    method: Method,
    version: Version,
    headers: HeaderMap,
    /// The request-target exactly as received, frozen at construction.
    original_url: String,
    /// The working url — middleware may rewrite it (url rewriting,
    /// mounting). `original_url` is unaffected.
    url: Mutex<String>,
    body: Bytes,
    templates: Arc<Templates>,
    ctx: OnceLock<Weak<ContextInner>>,
}

impl Request {
    pub(crate) fn new(inbound: &Inbound, templates: Arc<Templates>) -> Self {
        let target = inbound.uri.to_string();
        Self {
            inner: Arc::new(RequestInner {
                method: inbound.method.clone(),
                version: inbound.version,
                headers: inbound.headers.clone(),
                original_url: target.clone(),
                url: Mutex::new(target),
                body: inbound.body.clone(),
                templates,
                ctx: OnceLock::new(),
            }),
        }
    }

    /// Wires the back-reference to the owning context. Called exactly once
    /// by the context factory, before any middleware sees the view.
    pub(crate) fn attach(&self, ctx: Weak<ContextInner>) {
        let _ = self.inner.ctx.set(ctx);
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// HTTP/2 or later. The finalizer synthesizes status-code bodies
    /// differently for h2+, which has no reason phrases.
    pub(crate) fn is_http2_plus(&self) -> bool {
        self.inner.version >= Version::HTTP_2
    }

    /// The working request url. Middleware may rewrite it via
    /// [`set_url`](Self::set_url).
    pub fn url(&self) -> String {
        self.inner.url.lock().clone()
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.inner.url.lock() = url.into();
    }

    /// The request-target as it arrived, before any middleware ran.
    pub fn original_url(&self) -> &str {
        &self.inner.original_url
    }

    /// The path component of the working url.
    pub fn path(&self) -> String {
        let url = self.inner.url.lock();
        match url.find('?') {
            Some(i) => url[..i].to_owned(),
            None => url.clone(),
        }
    }

    /// The raw query string of the working url, without the `?`.
    pub fn query(&self) -> String {
        let url = self.inner.url.lock();
        match url.find('?') {
            Some(i) => url[i + 1..].to_owned(),
            None => String::new(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The collected request body bytes.
    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    /// The request host. Honors `x-forwarded-host` when the application
    /// trusts proxy headers.
    pub fn host(&self) -> Option<String> {
        if self.inner.templates.request.proxy {
            if let Some(forwarded) = self.header("x-forwarded-host") {
                return forwarded.split(',').next().map(|h| h.trim().to_owned());
            }
        }
        self.header("host").map(str::to_owned)
    }

    /// The request protocol: `x-forwarded-proto` when proxy headers are
    /// trusted, `"http"` otherwise (TLS terminates at the proxy).
    pub fn protocol(&self) -> String {
        if self.inner.templates.request.proxy {
            if let Some(proto) = self.header("x-forwarded-proto") {
                if let Some(first) = proto.split(',').next() {
                    return first.trim().to_owned();
                }
            }
        }
        "http".to_owned()
    }

    /// Subdomain labels of the host, leftmost-deepest last, excluding the
    /// final `subdomain_offset` labels. `tobi.ferrets.example.com` with the
    /// default offset of 2 yields `["ferrets", "tobi"]`.
    pub fn subdomains(&self) -> Vec<String> {
        let offset = self.inner.templates.request.subdomain_offset;
        match self.host() {
            Some(host) => {
                let labels: Vec<&str> = host.split(':').next().unwrap_or("").split('.').collect();
                labels
                    .iter()
                    .rev()
                    .skip(offset)
                    .map(|s| (*s).to_owned())
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// The owning context. `None` once the request has been finalized and
    /// the context dropped.
    pub fn context(&self) -> Option<Context> {
        self.inner
            .ctx
            .get()
            .and_then(Weak::upgrade)
            .map(Context::from_inner)
    }

    /// The sibling response view.
    pub fn response(&self) -> Option<Response> {
        self.context().map(|ctx| ctx.response().clone())
    }
}

/// Convenience: parsed query pairs. Repeated keys keep the last value.
impl Request {
    pub fn query_pairs(&self) -> HashMap<String, String> {
        self.query()
            .split('&')
            .filter(|s| !s.is_empty())
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k.to_owned(), v.to_owned()))
            })
            .collect()
    }
}
