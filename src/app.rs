//! Application object and the per-request lifecycle controller.
//!
//! An [`Application`] is configuration plus an ordered middleware registry.
//! [`Application::callback`] freezes the registry into one composed chain
//! and returns the [`RequestHandler`] that the server invokes once per
//! inbound request: build a context, run the chain, finalize — or, when the
//! chain fails, route the error through the application's single error hook
//! and write the transport fallback.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::context::Context;
use crate::error::Error;
use crate::middleware::{Chain, DynMiddleware, Middleware, compose};
use crate::respond::respond;
use crate::server::Server;
use crate::transport::{Closed, Inbound, Outbound, ResponseBody};

/// The error channel subscriber: called once per failure that escapes a
/// middleware chain. It never writes to the HTTP transport — that is the
/// lifecycle controller's job.
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

// ── Templates ────────────────────────────────────────────────────────────────

/// Shared default behavior for every request's views — one immutable set
/// per application, referenced (never copied) by each per-request view.
pub(crate) struct Templates {
    pub context: ContextTemplate,
    pub request: RequestTemplate,
    pub response: ResponseTemplate,
}

pub(crate) struct ContextTemplate {
    pub env: String,
}

pub(crate) struct RequestTemplate {
    pub proxy: bool,
    pub subdomain_offset: usize,
}

pub(crate) struct ResponseTemplate {
    /// Status a body implies when none was set explicitly.
    pub implicit_status: http::StatusCode,
    pub text_type: &'static str,
    pub json_type: &'static str,
    pub binary_type: &'static str,
}

// ── Application ──────────────────────────────────────────────────────────────

/// The application: configuration, the middleware registry, and the error
/// channel. Construct once at startup, register middleware, then
/// [`listen`](Self::listen) (or [`callback`](Self::callback) for custom
/// transports and tests).
///
/// ```rust,no_run
/// use allium::{Application, Context, Next};
///
/// #[tokio::main]
/// async fn main() {
///     Application::new()
///         .with(|ctx: Context, next: Next| async move {
///             ctx.response().set_header("x-powered-by", "allium");
///             next.run(ctx).await
///         })
///         .with(|ctx: Context, _next: Next| async move {
///             ctx.response().set_body("Hello World");
///             Ok(())
///         })
///         .listen("0.0.0.0:3000")
///         .await
///         .expect("server error");
/// }
/// ```
pub struct Application {
    middleware: Vec<DynMiddleware>,
    error_hook: Option<ErrorHook>,
    proxy: bool,
    subdomain_offset: usize,
    env: String,
    silent: bool,
}

impl Application {
    /// A fresh application. The environment is seeded from `APP_ENV`,
    /// defaulting to `"development"`.
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
            error_hook: None,
            proxy: false,
            subdomain_offset: 2,
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_owned()),
            silent: false,
        }
    }

    /// Registers a middleware. Append-only; returns `self` so registrations
    /// chain naturally.
    ///
    /// Anything that is not a middleware — not callable with the canonical
    /// `(ctx, next)` shape — is rejected at compile time by the trait bound:
    ///
    /// ```compile_fail
    /// allium::Application::new().with(42);
    /// ```
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        tracing::debug!(
            position = self.middleware.len(),
            "middleware registered"
        );
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Replaces the default error channel subscriber.
    pub fn on_error(mut self, hook: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Trust `x-forwarded-*` headers from an upstream proxy.
    pub fn proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    /// Number of trailing host labels that are not subdomains. Default 2
    /// (domain + tld).
    pub fn subdomain_offset(mut self, offset: usize) -> Self {
        self.subdomain_offset = offset;
        self
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    /// Suppress default error logging entirely.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// A read-only diagnostics snapshot. Nothing else is exposed.
    pub fn inspect(&self) -> Inspect {
        Inspect {
            subdomain_offset: self.subdomain_offset,
            proxy: self.proxy,
            env: self.env.clone(),
        }
    }

    /// Freezes the current middleware sequence into a composed chain and
    /// returns the per-request handler.
    ///
    /// Middleware registered after this call do not affect the returned
    /// handler — call `callback` again to pick them up. If no error hook
    /// was registered, the default subscriber is installed here.
    pub fn callback(&self) -> RequestHandler {
        let silent = self.silent;
        let hook = self
            .error_hook
            .clone()
            .unwrap_or_else(|| Arc::new(move |err: &Error| default_error_hook(err, silent)));

        RequestHandler {
            chain: compose(&self.middleware),
            templates: Arc::new(Templates {
                context: ContextTemplate { env: self.env.clone() },
                request: RequestTemplate {
                    proxy: self.proxy,
                    subdomain_offset: self.subdomain_offset,
                },
                response: ResponseTemplate {
                    implicit_status: http::StatusCode::OK,
                    text_type: "text/plain; charset=utf-8",
                    json_type: "application/json",
                    binary_type: "application/octet-stream",
                },
            }),
            hook,
        }
    }

    /// Builds the request handler and serves it on `addr` until graceful
    /// shutdown. Bootstrap sugar for `Server::bind(addr).serve(…)`.
    pub async fn listen(self, addr: &str) -> Result<(), Error> {
        Server::bind(addr).serve(self.callback()).await
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only application snapshot returned by [`Application::inspect`].
#[derive(Debug, Clone, Serialize)]
pub struct Inspect {
    pub subdomain_offset: usize,
    pub proxy: bool,
    pub env: String,
}

// ── Request lifecycle controller ─────────────────────────────────────────────

/// The composed request handler: one frozen chain, one template set, one
/// error hook. Invoked once per inbound request.
#[derive(Clone)]
pub struct RequestHandler {
    chain: Chain,
    templates: Arc<Templates>,
    hook: ErrorHook,
}

impl RequestHandler {
    /// Processes one request end to end and always yields a response —
    /// request-level failures are routed through the error hook and the
    /// context's transport fallback, never propagated to the caller.
    pub async fn handle(&self, inbound: Inbound, closed: Closed) -> http::Response<ResponseBody> {
        // Outbound starts at 404: an empty or all-pass-through chain yields
        // a well-defined not-found before any middleware runs.
        let transport = Arc::new(Mutex::new(Outbound::new()));

        let ctx = Context::new(Arc::clone(&self.templates), &inbound, Arc::clone(&transport));

        // The chain runs as its own task: losing the race against `closed`
        // produces the fallback response but does not abort in-flight
        // middleware, which may run to completion against a dead transport.
        let chain = tokio::spawn(self.chain.run(ctx.clone()));

        let result = tokio::select! {
            joined = chain => match joined {
                Ok(result) => result,
                // A panicking middleware surfaces as a plain chain failure.
                Err(join_err) => Err(Error::Other(Box::new(join_err))),
            },
            () = closed.wait() => Err(Error::ConnectionClosed),
        };

        match result {
            Ok(()) => respond(&ctx),
            Err(err) => {
                (self.hook)(&err);
                ctx.on_error(&err);
            }
        }

        let out = std::mem::take(&mut *transport.lock());
        out.into_http()
    }
}

// ── Default error subscriber ─────────────────────────────────────────────────

/// The default error channel subscriber: writes the error chain to stderr,
/// indented, surrounded by blank lines — unless suppressed.
fn default_error_hook(err: &Error, silent: bool) {
    if !should_log(err, silent) {
        return;
    }
    eprintln!("\n{}\n", indent_lines(&render_chain(err)));
}

/// Suppression policy: not-found errors and exposed errors are expected
/// traffic, and silent mode mutes everything.
fn should_log(err: &Error, silent: bool) -> bool {
    if silent {
        return false;
    }
    if err.status() == http::StatusCode::NOT_FOUND || err.is_exposed() {
        return false;
    }
    true
}

/// The error message plus its source chain, one line each.
fn render_chain(err: &Error) -> String {
    use std::fmt::Write;

    let mut buf = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        // write! to String is infallible
        let _ = write!(buf, "\ncaused by: {cause}");
        source = cause.source();
    }
    buf
}

/// Indents every line by two spaces.
fn indent_lines(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn not_found_errors_are_suppressed() {
        let err = Error::throw(StatusCode::NOT_FOUND, "missing");
        assert!(!should_log(&err, false));
    }

    #[test]
    fn exposed_errors_are_suppressed() {
        let err = Error::throw(StatusCode::BAD_REQUEST, "bad input");
        assert!(err.is_exposed());
        assert!(!should_log(&err, false));
    }

    #[test]
    fn silent_mode_suppresses_everything() {
        let err = Error::Other("boom".into());
        assert!(!should_log(&err, true));
    }

    #[test]
    fn server_errors_are_logged() {
        let err = Error::Other("boom".into());
        assert!(should_log(&err, false));
    }

    #[test]
    fn indentation_covers_every_line() {
        assert_eq!(indent_lines("a\nb\nc"), "  a\n  b\n  c");
    }

    #[test]
    fn chain_rendering_includes_sources() {
        let io = std::io::Error::other("disk on fire");
        let err = Error::Io(io);
        let rendered = render_chain(&err);
        assert!(rendered.starts_with("io:"));
        assert!(rendered.contains("caused by: disk on fire"));
    }
}
