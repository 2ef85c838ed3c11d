//! # allium
//!
//! A minimal middleware-first HTTP framework. An onion, and nothing else.
//!
//! ## The contract
//!
//! allium composes middleware and manages the request lifecycle. It does not
//! route, template, manage sessions, or terminate TLS — those are middleware
//! (or the reverse proxy's) business. What is left is the part every
//! framework gets subtly wrong: ordering guarantees, error propagation,
//! double-invocation hazards, and response finalization.
//!
//! - **Onion composition** — pre-`next` code runs outside-in, post-`next`
//!   code runs inside-out, deterministically, per request
//! - **One error channel** — everything that escapes a chain funnels through
//!   a single hook with a sane default
//! - **Finalization policy** — a strict decision tree turns whatever body
//!   the chain produced into correct bytes on the wire
//! - **Graceful shutdown** — SIGTERM / Ctrl-C, drains in-flight requests
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use allium::{Application, Context, Next};
//!
//! #[tokio::main]
//! async fn main() {
//!     Application::new()
//!         // logger: runs first on the way in, last on the way out
//!         .with(|ctx: Context, next: Next| async move {
//!             let start = std::time::Instant::now();
//!             next.run(ctx.clone()).await?;
//!             tracing::info!(
//!                 method = %ctx.request().method(),
//!                 url = ctx.request().url(),
//!                 status = ctx.response().status().as_u16(),
//!                 elapsed_ms = start.elapsed().as_millis() as u64,
//!                 "request"
//!             );
//!             Ok(())
//!         })
//!         // responder: short-circuits — never calls next
//!         .with(|ctx: Context, _next: Next| async move {
//!             ctx.response().set_body("Hello World");
//!             Ok(())
//!         })
//!         .listen("0.0.0.0:3000")
//!         .await
//!         .expect("server error");
//! }
//! ```

mod app;
mod context;
mod error;
mod middleware;
mod request;
mod respond;
mod response;
mod server;
mod transport;

pub use app::{Application, ErrorHook, Inspect, RequestHandler};
pub use context::Context;
pub use error::Error;
pub use middleware::{BoxFuture, Chain, DynMiddleware, Middleware, Next, compose};
pub use request::Request;
pub use response::{Body, Response};
pub use server::Server;
pub use transport::{ByteStream, CloseHandle, Closed, Inbound, ResponseBody};

/// The result type carried through middleware chains.
pub type Result<T = ()> = std::result::Result<T, Error>;
