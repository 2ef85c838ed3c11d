//! Middleware trait and the chain composer.
//!
//! # How async middleware are stored
//!
//! The application needs to hold middleware of *different* types in one
//! ordered sequence. Rust collections can only hold one concrete type, so we
//! use **trait objects** (`Arc<dyn Middleware>`) to hide each concrete type
//! behind a common interface and store everything uniformly.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn log(ctx: Context, next: Next) -> Result<()> { … }  ← user writes this
//!        ↓ app.with(log)
//! Arc<dyn Middleware>                                         ← blanket impl + Arc
//!        ↓ compose(&[…])
//! Chain { stack: Arc<[…]> }                                   ← immutable snapshot
//!        ↓ chain.run(ctx)  at request time
//! dispatch(0) → m0.handle(ctx, Next{1}) → … → terminal Ok(())
//! ```
//!
//! The only runtime cost per layer is one Arc clone (atomic inc) + one
//! virtual call + one boxed future — negligible compared to network I/O.
//!
//! # The onion
//!
//! Code a middleware writes *before* awaiting `next.run(…)` executes
//! outside-in (`m0, m1, …`); code written *after* the await executes
//! inside-out (`…, m1, m0`), strictly after every downstream layer settled
//! or failed. Not calling `next` at all short-circuits the rest of the
//! chain — that is legitimate and common (caches, auth gates). Calling it
//! twice within one layer is a defect and fails the whole chain with
//! [`Error::NextCalledTwice`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use crate::context::Context;
use crate::error::Error;

/// A heap-allocated, type-erased future that resolves to the chain result.
///
/// `Pin<Box<…>>` because the runtime must poll the future in-place;
/// `Send + 'static` so tokio can move it across worker threads.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'static>>;

/// A reference-counted, type-erased middleware shared across requests.
pub type DynMiddleware = Arc<dyn Middleware>;

/// A unit of request-processing logic.
///
/// You rarely implement this by hand — any `async fn` or closure with the
/// signature below satisfies it through the blanket impl:
///
/// ```text
/// async fn name(ctx: Context, next: Next) -> allium::Result<()>
/// ```
///
/// Implement it directly when the middleware carries configuration:
///
/// ```rust
/// use allium::{BoxFuture, Context, Middleware, Next};
///
/// struct Banner(&'static str);
///
/// impl Middleware for Banner {
///     fn handle(&self, ctx: Context, next: Next) -> BoxFuture {
///         ctx.response().set_header("x-banner", self.0);
///         next.run(ctx)
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Processes one request. `ctx` is a cheap handle to the per-request
    /// context; `next` is the continuation into the rest of the chain.
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture;
}

/// Any function or closure with the canonical `(ctx, next)` shape is a
/// middleware.
impl<F, Fut> Middleware for F
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture {
        Box::pin(self(ctx, next))
    }
}

// ── Composer ─────────────────────────────────────────────────────────────────

/// Folds an ordered middleware sequence into one [`Chain`].
///
/// The sequence is snapshotted: mutating the source slice afterwards never
/// affects this chain. To observe changes, compose again.
pub fn compose(middleware: &[DynMiddleware]) -> Chain {
    Chain { stack: middleware.to_vec().into() }
}

/// A composed middleware chain — the single operation the lifecycle
/// controller invokes per request.
#[derive(Clone)]
pub struct Chain {
    stack: Arc<[DynMiddleware]>,
}

impl Chain {
    /// Runs the chain against `ctx`.
    ///
    /// An empty chain settles `Ok(())` without touching the context.
    /// Concurrent runs of the same chain are fully independent: the
    /// double-call watermark is created fresh per run.
    pub fn run(&self, ctx: Context) -> BoxFuture {
        dispatch(
            Arc::clone(&self.stack),
            0,
            Arc::new(AtomicIsize::new(-1)),
            ctx,
        )
    }

    /// Number of layers in this chain.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// The continuation a middleware receives into the downstream layers.
///
/// `Clone` so a middleware may stash it, but a given layer's continuation
/// may only ever be *run* once per request — the second run fails the chain
/// with [`Error::NextCalledTwice`], however many clones exist.
#[derive(Clone)]
pub struct Next {
    stack: Arc<[DynMiddleware]>,
    index: usize,
    watermark: Arc<AtomicIsize>,
}

impl Next {
    /// Transfers control to the next downstream layer (or to the terminal
    /// no-op past the end of the chain). Await the returned future to get
    /// the downstream result back.
    pub fn run(self, ctx: Context) -> BoxFuture {
        dispatch(self.stack, self.index, self.watermark, ctx)
    }
}

/// One wrapper layer of the onion.
///
/// The watermark records the deepest layer dispatched so far in this run;
/// dispatching at or below it means some `next` was run twice.
fn dispatch(
    stack: Arc<[DynMiddleware]>,
    index: usize,
    watermark: Arc<AtomicIsize>,
    ctx: Context,
) -> BoxFuture {
    Box::pin(async move {
        // fetch_max keeps the guard airtight when clones race from separate
        // tasks: exactly one caller observes a previous watermark below its
        // index.
        if watermark.fetch_max(index as isize, Ordering::SeqCst) >= index as isize {
            return Err(Error::NextCalledTwice);
        }

        match stack.get(index).map(Arc::clone) {
            Some(mw) => {
                let next = Next { stack, index: index + 1, watermark };
                mw.handle(ctx, next).await
            }
            // Terminal no-op: the innermost layer of the onion.
            None => Ok(()),
        }
    })
}
