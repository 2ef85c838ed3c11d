//! Minimal allium example — a logger, an auth gate, and a responder.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i http://localhost:3000/ -H 'x-api-key: letmein'
//!   curl -i -X HEAD http://localhost:3000/ -H 'x-api-key: letmein'

use std::time::Instant;

use allium::{Application, Context, Error, Next};
use http::StatusCode;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    Application::new()
        // Outermost layer: times the whole onion, sets a response header on
        // the way in, logs on the way out — after every inner layer settled.
        .with(|ctx: Context, next: Next| async move {
            let start = Instant::now();
            ctx.response().set_header("x-powered-by", "allium");
            let result = next.run(ctx.clone()).await;
            tracing::info!(
                method = %ctx.request().method(),
                url = ctx.request().url(),
                status = ctx.response().status().as_u16(),
                elapsed_us = start.elapsed().as_micros() as u64,
                "request"
            );
            result
        })
        // Auth gate: short-circuits without running next, or raises an
        // exposed error the default hook will not log.
        .with(|ctx: Context, next: Next| async move {
            match ctx.request().header("x-api-key") {
                Some("letmein") => {
                    ctx.set_state("user", "alice");
                    next.run(ctx).await
                }
                Some(_) => Err(Error::throw(StatusCode::FORBIDDEN, "bad api key")),
                None => Err(Error::throw(StatusCode::UNAUTHORIZED, "x-api-key required")),
            }
        })
        // Responder: innermost layer.
        .with(|ctx: Context, _next: Next| async move {
            let user = ctx
                .state("user")
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            ctx.response().set_body(serde_json::json!({
                "hello": user,
                "env": ctx.env(),
            }));
            Ok(())
        })
        .listen("0.0.0.0:3000")
        .await
        .expect("server error");
}
