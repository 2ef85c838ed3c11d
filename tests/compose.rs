//! Integration tests for middleware composition: onion ordering, the
//! double-next guard, short-circuiting, and failure propagation.

use std::sync::Arc;
use std::sync::Mutex;

use allium::{Application, Closed, Context, Error, Inbound, Next};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use http_body_util::BodyExt;

fn inbound(method: Method, target: &str) -> Inbound {
    Inbound {
        method,
        uri: target.parse().expect("test uri"),
        version: Version::HTTP_11,
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: &str) {
    log.lock().unwrap().push(entry.to_owned());
}

#[tokio::test]
async fn onion_ordering_is_total() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let mut app = Application::new();
    for name in ["m0", "m1", "m2"] {
        let log = Arc::clone(&log);
        app = app.with(move |ctx: Context, next: Next| {
            let log = Arc::clone(&log);
            async move {
                record(&log, &format!("enter({name})"));
                next.run(ctx).await?;
                record(&log, &format!("exit({name})"));
                Ok(())
            }
        });
    }

    app.callback()
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "enter(m0)",
            "enter(m1)",
            "enter(m2)",
            "exit(m2)",
            "exit(m1)",
            "exit(m0)",
        ]
    );
}

#[tokio::test]
async fn double_next_fails_the_whole_chain() {
    let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen_in_hook = Arc::clone(&seen);

    let app = Application::new()
        .on_error(move |err: &Error| {
            *seen_in_hook.lock().unwrap() = Some(err.to_string());
        })
        .with(|ctx: Context, next: Next| async move {
            let again = next.clone();
            next.run(ctx.clone()).await?;
            again.run(ctx).await
        })
        .with(|ctx: Context, _next: Next| async move {
            ctx.response().set_body("ok");
            Ok(())
        });

    let res = app
        .callback()
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;

    // The second invocation rejects the whole chain, so the fallback
    // response wins over the body the inner middleware produced.
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        seen.lock().unwrap().as_deref(),
        Some("next() called more than once within a single middleware")
    );
}

#[tokio::test]
async fn racing_next_clones_admit_exactly_one() {
    let rejections = Arc::new(Mutex::new(0));
    let rejections_seen = Arc::clone(&rejections);

    Application::new()
        .with(move |ctx: Context, next: Next| {
            let rejections = Arc::clone(&rejections_seen);
            async move {
                // Two clones of the same continuation, run from separate
                // tasks: whichever loses the race fails, the other proceeds.
                let a = tokio::spawn(next.clone().run(ctx.clone()));
                let b = tokio::spawn(next.run(ctx));
                for result in [a.await.unwrap(), b.await.unwrap()] {
                    if let Err(Error::NextCalledTwice) = result {
                        *rejections.lock().unwrap() += 1;
                    }
                }
                Ok(())
            }
        })
        .with(|_ctx: Context, _next: Next| async move { Ok(()) })
        .callback()
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;

    assert_eq!(*rejections.lock().unwrap(), 1);
}

#[tokio::test]
async fn empty_chain_settles_with_default_not_found() {
    let res = Application::new()
        .callback()
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    // No middleware, no message: the finalizer synthesizes the decimal code.
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"404");
}

#[tokio::test]
async fn skipping_next_short_circuits_downstream() {
    let reached = Arc::new(Mutex::new(false));
    let reached_inner = Arc::clone(&reached);

    let res = Application::new()
        .with(|ctx: Context, _next: Next| async move {
            // Deliberately never runs next: the rest of the chain is skipped
            // and that is not an error.
            ctx.response().set_body("cached");
            Ok(())
        })
        .with(move |_ctx: Context, _next: Next| {
            let reached = Arc::clone(&reached_inner);
            async move {
                *reached.lock().unwrap() = true;
                Ok(())
            }
        })
        .callback()
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(!*reached.lock().unwrap());
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"cached");
}

#[tokio::test]
async fn failure_before_next_short_circuits_and_propagates() {
    let entered_downstream = Arc::new(Mutex::new(false));
    let entered = Arc::clone(&entered_downstream);
    let exits_ran = Arc::new(Mutex::new(false));
    let exits = Arc::clone(&exits_ran);

    let res = Application::new()
        .silent(true)
        .with(move |ctx: Context, next: Next| {
            let exits = Arc::clone(&exits);
            async move {
                let result = next.run(ctx).await;
                // Post-next code still runs after the failure propagated up.
                *exits.lock().unwrap() = true;
                result
            }
        })
        .with(|_ctx: Context, _next: Next| async move {
            Err(Error::throw(
                StatusCode::UNPROCESSABLE_ENTITY,
                "name required",
            ))
        })
        .with(move |_ctx: Context, _next: Next| {
            let entered = Arc::clone(&entered);
            async move {
                *entered.lock().unwrap() = true;
                Ok(())
            }
        })
        .callback()
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;

    assert!(!*entered_downstream.lock().unwrap());
    assert!(*exits_ran.lock().unwrap());
    // Exposed client error: status and message surface in the fallback.
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"name required");
}

#[tokio::test]
async fn composed_chain_is_a_snapshot_of_the_registry() {
    let app = Application::new().with(|ctx: Context, _next: Next| async move {
        ctx.response().set_body("first");
        Ok(())
    });

    // Freeze a handler, then register more middleware on the application.
    let frozen = app.callback();
    let app = app.with(|ctx: Context, _next: Next| async move {
        ctx.response().set_body("second");
        Ok(())
    });

    let res = frozen
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"first");

    // A fresh composition observes the longer sequence. The first
    // middleware never runs next, so "first" still wins — order holds.
    let res = app
        .callback()
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"first");
}

#[tokio::test]
async fn state_bag_carries_values_between_middleware() {
    let res = Application::new()
        .with(|ctx: Context, next: Next| async move {
            ctx.set_state("user", "alice");
            next.run(ctx).await
        })
        .with(|ctx: Context, _next: Next| async move {
            let user = ctx.state("user").and_then(|v| v.as_str().map(str::to_owned));
            ctx.response().set_body(format!("hello {}", user.unwrap_or_default()));
            Ok(())
        })
        .callback()
        .handle(inbound(Method::GET, "/"), Closed::never())
        .await;

    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello alice");
}
