//! Response finalization.
//!
//! After the chain settles successfully, exactly one call into [`respond`]
//! decides how to terminate the transport. The policy is a strict decision
//! tree, not independent checks: the no-body status class and HEAD pre-empt
//! everything below them, and the body variants are distinguished in order
//! before falling through to JSON serialization.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};

use crate::context::Context;
use crate::response::Body;
use crate::transport::Payload;

/// Terminates the transport output for a settled context.
pub(crate) fn respond(ctx: &Context) {
    // 1. The middleware opted out of finalization.
    if !ctx.respond() {
        return;
    }

    let response = ctx.response();
    let request = ctx.request();
    let transport = response.transport();
    let mut out = transport.lock();

    // 2. Output already terminated (stream connected, raw end, abort).
    if !out.writable() {
        return;
    }

    let status = out.status;
    let body = response.take_body();

    // 3. No-body status class: discard any body, advertise no entity.
    if empty_status(status) {
        out.strip_entity_headers();
        out.end(Payload::None);
        return;
    }

    // 4. HEAD: never write body bytes, but report the length the matching
    //    GET would have had, when we can still set headers and know it.
    if request.method() == Method::HEAD {
        if !out.headers_sent && !out.headers.contains_key(CONTENT_LENGTH) {
            if let Some(len) = body_length(&body) {
                out.headers.insert(CONTENT_LENGTH, HeaderValue::from(len as u64));
            }
        }
        out.end(Payload::None);
        return;
    }

    // 5. No body produced: synthesize a status text. HTTP/2+ has no reason
    //    phrases, so it always gets the decimal code.
    if body.is_none() {
        let text = if request.is_http2_plus() {
            status.as_u16().to_string()
        } else {
            response
                .message()
                .unwrap_or_else(|| status.as_u16().to_string())
        };
        if !out.headers_sent {
            out.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(response.text_type()));
            out.headers
                .insert(CONTENT_LENGTH, HeaderValue::from(text.len() as u64));
        }
        out.end(Payload::Full(Bytes::from(text)));
        return;
    }

    // 6–9. Concrete bodies, in order: raw bytes, text, stream, structured.
    match body {
        Body::Bytes(bytes) => out.end(Payload::Full(bytes)),
        Body::Text(text) => out.end(Payload::Full(Bytes::from(text))),
        Body::Stream(stream) => out.end(Payload::Stream(stream)),
        Body::Json(value) => {
            // String-keyed maps only, so serialization cannot fail.
            let bytes = serde_json::to_vec(&value).unwrap_or_default();
            // Overwrites any length a middleware left behind: the serialized
            // bytes are the single source of truth.
            if !out.headers_sent {
                out.headers
                    .insert(CONTENT_LENGTH, HeaderValue::from(bytes.len() as u64));
            }
            out.end(Payload::Full(Bytes::from(bytes)));
        }
        Body::None => out.end(Payload::None),
    }
}

/// Statuses that must not carry a body.
fn empty_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 204 | 205 | 304)
}

/// The byte length the body will serialize to, when knowable up front.
fn body_length(body: &Body) -> Option<usize> {
    match body {
        Body::None | Body::Stream(_) => None,
        Body::Bytes(bytes) => Some(bytes.len()),
        Body::Text(text) => Some(text.len()),
        Body::Json(value) => Some(serde_json::to_vec(value).unwrap_or_default().len()),
    }
}
