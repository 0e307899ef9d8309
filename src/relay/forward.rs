use std::convert::Infallible;

use actix_web::{
    HttpRequest, HttpResponse, ResponseError,
    body::{self, BodyStream, SizedStream},
    http::{
        StatusCode,
        header::{HeaderName, HeaderValue},
    },
    web,
};
use futures_util::{StreamExt, stream};
use log::{debug, error, warn};

use super::session::RelayShared;

/// Headers describing the hop rather than the message. Host is replaced by the
/// target's, and framing is recomputed by each side.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn skip_request_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case("content-length")
        || HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn skip_response_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length") || HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("relay has no target")]
    NoTarget,
    #[error("upstream {0} timed out")]
    Timeout(String),
    #[error("upstream {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("unsupported method {0}")]
    Method(String),
}

impl ForwardError {
    /// Value of the `X-Relay-Error` header, so callers can tell relay failures from
    /// responses the printer itself produced.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::NoTarget => "no-target",
            ForwardError::Timeout(_) => "timeout",
            ForwardError::Unreachable { .. } => "unreachable",
            ForwardError::TooLarge(_) => "too-large",
            ForwardError::Body(_) => "body",
            ForwardError::Method(_) => "method",
        }
    }
}

impl ResponseError for ForwardError {
    fn status_code(&self) -> StatusCode {
        match self {
            ForwardError::NoTarget => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
            ForwardError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ForwardError::Body(_) | ForwardError::Method(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(("X-Relay-Error", self.kind()))
            .body(self.to_string())
    }
}

async fn buffer_body(mut payload: web::Payload, limit: usize) -> Result<web::Bytes, ForwardError> {
    let mut buf = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ForwardError::Body(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(ForwardError::TooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Catch-all handler of the relay listener: buffer, inspect, forward.
pub(crate) async fn relay_request(
    req: HttpRequest,
    payload: web::Payload,
    shared: web::Data<RelayShared>,
) -> Result<HttpResponse, ForwardError> {
    let target = shared.target().await.ok_or(ForwardError::NoTarget)?;
    let body = buffer_body(payload, shared.config().max_body_bytes).await?;
    shared.inspect(&req, &body, &target).await;
    forward(&shared, &req, body, &target).await
}

async fn forward(
    shared: &RelayShared,
    req: &HttpRequest,
    body: web::Bytes,
    target: &str,
) -> Result<HttpResponse, ForwardError> {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream = format!("{}:{}", target, shared.config().upstream_port);
    let url = format!("http://{upstream}{path}");
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|_| ForwardError::Method(req.method().to_string()))?;
    debug!("relay {} {} -> {}", req.method(), path, upstream);

    let mut builder = shared
        .http()
        .request(method, &url)
        .timeout(shared.config().timeout);
    for (name, value) in req.headers() {
        if skip_request_header(name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let resp = builder.body(body).send().await.map_err(|e| {
        if e.is_timeout() {
            error!("relay {} {} to {upstream} timed out", req.method(), path);
            ForwardError::Timeout(upstream.clone())
        } else {
            error!("relay {} {} to {upstream} failed: {e}", req.method(), path);
            ForwardError::Unreachable {
                addr: upstream.clone(),
                reason: e.to_string(),
            }
        }
    })?;

    let status = StatusCode::from_u16(resp.status().as_u16()).map_err(|_| ForwardError::Unreachable {
        addr: upstream.clone(),
        reason: format!("invalid status {}", resp.status()),
    })?;
    let mut out = HttpResponse::build(status);
    for (name, value) in resp.headers() {
        if skip_response_header(name.as_str()) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(n), Ok(v)) => {
                out.append_header((n, v));
            }
            _ => warn!("dropping unrepresentable upstream header {}", name),
        }
    }
    let length = resp
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    // the builder's body helpers would add a content type or recompute the length
    if req.method() == actix_web::http::Method::HEAD {
        return Ok(match length {
            Some(len) => out.body(SizedStream::new(
                len,
                stream::empty::<Result<web::Bytes, Infallible>>(),
            )),
            None => out.body(body::None::new()),
        });
    }
    let upstream_body = resp.bytes_stream();
    Ok(match length {
        Some(len) => out.body(SizedStream::new(len, upstream_body)),
        None => out.body(BodyStream::new(upstream_body)),
    })
}
