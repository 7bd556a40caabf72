use super::AppState;
use crate::error::ApiError;
use axum::body::{self, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::LengthLimitError;
use std::error::Error;
use tracing::debug;

/// Reads at most `limit` bytes. Only an oversized body is a 413; a stream
/// that breaks off early is the caller's malformed request.
async fn buffer(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    body::to_bytes(body, limit).await.map_err(|err| {
        let top: &(dyn Error + 'static) = &err;
        let mut source = Some(top);
        while let Some(cause) = source {
            if cause.is::<LengthLimitError>() {
                return ApiError::PayloadTooLarge;
            }
            source = cause.source();
        }
        debug!(error = %err, "request body could not be read");
        ApiError::Validation("Failed to read request body".to_string())
    })
}

/// Buffers the body, runs the admission gate over it, then hands the
/// handler a request rebuilt from the same bytes.
pub async fn admit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = buffer(body, state.max_body_bytes).await?;

    state
        .gate
        .validate(&parts.method, parts.uri.path(), &parts.headers, &bytes)
        .await?;

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// Sits outside the CORS layer, which answers preflights itself, so that
/// `OPTIONS` still counts against the caller's rate limit.
pub async fn limit_preflight(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.method() == Method::OPTIONS {
        state
            .gate
            .validate(request.method(), request.uri().path(), request.headers(), &[])
            .await?;
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use futures::stream;
    use std::io;

    #[tokio::test]
    async fn body_within_limit_is_returned_whole() {
        let bytes = buffer(Body::from("{\"clip_ids\":[]}"), 64).await.unwrap();
        assert_eq!(&bytes[..], b"{\"clip_ids\":[]}");
    }

    #[tokio::test]
    async fn oversized_body_is_payload_too_large() {
        let err = buffer(Body::from(vec![b'a'; 100]), 10).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn broken_stream_is_a_bad_request() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"clip_")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ];
        let err = buffer(Body::from_stream(stream::iter(chunks)), 1024)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
