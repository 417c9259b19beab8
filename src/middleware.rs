use axum::{
    Router,
    extract::Request,
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use tower_http::compression::{
    CompressionLayer,
    predicate::{And, DefaultPredicate, Predicate, SizeAbove},
};

use crate::{config::ServerOptions, error::ServingError};

/// Responses smaller than this are sent uncompressed.
pub const GZIP_MINIMUM_SIZE: u16 = 500;

/// Wraps `router` with the layers `options` turns on.
pub fn apply(router: Router, options: &ServerOptions) -> Router {
    let mut router = router;
    if options.gzip_response {
        router = router.layer(gzip_layer());
    }
    if options.redirect_https {
        router = router.layer(middleware::from_fn(https_redirect));
    }
    router
}

pub fn gzip_layer() -> CompressionLayer<And<DefaultPredicate, SizeAbove>> {
    CompressionLayer::new()
        .gzip(true)
        .compress_when(DefaultPredicate::new().and(SizeAbove::new(GZIP_MINIMUM_SIZE)))
}

/// Redirects plain `http`/`ws` requests to `https`/`wss` on the same host.
pub async fn https_redirect(request: Request, next: Next) -> Response {
    let scheme = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .or_else(|| request.uri().scheme_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| "http".to_string());

    let secure_scheme = match scheme.as_str() {
        "http" => "https",
        "ws" => "wss",
        _ => return next.run(request).await,
    };

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()));
    let Some(host) = host else {
        return ServingError::bad_request("Missing Host header, cannot redirect to https")
            .into_response();
    };
    let host = host.strip_suffix(":80").unwrap_or(host);
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let location = format!("{secure_scheme}://{host}{path}");
    tracing::debug!(%location, "redirecting to secure transport");
    (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response()
}
