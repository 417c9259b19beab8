use axum::http::{HeaderMap, StatusCode};
use tracing::warn;

use crate::error::ServingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Json,
    Html,
    AnyApp,
    Any,
}

impl MediaType {
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Html => "text/html",
            MediaType::AnyApp => "application/*",
            MediaType::Any => "*/*",
        }
    }
}

/// Media types a JSON request body or response satisfies.
pub const JSON_MEDIA_TYPES: &[MediaType] = &[MediaType::Any, MediaType::AnyApp, MediaType::Json];

/// Media types under which the HTML index page is served.
pub const HTML_MEDIA_TYPES: &[MediaType] = &[MediaType::Any, MediaType::Html];

/// True if any of `allowed` appears in the header value.
pub fn header_accepts(value: &str, allowed: &[MediaType]) -> bool {
    allowed.iter().any(|media| value.contains(media.as_str()))
}

/// Checks that `header` is present and names one of `allowed`.
///
/// A missing header is always a 400; a header naming none of the allowed
/// types fails with `mismatch_status` (415 for `content-type`, 406 for
/// `accept`).
pub fn validate_http_header(
    headers: &HeaderMap,
    header: &str,
    allowed: &[MediaType],
    mismatch_status: StatusCode,
) -> Result<(), ServingError> {
    let value = headers
        .get(header)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();

    if value.trim().is_empty() {
        let detail = format!(
            "Missing http header {header}. Please provide one with an appropriate \
             media type. Possible types are {}",
            join(allowed)
        );
        warn!(header, "{detail}");
        return Err(ServingError::bad_request(detail));
    }

    if !header_accepts(&value, allowed) {
        let detail = format!(
            "Media types {value} in {header} header are not supported. \
             Supported types are {}",
            join(allowed)
        );
        warn!(header, status = mismatch_status.as_u16(), "{detail}");
        return Err(ServingError::new(mismatch_status, detail));
    }

    Ok(())
}

fn join(allowed: &[MediaType]) -> String {
    allowed
        .iter()
        .map(|media| media.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, header};

    use super::*;

    fn headers(name: header::HeaderName, value: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_static(value));
        map
    }

    #[test]
    fn missing_header_is_bad_request() {
        let err = validate_http_header(
            &HeaderMap::new(),
            "accept",
            JSON_MEDIA_TYPES,
            StatusCode::NOT_ACCEPTABLE,
        )
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.detail.starts_with("Missing http header accept"));
    }

    #[test]
    fn empty_header_counts_as_missing() {
        let err = validate_http_header(
            &headers(header::ACCEPT, ""),
            "accept",
            JSON_MEDIA_TYPES,
            StatusCode::NOT_ACCEPTABLE,
        )
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn mismatch_uses_given_status() {
        let err = validate_http_header(
            &headers(header::CONTENT_TYPE, "text/plain"),
            "content-type",
            JSON_MEDIA_TYPES,
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
        )
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(err.detail.contains("text/plain"));
    }

    #[test]
    fn wildcards_and_parameters_match() {
        for value in [
            "*/*",
            "application/*",
            "application/json; charset=utf-8",
            "text/html, application/json;q=0.9",
        ] {
            let map = headers(header::ACCEPT, value);
            assert!(
                validate_http_header(&map, "accept", JSON_MEDIA_TYPES, StatusCode::NOT_ACCEPTABLE)
                    .is_ok(),
                "{value} should be accepted"
            );
        }
    }

    #[test]
    fn html_group() {
        assert!(header_accepts("text/html,application/xhtml+xml", HTML_MEDIA_TYPES));
        assert!(!header_accepts("application/json", HTML_MEDIA_TYPES));
    }
}
