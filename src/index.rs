use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
    response::{Html, IntoResponse, Response},
};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::error;

use crate::{
    error::ServingError,
    media::{HTML_MEDIA_TYPES, JSON_MEDIA_TYPES, header_accepts},
};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub path: String,
    pub methods: Vec<&'static str>,
}

impl RouteInfo {
    pub fn new(path: impl Into<String>, methods: &[&'static str]) -> Self {
        Self {
            path: path.into(),
            methods: methods.to_vec(),
        }
    }

    pub fn prefixed(self, prefix: &str) -> Self {
        Self {
            path: format!("{prefix}{}", self.path),
            methods: self.methods,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MountInfo {
    pub name: String,
    pub prefix: String,
    pub routes: Vec<RouteInfo>,
}

/// What `/` lists: every mounted serving and its routes.
#[derive(Debug, Clone, Serialize)]
pub struct IndexPage {
    pub name: String,
    pub mounts: Vec<MountInfo>,
}

impl IndexPage {
    pub fn render_html(&self) -> Result<String, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("index.html", INDEX_TEMPLATE)?;
        let template = env.get_template("index.html")?;
        template.render(context! { page => self })
    }

    /// HTML unless the client asks only for JSON.
    pub fn respond(&self, headers: &HeaderMap) -> Result<Response, ServingError> {
        let accept = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let wants_json = !accept.is_empty()
            && !header_accepts(accept, HTML_MEDIA_TYPES)
            && header_accepts(accept, JSON_MEDIA_TYPES);
        if wants_json {
            return Ok(Json(self).into_response());
        }

        let body = self.render_html().map_err(|err| {
            error!(page = %self.name, "failed to render index: {err}");
            ServingError::internal(format!("Failed to render index page: {err}"))
        })?;
        Ok(Html(body).into_response())
    }
}

pub(crate) async fn index_endpoint(
    State(page): State<Arc<IndexPage>>,
    headers: HeaderMap,
) -> Result<Response, ServingError> {
    page.respond(&headers)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn page() -> IndexPage {
        IndexPage {
            name: "add-one".into(),
            mounts: vec![MountInfo {
                name: "add-one".into(),
                prefix: "/add-one/".into(),
                routes: vec![
                    RouteInfo::new("/predict/", &["POST", "HEAD"]).prefixed("/add-one"),
                ],
            }],
        }
    }

    #[test]
    fn renders_routes() {
        let html = page().render_html().unwrap();
        assert!(html.contains("/add-one/predict/"));
        assert!(html.contains("POST, HEAD"));
    }

    #[test]
    fn json_only_clients_get_json() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let response = page().respond(&headers).unwrap();
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "application/json");
    }

    #[test]
    fn browsers_get_html() {
        let response = page().respond(&HeaderMap::new()).unwrap();
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/html"));
    }
}
