use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Startup failures. None of these are recoverable: the process should not
/// come up with a half-composed service.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot find model serving module named {0}")]
    ModuleNotFound(String),
    #[error("could not find any model serving in module {0}")]
    NoModelServingFound(String),
    #[error(
        "no test data path defined for {0}. Please make sure you have defined \
         test_data_path on your model serving config"
    )]
    TestDataPathUndefined(String),
    #[error("{} does not exist", .0.display())]
    TestDataNotFound(PathBuf),
    #[error("model servings {first} and {second} both mount at /{slug}/")]
    DuplicateSlug {
        slug: String,
        first: String,
        second: String,
    },
    #[error("model serving {0} has no URL-safe characters to mount it under")]
    EmptySlug(String),
    #[error("failed to load model for {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A request failure, rendered as `{"detail": ...}` with its status code.
#[derive(Debug, Error)]
#[error("{detail}")]
pub struct ServingError {
    pub status: StatusCode,
    pub detail: String,
}

impl ServingError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ServingError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.detail,
        });

        (self.status, axum::Json(body)).into_response()
    }
}

macro_rules! stage_error {
    ($(#[$meta:meta])* $name:ident, $default:expr) => {
        $(#[$meta])*
        #[derive(Debug, Error)]
        #[error("{message}")]
        pub struct $name {
            message: String,
            status: StatusCode,
        }

        impl $name {
            pub const DEFAULT_STATUS: StatusCode = $default;

            pub fn new(message: impl Into<String>) -> Self {
                Self {
                    message: message.into(),
                    status: Self::DEFAULT_STATUS,
                }
            }

            /// Overrides the status code reported to the client.
            pub fn with_status(mut self, status: StatusCode) -> Self {
                self.status = status;
                self
            }

            pub fn status(&self) -> StatusCode {
                self.status
            }

            pub fn message(&self) -> &str {
                &self.message
            }
        }

        impl From<$name> for ServingError {
            fn from(err: $name) -> Self {
                ServingError::new(err.status, err.message)
            }
        }
    };
}

stage_error!(
    /// Raised from a pre-processing hook. Defaults to 400.
    PreProcessingError,
    StatusCode::BAD_REQUEST
);
stage_error!(
    /// Raised from `predict`. Defaults to 400.
    PredictionError,
    StatusCode::BAD_REQUEST
);
stage_error!(
    /// Raised from a post-processing hook. Defaults to 500.
    PostProcessingError,
    StatusCode::INTERNAL_SERVER_ERROR
);
