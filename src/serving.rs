use std::{path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::Value;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    config::{ServerOptions, ServingConfig},
    dataframe::{DataFrameModelServing, DataFrameServing},
    error::{PostProcessingError, PreProcessingError, PredictionError, ServingError, SetupError},
    index::{IndexPage, MountInfo, RouteInfo, index_endpoint},
    media::{JSON_MEDIA_TYPES, validate_http_header},
    middleware,
};

pub const PROBE_RESPONSE: &str = "No problems";

/// The five stages a request passes through, plus the load hook run once at
/// construction.
///
/// Most users implement [`ModelServing`] or [`DataFrameModelServing`] instead
/// and let the crate adapt them; implement this directly when the model wants
/// its own input and output representation.
pub trait ServingPipeline: Send + Sync + 'static {
    type Input: Send;
    type Output: Send;

    fn load_model(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn format_input(&self, data: Value) -> Result<Self::Input, ServingError>;

    fn pre_process_input(&self, data: Self::Input) -> Result<Self::Input, PreProcessingError>;

    fn predict(&self, data: Self::Input) -> Result<Self::Output, PredictionError>;

    fn post_process_results(
        &self,
        results: Self::Output,
    ) -> Result<Self::Output, PostProcessingError>;

    fn format_output(&self, results: Self::Output) -> Result<Value, ServingError>;
}

/// A model served on plain JSON values.
pub trait ModelServing: Send + Sync + 'static {
    /// Hook to load a model or models.
    fn load_model(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Must return JSON serializable data.
    fn predict(&self, data: Value) -> Result<Value, PredictionError>;

    fn pre_process_input(&self, data: Value) -> Result<Value, PreProcessingError> {
        Ok(data)
    }

    fn post_process_results(&self, data: Value) -> Result<Value, PostProcessingError> {
        Ok(data)
    }
}

/// Adapts a [`ModelServing`] to the pipeline with identity formatting.
pub struct JsonServing<M>(pub M);

impl<M: ModelServing> ServingPipeline for JsonServing<M> {
    type Input = Value;
    type Output = Value;

    fn load_model(&mut self) -> anyhow::Result<()> {
        self.0.load_model()
    }

    fn format_input(&self, data: Value) -> Result<Value, ServingError> {
        Ok(data)
    }

    fn pre_process_input(&self, data: Value) -> Result<Value, PreProcessingError> {
        self.0.pre_process_input(data)
    }

    fn predict(&self, data: Value) -> Result<Value, PredictionError> {
        self.0.predict(data)
    }

    fn post_process_results(&self, data: Value) -> Result<Value, PostProcessingError> {
        self.0.post_process_results(data)
    }

    fn format_output(&self, results: Value) -> Result<Value, ServingError> {
        Ok(results)
    }
}

trait ErasedPipeline: Send + Sync {
    fn process(&self, data: Value) -> Result<Value, ServingError>;
}

impl<P: ServingPipeline> ErasedPipeline for P {
    fn process(&self, data: Value) -> Result<Value, ServingError> {
        let formatted = self.format_input(data)?;
        let pre_processed = self.pre_process_input(formatted).map_err(|err| {
            warn!(stage = "pre_process", status = err.status().as_u16(), "{err}");
            ServingError::from(err)
        })?;
        let results = self.predict(pre_processed).map_err(|err| {
            warn!(stage = "predict", status = err.status().as_u16(), "{err}");
            ServingError::from(err)
        })?;
        let processed = self.post_process_results(results).map_err(|err| {
            warn!(stage = "post_process", status = err.status().as_u16(), "{err}");
            ServingError::from(err)
        })?;
        self.format_output(processed)
    }
}

/// One model behind the fixed route table.
pub struct ModelServingUnit {
    name: String,
    type_name: String,
    test_data_path: PathBuf,
    pipeline: Arc<dyn ErasedPipeline>,
    options: ServerOptions,
}

impl ModelServingUnit {
    /// Validates the config, runs the load hook and binds the pipeline.
    pub fn new<P: ServingPipeline>(
        type_name: impl Into<String>,
        config: ServingConfig,
        mut pipeline: P,
        options: &ServerOptions,
    ) -> Result<Self, SetupError> {
        let type_name = type_name.into();
        let test_data_path = config
            .test_data_path
            .ok_or_else(|| SetupError::TestDataPathUndefined(type_name.clone()))?;
        if !test_data_path.exists() {
            return Err(SetupError::TestDataNotFound(test_data_path));
        }

        pipeline
            .load_model()
            .map_err(|source| SetupError::ModelLoad {
                name: type_name.clone(),
                source,
            })?;

        let name = config.model_name.unwrap_or_else(|| slugify(&type_name));
        info!(model = %name, path = %test_data_path.display(), "model serving ready");

        Ok(Self {
            name,
            type_name,
            test_data_path,
            pipeline: Arc::new(pipeline),
            options: *options,
        })
    }

    /// Serves a [`ModelServing`] named after its Rust type.
    pub fn json<M: ModelServing>(
        model: M,
        config: ServingConfig,
        options: &ServerOptions,
    ) -> Result<Self, SetupError> {
        Self::new(short_type_name::<M>(), config, JsonServing(model), options)
    }

    /// Serves a [`DataFrameModelServing`] using the config's orientation.
    pub fn dataframe<M: DataFrameModelServing>(
        model: M,
        config: ServingConfig,
        options: &ServerOptions,
    ) -> Result<Self, SetupError> {
        let pipeline = DataFrameServing::new(model, config.pandas_orient);
        Self::new(short_type_name::<M>(), config, pipeline, options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Routes relative to wherever the unit is mounted.
    pub fn routes() -> Vec<RouteInfo> {
        vec![
            RouteInfo::new("/", &["GET"]),
            RouteInfo::new("/liveness/", &["GET"]),
            RouteInfo::new("/readiness/", &["GET"]),
            RouteInfo::new("/predict/", &["GET", "POST", "HEAD"]),
            RouteInfo::new("/predict-test/", &["GET"]),
            RouteInfo::new("/input-format/", &["GET"]),
        ]
    }

    pub fn mount_info(&self, prefix: &str) -> MountInfo {
        MountInfo {
            name: self.name.clone(),
            prefix: format!("{prefix}/"),
            routes: Self::routes()
                .into_iter()
                .map(|route| route.prefixed(prefix))
                .collect(),
        }
    }

    /// The unit's routes at the top level.
    pub fn router(&self) -> Router {
        self.router_at("")
    }

    /// The unit's routes under `prefix` (e.g. `/add-one`). The index is also
    /// reachable at the bare prefix.
    pub fn router_at(&self, prefix: &str) -> Router {
        let state = Arc::new(UnitState {
            test_data_path: self.test_data_path.clone(),
            pipeline: self.pipeline.clone(),
        });
        let page = Arc::new(IndexPage {
            name: self.name.clone(),
            mounts: vec![self.mount_info(prefix)],
        });

        let mut index = Router::new().route(&format!("{prefix}/"), get(index_endpoint));
        if !prefix.is_empty() {
            index = index.route(prefix, get(index_endpoint));
        }

        let router = Router::new()
            .route(&format!("{prefix}/liveness/"), get(probe))
            .route(&format!("{prefix}/readiness/"), get(probe))
            .route(
                &format!("{prefix}/predict/"),
                get(predict_endpoint)
                    .post(predict_endpoint)
                    .head(predict_head),
            )
            .route(&format!("{prefix}/predict-test/"), get(predict_test_endpoint))
            .route(&format!("{prefix}/input-format/"), get(input_format_endpoint))
            .with_state(state)
            .merge(index.with_state(page))
            .layer(TraceLayer::new_for_http());

        middleware::apply(router, &self.options)
    }
}

impl std::fmt::Debug for ModelServingUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelServingUnit")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("test_data_path", &self.test_data_path)
            .finish_non_exhaustive()
    }
}

struct UnitState {
    test_data_path: PathBuf,
    pipeline: Arc<dyn ErasedPipeline>,
}

impl UnitState {
    async fn process(&self, data: Value) -> Result<Value, ServingError> {
        let pipeline = self.pipeline.clone();
        match task::spawn_blocking(move || pipeline.process(data)).await {
            Ok(result) => result,
            // Panics in user hooks are bugs in the model serving, not request errors.
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(ServingError::internal(format!(
                "prediction task failed: {err}"
            ))),
        }
    }

    async fn read_test_data(&self) -> Result<Value, ServingError> {
        let contents = tokio::fs::read(&self.test_data_path).await.map_err(|err| {
            let detail = format!("Error reading {}: {err}", self.test_data_path.display());
            error!("{detail}");
            ServingError::internal(detail)
        })?;
        serde_json::from_slice(&contents).map_err(|err| {
            let detail = format!("Failed to load test data into JSON: {err}");
            error!(path = %self.test_data_path.display(), "{detail}");
            ServingError::internal(detail)
        })
    }
}

pub(crate) async fn probe() -> &'static str {
    PROBE_RESPONSE
}

async fn predict_endpoint(
    State(state): State<Arc<UnitState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServingError> {
    validate_http_header(
        &headers,
        "content-type",
        JSON_MEDIA_TYPES,
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
    )?;
    validate_http_header(&headers, "accept", JSON_MEDIA_TYPES, StatusCode::NOT_ACCEPTABLE)?;

    let data: Value = serde_json::from_slice(&body).map_err(|err| {
        let detail = format!("Failed to parse request body as JSON: {err}");
        warn!("{detail}");
        ServingError::bad_request(detail)
    })?;
    let results = state.process(data).await?;
    json_response(&results)
}

async fn predict_head() -> Json<Value> {
    Json(Value::Null)
}

async fn predict_test_endpoint(
    State(state): State<Arc<UnitState>>,
    headers: HeaderMap,
) -> Result<Response, ServingError> {
    validate_http_header(&headers, "accept", JSON_MEDIA_TYPES, StatusCode::NOT_ACCEPTABLE)?;
    let test_data = state.read_test_data().await?;
    let results = state.process(test_data).await?;
    json_response(&results)
}

async fn input_format_endpoint(
    State(state): State<Arc<UnitState>>,
    headers: HeaderMap,
) -> Result<Response, ServingError> {
    validate_http_header(&headers, "accept", JSON_MEDIA_TYPES, StatusCode::NOT_ACCEPTABLE)?;
    let test_data = state.read_test_data().await?;
    json_response(&test_data)
}

fn json_response(data: &Value) -> Result<Response, ServingError> {
    let body = serde_json::to_vec(data).map_err(|err| {
        let detail = format!("Error trying to serialize response data to JSON: {err}");
        error!("{detail}");
        ServingError::internal(detail)
    })?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Lowercases and joins alphanumeric runs with `-`: `Add_One Model` becomes
/// `add-one-model`, `AddOneModel` becomes `addonemodel`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// `my_crate::models::AddOne` -> `AddOne`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
