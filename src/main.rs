use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use model_serving::{
    AppConfig, DataFrameModelServing, FillDirection, Frames, ModelServing, ModelServingRunner,
    PredictionError, ServingConfig, ServingRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(module = %config.module_name, ?config.options, "composing model servings");

    let mut registry = ServingRegistry::new();
    registry
        .register_model::<AddOne>(
            "models",
            ServingConfig::new(config.data_dir.join("add_one.json")),
        )
        .register_dataframe::<Interpolate>(
            "models",
            ServingConfig::new(config.data_dir.join("interpolate.json"))
                .with_orient(config.pandas_orient),
        );

    ModelServingRunner::new(registry)
        .run_model_serving(&config.module_name, &config.options, config.listen_addr)
        .await
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Adds one to every number in a JSON array.
#[derive(Default)]
struct AddOne;

impl ModelServing for AddOne {
    fn predict(&self, data: Value) -> Result<Value, PredictionError> {
        let Value::Array(items) = data else {
            return Err(PredictionError::new("expected a JSON array of numbers"));
        };
        items
            .into_iter()
            .map(|item| match item.as_i64() {
                Some(i) => Ok(Value::from(i + 1)),
                None => item
                    .as_f64()
                    .map(|f| Value::from(f + 1.0))
                    .ok_or_else(|| PredictionError::new(format!("{item} is not a number"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

/// Fills gaps in every numeric column.
#[derive(Default)]
struct Interpolate;

impl DataFrameModelServing for Interpolate {
    fn predict(&self, data: Frames) -> Result<Frames, PredictionError> {
        Ok(data.map(|frame| frame.interpolate(FillDirection::Both)))
    }
}
