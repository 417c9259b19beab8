mod common;

use axum::{Router, http::StatusCode};
use serde_json::json;

use common::{fixture, get, load, post_json, send};
use model_serving::{
    DataFrameModelServing, FillDirection, Frames, ModelServingRunner, ModelServingUnit, Orient,
    PredictionError, Scalar, ServerOptions, ServingConfig, ServingRegistry,
};

struct InterpolateModel {
    direction: FillDirection,
}

#[derive(Default)]
struct InterpolateModelServing {
    model: Option<InterpolateModel>,
}

impl DataFrameModelServing for InterpolateModelServing {
    fn load_model(&mut self) -> anyhow::Result<()> {
        self.model = Some(InterpolateModel {
            direction: FillDirection::Both,
        });
        Ok(())
    }

    fn predict(&self, data: Frames) -> Result<Frames, PredictionError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PredictionError::new("model not loaded"))?;
        match data {
            Frames::Single(frame) => Ok(Frames::Single(frame.interpolate(model.direction))),
            Frames::Multi(_) => Err(PredictionError::new("expected a single frame")),
        }
    }
}

#[derive(Default)]
struct InterpolateMultiFrameModelServing;

impl DataFrameModelServing for InterpolateMultiFrameModelServing {
    fn predict(&self, data: Frames) -> Result<Frames, PredictionError> {
        match data {
            Frames::Multi(_) => Ok(data.map(|frame| frame.interpolate(FillDirection::Forward))),
            Frames::Single(_) => Err(PredictionError::new("expected named frames")),
        }
    }
}

/// Appends a column of NaNs.
#[derive(Default)]
struct AddsMissingColumn;

impl DataFrameModelServing for AddsMissingColumn {
    fn predict(&self, data: Frames) -> Result<Frames, PredictionError> {
        Ok(data.map(|mut frame| {
            let missing = vec![Scalar::Float(f64::NAN); frame.len()];
            frame
                .insert_column("missing", missing)
                .expect("length matches");
            frame
        }))
    }
}

/// Zeroes column `x` in place.
#[derive(Default)]
struct ZeroesX;

impl DataFrameModelServing for ZeroesX {
    fn predict(&self, data: Frames) -> Result<Frames, PredictionError> {
        Ok(data.map(|mut frame| {
            if let Some(cells) = frame.column_mut("x") {
                cells.fill(Scalar::Int(0));
            }
            frame
        }))
    }
}

fn serve<M: DataFrameModelServing>(model: M, config: ServingConfig) -> Router {
    ModelServingUnit::dataframe(model, config, &ServerOptions::default())
        .unwrap()
        .router()
}

#[tokio::test]
async fn predict_single_frame() {
    let router = serve(
        InterpolateModelServing::default(),
        ServingConfig::new(fixture("interpolate.json")),
    );
    let response = send(&router, post_json("/predict/", &load("interpolate.json"))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), load("interpolate_result.json"));

    let response = send(&router, get("/predict-test/")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), load("interpolate_result.json"));
}

#[tokio::test]
async fn predict_multi_frame() {
    let router = serve(
        InterpolateMultiFrameModelServing,
        ServingConfig::new(fixture("interpolate_multi_frame.json")),
    );
    let response =
        send(&router, post_json("/predict/", &load("interpolate_multi_frame.json"))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), load("interpolate_multi_frame_result.json"));
    assert_eq!(response.json()["multi_dataframe"], true);
}

#[tokio::test]
async fn input_format_is_the_raw_sample() {
    let router = serve(
        InterpolateMultiFrameModelServing,
        ServingConfig::new(fixture("interpolate_multi_frame.json")),
    );
    let response = send(&router, get("/input-format/")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), load("interpolate_multi_frame.json"));
}

#[tokio::test]
async fn orientation_is_configurable() {
    let router = serve(
        InterpolateModelServing::default(),
        ServingConfig::new(fixture("interpolate.json")).with_orient(Orient::Records),
    );
    let response = send(&router, get("/predict-test/")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.json(),
        json!([
            {"a": 1, "b": 4.0},
            {"a": 2.0, "b": 4.0},
            {"a": 3, "b": 6.0},
        ])
    );
}

#[tokio::test]
async fn nan_is_sent_as_null() {
    let router = serve(AddsMissingColumn, ServingConfig::new(fixture("interpolate.json")));
    let response = send(&router, post_json("/predict/", &json!({"x": [1, 2]}))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.json(),
        json!({"0": {"x": 1, "missing": null}, "1": {"x": 2, "missing": null}})
    );
}

#[tokio::test]
async fn cells_rewritten_in_place_keep_the_frame_shape() {
    let router = serve(ZeroesX, ServingConfig::new(fixture("interpolate.json")));
    let body = json!({"x": [1, 2], "y": [3, 4]});
    let response = send(&router, post_json("/predict/", &body)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.json(),
        json!({"0": {"x": 0, "y": 3}, "1": {"x": 0, "y": 4}})
    );
}

#[tokio::test]
async fn shape_mismatch_is_bad_request() {
    let router = serve(
        InterpolateModelServing::default(),
        ServingConfig::new(fixture("interpolate.json")),
    );
    for body in [json!({"a": [1], "b": [1, 2]}), json!({"a": 1}), json!("frame")] {
        let response = send(&router, post_json("/predict/", &body)).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{body}");
        assert!(response.detail().starts_with("Error reading in json"));
    }
}

#[tokio::test]
async fn composed_with_plain_servings() {
    let mut registry = ServingRegistry::new();
    registry
        .register_dataframe::<InterpolateModelServing>(
            "frames",
            ServingConfig::new(fixture("interpolate.json")),
        )
        .register_dataframe::<InterpolateMultiFrameModelServing>(
            "frames",
            ServingConfig::new(fixture("interpolate_multi_frame.json")),
        );
    let router = ModelServingRunner::new(registry)
        .compose("frames", &ServerOptions::default())
        .unwrap();

    let response = send(&router, get("/interpolatemodelserving/predict-test/")).await;
    assert_eq!(response.json(), load("interpolate_result.json"));

    let response = send(&router, get("/interpolatemultiframemodelserving/predict-test/")).await;
    assert_eq!(response.json(), load("interpolate_multi_frame_result.json"));
}
