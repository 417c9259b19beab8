pub mod config;
pub mod dataframe;
pub mod error;
pub mod index;
pub mod media;
pub mod middleware;
pub mod runner;
pub mod server;
pub mod serving;

pub use config::{AppConfig, ServerOptions, ServingConfig};
pub use dataframe::{DataFrame, DataFrameModelServing, FillDirection, Frames, Orient, Scalar};
pub use error::{PostProcessingError, PreProcessingError, PredictionError, ServingError, SetupError};
pub use media::{MediaType, validate_http_header};
pub use runner::{ModelServingRunner, ServingRegistry};
pub use serving::{ModelServing, ModelServingUnit, ServingPipeline};
