use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use axum::{Router, routing::get};
use indexmap::IndexMap;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    config::{ServerOptions, ServingConfig},
    dataframe::DataFrameModelServing,
    error::SetupError,
    index::{IndexPage, index_endpoint},
    middleware,
    server,
    serving::{ModelServing, ModelServingUnit, probe, short_type_name, slugify},
};

pub type ServingFactory =
    Arc<dyn Fn(&ServerOptions) -> Result<ModelServingUnit, SetupError> + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredServing {
    pub type_name: String,
    factory: ServingFactory,
}

impl RegisteredServing {
    pub fn build(&self, options: &ServerOptions) -> Result<ModelServingUnit, SetupError> {
        (self.factory)(options)
    }
}

/// Model servings grouped by module name, in registration order.
#[derive(Clone, Default)]
pub struct ServingRegistry {
    modules: IndexMap<String, Vec<RegisteredServing>>,
}

impl ServingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        module: impl Into<String>,
        type_name: impl Into<String>,
        factory: F,
    ) -> &mut Self
    where
        F: Fn(&ServerOptions) -> Result<ModelServingUnit, SetupError> + Send + Sync + 'static,
    {
        self.modules
            .entry(module.into())
            .or_default()
            .push(RegisteredServing {
                type_name: type_name.into(),
                factory: Arc::new(factory),
            });
        self
    }

    /// Registers `M`, built with `M::default()` each time it is composed.
    pub fn register_model<M>(
        &mut self,
        module: impl Into<String>,
        config: ServingConfig,
    ) -> &mut Self
    where
        M: ModelServing + Default,
    {
        self.register(module, short_type_name::<M>(), move |options| {
            ModelServingUnit::json(M::default(), config.clone(), options)
        })
    }

    pub fn register_dataframe<M>(
        &mut self,
        module: impl Into<String>,
        config: ServingConfig,
    ) -> &mut Self
    where
        M: DataFrameModelServing + Default,
    {
        self.register(module, short_type_name::<M>(), move |options| {
            ModelServingUnit::dataframe(M::default(), config.clone(), options)
        })
    }

    pub fn module(&self, name: &str) -> Option<&[RegisteredServing]> {
        self.modules.get(name).map(Vec::as_slice)
    }
}

/// Finds the model servings registered for a module and serves them as one
/// router.
pub struct ModelServingRunner {
    registry: ServingRegistry,
    excluded: HashSet<String>,
}

impl ModelServingRunner {
    pub fn new(registry: ServingRegistry) -> Self {
        Self {
            registry,
            excluded: HashSet::new(),
        }
    }

    /// Skips servings registered under `type_name`.
    pub fn exclude(mut self, type_name: impl Into<String>) -> Self {
        self.excluded.insert(type_name.into());
        self
    }

    /// One serving is served at `/`; several are each mounted at `/<slug>/`
    /// behind a shared index.
    pub fn compose(
        &self,
        module_name: &str,
        options: &ServerOptions,
    ) -> Result<Router, SetupError> {
        let Some(entries) = self.registry.module(module_name) else {
            let err = SetupError::ModuleNotFound(module_name.to_string());
            error!("{err}");
            return Err(err);
        };

        let servings: Vec<&RegisteredServing> = entries
            .iter()
            .filter(|entry| !self.excluded.contains(&entry.type_name))
            .collect();

        match servings.as_slice() {
            [] => Err(SetupError::NoModelServingFound(module_name.to_string())),
            [single] => {
                let unit = single.build(options)?;
                info!(model = unit.name(), "serving single model at /");
                Ok(unit.router())
            }
            many => compose_many(many, options),
        }
    }

    pub async fn run_model_serving(
        &self,
        module_name: &str,
        options: &ServerOptions,
        addr: SocketAddr,
    ) -> anyhow::Result<()> {
        let router = self.compose(module_name, options)?;
        server::serve(router, addr).await
    }
}

fn compose_many(
    servings: &[&RegisteredServing],
    options: &ServerOptions,
) -> Result<Router, SetupError> {
    let mut slugs: IndexMap<String, &str> = IndexMap::with_capacity(servings.len());
    for serving in servings {
        let slug = slugify(&serving.type_name);
        if slug.is_empty() {
            let err = SetupError::EmptySlug(serving.type_name.clone());
            error!("{err}");
            return Err(err);
        }
        if let Some(first) = slugs.get(&slug) {
            let err = SetupError::DuplicateSlug {
                slug,
                first: first.to_string(),
                second: serving.type_name.clone(),
            };
            error!("{err}");
            return Err(err);
        }
        slugs.insert(slug, &serving.type_name);
    }

    let mut mounts = Vec::with_capacity(servings.len());
    let mut units = Router::new();
    for (serving, slug) in servings.iter().zip(slugs.keys()) {
        let unit = serving.build(options)?;
        let prefix = format!("/{slug}");
        info!(model = unit.name(), prefix = %prefix, "mounting model serving");
        mounts.push(unit.mount_info(&prefix));
        units = units.merge(unit.router_at(&prefix));
    }

    let page = Arc::new(IndexPage {
        name: "Model servings".to_string(),
        mounts,
    });
    let top = Router::new()
        .route("/", get(index_endpoint))
        .with_state(page)
        .route("/liveness/", get(probe))
        .route("/readiness/", get(probe))
        .layer(TraceLayer::new_for_http());

    Ok(middleware::apply(top, options).merge(units))
}
