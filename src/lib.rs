pub mod api;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod models;
pub mod pipeline;
pub mod telemetry;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{CascadeConfig, ConfigError};
use crate::gateway::{GatewaySettings, ResponseGateway};
use crate::pipeline::cascade::{CascadeOrchestrator, CascadeRunner};
use crate::pipeline::inference::{InferenceError, LlmBackend, OllamaBackend};
use crate::pipeline::knowledge::BuiltinKnowledge;
use crate::pipeline::remote::RemoteCascade;
use crate::pipeline::AnalysisError;
use crate::telemetry::EventSink;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("model backend error: {0}")]
    Backend(#[from] InferenceError),
    #[error("remote cascade error: {0}")]
    Remote(#[from] AnalysisError),
    #[error("server error: {0}")]
    Server(String),
}

/// Wire the gateway for `config`: a remote cascade when `remote_url` is
/// set, otherwise the local orchestrator over Ollama.
pub fn build_gateway(
    config: &CascadeConfig,
    events: Arc<dyn EventSink>,
) -> Result<ResponseGateway, StartupError> {
    let runner: Arc<dyn CascadeRunner> = match &config.remote_url {
        Some(url) => {
            tracing::info!(%url, "Using remote cascade");
            Arc::new(RemoteCascade::new(url)?)
        }
        None => {
            let backend: Arc<dyn LlmBackend> = Arc::new(OllamaBackend::new(&config.ollama_url)?);
            tracing::info!(
                ollama = %config.ollama_url,
                fast = %config.fast_model,
                accurate = %config.accurate_model,
                "Using local cascade"
            );
            Arc::new(CascadeOrchestrator::from_config(
                config,
                backend,
                Arc::new(BuiltinKnowledge),
                events.clone(),
            ))
        }
    };
    Ok(ResponseGateway::new(
        runner,
        events,
        GatewaySettings::from_config(config),
    ))
}

/// Load configuration from the environment, serve the API until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = CascadeConfig::from_env()?;
    let events = telemetry::tracing_sink();
    let gateway = build_gateway(&config, events)?;

    let app = api::api_router(api::ApiContext::new(Arc::new(gateway)), config.request_timeout());
    let mut server = api::start_api_server(&config.bind_addr, app)
        .await
        .map_err(StartupError::Server)?;
    tracing::info!(addr = %server.addr, "Listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    server.shutdown();
    server.stopped().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemoryEventSink;

    fn config_with(remote: Option<&str>) -> CascadeConfig {
        CascadeConfig {
            remote_url: remote.map(str::to_string),
            ..CascadeConfig::default()
        }
    }

    #[test]
    fn local_gateway_by_default() {
        let gateway = build_gateway(&config_with(None), MemoryEventSink::new()).unwrap();
        assert_eq!(gateway.runner_name(), "local");
    }

    #[test]
    fn remote_gateway_when_url_set() {
        let gateway =
            build_gateway(&config_with(Some("http://10.0.0.5:8080")), MemoryEventSink::new())
                .unwrap();
        assert_eq!(gateway.runner_name(), "remote");
    }
}
