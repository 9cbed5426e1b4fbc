//! Builds the dispatcher's model-backend list from `CartctlConfig`,
//! gated behind the same connector Cargo features `cartography-engine`
//! exposes.

use crate::config::{ModelEntry, Provider};
use crate::error::{CliError, CliResult};
use cartography_core::traits::ModelBackend;
use std::sync::Arc;

pub fn build_backends(models: &[ModelEntry]) -> CliResult<Vec<Arc<dyn ModelBackend>>> {
    let mut backends: Vec<Arc<dyn ModelBackend>> = Vec::with_capacity(models.len());

    for entry in models {
        backends.push(build_one(entry)?);
    }

    Ok(backends)
}

fn build_one(entry: &ModelEntry) -> CliResult<Arc<dyn ModelBackend>> {
    match entry.provider {
        Provider::Openai => {
            #[cfg(feature = "connector-openai")]
            {
                let mut config = cartography_connector_openai::OpenAiConfig::new(entry.api_key.clone())
                    .with_model(entry.model.clone())
                    .with_timeout(entry.timeout_ms);
                if let Some(base) = &entry.api_base {
                    config = config.with_api_base(base.clone());
                }
                let connector = cartography_connector_openai::OpenAiConnector::new(config)
                    .map_err(|e| CliError::Configuration(format!("openai connector: {e}")))?;
                Ok(Arc::new(connector))
            }
            #[cfg(not(feature = "connector-openai"))]
            Err(CliError::Configuration("cartctl was built without the connector-openai feature".to_string()))
        }
        Provider::Anthropic => {
            #[cfg(feature = "connector-anthropic")]
            {
                let mut config = cartography_connector_anthropic::AnthropicConfig::new(entry.api_key.clone())
                    .with_model(entry.model.clone())
                    .with_timeout(entry.timeout_ms);
                if let Some(base) = &entry.api_base {
                    config = config.with_api_base(base.clone());
                }
                let connector = cartography_connector_anthropic::AnthropicConnector::new(config)
                    .map_err(|e| CliError::Configuration(format!("anthropic connector: {e}")))?;
                Ok(Arc::new(connector))
            }
            #[cfg(not(feature = "connector-anthropic"))]
            Err(CliError::Configuration("cartctl was built without the connector-anthropic feature".to_string()))
        }
        Provider::Gemini => {
            #[cfg(feature = "connector-gemini")]
            {
                let mut config = cartography_connector_gemini::GeminiConfig::new(entry.api_key.clone())
                    .with_model(entry.model.clone())
                    .with_timeout(entry.timeout_ms);
                if let Some(base) = &entry.api_base {
                    config = config.with_api_base(base.clone());
                }
                let connector = cartography_connector_gemini::GeminiConnector::new(config)
                    .map_err(|e| CliError::Configuration(format!("gemini connector: {e}")))?;
                Ok(Arc::new(connector))
            }
            #[cfg(not(feature = "connector-gemini"))]
            Err(CliError::Configuration("cartctl was built without the connector-gemini feature".to_string()))
        }
    }
}
