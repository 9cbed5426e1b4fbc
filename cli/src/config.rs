//! Configuration management for `cartctl`: a YAML file merged with
//! `CARTCTL_`-prefixed environment variables via `figment`.

use crate::cli::{Cli, OutputFormat};
use crate::error::{CliError, CliResult};
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Openai,
    Anthropic,
    Gemini,
}

/// One entry in the dispatcher's priority-ordered model list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartctlConfig {
    /// Priority-ordered model list the dispatcher sends requests to.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub default_format: DefaultFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefaultFormat {
    #[default]
    Table,
    Json,
}

impl From<DefaultFormat> for OutputFormat {
    fn from(value: DefaultFormat) -> Self {
        match value {
            DefaultFormat::Table => OutputFormat::Table,
            DefaultFormat::Json => OutputFormat::Json,
        }
    }
}

impl Default for CartctlConfig {
    fn default() -> Self {
        Self { models: Vec::new(), default_format: DefaultFormat::Table }
    }
}

impl CartctlConfig {
    pub fn load(config_path: &Option<std::path::PathBuf>) -> CliResult<Self> {
        let mut figment = Figment::new();

        let default_config_paths = ["cartctl.yaml", "cartctl.yml", ".cartctl.yaml", ".cartctl.yml"];
        for path in &default_config_paths {
            if Path::new(path).exists() {
                figment = figment.merge(Yaml::file(path));
                break;
            }
        }

        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            } else {
                return Err(CliError::Configuration(format!("configuration file not found: {}", path.display())));
            }
        }

        figment = figment.merge(Env::prefixed("CARTCTL_"));

        figment.extract().map_err(|e| CliError::Configuration(format!("failed to parse configuration: {e}")))
    }

    pub fn with_overrides(mut self, args: &Cli) -> Self {
        if let Some(format) = args.format {
            self.default_format = match format {
                OutputFormat::Table => DefaultFormat::Table,
                OutputFormat::Json => DefaultFormat::Json,
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_has_no_models() {
        let config = CartctlConfig::default();
        assert!(config.models.is_empty());
    }

    #[test]
    fn loads_models_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "models:").unwrap();
        writeln!(file, "  - provider: openai").unwrap();
        writeln!(file, "    api_key: sk-test").unwrap();
        writeln!(file, "    model: gpt-4o").unwrap();

        let config = CartctlConfig::load(&Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].model, "gpt-4o");
    }
}
