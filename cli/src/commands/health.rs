//! `cartctl health`: validates the configured model list, grounded on
//! `kgctl::commands::health`.

use crate::backends;
use crate::config::CartctlConfig;
use crate::error::{CliError, CliResult};
use cartography_core::traits::ModelBackend;
use colored::*;

pub fn handle_health(config: &CartctlConfig) -> CliResult<()> {
    if config.models.is_empty() {
        println!("{}", "no models configured".yellow());
        return Err(CliError::Configuration("at least one model must be configured".to_string()));
    }

    let mut all_ok = true;
    for entry in &config.models {
        if entry.api_key.trim().is_empty() {
            println!("{} {:?} ({}): missing API key", "✗".red(), entry.provider, entry.model);
            all_ok = false;
            continue;
        }
        match backends::build_backends(std::slice::from_ref(entry)) {
            Ok(backends) => {
                let backend = &backends[0];
                let caps = backend.capabilities();
                println!(
                    "{} {} ({}): system_instruction={} thinking={} json_schema={}",
                    "✓".green(),
                    backend.name(),
                    entry.model,
                    caps.supports_system_instruction,
                    caps.supports_thinking,
                    caps.supports_json_schema
                );
            }
            Err(e) => {
                println!("{} {:?} ({}): {}", "✗".red(), entry.provider, entry.model, e);
                all_ok = false;
            }
        }
    }

    if all_ok {
        Ok(())
    } else {
        Err(CliError::Configuration("one or more configured models failed validation".to_string()))
    }
}
