//! List command implementation.

use jitguard_core::{CompletionSignal, ProviderRegistry};
use serde::Serialize;

use crate::providers::BuiltinProviders;

#[derive(Debug, Serialize)]
struct ProviderSummary {
    name: String,
    factory: String,
}

/// Print the discovered providers.
pub fn execute(json: bool) -> anyhow::Result<()> {
    let locator = BuiltinProviders::new(0, CompletionSignal::new());
    let registry = ProviderRegistry::from_locators(&[&locator])?;

    let summaries: Vec<ProviderSummary> = registry
        .descriptors()
        .iter()
        .map(|descriptor| ProviderSummary {
            name: descriptor.name().to_string(),
            factory: descriptor.factory().call_site().into_owned(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            println!("{:<20} {}", summary.name, summary.factory);
        }
    }

    Ok(())
}
