//! Local composition with the in-memory provisioner.

use anyhow::{Context, Result};
use stackit_composer::Composer;
use stackit_config::{load_composition, parse_context_arg};
use stackit_provisioner::InMemoryProvisioner;
use tracing::info;

/// Compose every stack and print the export registry as JSON.
pub fn synth(path: &str, overrides: &[String], account: &str, region: &str) -> Result<()> {
    let mut config = load_composition(path)
        .with_context(|| format!("Failed to load composition: {}", path))?;

    for arg in overrides {
        let (key, value) = parse_context_arg(arg)
            .with_context(|| format!("Invalid context override: {}", arg))?;
        config.set_context(key, value);
    }

    let tags = config.effective_tags();
    info!(composition = %config.name, ?tags, "Synthesizing composition");

    let mut composer = Composer::new(InMemoryProvisioner::new(account, region)).with_tags(tags);
    let composition = composer
        .compose(&config.stacks)
        .with_context(|| format!("Failed to compose '{}'", config.name))?;

    let output = serde_json::to_string_pretty(&composition.registry)
        .context("Failed to serialize export registry")?;
    println!("{}", output);

    info!(
        resources = composer.provisioner().resources().len(),
        "Synthesized {} stacks",
        composition.stacks.len()
    );
    Ok(())
}
