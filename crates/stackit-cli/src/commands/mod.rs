//! CLI command implementations.

pub mod synth;

use anyhow::{Context, Result};
use stackit_composer::Plan;
use stackit_config::{load_composition, CompositionConfig};

fn load(path: &str) -> Result<CompositionConfig> {
    load_composition(path).with_context(|| format!("Failed to load composition: {}", path))
}

pub fn validate(path: &str) -> Result<()> {
    let config = load(path)?;
    let plan = Plan::build(&config.stacks)
        .with_context(|| format!("Composition '{}' is invalid", config.name))?;

    println!(
        "Composition '{}' is valid ({} stacks, {} cross-stack references)",
        config.name,
        plan.order.len(),
        plan.edges.len()
    );
    Ok(())
}

pub fn plan(path: &str) -> Result<()> {
    let config = load(path)?;
    let plan = Plan::build(&config.stacks)
        .with_context(|| format!("Failed to plan composition '{}'", config.name))?;

    println!("Construction order for '{}':", config.name);
    for (i, name) in plan.order.iter().enumerate() {
        let deps = plan.dependencies_of(name);
        if deps.is_empty() {
            println!("  {}. {}", i + 1, name);
        } else {
            println!("  {}. {} (after {})", i + 1, name, deps.join(", "));
        }
    }
    Ok(())
}
