//! Show the scenario catalog.

use zoo_core::Registry;

use crate::config::Config;

/// Run the list command.
pub fn run(config: &Config) {
    let registry = Registry::standard(&config.settings());

    println!("=== debug-zoo scenarios ===");
    println!();
    for descriptor in registry.iter() {
        let id = descriptor.id();
        println!("{}", id);
        println!("  {}", id.describe());
        if !id.aliases().is_empty() {
            println!("  Aliases:  {}", id.aliases().join(", "));
        }
        if let Some(value) = descriptor.config() {
            println!("  Default:  {} bytes", value);
        }
        let teardown = if descriptor.has_teardown() { "yes" } else { "no" };
        println!("  Teardown: {}", teardown);
        println!();
    }
}
