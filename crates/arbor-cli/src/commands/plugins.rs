//! Bundled plugin listing.

use arbor_chain::{BuiltinProvider, PluginProvider};

pub fn run() -> anyhow::Result<()> {
    let provider = BuiltinProvider::new();
    println!("Bundled plugins:\n");
    for identity in BuiltinProvider::available() {
        let instance = provider.instantiate(&identity, 48000.0, 512)?;
        let controller = &instance.controller;
        println!("  {:<12} {}", identity.uid, identity.name);
        for index in 0..controller.parameter_count() {
            if let Some(info) = controller.parameter_info(index) {
                println!(
                    "      {:<10} {:>8.1} .. {:<8.1} (default {})",
                    info.name.to_lowercase(),
                    info.min,
                    info.max,
                    info.default
                );
            }
        }
    }
    println!("\nUse in a chain as: uid:param=value, e.g. \"delay:samples=64\"");
    Ok(())
}
