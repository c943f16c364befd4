use guardlight_core::adapters::AdapterRegistry;

use crate::config::Config;

pub fn list_adapters(config: &Config) {
    print_registry(&config.adapter_registry());
}

fn print_registry(registry: &AdapterRegistry) {
    println!(
        "{:<9} {:<16} {:<24} {:<10} CONCURRENCY",
        "KIND", "KEY", "TOPIC", "IMAGE"
    );
    for p in registry.parsers() {
        println!(
            "{:<9} {:<16} {:<24} {:<10} {}",
            "parser",
            p.key,
            p.topic(),
            p.image,
            p.concurrency
        );
    }
    for a in registry.analyzers() {
        println!(
            "{:<9} {:<16} {:<24} {:<10} {}",
            "analyzer",
            a.key,
            a.topic(),
            a.image,
            a.concurrency
        );
        for input in &a.inputs {
            println!("{:<9}   input {} ({})", "", input.key, input.input_type);
        }
    }
    for r in registry.reporters() {
        println!(
            "{:<9} {:<16} {:<24} {:<10} {}",
            "reporter",
            r.key,
            r.topic(),
            r.image,
            r.concurrency
        );
    }
}
