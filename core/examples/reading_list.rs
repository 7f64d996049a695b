//! Reading-list service protected by a named breaker
//!
//! Run with `RUST_LOG=tripswitch=debug cargo run --example reading_list`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use tripswitch::{CircuitRegistry, FallbackContext, RegistryConfig};

// Instance entries replace the default entirely
const CONFIG: &str = r#"
[default]
minimum_number_of_calls = 20

[instances.recommendations]
failure_rate_threshold = 50.0
minimum_number_of_calls = 4
sliding_window = { count = 8 }
wait_duration_in_open_state_secs = 0.2
permitted_calls_in_half_open_state = 2
"#;

fn recommended_reading(ctx: FallbackContext<String>) -> Result<Vec<String>, String> {
    tracing::info!(circuit = %ctx.circuit_name, state = %ctx.state, "serving fallback list");
    Ok(vec!["Cloud Native Java (O'Reilly)".to_string()])
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RegistryConfig::from_toml_str(CONFIG).expect("valid registry config");
    let registry = CircuitRegistry::with_config(config).expect("valid registry config");
    let breaker = registry
        .get_or_create("recommendations")
        .expect("valid breaker config");

    let attempts = AtomicUsize::new(0);
    let reading_list = || {
        // The upstream service is down for the first six requests
        if attempts.fetch_add(1, Ordering::SeqCst) < 6 {
            Err("recommendation service unavailable".to_string())
        } else {
            Ok(vec!["Spring in Action (Manning)".to_string()])
        }
    };

    for request in 0..12 {
        if request == 8 {
            std::thread::sleep(Duration::from_millis(250));
        }
        match breaker.call_with_fallback(reading_list, recommended_reading) {
            Ok(books) => println!("request {request:>2} [{}]: {books:?}", breaker.state()),
            Err(e) => println!("request {request:>2} [{}]: {e}", breaker.state()),
        }
    }

    for (name, metrics) in registry.metrics() {
        println!("{name}: {metrics:?}");
    }
}
