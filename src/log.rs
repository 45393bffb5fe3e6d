use tracing_subscriber::EnvFilter;

/// Crates whose events follow the configured level. Everything else,
/// hyper and opendal included, stays at the subscriber default.
const TARGETS: [&str; 3] = ["camwall", "camsup", "tower_http"];

fn directives(level: &str) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` wins over the configured level when it parses.
pub fn set(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(true)
        .with_line_number(true)
        .init();
}
