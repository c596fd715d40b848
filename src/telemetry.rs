use tracing_subscriber::EnvFilter;

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "ctfd_dl=info",
        1 => "ctfd_dl=debug",
        _ => "ctfd_dl=trace",
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    // RUST_LOG wins over -v so a user can still narrow things down.
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

#[cfg(not(debug_assertions))]
pub fn init(verbosity: u8) {
    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(env_filter(verbosity))
        .init();
}

#[cfg(debug_assertions)]
pub fn init(verbosity: u8) {
    tracing_subscriber::fmt()
        .compact()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(env_filter(verbosity))
        .init();
}
