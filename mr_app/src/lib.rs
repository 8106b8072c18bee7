pub mod apps;

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` wins over the `-v` count.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "mr=debug,mr_app=debug,info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .init();
}
