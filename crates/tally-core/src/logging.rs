use tracing_subscriber::EnvFilter;

/// Installs the process-wide `tracing` subscriber, writing compact lines to
/// stderr. `RUST_LOG` wins over `default_filter` when set.
///
/// Returns `false` when a subscriber was already installed; the existing one
/// is left in place.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_keeps_the_first_subscriber() {
        init_logging("warn");
        assert!(!init_logging("debug"));
        tracing::debug!("not emitted at warn level");
    }
}
