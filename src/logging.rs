use crate::config::LogFormat;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// Fails if a global subscriber is already set.
pub fn init(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match format {
        LogFormat::Plain => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("cannot install tracing subscriber: {}", e)),
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("cannot install tracing subscriber: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        // Another test may have installed a subscriber first; either way the
        // last call must fail rather than panic.
        let _ = init(LogFormat::Plain);
        assert!(init(LogFormat::Json).is_err());
    }
}
