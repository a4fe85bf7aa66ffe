//! Configuration loading and logging setup.

use std::fs;
use std::path::Path;

use tollgate_engine::EngineConfig;
use tracing_subscriber::EnvFilter;

/// Load the engine configuration from a TOML file, or the defaults when no
/// path is given.
pub(crate) fn load(path: Option<&Path>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read config '{}': {}", path.display(), e))?;
    parse(&text).map_err(|e| format!("invalid config '{}': {}", path.display(), e))
}

fn parse(text: &str) -> Result<EngineConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Log to stderr. `RUST_LOG` wins over the configured level.
pub(crate) fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .try_init();
}
