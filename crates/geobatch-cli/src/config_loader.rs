//! Configuration loading utilities for CLI commands

use anyhow::{Context, Result};
use geobatch_core::config::{CliConfigOverrides, LayeredConfig};
use std::path::Path;

/// Config file picked up from the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "geobatch.toml";

/// Load defaults, then the config file, then `GEOBATCH_*` variables
///
/// An explicitly named file must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<LayeredConfig> {
    let mut config = LayeredConfig::with_defaults();

    match path {
        Some(path) => {
            config = config
                .load_from_file(path)
                .with_context(|| format!("Failed to load configuration file {}", path.display()))?;
        }
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.is_file() {
                config = config
                    .load_from_file(default_path)
                    .context("Failed to load configuration file")?;
            }
        }
    }

    Ok(config.load_from_env())
}

/// Load layered configuration with CLI overrides
pub fn load_config_with_overrides(
    path: Option<&Path>,
    overrides: CliConfigOverrides,
) -> Result<LayeredConfig> {
    let mut config = load_config(path)?;
    config.update_from_cli(overrides);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geobatch_core::config::ConfigSource;
    use std::io::Write;

    #[test]
    fn test_explicit_file_must_exist() {
        assert!(load_config(Some(Path::new("/no/such/geobatch.toml"))).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_workers = 3\nchunk_size = 7").unwrap();

        let config = load_config_with_overrides(
            Some(file.path()),
            CliConfigOverrides { max_workers: Some(9), ..Default::default() },
        )
        .unwrap();

        assert_eq!(config.max_workers.value, 9);
        assert_eq!(config.max_workers.source, ConfigSource::Cli);
        assert_eq!(config.chunk_size.value, 7);
    }
}
