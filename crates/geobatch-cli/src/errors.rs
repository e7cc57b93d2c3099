use console::style;
use std::fmt;
use std::path::Path;

use geobatch_core::GeobatchError;

/// Error with suggestions for the user
pub struct CliError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
    pub help_command: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
            help_command: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, command: impl Into<String>) -> Self {
        self.help_command = Some(command.into());
        self
    }

    pub fn display(&self) {
        eprintln!("{} {}\n", style("✗").red().bold(), style(&self.message).red().bold());

        if let Some(ref context) = self.context {
            eprintln!("{}", context);
            eprintln!();
        }

        if !self.suggestions.is_empty() {
            eprintln!("{}", style("To fix this:").yellow().bold());
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, suggestion);
            }
            eprintln!();
        }

        if let Some(ref help_cmd) = self.help_command {
            eprintln!("{} {}", style("Need help?").cyan(), style(help_cmd).cyan().bold());
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Create error for a missing plot file
pub fn plots_not_found(path: &Path) -> CliError {
    CliError::new("Plot file not found")
        .with_context(format!("The specified GeoJSON file does not exist.\n\nPath: {}", path.display()))
        .with_suggestion("Check the file path and try again")
        .with_suggestion("Use absolute path or path relative to current directory")
        .with_help("Run: geobatch run --help")
}

/// Create error for a missing layers file
pub fn layers_not_found(path: &Path) -> CliError {
    CliError::new("Layers file not found")
        .with_context(format!("The specified layers file does not exist.\n\nPath: {}", path.display()))
        .with_suggestion("Declare layers in TOML:\n  [[layers]]\n  name = \"forest\"\n  bands = [\"tree_cover\"]")
        .with_help("Run: geobatch run --help")
}

/// Create error for a run without a remote service
pub fn service_url_missing() -> CliError {
    CliError::new("No remote service configured")
        .with_context("A batch run needs the base URL of the remote compute service.")
        .with_suggestion("Pass it directly: geobatch run --service-url https://compute.example.org ...")
        .with_suggestion("Or export GEOBATCH_SERVICE_URL")
        .with_suggestion("Or add service_url to geobatch.toml")
        .with_help("Run: geobatch config")
}

/// Create error for a directory without usable tiles
pub fn mosaic_empty(dir: &Path) -> CliError {
    CliError::new("No usable tiles")
        .with_context(format!(
            "No raster tile could be read from the tile directory.\n\nDirectory: {}",
            dir.display()
        ))
        .with_suggestion("Check that the directory holds .tif files from a previous run")
        .with_suggestion("Check that exclude_pattern does not match every tile")
        .with_help("Run: geobatch mosaic --help")
}

/// Create error for no layer surviving composition
pub fn no_layers() -> CliError {
    CliError::new("No raster layer could be prepared")
        .with_context("Every layer in the layers file failed validation or preparation.")
        .with_suggestion("Check the warnings above for the reason of each layer")
        .with_help("Run: geobatch run --help")
}

/// Create error for invalid configuration
pub fn invalid_config(key: &str, reason: &str) -> CliError {
    CliError::new(format!("Invalid configuration: {}", key))
        .with_context(format!("Configuration value is invalid.\n\nReason: {}", reason))
        .with_suggestion("Check geobatch.toml and GEOBATCH_* variables")
        .with_suggestion("Inspect resolved values: geobatch config")
        .with_help("Run: geobatch config")
}

/// Convert anyhow::Error to CliError with context
pub fn from_anyhow(error: anyhow::Error) -> CliError {
    let error = match error.downcast::<CliError>() {
        Ok(cli_error) => return cli_error,
        Err(error) => error,
    };

    if let Some(engine_error) = error.chain().find_map(|e| e.downcast_ref::<GeobatchError>()) {
        return match engine_error {
            GeobatchError::ConfigInvalid { key, reason } => invalid_config(key, reason),
            GeobatchError::MosaicEmpty { dir } => mosaic_empty(dir),
            GeobatchError::TilePlanInfeasible { .. } => CliError::new("Tile plan infeasible")
                .with_context(format!("Error: {}", engine_error))
                .with_suggestion("Reduce the number of bands")
                .with_suggestion("Or raise byte_limit / safety_margin")
                .with_help("Run: geobatch plan --help"),
            GeobatchError::DuplicateFeatureId { feature_id } => {
                CliError::new("Duplicate plot id")
                    .with_context(format!("Plot id {} appears more than once.", feature_id))
                    .with_suggestion("Make ids unique or pick another --id-property")
            }
            GeobatchError::Cancelled => CliError::new("Batch cancelled")
                .with_context("Tiles downloaded so far are kept and reused by the next run."),
            _ => CliError::new(format!("{:#}", error)),
        };
    }

    let message = format!("{:#}", error);
    if message.contains("No such file or directory") {
        CliError::new("File not found")
            .with_context(format!("Error: {}", message))
            .with_suggestion("Check the file path and try again")
    } else if message.contains("permission denied") || message.contains("Permission denied") {
        CliError::new("Permission denied")
            .with_context(format!("Error: {}", message))
            .with_suggestion("Check file permissions")
            .with_suggestion("Or run with appropriate privileges")
    } else {
        CliError::new(message)
    }
}
