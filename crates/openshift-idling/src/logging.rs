//! This module initialises the tracing subscribers used by the command line
//! tools: console output on stderr and optional JSON file output.
//!
//! Command output itself is never logged to stdout, so the console layer
//! defaults to the `WARN` level. Both layers can be tuned through an
//! environment variable each, using the [`EnvFilter`] directive syntax.
use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, layer::SubscriberExt};

/// Environment variable controlling the console log level.
pub const CONSOLE_LOG_ENV_VAR: &str = "CONSOLE_LOG_LEVEL";

/// Environment variable controlling the file log level.
pub const FILE_LOG_ENV_VAR: &str = "FILE_LOG_LEVEL";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender"))]
    InitRollingFileAppender { source: InitError },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// Logging related command line arguments, shared by all subcommands.
#[derive(clap::Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[arg(long, env, global = true)]
    pub console_log_disabled: bool,

    /// Enable logging to files located in the specified DIRECTORY.
    #[arg(long, env, value_name = "DIRECTORY", global = true)]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[arg(long, env, value_name = "PERIOD", global = true)]
    pub file_log_rotation_period: Option<RotationPeriod>,
}

/// Supported periods when the log file is rolled over.
#[derive(
    clap::ValueEnum, Clone, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "PascalCase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}

/// Installs the global tracing subscriber according to `options`.
///
/// Log files are named after `app_name`. Nothing is installed if every
/// output is disabled.
pub fn initialize_logging(app_name: &str, options: &TelemetryOptions) -> Result<(), Error> {
    let layers = build_layers(app_name, options)?;

    if !layers.is_empty() {
        tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
            .context(SetGlobalDefaultSubscriberSnafu)?;
    }

    Ok(())
}

fn build_layers(
    app_name: &str,
    options: &TelemetryOptions,
) -> Result<Vec<Box<dyn Layer<Registry> + Sync + Send>>, Error> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Sync + Send>> = Vec::new();

    if !options.console_log_disabled {
        let env_filter_layer = env_filter_builder(CONSOLE_LOG_ENV_VAR, LevelFilter::WARN);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter_layer)
                .boxed(),
        );
    }

    if let Some(file_log_directory) = &options.file_log_directory {
        let env_filter_layer = env_filter_builder(FILE_LOG_ENV_VAR, LevelFilter::INFO);
        let rotation_period = options.file_log_rotation_period.clone().unwrap_or_default();

        let file_appender = RollingFileAppender::builder()
            .rotation(rotation_period.into())
            .filename_prefix(app_name)
            .filename_suffix("tracing-rs.json")
            .build(file_log_directory)
            .context(InitRollingFileAppenderSnafu)?;

        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_filter(env_filter_layer)
                .boxed(),
        );
    }

    Ok(layers)
}

fn env_filter_builder(env_var: &str, default_directive: impl Into<Directive>) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(env_var)
        .with_default_directive(default_directive.into())
        .from_env_lossy()
}
