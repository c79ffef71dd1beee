use clap::{Parser, Subcommand};
use jiff::Timestamp;
use openshift_idling::{
    cli::{CommonOptions, IdleArguments, UnidleArguments},
    client::KubeClusterClient,
    idle::{self, run_idle},
    logging::{self, initialize_logging},
    output::Printer,
    selection,
    unidle::{self, run_unidle},
};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "oc-idle";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to load the Kubernetes configuration"))]
    InferKubeConfig { source: kube::config::InferConfigError },

    #[snafu(display("failed to create the Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("invalid arguments"))]
    InvalidArguments { source: selection::Error },

    #[snafu(display("failed to idle"))]
    Idle { source: idle::Error },

    #[snafu(display("failed to unidle"))]
    Unidle { source: unidle::Error },
}

impl Error {
    /// Whether the failures have already been reported while running.
    fn already_reported(&self) -> bool {
        matches!(
            self,
            Self::Idle {
                source: idle::Error::ExitWithFailure
            } | Self::Unidle {
                source: unidle::Error::ExitWithFailure
            }
        )
    }
}

#[derive(Debug, Parser)]
#[command(name = "oc", author, version, about = "Idle and unidle OpenShift services")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonOptions,
}

#[derive(Debug, Subcommand)]
enum Command {
    Idle(IdleArguments),
    Unidle(UnidleArguments),
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    initialize_logging(APP_NAME, &cli.common.telemetry).context(InitializeLoggingSnafu)?;

    match run(cli).await {
        Err(error) if error.already_reported() => std::process::exit(1),
        result => result,
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = kube::Config::infer().await.context(InferKubeConfigSnafu)?;
    let default_namespace = config.default_namespace.clone();
    let client = kube::Client::try_from(config).context(CreateClientSnafu)?;
    let client = KubeClusterClient::new(client, Some(cli.common.field_manager));

    let mut printer = Printer::stdio();

    match cli.command {
        Command::Idle(arguments) => {
            let options = arguments
                .into_options(&default_namespace, Timestamp::now())
                .context(InvalidArgumentsSnafu)?;
            run_idle(&client, &options, &mut printer)
                .await
                .context(IdleSnafu)
        }
        Command::Unidle(arguments) => {
            let options = arguments
                .into_options(&default_namespace)
                .context(InvalidArgumentsSnafu)?;
            run_unidle(&client, &options, &mut printer)
                .await
                .context(UnidleSnafu)
        }
    }
}
