use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_datagrabber::app::{App, SessionOverrides};
use kira_datagrabber::config::ConfigLoader;
use kira_datagrabber::domain::Element;
use kira_datagrabber::error::{ErrorKind, GrabError};
use kira_datagrabber::output::{JsonOutput, LogSink};
use kira_datagrabber::remote::SystemDataladClient;
use kira_datagrabber::workdir::{TempWorkDirs, WorkDirProvider};

#[derive(Parser)]
#[command(name = "kira-dg")]
#[command(about = "Discover and retrieve dataset elements from local or DataLad-backed datasets")]
#[command(version, author)]
struct Cli {
    /// Grabber declarations (defaults to ./kira-dg.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Trust an existing clone without comparing its id against the remote
    #[arg(long, global = true)]
    skip_id_check: bool,

    /// Do not check existing clones for previously fetched content
    #[arg(long, global = true)]
    skip_dirty_check: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List registered grabbers")]
    Grabbers,
    #[command(about = "List the elements a grabber can retrieve")]
    List(ListArgs),
    #[command(about = "Resolve and fetch the files of one or more elements")]
    Get(GetArgs),
    #[command(about = "Show versions of the external tools in use")]
    Tools,
}

#[derive(Args)]
struct ListArgs {
    grabber: String,
}

#[derive(Args)]
struct GetArgs {
    grabber: String,

    /// Elements as comma-separated values in replacement order, e.g. sub-01,ses-1
    #[arg(required = true)]
    elements: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<GrabError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GrabError) -> u8 {
    match error.kind() {
        ErrorKind::Configuration | ErrorKind::Session => 2,
        ErrorKind::RemoteIdentity | ErrorKind::RemoteOperation => 3,
        ErrorKind::ElementResolution | ErrorKind::MissingAsset => 4,
        ErrorKind::Environment => match error {
            GrabError::MissingTool(_) => 3,
            _ => 1,
        },
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workdirs: Arc<dyn WorkDirProvider> = Arc::new(TempWorkDirs::new());
    let client = SystemDataladClient::new().with_workdirs(workdirs.clone());

    if let Commands::Tools = cli.command {
        return JsonOutput::print_tools(&client.tool_info()).into_diagnostic();
    }

    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::new(resolved.registry, client, workdirs);
    let overrides = SessionOverrides {
        skip_id_check: cli.skip_id_check,
        skip_dirty_check: cli.skip_dirty_check,
    };

    match cli.command {
        Commands::Grabbers => JsonOutput::print_grabbers(&app.grabbers()).into_diagnostic(),
        Commands::List(args) => {
            let result = app.list(&args.grabber, overrides, &LogSink)?;
            JsonOutput::print_list(&result).into_diagnostic()
        }
        Commands::Get(args) => {
            let elements = args
                .elements
                .iter()
                .map(|value| value.parse::<Element>())
                .collect::<Result<Vec<_>, GrabError>>()?;
            let result = app.get(&args.grabber, &elements, overrides, &LogSink)?;
            JsonOutput::print_get(&result).into_diagnostic()
        }
        Commands::Tools => Ok(()),
    }
}
