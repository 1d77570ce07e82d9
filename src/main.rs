use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rubric_tools::api::RubricApi;
use rubric_tools::batch::{HttpTransport, Transport};
use rubric_tools::config::{Config, DEFAULT_CONFIG_FILE};
use rubric_tools::model::Assignment;
use rubric_tools::sync::{self, AssumeYes, Confirm, Decision, SyncOptions, SyncOutcome};
use rubric_tools::{Result, ToolError, io};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging(cli.verbose) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
    if let Err(error) = run(cli).await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli.connection)?;
    let api = RubricApi::new(HttpTransport::new(&config)?);
    match cli.command {
        Command::Sync(args) => execute_sync(&api, args).await,
        Command::Export(args) => execute_export(&api, args).await,
        Command::Rename(args) => execute_rename(&api, args).await,
    }
}

async fn execute_sync<T: Transport>(api: &RubricApi<T>, args: SyncArgs) -> Result<()> {
    if !args.input.exists() {
        return Err(ToolError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input file not found: {}", args.input.display()),
        )));
    }
    let desired = match args.format.unwrap_or_else(|| DataFormat::guess(&args.input)) {
        DataFormat::Excel => {
            io::sheet_read::read_rubric(&args.input, args.sheet.as_deref(), args.lenient)?
        }
        DataFormat::Json => io::json::read_rubric(&args.input)?,
    };

    let assignment = resolve_assignment(api, &args.target).await?;
    let options = SyncOptions {
        wipe: args.wipe,
        delete_extra: args.delete_extra,
    };
    let mut confirm: Box<dyn Confirm> = if args.force {
        Box::new(AssumeYes)
    } else {
        Box::new(StdinConfirm)
    };

    match sync::synchronize(api, assignment.id, &desired, options, confirm.as_mut()).await? {
        SyncOutcome::Applied(report) => println!("{}: {report}", assignment.name),
        SyncOutcome::Declined => println!("{}: rubric left unchanged", assignment.name),
    }
    Ok(())
}

async fn execute_export<T: Transport>(api: &RubricApi<T>, args: ExportArgs) -> Result<()> {
    let assignment = resolve_assignment(api, &args.target).await?;
    let rubric = if args.instances {
        sync::export_rubric_with_usage(api, assignment.id).await?
    } else {
        sync::export_rubric(api, assignment.id).await?
    };
    match args.format.unwrap_or_else(|| DataFormat::guess(&args.output)) {
        DataFormat::Excel => io::sheet_write::write_rubric(&args.output, &args.sheet, &rubric),
        DataFormat::Json => io::json::write_rubric(&args.output, &rubric),
    }
}

async fn execute_rename<T: Transport>(api: &RubricApi<T>, args: RenameArgs) -> Result<()> {
    let renames = io::sheet_read::read_renames(&args.input, args.sheet.as_deref())?;
    let assignment = resolve_assignment(api, &args.target).await?;
    let renamed = sync::rename_comments(api, assignment.id, &renames).await?;
    println!("{}: renamed {renamed} comments", assignment.name);
    Ok(())
}

async fn resolve_assignment<T: Transport>(
    api: &RubricApi<T>,
    target: &TargetArgs,
) -> Result<Assignment> {
    match (target.assignment_id, &target.course, &target.assignment) {
        (Some(id), _, _) => api.assignment(id).await,
        (None, Some(course), Some(name)) => {
            api.find_assignment(course, &target.period, name).await
        }
        _ => Err(ToolError::Config(
            "pass --assignment-id, or --course and --assignment".into(),
        )),
    }
}

fn resolve_config(args: &ConnectionArgs) -> Result<Config> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = if path.exists() {
        Config::load(&path)?
    } else if args.config.is_some() {
        return Err(ToolError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    } else {
        Config::anonymous()?
    };
    if let Some(api_key) = &args.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url)?;
    }
    Ok(config)
}

fn init_logging(verbose: bool) -> Result<()> {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|error| ToolError::Logging(error.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| ToolError::Logging(error.to_string()))
}

/// Asks on stdin; end of input or anything unrecognised cancels.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> Decision {
        eprint!("{prompt} [y/n/c] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return Decision::Cancel;
        }
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Decision::Yes,
            "n" | "no" => Decision::No,
            _ => Decision::Cancel,
        }
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Keep a codePost grading rubric in sync with a spreadsheet."
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ConnectionArgs {
    /// API key; overrides the config file.
    #[arg(long, env = "CODEPOST_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// JSON config file holding `api_key` and optionally `base_url`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Alternative API endpoint.
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Assignment id.
    #[arg(long)]
    assignment_id: Option<u64>,

    /// Course name, used with --assignment.
    #[arg(long)]
    course: Option<String>,

    /// Course period.
    #[arg(long, default_value = "")]
    period: String,

    /// Assignment name within the course.
    #[arg(long)]
    assignment: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Make the remote rubric match the input.
    Sync(SyncArgs),
    /// Write the current rubric to a workbook or JSON file.
    Export(ExportArgs),
    /// Rename comments using the `Name` and `New Name` columns of a sheet.
    Rename(RenameArgs),
}

#[derive(clap::Args)]
struct SyncArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Rubric workbook or JSON file.
    #[arg(long)]
    input: PathBuf,

    /// Input representation; guessed from the extension when omitted.
    #[arg(long, value_enum)]
    format: Option<DataFormat>,

    /// Worksheet to read; defaults to the first one.
    #[arg(long)]
    sheet: Option<String>,

    /// Delete the existing rubric and recreate it.
    #[arg(long)]
    wipe: bool,

    /// Delete remote categories and comments missing from the input.
    #[arg(long)]
    delete_extra: bool,

    /// Proceed without asking when the assignment has submissions.
    #[arg(long)]
    force: bool,

    /// Drop malformed rows instead of failing.
    #[arg(long)]
    lenient: bool,
}

#[derive(clap::Args)]
struct ExportArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Output file path.
    #[arg(long)]
    output: PathBuf,

    /// Output representation; guessed from the extension when omitted.
    #[arg(long, value_enum)]
    format: Option<DataFormat>,

    /// Worksheet name for workbook output.
    #[arg(long, default_value = "Rubric")]
    sheet: String,

    /// Add how often each comment was applied, with its upvotes and
    /// downvotes. Reads every submission of the assignment.
    #[arg(short = 'i', long)]
    instances: bool,
}

#[derive(clap::Args)]
struct RenameArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Workbook with `Name` and `New Name` columns.
    #[arg(long)]
    input: PathBuf,

    /// Worksheet to read; defaults to the first one.
    #[arg(long)]
    sheet: Option<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DataFormat {
    Excel,
    Json,
}

impl DataFormat {
    fn guess(path: &Path) -> Self {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some(extension) if extension.eq_ignore_ascii_case("json") => DataFormat::Json,
            _ => DataFormat::Excel,
        }
    }
}
