// crates/calib-cli/src/main.rs
// ============================================================================
// Module: Calibration CLI Entry Point
// Description: Command-line interface for the calibration coordinator.
// Purpose: Serve campaigns, drive them as an operator, and run worker slices.
// Dependencies: clap, calib-cli, calib-config, calib-server, serde_jcs, tokio
// ============================================================================

//! ## Overview
//! `calib serve` hosts the coordinator. `create`, `status`, `pause`,
//! `resume`, `abort`, and `list` talk to a running coordinator over its
//! request channel. `worker run` executes one slice on a worker node.
//!
//! Exit codes: `0` on success, `1` on a business error (its kind is printed
//! on stderr), `2` when the coordinator is unreachable or answers with a
//! `transport` error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use calib_cli::ClientError;
use calib_cli::ResultFormat;
use calib_cli::RpcClient;
use calib_cli::WorkerOptions;
use calib_cli::run_worker;
use calib_cli::t;
use calib_cli::worker::DEFAULT_RESULT_FILE;
use calib_config::CalibrationConfig;
use calib_config::DEFAULT_ENDPOINT;
use calib_config::config_toml_example;
use calib_core::CampaignId;
use calib_core::CampaignRequest;
use calib_core::DropReason;
use calib_core::RunStatus;
use calib_core::SliceIndex;
use calib_core::SubmitOutcome;
use calib_server::CalibrationServer;
use clap::ArgAction;
use clap::Args;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a campaign request file.
const MAX_REQUEST_FILE_BYTES: usize = 4 * 1024 * 1024;

/// Exit code for business errors.
const EXIT_BUSINESS: u8 = 1;
/// Exit code for transport errors.
const EXIT_TRANSPORT: u8 = 2;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "calib", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the coordinator.
    Serve(ServeCommand),
    /// Create a campaign from a request file.
    Create(CreateCommand),
    /// Show the status of a campaign.
    Status(CampaignCommand),
    /// Pause a campaign.
    Pause(CampaignCommand),
    /// Resume a paused campaign.
    Resume(CampaignCommand),
    /// Abort a campaign.
    Abort(CampaignCommand),
    /// List campaigns.
    List(EndpointArgs),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Worker-node commands.
    Worker {
        /// Selected worker subcommand.
        #[command(subcommand)]
        command: WorkerCommand,
    },
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to `calibration.toml` or `CALIB_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Request channel location.
#[derive(Args, Debug)]
struct EndpointArgs {
    /// Coordinator request channel URL.
    #[arg(long, value_name = "URL", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
}

/// Arguments for `create`.
#[derive(Args, Debug)]
struct CreateCommand {
    /// Campaign request JSON file.
    #[arg(long, value_name = "PATH")]
    request: PathBuf,
    /// Request channel location.
    #[command(flatten)]
    endpoint: EndpointArgs,
}

/// Arguments for commands naming one campaign.
#[derive(Args, Debug)]
struct CampaignCommand {
    /// Campaign identifier.
    #[arg(long, value_name = "ID")]
    campaign: u64,
    /// Print the full status as canonical JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    /// Request channel location.
    #[command(flatten)]
    endpoint: EndpointArgs,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a config file.
    Validate(ConfigValidateCommand),
    /// Print an example config file.
    Example,
}

/// Arguments for `config validate`.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path (defaults to `calibration.toml` or `CALIB_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Worker subcommands.
#[derive(Subcommand, Debug)]
enum WorkerCommand {
    /// Pull one slice, run the application, and push its result.
    Run(WorkerRunCommand),
}

/// Arguments for `worker run`.
#[derive(Args, Debug)]
struct WorkerRunCommand {
    /// Campaign identifier.
    #[arg(long, value_name = "ID")]
    campaign: u64,
    /// Slice index.
    #[arg(long, value_name = "INDEX")]
    slice: u32,
    /// Directory the application runs in.
    #[arg(long, value_name = "PATH", default_value = ".")]
    work_dir: PathBuf,
    /// Result file the application writes, relative to the work directory.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_RESULT_FILE)]
    result_file: String,
    /// Result file layout.
    #[arg(long, value_enum, default_value = "scalar")]
    format: ResultFormat,
    /// Request channel location.
    #[command(flatten)]
    endpoint: EndpointArgs,
    /// Application command and arguments.
    #[arg(last = true, value_name = "APP")]
    app: Vec<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a catalog message and exit code.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
    /// Process exit code.
    code: u8,
}

impl CliError {
    /// Business or usage failure.
    const fn new(message: String) -> Self {
        Self { message, code: EXIT_BUSINESS }
    }

    /// Failure from a coordinator call.
    fn from_client(err: &ClientError) -> Self {
        let code = if err.is_transport() { EXIT_TRANSPORT } else { EXIT_BUSINESS };
        Self { message: t!("rpc.failed", kind = err.kind(), error = err), code }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.message, err.code),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        write_stdout_line(&t!("main.version", version = version))
            .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = cli.command else {
        show_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Create(command) => command_create(command).await,
        Commands::Status(command) => command_status(command).await,
        Commands::Pause(command) => command_transition(command, Transition::Pause).await,
        Commands::Resume(command) => command_transition(command, Transition::Resume).await,
        Commands::Abort(command) => command_transition(command, Transition::Abort).await,
        Commands::List(endpoint) => command_list(endpoint).await,
        Commands::Config { command } => command_config(command),
        Commands::Worker { command } => match command {
            WorkerCommand::Run(command) => command_worker_run(command).await,
        },
    }
}

/// Prints top-level help.
fn show_help() -> CliResult<()> {
    let mut command = Cli::command();
    command.print_help().map_err(|err| CliError::new(output_error("stdout", &err)))?;
    write_stdout_line("").map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(())
}

// ============================================================================
// SECTION: Server Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = CalibrationConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(t!("config.load_failed", error = err)))?;
    let server = CalibrationServer::from_config(config)
        .map_err(|err| CliError::new(t!("serve.init_failed", error = err)))?;
    server.serve().await.map_err(|err| CliError::new(t!("serve.failed", error = err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Operator Commands
// ============================================================================

/// Lifecycle transition requested by an operator.
#[derive(Debug, Clone, Copy)]
enum Transition {
    /// `pause`.
    Pause,
    /// `resume`.
    Resume,
    /// `abort`.
    Abort,
}

/// Executes the `create` command.
async fn command_create(command: CreateCommand) -> CliResult<ExitCode> {
    let request = read_campaign_request(&command.request)?;
    let client = connect(&command.endpoint)?;
    let campaign_id =
        client.create_run(&request).await.map_err(|err| CliError::from_client(&err))?;
    write_stdout_line(&t!("create.ok", campaign_id = campaign_id))
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `status` command.
async fn command_status(command: CampaignCommand) -> CliResult<ExitCode> {
    let campaign_id = parse_campaign(command.campaign)?;
    let client = connect(&command.endpoint)?;
    let status = client.status(campaign_id).await.map_err(|err| CliError::from_client(&err))?;
    if command.json {
        write_json(&status)?;
    } else {
        write_run_status(campaign_id, status.status)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes `pause`, `resume`, or `abort`.
async fn command_transition(
    command: CampaignCommand,
    transition: Transition,
) -> CliResult<ExitCode> {
    let campaign_id = parse_campaign(command.campaign)?;
    let client = connect(&command.endpoint)?;
    let status = match transition {
        Transition::Pause => client.pause(campaign_id).await,
        Transition::Resume => client.resume(campaign_id).await,
        Transition::Abort => client.abort(campaign_id).await,
    }
    .map_err(|err| CliError::from_client(&err))?;
    if command.json {
        write_json(&status)?;
    } else {
        write_run_status(campaign_id, status)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `list` command.
async fn command_list(endpoint: EndpointArgs) -> CliResult<ExitCode> {
    let client = connect(&endpoint)?;
    let campaigns = client.list().await.map_err(|err| CliError::from_client(&err))?;
    if campaigns.is_empty() {
        write_stdout_line(&t!("list.none"))
            .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    }
    write_stdout_line(&t!("list.header"))
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    for summary in campaigns {
        let line = t!(
            "list.entry",
            campaign_id = summary.campaign_id,
            status = summary.status.as_str(),
            cursor = summary.cursor,
            closed = summary.phases_closed,
            total = summary.phases_total
        );
        write_stdout_line(&line).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => command_config_validate(&command),
        ConfigCommand::Example => {
            write_stdout_line(config_toml_example().trim_end())
                .map_err(|err| CliError::new(output_error("stdout", &err)))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Executes the config validation command.
fn command_config_validate(command: &ConfigValidateCommand) -> CliResult<ExitCode> {
    let _config = CalibrationConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(t!("config.load_failed", error = err)))?;
    write_stdout_line(&t!("config.validate.ok"))
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Worker Commands
// ============================================================================

/// Executes `worker run`.
async fn command_worker_run(command: WorkerRunCommand) -> CliResult<ExitCode> {
    let campaign_id = parse_campaign(command.campaign)?;
    let slice = SliceIndex::new(command.slice);
    let mut app = command.app.into_iter();
    let program = app.next().ok_or_else(|| CliError::new(t!("worker.app_missing")))?;
    let options = WorkerOptions {
        work_dir: command.work_dir,
        program,
        args: app.collect(),
        result_file: command.result_file,
        format: command.format,
    };
    let client = connect(&command.endpoint)?;
    let report = run_worker(&client, campaign_id, slice, options)
        .await
        .map_err(|err| CliError::from_client(&err))?;
    let line = t!(
        "worker.submitted",
        slice = slice,
        campaign_id = campaign_id,
        kind = report.kind,
        cursor = report.cursor,
        outcome = describe_outcome(report.outcome)
    );
    write_stdout_line(&line).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Renders a submission outcome.
fn describe_outcome(outcome: SubmitOutcome) -> String {
    match (outcome.accepted, outcome.queued, outcome.reason) {
        (true, true, _) => t!("worker.outcome.queued"),
        (true, false, _) => t!("worker.outcome.accepted"),
        (false, _, reason) => {
            t!("worker.outcome.dropped", reason = reason.map_or("unknown", DropReason::as_str))
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a client for the requested endpoint.
fn connect(endpoint: &EndpointArgs) -> CliResult<RpcClient> {
    RpcClient::new(endpoint.endpoint.clone()).map_err(|err| {
        CliError::new(t!("client.init_failed", endpoint = endpoint.endpoint, error = err))
    })
}

/// Validates a raw campaign identifier.
fn parse_campaign(raw: u64) -> CliResult<CampaignId> {
    CampaignId::from_raw(raw).ok_or_else(|| CliError::new(t!("campaign.invalid_id", value = raw)))
}

/// Reads and decodes a campaign request file.
fn read_campaign_request(path: &Path) -> CliResult<CampaignRequest> {
    let kind = t!("input.kind.campaign_request");
    let bytes = read_bytes_with_limit(path, MAX_REQUEST_FILE_BYTES).map_err(|err| match err {
        ReadLimitError::Io(err) => {
            CliError::new(t!("input.read_failed", kind = kind, path = path.display(), error = err))
        }
        ReadLimitError::TooLarge { size, limit } => CliError::new(t!(
            "input.read_too_large",
            kind = kind,
            path = path.display(),
            size = size,
            limit = limit
        )),
    })?;
    serde_json::from_slice(&bytes).map_err(|err| {
        CliError::new(t!("input.parse_failed", kind = kind, path = path.display(), error = err))
    })
}

/// File read failures.
enum ReadLimitError {
    /// I/O failure.
    Io(std::io::Error),
    /// File exceeds the limit.
    TooLarge {
        /// Observed size in bytes.
        size: u64,
        /// Limit in bytes.
        limit: usize,
    },
}

/// Reads a file, refusing anything larger than `max_bytes`.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path).map_err(ReadLimitError::Io)?;
    let size = file.metadata().map_err(ReadLimitError::Io)?.len();
    let limit = u64::try_from(max_bytes)
        .map_err(|_| ReadLimitError::TooLarge { size, limit: max_bytes })?;
    if size > limit {
        return Err(ReadLimitError::TooLarge { size, limit: max_bytes });
    }
    let mut limited = file.take(limit.saturating_add(1));
    let mut bytes = Vec::new();
    limited.read_to_end(&mut bytes).map_err(ReadLimitError::Io)?;
    if bytes.len() > max_bytes {
        let actual = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        return Err(ReadLimitError::TooLarge { size: actual, limit: max_bytes });
    }
    Ok(bytes)
}

/// Prints a one-line run status.
fn write_run_status(campaign_id: CampaignId, status: RunStatus) -> CliResult<()> {
    write_stdout_line(&t!("run.status", campaign_id = campaign_id, status = status.as_str()))
        .map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a value to stdout as canonical JSON.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let mut bytes = serde_jcs::to_vec(value)
        .map_err(|err| CliError::new(t!("output.json_failed", error = err)))?;
    bytes.push(b'\n');
    let mut stdout = std::io::stdout();
    stdout.write_all(&bytes).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    let stream_label = match stream {
        "stdout" => t!("output.stream.stdout"),
        "stderr" => t!("output.stream.stderr"),
        _ => t!("output.stream.unknown"),
    };
    t!("output.write_failed", stream = stream_label, error = error)
}

/// Emits an error message to stderr and returns the given exit code.
fn emit_error(message: &str, code: u8) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::from(code)
}
