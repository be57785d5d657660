//! Top-level CLI definition and dispatch.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use drive_audit_helper::analysis::compare::{MissingCopies, missing_in_new};
use drive_audit_helper::analysis::integrity::{self, IntegrityReport};
use drive_audit_helper::analysis::listing;
use drive_audit_helper::core::config::Config;
use drive_audit_helper::core::errors::DahError;
use drive_audit_helper::core::signals::StopSignal;
use drive_audit_helper::download::resume::plan_for;
use drive_audit_helper::download::stream::{RecordWriter, read_all};
use drive_audit_helper::download::{
    DownloadReport, DownloaderConfig, MetadataDownloader, ResumePlan, ResumeReport, Resumer,
};
use drive_audit_helper::graph::{DriveGraph, LoadStats};
use drive_audit_helper::logger::activity::{ActivityLogger, ActivityLoggerHandle};
use drive_audit_helper::remediate::{self, Executor, RemediationConfig, RemediationReport};
use drive_audit_helper::remote::fixture::FixtureDrive;
use drive_audit_helper::remote::types::ROLE_OWNER;

/// Drive Audit Helper: audits and repairs large remote drive accounts.
#[derive(Debug, Parser)]
#[command(
    name = "dah",
    author,
    version,
    about = "Drive Audit Helper - metadata download, integrity analysis and bulk repair",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Download every item's metadata and permissions into a record stream.
    Download(DownloadArgs),
    /// Replay a partial stream, re-fetch failed records and continue the listing.
    Resume(ResumeArgs),
    /// Load a stream and report integrity findings.
    Summarize(SummarizeArgs),
    /// List aggregate sizes under a path prefix, largest first.
    Sizes(ListingArgs),
    /// List content hashes of files under a path prefix.
    Checksums(ListingArgs),
    /// Report files with fewer copies in a newer snapshot.
    Compare(CompareArgs),
    /// Delete redundant copies owned by the account.
    Dedup(DedupArgs),
    /// Move ownership of every item owned by one account to another.
    TransferOwnership(TransferArgs),
    /// Remove an account's direct permissions.
    RemovePermission(RemovePermissionArgs),
    /// Delete parentless items shared with nobody.
    RemoveOrphans(RemoveOrphansArgs),
    /// View and manage configuration.
    Config(ConfigArgs),
    /// Show version and build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Where the remote side comes from, plus rehearsal faults.
#[derive(Debug, Clone, Args, Serialize)]
struct SourceArgs {
    /// JSON drive description served as the remote service.
    #[arg(long, value_name = "PATH")]
    source: PathBuf,
    /// Fail this fraction of permission fetches (0.0-1.0).
    #[arg(long, value_name = "RATE")]
    inject_failure_rate: Option<f64>,
    /// Seed for injected failures.
    #[arg(long, default_value_t = 0, value_name = "N")]
    seed: u64,
    /// Fail the listing after this many pages.
    #[arg(long, value_name = "PAGES")]
    fail_listing_after: Option<usize>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct DownloadArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Output stream path.
    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,
    #[command(flatten)]
    request: RequestArgs,
    /// Pause before each permission fetch.
    #[arg(long, value_name = "MS")]
    delay_ms: Option<u64>,
}

/// Listing request parameters. Page tokens are only valid under the
/// parameters that produced them, so `resume` must repeat the download's.
#[derive(Debug, Clone, Args, Serialize)]
struct RequestArgs {
    /// Service-side filter, e.g. "'FOLDER_ID' in parents and trashed = false".
    #[arg(long, value_name = "EXPR")]
    query: Option<String>,
    /// Listing page size (overrides config).
    #[arg(long, value_name = "N")]
    page_size: Option<u32>,
}

impl RequestArgs {
    fn downloader_config(&self, config: &Config) -> Result<DownloaderConfig, CliError> {
        let mut dl_config = DownloaderConfig::from_config(config);
        if let Some(page_size) = self.page_size {
            if page_size == 0 {
                return Err(CliError::User("--page-size must be at least 1".to_string()));
            }
            dl_config.page_size = page_size;
        }
        dl_config.query.clone_from(&self.query);
        Ok(dl_config)
    }
}

#[derive(Debug, Clone, Args, Serialize)]
struct ResumeArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    request: RequestArgs,
    /// Partial stream to resume.
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,
    /// New stream to write; must differ from the input.
    #[arg(short, long, value_name = "PATH", required_unless_present = "plan")]
    output: Option<PathBuf>,
    /// Pause before each re-fetch (overrides config).
    #[arg(long, value_name = "MS")]
    sleep_ms: Option<u64>,
    /// Print where the listing would continue, then exit.
    #[arg(long)]
    plan: bool,
}

#[derive(Debug, Clone, Args, Serialize)]
struct SummarizeArgs {
    /// Record stream to load.
    #[arg(value_name = "STREAM")]
    stream: PathBuf,
    /// Account used for ownership-gated checks (overrides config).
    #[arg(long, value_name = "EMAIL")]
    account: Option<String>,
    /// Entries shown per finding (all with --verbose).
    #[arg(long, default_value_t = 10, value_name = "N")]
    top: usize,
    /// Re-verify graph invariants after loading.
    #[arg(long)]
    check: bool,
}

#[derive(Debug, Clone, Args, Serialize)]
struct ListingArgs {
    /// Record stream to load.
    #[arg(value_name = "STREAM")]
    stream: PathBuf,
    /// Only paths at or below this prefix.
    #[arg(long, default_value = "", value_name = "PATH")]
    prefix: String,
}

#[derive(Debug, Clone, Args, Serialize)]
struct CompareArgs {
    /// Older snapshot.
    #[arg(value_name = "OLD")]
    old: PathBuf,
    /// Newer snapshot.
    #[arg(value_name = "NEW")]
    new: PathBuf,
    /// Maximum rows to display.
    #[arg(long, value_name = "N")]
    top: Option<usize>,
}

/// Shared by every command that mutates the remote side.
#[derive(Debug, Clone, Args, Serialize)]
struct RemediateArgs {
    /// JSON drive description to repair; rewritten after a real run.
    #[arg(long, value_name = "PATH")]
    source: PathBuf,
    /// Log what would change without changing anything.
    #[arg(long)]
    dry_run: bool,
    /// Skip interactive confirmation prompt.
    #[arg(long)]
    yes: bool,
    /// Pause between mutations (overrides config).
    #[arg(long, value_name = "MS")]
    delay_ms: Option<u64>,
    /// Stop after this many mutations (overrides config).
    #[arg(long, value_name = "N")]
    max_batch: Option<usize>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct DedupArgs {
    /// Record stream to analyze.
    #[arg(value_name = "STREAM")]
    stream: PathBuf,
    /// Account that must own a group (overrides config).
    #[arg(long, value_name = "EMAIL")]
    account: Option<String>,
    #[command(flatten)]
    remediate: RemediateArgs,
}

#[derive(Debug, Clone, Args, Serialize)]
struct TransferArgs {
    /// Record stream listing the items.
    #[arg(value_name = "STREAM")]
    stream: PathBuf,
    /// Current owner.
    #[arg(long, value_name = "EMAIL")]
    from: String,
    /// New owner.
    #[arg(long, value_name = "EMAIL")]
    to: String,
    #[command(flatten)]
    remediate: RemediateArgs,
}

#[derive(Debug, Clone, Args, Serialize)]
struct RemovePermissionArgs {
    /// Record stream listing the items.
    #[arg(value_name = "STREAM")]
    stream: PathBuf,
    /// Account whose permissions are removed.
    #[arg(long, value_name = "EMAIL")]
    email: String,
    #[command(flatten)]
    remediate: RemediateArgs,
}

#[derive(Debug, Clone, Args, Serialize)]
struct RemoveOrphansArgs {
    /// Record stream to analyze.
    #[arg(value_name = "STREAM")]
    stream: PathBuf,
    /// Account that must be the only principal (overrides config).
    #[arg(long, value_name = "EMAIL")]
    account: Option<String>,
    #[command(flatten)]
    remediate: RemediateArgs,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
    /// Set a specific config key.
    Set(ConfigSetArgs),
}

#[derive(Debug, Clone, Args, Serialize)]
struct ConfigSetArgs {
    /// Dot-path config key to set.
    key: String,
    /// New value to apply.
    value: String,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or an input stream that cannot be used.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<DahError> for CliError {
    fn from(e: DahError) -> Self {
        match e {
            DahError::InvalidConfig { .. }
            | DahError::MissingConfig { .. }
            | DahError::ConfigParse { .. }
            | DahError::InvalidRecord { .. }
            | DahError::ResumeInconsistent { .. }
            | DahError::GraphCycle { .. } => Self::User(e.to_string()),
            _ => Self::Runtime(e.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Download(args) => run_download(cli, args),
        Command::Resume(args) => run_resume(cli, args),
        Command::Summarize(args) => run_summarize(cli, args),
        Command::Sizes(args) => run_sizes(cli, args),
        Command::Checksums(args) => run_checksums(cli, args),
        Command::Compare(args) => run_compare(cli, args),
        Command::Dedup(args) => run_dedup(cli, args),
        Command::TransferOwnership(args) => run_transfer(cli, args),
        Command::RemovePermission(args) => run_remove_permission(cli, args),
        Command::RemoveOrphans(args) => run_remove_orphans(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

/// Activity log for one command; disabled when logging is off or the sink cannot start.
struct RunLog {
    logger: Option<ActivityLogger>,
}

impl RunLog {
    fn start(config: &Config) -> Self {
        if !config.logging.enabled {
            return Self { logger: None };
        }
        match ActivityLogger::spawn(config.jsonl_config()) {
            Ok(logger) => Self {
                logger: Some(logger),
            },
            Err(e) => {
                eprintln!("[DAH-LOG] activity log unavailable, continuing without it: {e}");
                Self { logger: None }
            }
        }
    }

    fn handle(&self) -> ActivityLoggerHandle {
        self.logger
            .as_ref()
            .map_or_else(ActivityLoggerHandle::disabled, ActivityLogger::handle)
    }

    fn finish(self) {
        if let Some(logger) = self.logger {
            logger.shutdown();
        }
    }
}

fn open_source(args: &SourceArgs) -> Result<FixtureDrive, CliError> {
    let drive = FixtureDrive::from_path(&args.source)?;
    if let Some(rate) = args.inject_failure_rate {
        if !(0.0..=1.0).contains(&rate) {
            return Err(CliError::User(format!(
                "--inject-failure-rate must be between 0 and 1, got {rate}"
            )));
        }
        drive.fail_permissions_randomly(rate, args.seed);
    }
    drive.fail_listing_after(args.fail_listing_after);
    Ok(drive)
}

fn load_graph(path: &Path) -> Result<(DriveGraph, LoadStats), CliError> {
    Ok(DriveGraph::load_stream(path)?)
}

fn account_for(arg: Option<&String>, config: &Config) -> Result<String, CliError> {
    arg.map(|email| email.trim().to_ascii_lowercase())
        .or_else(|| config.remediation.account_email.clone())
        .ok_or_else(|| {
            CliError::User(
                "no account email: pass --account or set remediation.account_email".to_string(),
            )
        })
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DAH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    #[allow(clippy::cast_precision_loss)]
    let scaled = |unit: u64| bytes as f64 / unit as f64;
    if bytes >= TIB {
        format!("{:.1} TB", scaled(TIB))
    } else if bytes >= GIB {
        format!("{:.1} GB", scaled(GIB))
    } else if bytes >= MIB {
        format!("{:.1} MB", scaled(MIB))
    } else if bytes >= KIB {
        format!("{:.1} KB", scaled(KIB))
    } else {
        format!("{bytes} B")
    }
}

fn format_count(n: usize) -> colored::ColoredString {
    if n == 0 {
        n.to_string().green()
    } else {
        n.to_string().yellow()
    }
}

// ---------------------------------------------------------------------------
// download / resume
// ---------------------------------------------------------------------------

fn run_download(cli: &Cli, args: &DownloadArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let drive = open_source(&args.source)?;

    let mut dl_config = args.request.downloader_config(&config)?;
    dl_config.delay = Duration::from_millis(args.delay_ms.unwrap_or(0));

    let log = RunLog::start(&config);
    let downloader = MetadataDownloader::new(&drive, dl_config, log.handle());
    let stop = StopSignal::install();
    let should_stop = || stop.should_stop();

    let mut writer = RecordWriter::create(&args.output)?;
    let result = downloader.run(&mut writer, None, 0, Some(&should_stop));
    let synced = writer.sync();
    log.finish();
    let report = result.map_err(|e| {
        CliError::Runtime(format!(
            "{e}\n  partial stream kept at {}; continue with `dah resume --input {}`",
            args.output.display(),
            args.output.display()
        ))
    })?;
    synced?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_download_report("Download", &report, &args.output);
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "download",
                "output": args.output.to_string_lossy(),
                "report": report,
            }))?;
        }
    }

    if report.interrupted {
        return Err(CliError::Partial(format!(
            "download interrupted; continue with `dah resume --input {}`",
            args.output.display()
        )));
    }
    Ok(())
}

fn print_download_report(label: &str, report: &DownloadReport, output: &Path) {
    println!(
        "{} {} records to {} in {:.1}s",
        format!("{label}:").bold(),
        report.records,
        output.display(),
        Duration::from_millis(report.duration_ms).as_secs_f64()
    );
    if report.failed > 0 {
        println!(
            "  {} records failed their permission fetch (re-fetched on resume)",
            report.failed.to_string().yellow()
        );
    }
    if report.interrupted {
        println!("  {}", "Interrupted; the stream is resumable.".yellow());
    }
}

fn describe_plan(plan: &ResumePlan) -> String {
    match plan {
        ResumePlan::Complete => "listing complete; only failed records will be re-fetched".to_string(),
        ResumePlan::Continue { page_token, skip } => {
            format!("continue at page token {page_token:?}, skipping {skip} items")
        }
    }
}

fn run_resume(cli: &Cli, args: &ResumeArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;

    if args.plan {
        let plan = plan_for(&args.input)?;
        match output_mode(cli) {
            OutputMode::Human => println!("{}", describe_plan(&plan)),
            OutputMode::Json => write_json_line(&json!({
                "command": "resume",
                "input": args.input.to_string_lossy(),
                "plan": plan,
            }))?,
        }
        return Ok(());
    }
    let output = args
        .output
        .as_deref()
        .ok_or_else(|| CliError::User("--output is required".to_string()))?;

    let dl_config = args.request.downloader_config(&config)?;
    let drive = open_source(&args.source)?;
    let log = RunLog::start(&config);
    let downloader = MetadataDownloader::new(&drive, dl_config, log.handle());
    let sleep = Duration::from_millis(args.sleep_ms.unwrap_or(config.resume.sleep_ms));
    let resumer = Resumer::new(&downloader, log.handle(), sleep);
    let stop = StopSignal::install();
    let should_stop = || stop.should_stop();

    let result = resumer.run(&args.input, output, Some(&should_stop));
    log.finish();
    let report = result?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_resume_report(&report, output);
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "resume",
                "input": args.input.to_string_lossy(),
                "output": output.to_string_lossy(),
                "report": report,
            }))?;
        }
    }

    if report.interrupted {
        return Err(CliError::Partial(format!(
            "resume interrupted; continue with `dah resume --input {}`",
            output.display()
        )));
    }
    Ok(())
}

fn print_resume_report(report: &ResumeReport, output: &Path) {
    println!("{} {}", "Resume:".bold(), describe_plan(&report.plan));
    println!(
        "  Replayed {} records, re-fetched {}, still failed {}",
        report.replayed,
        report.refetched.to_string().green(),
        format_count(report.still_failed)
    );
    if let Some(continued) = &report.continued {
        print_download_report("  Continued", continued, output);
    }
    if report.interrupted {
        println!("  {}", "Interrupted; the output stream is resumable.".yellow());
    }
}

// ---------------------------------------------------------------------------
// Read-only analysis
// ---------------------------------------------------------------------------

fn run_summarize(cli: &Cli, args: &SummarizeArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let (graph, stats) = load_graph(&args.stream)?;
    let account = args
        .account
        .as_ref()
        .map(|email| email.trim().to_ascii_lowercase())
        .or_else(|| config.remediation.account_email.clone());

    if args.check
        && let Err(violations) = graph.check_invariants()
    {
        return Err(CliError::Internal(format!(
            "graph invariants violated:\n  {}",
            violations.join("\n  ")
        )));
    }

    let report = integrity::analyze(&graph, account.as_deref());
    let fingerprint = graph.fingerprint();

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                let limit = if cli.verbose { usize::MAX } else { args.top };
                print_summary(&graph, &stats, &report, account.as_deref(), limit);
                println!("Fingerprint: {fingerprint}");
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "summarize",
                "stream": args.stream.to_string_lossy(),
                "load": stats,
                "account": account,
                "fingerprint": fingerprint,
                "report": report,
            }))?;
        }
    }
    Ok(())
}

fn print_summary(
    graph: &DriveGraph,
    stats: &LoadStats,
    report: &IntegrityReport,
    account: Option<&str>,
    limit: usize,
) {
    let total: u64 = graph.roots().map(|root| root.size).sum();
    println!("{}", "Drive summary".bold());
    println!(
        "  Records: {} ({} failed)   Nodes: {} ({} placeholders)   Root total: {}",
        stats.records,
        format_count(stats.failed),
        report.nodes,
        report.placeholders,
        format_bytes(total)
    );
    println!();

    println!("Multi-parent items: {}", format_count(report.multi_parent.len()));
    for entry in report.multi_parent.iter().take(limit) {
        println!("  {}  ({} parents)", entry.path, entry.parent_ids.len());
    }

    println!("Duplicate entries: {}", format_count(report.duplicate_entries.len()));
    for entry in report.duplicate_entries.iter().take(limit) {
        println!("  {}  x{}", entry.path, entry.ids.len());
    }

    println!("Duplicate content: {}", format_count(report.duplicate_content.len()));
    for entry in report.duplicate_content.iter().take(limit) {
        println!(
            "  {}  {}  x{}",
            entry.md5,
            format_bytes(entry.size),
            entry.ids.len()
        );
        for path in &entry.paths {
            println!("    {path}");
        }
    }

    println!("Orphans: {}", format_count(report.orphans.len()));
    for entry in report.orphans.iter().take(limit) {
        println!("  {}  {}", format_bytes(entry.size), entry.path);
    }

    match account {
        Some(email) => {
            println!(
                "Dedup candidates for {email}: {}",
                format_count(report.dedup_candidates.len())
            );
            for entry in report.dedup_candidates.iter().take(limit) {
                println!(
                    "  {}  {}  x{}",
                    entry.path,
                    format_bytes(entry.size),
                    entry.ids.len()
                );
            }
            println!(
                "Not owned by {email}: {}",
                format_count(report.foreign_owned.len())
            );
            for entry in report.foreign_owned.iter().take(limit) {
                println!("  {}  (owners: {})", entry.path, entry.owners.join(", "));
            }
        }
        None => println!(
            "{}",
            "Ownership checks skipped (no account configured).".dimmed()
        ),
    }
}

fn run_sizes(cli: &Cli, args: &ListingArgs) -> Result<(), CliError> {
    let (graph, _) = load_graph(&args.stream)?;
    let rows = listing::sizes(&graph, &args.prefix);
    match output_mode(cli) {
        OutputMode::Human => print!("{}", listing::format_rows(&rows)),
        OutputMode::Json => {
            let entries: Vec<Value> = rows
                .iter()
                .map(|(size, path)| json!({ "size": size, "path": path }))
                .collect();
            write_json_line(&json!({ "command": "sizes", "entries": entries }))?;
        }
    }
    Ok(())
}

fn run_checksums(cli: &Cli, args: &ListingArgs) -> Result<(), CliError> {
    let (graph, _) = load_graph(&args.stream)?;
    let rows = listing::checksums(&graph, &args.prefix);
    match output_mode(cli) {
        OutputMode::Human => print!("{}", listing::format_rows(&rows)),
        OutputMode::Json => {
            let entries: Vec<Value> = rows
                .iter()
                .map(|(md5, name)| json!({ "md5": md5, "name": name }))
                .collect();
            write_json_line(&json!({ "command": "checksums", "entries": entries }))?;
        }
    }
    Ok(())
}

fn run_compare(cli: &Cli, args: &CompareArgs) -> Result<(), CliError> {
    let (old, _) = load_graph(&args.old)?;
    let (new, _) = load_graph(&args.new)?;
    let mut missing = missing_in_new(&old, &new);
    if let Some(top) = args.top {
        missing.truncate(top);
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if missing.is_empty() {
                if !cli.quiet {
                    println!("Every file in the old snapshot has as many copies in the new one.");
                }
            } else {
                print_missing(&missing);
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({ "command": "compare", "missing": missing }))?;
        }
    }
    Ok(())
}

fn print_missing(missing: &[MissingCopies]) {
    for entry in missing {
        println!(
            "{:>10}  {} -> {}  {}",
            format_bytes(entry.size),
            entry.old_count,
            entry.new_count.to_string().red(),
            entry.example_path
        );
    }
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

fn remediation_config(config: &Config, args: &RemediateArgs) -> RemediationConfig {
    let mut rc = RemediationConfig::from_config(config);
    rc.dry_run |= args.dry_run;
    if let Some(ms) = args.delay_ms {
        rc.delay = Duration::from_millis(ms);
    }
    if args.max_batch.is_some() {
        rc.max_batch = args.max_batch;
    }
    rc
}

/// Ask before mutating, unless told not to or there is nobody to ask.
fn confirm(cli: &Cli, args: &RemediateArgs, dry_run: bool, prompt: &str) -> Result<bool, CliError> {
    if dry_run || args.yes || !io::stdin().is_terminal() || output_mode(cli) == OutputMode::Json {
        return Ok(true);
    }
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Open the source, run one remediator, persist the source and report.
fn run_remediation<F>(
    cli: &Cli,
    config: &Config,
    args: &RemediateArgs,
    operation: &str,
    candidates: usize,
    body: F,
) -> Result<(), CliError>
where
    F: FnOnce(&mut Executor<'_, FixtureDrive>),
{
    let rc = remediation_config(config, args);
    if candidates == 0 {
        if output_mode(cli) == OutputMode::Json {
            let empty = RemediationReport {
                operation: operation.to_string(),
                dry_run: rc.dry_run,
                ..RemediationReport::default()
            };
            write_json_line(&json!({
                "command": operation,
                "candidates": 0,
                "report": empty,
            }))?;
        } else if !cli.quiet {
            println!("{operation}: nothing to do.");
        }
        return Ok(());
    }
    if !confirm(
        cli,
        args,
        rc.dry_run,
        &format!("{operation}: {candidates} candidates will be changed. Proceed?"),
    )? {
        return Err(CliError::User("aborted by operator".to_string()));
    }

    let drive = FixtureDrive::from_path(&args.source)?;
    let log = RunLog::start(config);
    let stop = StopSignal::install();
    let should_stop = || stop.should_stop();
    let dry_run = rc.dry_run;

    let mut exec = Executor::new(operation, &drive, rc, log.handle(), Some(&should_stop));
    body(&mut exec);
    let report = exec.finish();
    log.finish();

    if !dry_run && report.applied > 0 {
        drive.save(&args.source)?;
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_remediation_report(&report, cli.verbose);
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": operation,
                "candidates": candidates,
                "report": report,
            }))?;
        }
    }

    if report.failed > 0 || report.interrupted {
        return Err(CliError::Partial(format!(
            "{operation}: {} applied, {} failed{}",
            report.applied,
            report.failed,
            if report.interrupted { ", interrupted" } else { "" }
        )));
    }
    Ok(())
}

fn print_remediation_report(report: &RemediationReport, verbose: bool) {
    let verb = if report.dry_run { "would apply" } else { "applied" };
    println!(
        "{} {verb} {}, skipped {}, failed {}",
        format!("{}:", report.operation).bold(),
        report.applied.to_string().green(),
        report.skipped,
        if report.failed == 0 {
            report.failed.to_string().green()
        } else {
            report.failed.to_string().red()
        }
    );
    if report.aborted_groups > 0 {
        println!(
            "  {} groups aborted: members changed since the download",
            report.aborted_groups.to_string().yellow()
        );
    }
    if report.batch_limit_reached {
        println!("  Stopped at the batch limit.");
    }
    if report.interrupted {
        println!("  {}", "Interrupted.".yellow());
    }
    let shown = if verbose { report.errors.len() } else { 10 };
    for err in report.errors.iter().take(shown) {
        eprintln!("    {} {}: {} ({})", err.item_id, err.action, err.message, err.class);
    }
    if report.errors.len() > shown {
        eprintln!("    ... {} more (use --verbose)", report.errors.len() - shown);
    }
}

fn run_dedup(cli: &Cli, args: &DedupArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let account = account_for(args.account.as_ref(), &config)?;
    let (graph, _) = load_graph(&args.stream)?;
    let groups = integrity::dedup_candidates(&graph, &account);
    let redundant: usize = groups.iter().map(|g| g.ids.len() - 1).sum();

    if output_mode(cli) == OutputMode::Human && !cli.quiet {
        for group in &groups {
            println!(
                "{}  {}  keep 1 of {}",
                group.path,
                format_bytes(group.size),
                group.ids.len()
            );
        }
    }
    run_remediation(cli, &config, &args.remediate, "dedup", redundant, |exec| {
        remediate::execute_dedup(exec, &groups);
    })
}

fn run_transfer(cli: &Cli, args: &TransferArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let records = read_all(&args.stream)?;
    let from = args.from.trim().to_ascii_lowercase();
    let to = args.to.trim().to_ascii_lowercase();
    if from == to {
        return Err(CliError::User("--from and --to name the same account".to_string()));
    }
    let owned = records
        .iter()
        .filter(|r| r.permissions.iter().any(|p| p.grants(ROLE_OWNER, &from)))
        .count();
    run_remediation(
        cli,
        &config,
        &args.remediate,
        "transfer-ownership",
        owned,
        |exec| remediate::transfer_ownership(exec, records, &from, &to),
    )
}

fn run_remove_permission(cli: &Cli, args: &RemovePermissionArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let records = read_all(&args.stream)?;
    let email = args.email.trim().to_ascii_lowercase();
    let affected = records
        .iter()
        .filter(|r| r.permissions.iter().any(|p| p.is_user(&email)))
        .count();
    run_remediation(
        cli,
        &config,
        &args.remediate,
        "remove-permission",
        affected,
        |exec| remediate::remove_permission(exec, records, &email),
    )
}

fn run_remove_orphans(cli: &Cli, args: &RemoveOrphansArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let account = account_for(args.account.as_ref(), &config)?;
    let (graph, _) = load_graph(&args.stream)?;
    let orphans: Vec<_> = integrity::orphans(&graph)
        .into_iter()
        .filter(|o| o.permissions.iter().any(|p| p.is_owner(&account)))
        .collect();

    if output_mode(cli) == OutputMode::Human && cli.verbose {
        for orphan in &orphans {
            println!("{}  {}", format_bytes(orphan.size), orphan.path);
        }
    }
    run_remediation(
        cli,
        &config,
        &args.remediate,
        "remove-orphans",
        orphans.len(),
        |exec| remediate::remove_orphans(exec, &orphans, &account),
    )
}

// ---------------------------------------------------------------------------
// config / version
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                if output_mode(cli) == OutputMode::Json {
                    write_json_line(&json!({
                        "command": "config validate",
                        "valid": false,
                        "error": e.to_string(),
                    }))?;
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
        Some(ConfigCommand::Set(set_args)) => run_config_set(cli, set_args),
    }
}

fn run_config_set(cli: &Cli, set_args: &ConfigSetArgs) -> Result<(), CliError> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    let mut toml_value: toml::Value = if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| CliError::Runtime(format!("read config: {e}")))?;
        toml::from_str(&raw).map_err(|e| CliError::User(format!("parse config: {e}")))?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    set_toml_value(&mut toml_value, &set_args.key, &set_args.value)?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError::Runtime(format!("create config dir: {e}")))?;
    }
    let toml_str = toml::to_string_pretty(&toml_value)
        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
    std::fs::write(&config_path, &toml_str)
        .map_err(|e| CliError::Runtime(format!("write config: {e}")))?;

    let validation = Config::load(Some(&config_path));
    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Set {} = {} in {}",
                set_args.key,
                set_args.value,
                config_path.display()
            );
            if let Err(e) = &validation {
                eprintln!("Warning: resulting configuration is invalid: {e}");
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "config set",
                "key": set_args.key,
                "value": set_args.value,
                "path": config_path.to_string_lossy(),
                "valid": validation.is_ok(),
                "validation_error": validation.as_ref().err().map(ToString::to_string),
            }))?;
        }
    }
    validation
        .map(|_| ())
        .map_err(|e| CliError::Partial(format!("value set but config invalid: {e}")))
}

/// Set a value in a TOML table using a dot-separated path.
fn set_toml_value(root: &mut toml::Value, dot_path: &str, raw_value: &str) -> Result<(), CliError> {
    let mut parts: Vec<&str> = dot_path.split('.').collect();
    let Some(leaf) = parts.pop().filter(|leaf| !leaf.is_empty()) else {
        return Err(CliError::User("empty config key".to_string()));
    };

    let mut current = root;
    for part in parts {
        current = current
            .as_table_mut()
            .ok_or_else(|| CliError::User(format!("key path component is not a table: {part}")))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current
        .as_table_mut()
        .ok_or_else(|| CliError::User("parent is not a table".to_string()))?;
    table.insert(leaf.to_string(), parse_toml_value(raw_value));
    Ok(())
}

/// Parse a raw string into a TOML value, guessing the type.
fn parse_toml_value(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    toml::Value::String(raw.to_string())
}

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let git_sha = option_env!("GIT_SHA").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("dah {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("git_sha: {git_sha}");
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "binary": "dah",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                    "git_sha": git_sha,
                }
            }))?;
        }
    }
    Ok(())
}
