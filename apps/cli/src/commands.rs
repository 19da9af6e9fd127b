//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use researchbrief_core::{
    Orchestrator, ProgressReporter, QueryGenerator, Stage, TemplateQueryGenerator,
    build_chat_model, build_query_generator, generate_queries,
};
use researchbrief_shared::{
    AppConfig, ErrorBody, PipelineLimits, ResearchError, ResearchRequest, ResearchResponse,
    SearchQuery, init_config, load_config, load_config_from,
};
use tracing::{error, info};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ResearchBrief: research briefs for government document drafting.
#[derive(Parser)]
#[command(
    name = "researchbrief",
    version,
    about = "Generate queries, search the web, and summarize sources into a research brief.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json. Logs go to stderr.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.researchbrief/researchbrief.toml).
    #[arg(long, env = "RESEARCHBRIEF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline and print the response JSON.
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Use reviewed queries from a JSON file (as printed by `queries`) instead of generating.
        #[arg(long)]
        queries: Option<PathBuf>,

        /// Request deadline in seconds.
        #[arg(long)]
        deadline: Option<u64>,

        #[command(flatten)]
        generation: GenerationArgs,

        /// Print run diagnostics (failed queries and sources) to stderr.
        #[arg(long)]
        diagnostics: bool,

        /// Pretty-print the JSON output.
        #[arg(long)]
        pretty: bool,
    },

    /// Generate search queries only, for review before `run --queries`.
    Queries {
        #[command(flatten)]
        request: RequestArgs,

        #[command(flatten)]
        generation: GenerationArgs,

        /// Pretty-print the JSON output.
        #[arg(long)]
        pretty: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Where the research request comes from.
#[derive(Args)]
pub(crate) struct RequestArgs {
    /// Subject of the document being drafted.
    #[arg(long, required_unless_present = "request")]
    pub subject: Option<String>,

    /// Purpose of the document.
    #[arg(long, required_unless_present = "request")]
    pub purpose: Option<String>,

    /// Jurisdiction the document applies to.
    #[arg(long)]
    pub jurisdiction: Option<String>,

    /// Read the request JSON from a file, or `-` for stdin.
    #[arg(long, conflicts_with_all = ["subject", "purpose", "jurisdiction"])]
    pub request: Option<PathBuf>,
}

/// Query generation overrides.
#[derive(Args)]
pub(crate) struct GenerationArgs {
    /// Maximum number of queries (1-10).
    #[arg(long)]
    pub max_queries: Option<usize>,

    /// Build queries from templates instead of the language model.
    #[arg(long)]
    pub template_queries: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs are written to stderr so
/// stdout carries only the JSON result.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "researchbrief=info",
        1 => "researchbrief=debug",
        _ => "researchbrief=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command and return the process exit code.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            request,
            queries,
            deadline,
            generation,
            diagnostics,
            pretty,
        } => {
            let mut config = resolve_config(config_path)?;
            if let Some(secs) = deadline {
                config.pipeline.deadline_secs = secs;
            }
            apply_generation_overrides(&mut config, &generation);
            cmd_run(
                &config,
                &request,
                queries.as_deref(),
                generation.template_queries,
                diagnostics,
                pretty,
            )
            .await
        }
        Command::Queries {
            request,
            generation,
            pretty,
        } => {
            let mut config = resolve_config(config_path)?;
            apply_generation_overrides(&mut config, &generation);
            cmd_queries(&config, &request, generation.template_queries, pretty).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

fn apply_generation_overrides(config: &mut AppConfig, generation: &GenerationArgs) {
    if let Some(max) = generation.max_queries {
        config.query_generation.max_queries = max;
    }
}

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

/// Read a file, or stdin when `path` is `-`.
fn read_input(path: &Path) -> std::result::Result<String, ResearchError> {
    if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).map_err(|e| ResearchError::io("<stdin>", e))
    } else {
        std::fs::read_to_string(path).map_err(|e| ResearchError::io(path, e))
    }
}

fn read_request(args: &RequestArgs) -> std::result::Result<ResearchRequest, ResearchError> {
    match &args.request {
        Some(path) => serde_json::from_str(&read_input(path)?)
            .map_err(|e| ResearchError::validation(format!("malformed request: {e}"))),
        None => Ok(ResearchRequest::new(
            args.subject.clone().unwrap_or_default(),
            args.purpose.clone().unwrap_or_default(),
            args.jurisdiction.clone(),
        )),
    }
}

fn read_queries(path: &Path) -> std::result::Result<Vec<SearchQuery>, ResearchError> {
    serde_json::from_str(&read_input(path)?)
        .map_err(|e| ResearchError::validation(format!("malformed query list: {e}")))
}

fn print_json(value: serde_json::Value, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    println!("{out}");
    Ok(())
}

/// Print the `{detail}` body on stdout and map the status onto an exit code.
fn report_failure(err: &ResearchError) -> ExitCode {
    error!(kind = err.kind(), status = err.status_code(), "{err}");
    let body = ErrorBody::from(err);
    println!("{}", serde_json::json!({ "detail": body.detail }));

    match err.status_code() {
        400 => ExitCode::from(2),
        502 => ExitCode::from(3),
        504 => ExitCode::from(4),
        _ => ExitCode::FAILURE,
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    request_args: &RequestArgs,
    queries_path: Option<&Path>,
    template_queries: bool,
    diagnostics: bool,
    pretty: bool,
) -> Result<ExitCode> {
    let request = match read_request(request_args) {
        Ok(request) => request,
        Err(e) => return Ok(report_failure(&e)),
    };
    let approved = match queries_path.map(read_queries).transpose() {
        Ok(approved) => approved,
        Err(e) => return Ok(report_failure(&e)),
    };
    let orchestrator = match Orchestrator::from_config(config, template_queries) {
        Ok(orchestrator) => orchestrator,
        Err(e) => return Ok(report_failure(&e)),
    };

    info!(
        subject = %request.subject,
        deadline_secs = orchestrator.limits().deadline.as_secs(),
        "starting research"
    );

    let progress = CliProgress::new();
    let outcome = orchestrator.execute(&request, approved, &progress).await;
    progress.clear();

    match outcome {
        Ok(report) => {
            print_json(serde_json::to_value(&report.response)?, pretty)?;
            if diagnostics {
                eprintln!("{}", serde_json::to_string_pretty(&report.diagnostics)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

async fn cmd_queries(
    config: &AppConfig,
    request_args: &RequestArgs,
    template_queries: bool,
    pretty: bool,
) -> Result<ExitCode> {
    let request = match read_request(request_args) {
        Ok(request) => request,
        Err(e) => return Ok(report_failure(&e)),
    };

    let generator: Arc<dyn QueryGenerator> = if template_queries {
        Arc::new(TemplateQueryGenerator)
    } else {
        build_query_generator(config, build_chat_model(&config.llm), false)
    };
    let limits = PipelineLimits::from(config);

    match generate_queries(generator.as_ref(), &request, limits.max_queries).await {
        Ok(queries) => {
            print_json(serde_json::to_value(&queries)?, pretty)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

fn cmd_config_init() -> Result<ExitCode> {
    let path = init_config().wrap_err("failed to write default config")?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(path: Option<&Path>) -> Result<ExitCode> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        let message = match stage {
            Stage::Generating => "Generating search queries",
            Stage::Searching => "Searching the web",
            Stage::Extracting => "Reading sources",
            Stage::Summarizing => "Summarizing sources",
            Stage::Aggregating => "Synthesizing key findings",
            Stage::Accepted | Stage::Complete | Stage::Failed => return,
        };
        self.spinner.set_message(message);
    }

    fn query_searched(&self, query: &SearchQuery, hits: usize, current: usize, total: usize) {
        self.spinner.set_message(format!(
            "Searching [{current}/{total}] {} ({hits} results)",
            query.query
        ));
    }

    fn source_finished(&self, url: &str, ok: bool, current: usize, total: usize) {
        let mark = if ok { "ok" } else { "skipped" };
        self.spinner
            .set_message(format!("Sources [{current}/{total}] {mark} {url}"));
    }

    fn done(&self, _response: &ResearchResponse) {
        self.spinner.finish_and_clear();
    }
}
