use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scenario_loop::browser::{BrowserDriver, ChromiumConfig, ChromiumDriver};
use scenario_loop::config;
use scenario_loop::iterate::{
    AgentConfig, BreakerConfig, CircuitBreaker, CliCodingAgent, IterationController, LoopOptions,
};
use scenario_loop::llm::{HttpLanguageModel, LlmConfig};
use scenario_loop::scenario::{
    Confidence, Priority, ROOT_CATEGORY, Scenario, ScenarioMetadata, ScenarioType,
    filter_scenarios, load_scenarios, save_scenario,
};
use scenario_loop::server::{AppServer, ServerConfig};
use scenario_loop::session::{Session, cleanup_old_sessions, days, list_sessions, slugify};
use scenario_loop::verify::{
    ActionExecutor, ActionTranslator, ExecutorOptions, Orchestrator, Verifier, VerifyOptions,
    format_summary, verify_until,
};

const EXIT_FAILURES: u8 = 1;
const EXIT_ERROR: u8 = 2;

/// Scenario Loop - verify a web app against behavioral scenarios and iterate until they pass
#[derive(Parser, Debug)]
#[command(
    name = "scenario-loop",
    version,
    about = "Verify a web application against natural-language scenarios and drive a coding agent until they pass",
    after_help = "ENVIRONMENT VARIABLES:\n\
        SCENARIO_LOOP_LLM_ENDPOINT     Model API endpoint URL\n\
        SCENARIO_LOOP_LLM_FLAVOR       anthropic | openai\n\
        SCENARIO_LOOP_LLM_MODEL        Model identifier\n\
        SCENARIO_LOOP_LLM_API_KEY      API key (or ANTHROPIC_API_KEY / OPENAI_API_KEY)\n\
        SCENARIO_LOOP_BASE_URL         Application origin\n\
        SCENARIO_LOOP_START_COMMAND    Command that starts the application\n\
        SCENARIO_LOOP_AGENT            Coding agent executable\n\
        SCENARIO_LOOP_SESSION_DIR      Base directory for sessions\n\
        RUST_LOG                       Log filter (default: info)"
)]
struct Cli {
    /// Debug-level logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every scenario once and report
    Verify {
        #[command(flatten)]
        run: RunArgs,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Alternate coding-agent runs and verification until all scenarios pass
    Loop {
        #[command(flatten)]
        run: RunArgs,

        /// Maximum iterations
        #[arg(long, short = 'n', env = "SCENARIO_LOOP_MAX_ITERATIONS")]
        max_iterations: Option<u32>,

        /// Coding agent executable
        #[arg(long)]
        agent: Option<String>,

        /// Extra agent argument (repeatable)
        #[arg(long = "agent-arg", allow_hyphen_values = true)]
        agent_args: Vec<String>,

        /// Agent hard timeout in seconds
        #[arg(long)]
        agent_timeout: Option<u64>,

        /// Project directory the agent works in (default: current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// List scenarios
    List {
        /// Scenarios directory
        #[arg(default_value = "scenarios")]
        scenarios: PathBuf,

        /// Case-insensitive regex over name, category and path
        #[arg(long, short = 'f')]
        filter: Option<String>,
    },

    /// Create a skeleton scenario file
    New {
        /// Scenarios directory
        dir: PathBuf,

        /// Category (sub-directory); "general" writes to the root
        category: String,

        /// Scenario name
        name: String,

        /// high, medium or low
        #[arg(long, default_value = "medium")]
        priority: String,

        /// happy-path, edge-case, failure-mode or infrastructure
        #[arg(long = "type", default_value = "happy-path")]
        kind: String,
    },

    /// Remove old sessions
    Clean {
        /// Remove sessions older than this many days
        #[arg(long, default_value = "7")]
        older_than_days: u64,

        /// Sessions base directory
        #[arg(long)]
        session_dir: Option<PathBuf>,
    },
}

/// Options shared by `verify` and `loop`
#[derive(Args, Debug)]
struct RunArgs {
    /// Scenarios directory
    #[arg(default_value = "scenarios")]
    scenarios: PathBuf,

    /// Case-insensitive regex over name, category and path
    #[arg(long, short = 'f')]
    filter: Option<String>,

    /// Application origin
    #[arg(long, env = "SCENARIO_LOOP_BASE_URL", default_value = config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Command that starts the application when it is not reachable
    #[arg(long)]
    start_command: Option<String>,

    /// Command run once before each verification
    #[arg(long)]
    setup_command: Option<String>,

    /// Give the model the landing page HTML
    #[arg(long)]
    dom_context: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Per-action timeout in milliseconds
    #[arg(long)]
    action_timeout: Option<u64>,

    /// Model identifier
    #[arg(long)]
    model: Option<String>,

    /// Sessions base directory
    #[arg(long)]
    session_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("info,scenario_loop=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Verify { run, json } => verify(run, json).await,
        Commands::Loop {
            run,
            max_iterations,
            agent,
            agent_args,
            agent_timeout,
            workdir,
        } => {
            let mut agent_config = AgentConfig::default();
            if let Some(program) = agent {
                agent_config.program = program;
            }
            if !agent_args.is_empty() {
                agent_config.args = agent_args;
            }
            if let Some(secs) = agent_timeout {
                agent_config.timeout = Duration::from_secs(secs);
            }
            if let Some(dir) = workdir {
                agent_config.workdir = Some(dir);
            }
            let max = max_iterations.unwrap_or(config::get().looping.max_iterations);
            iterate(run, agent_config, max).await
        }
        Commands::List { scenarios, filter } => list(&scenarios, filter.as_deref()),
        Commands::New {
            dir,
            category,
            name,
            priority,
            kind,
        } => new_scenario(&dir, &category, &name, &priority, &kind),
        Commands::Clean {
            older_than_days,
            session_dir,
        } => clean(session_dir, older_than_days),
    }
}

async fn verify(args: RunArgs, json: bool) -> Result<ExitCode> {
    let session = open_session(&args, "verify")?;
    let orchestrator = build_orchestrator(&args, &session)?;

    let interrupted = async {
        let _ = tokio::signal::ctrl_c().await;
        warn!("Interrupted, shutting down");
    };
    let Some(result) = verify_until(&orchestrator, interrupted).await else {
        return Ok(ExitCode::from(EXIT_FAILURES));
    };
    let summary = result.context("verification failed")?;

    let results_json = serde_json::to_string_pretty(&summary)?;
    if let Err(e) = session.write_file("results.json", &results_json) {
        warn!("Failed to write results: {}", e);
    }

    if json {
        println!("{}", results_json);
    } else {
        print!("{}", format_summary(&summary));
        println!("\nSession: {}", session.dir.display());
    }

    Ok(if summary.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURES)
    })
}

async fn iterate(args: RunArgs, agent_config: AgentConfig, max_iterations: u32) -> Result<ExitCode> {
    let session = open_session(&args, "loop")?;
    let orchestrator = Arc::new(build_orchestrator(&args, &session)?);
    // Fail on an empty or over-filtered scenario set before spending an agent run
    orchestrator.scenarios()?;

    let verifier: Arc<dyn Verifier> = orchestrator.clone();
    let agent = Arc::new(CliCodingAgent::new(agent_config));
    let options = LoopOptions::new(&args.scenarios).max_iterations(max_iterations);
    let mut controller = IterationController::new(
        options,
        agent,
        verifier.clone(),
        CircuitBreaker::new(BreakerConfig::from_config()),
    )
    .with_session(session.clone());

    let outcome = tokio::select! {
        outcome = controller.run() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            verifier.shutdown().await;
            return Ok(ExitCode::from(EXIT_FAILURES));
        }
    };

    if let Some(summary) = &outcome.last_summary {
        print!("{}", format_summary(summary));
    }
    if !outcome.stuck.is_empty() {
        println!("\nStuck scenarios:");
        for id in &outcome.stuck {
            println!("  {}", id);
        }
    }
    println!(
        "\nLoop {:?} after {} iteration(s): {}",
        outcome.state, outcome.iterations, outcome.end
    );
    println!("Session: {}", session.dir.display());

    Ok(if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURES)
    })
}

fn open_session(args: &RunArgs, name: &str) -> Result<Session> {
    let session = match &args.session_dir {
        Some(base) => Session::with_name_in(base, name),
        None => Session::with_name(name),
    };
    session
        .init()
        .with_context(|| format!("failed to create session in {}", session.dir.display()))?;
    info!(session = %session.dir.display(), "Session created");
    Ok(session)
}

fn build_orchestrator(args: &RunArgs, session: &Session) -> Result<Orchestrator> {
    let settings = config::get();

    let mut llm_config = LlmConfig::default();
    if let Some(model) = &args.model {
        llm_config = llm_config.model(model.clone());
    }
    let model_id = llm_config.model.clone();
    let max_tokens = llm_config.max_tokens;
    let llm = HttpLanguageModel::new(llm_config)?;
    let translator = ActionTranslator::new(Arc::new(llm), model_id, max_tokens);

    let mut chromium = ChromiumConfig::default();
    if args.headed {
        chromium.headless = false;
    }
    let driver: Arc<dyn BrowserDriver> = Arc::new(ChromiumDriver::new(chromium));

    let base_url = url::Url::parse(&args.base_url)
        .with_context(|| format!("invalid base URL {}", args.base_url))?;
    let mut executor_options = ExecutorOptions::new(base_url).screenshot_dir(session.screenshots_dir());
    if let Some(ms) = args.action_timeout {
        executor_options = executor_options.action_timeout(Duration::from_millis(ms));
    }
    let executor = ActionExecutor::new(driver.clone(), executor_options);

    let mut server_config = ServerConfig::new(args.base_url.clone());
    if let Some(command) = args
        .start_command
        .clone()
        .or_else(|| settings.server.start_command.clone())
    {
        server_config = server_config.start_command(command);
    }
    let server = Arc::new(AppServer::new(server_config)?);

    let mut options = VerifyOptions::new(&args.scenarios).dom_context(args.dom_context);
    if let Some(filter) = &args.filter {
        options = options.filter(filter.clone());
    }
    if let Some(command) = args
        .setup_command
        .clone()
        .or_else(|| settings.server.setup_command.clone())
    {
        options = options.setup_command(command);
    }

    Ok(Orchestrator::new(options, translator, executor, driver).with_server(server))
}

fn list(dir: &Path, filter: Option<&str>) -> Result<ExitCode> {
    let mut scenarios = load_scenarios(dir)?;
    if let Some(pattern) = filter {
        scenarios = filter_scenarios(scenarios, pattern)?;
    }

    for scenario in &scenarios {
        println!(
            "{:<16} {:<48} {:<7} {:<14} {}",
            scenario.category,
            scenario.name,
            scenario.metadata.priority,
            scenario.metadata.kind,
            scenario.path.display()
        );
    }
    println!("\n{} scenario(s)", scenarios.len());
    Ok(ExitCode::SUCCESS)
}

fn new_scenario(dir: &Path, category: &str, name: &str, priority: &str, kind: &str) -> Result<ExitCode> {
    let category = slugify(category);
    let file_name = format!("{}.md", slugify(name));
    let path = if category == ROOT_CATEGORY {
        dir.join(file_name)
    } else {
        dir.join(&category).join(file_name)
    };
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let scenario = Scenario {
        path: path.clone(),
        name: name.to_string(),
        category,
        context: vec!["Describe the state the application starts in".to_string()],
        steps: vec!["Describe the first thing the user does".to_string()],
        expected: vec!["Describe what the user should see".to_string()],
        metadata: ScenarioMetadata {
            priority: priority.parse::<Priority>()?,
            kind: kind.parse::<ScenarioType>()?,
            confidence: Confidence::Direct,
        },
    };
    save_scenario(&scenario)?;
    println!("Created {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn clean(session_dir: Option<PathBuf>, older_than_days: u64) -> Result<ExitCode> {
    let base = session_dir.unwrap_or_else(|| PathBuf::from(&config::get().session.base_dir));
    let before = list_sessions(&base)?.len();
    let removed = cleanup_old_sessions(&base, days(older_than_days))?;
    println!(
        "Removed {} of {} session(s) from {}",
        removed,
        before,
        base.display()
    );
    Ok(ExitCode::SUCCESS)
}
