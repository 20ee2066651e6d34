use anyhow::Context;
use clap::{Parser, Subcommand};
use errand_runner::{
    Config, Mode, Params, Plan, PlanSource, Planner, ProfileStore, RunResult, Runner, SessionStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG: &str = "errand.yaml";

/// Session id of the interactive dock.
const DOCK_SESSION: &str = "dock";

#[derive(Parser)]
#[command(name = "errand")]
#[command(about = "Turn goals into browser errands")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./errand.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding sessions/ and profile.json
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Run in headless mode (overrides config)
    #[arg(long, global = true)]
    headless: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print the plan for a goal without running it
    Plan {
        goal: String,
        /// Print raw JSON only
        #[arg(long)]
        json: bool,
    },
    /// Plan a goal and execute it
    Run {
        goal: String,
        /// simulate (stop before submit) or assist
        #[arg(short, long, default_value = "simulate")]
        mode: String,
    },
    /// Execute a plan from a JSON file
    Execute {
        plan: PathBuf,
        #[arg(short, long, default_value = "simulate")]
        mode: String,
    },
    /// Print a session record
    Session { id: String },
    /// Show or update the profile
    Profile {
        /// Set a field (can be used multiple times)
        #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Open a browser with the goal dock and serve typed goals
    Dock {
        #[arg(long, default_value = "https://duckduckgo.com")]
        url: String,
    },
    /// Serve the tool interface on stdio
    Serve,
    /// Validate the config without running anything
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    // stdout carries results (and the tool protocol under `serve`)
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut config = load_config(cli.config.as_deref())?.with_env();
    if cli.headless {
        config.browser.headless = true;
    }

    match cli.command {
        Command::Plan { goal, json } => {
            let planned = Planner::from_config(&config).plan_with_source(&goal).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&planned.plan)?);
            } else {
                println!("Plan ({}):", describe_source(&planned.source));
                print_plan(&planned.plan);
            }
        }
        Command::Run { goal, mode } => {
            let mode: Mode = mode.parse()?;
            let plan = Planner::from_config(&config).plan(&goal).await?;
            println!("Plan:");
            print_plan(&plan);
            println!();
            let result = runner(&config, &cli.data_dir)?.execute(&plan, mode).await?;
            finish(&result);
        }
        Command::Execute { plan, mode } => {
            let mode: Mode = mode.parse()?;
            let raw = std::fs::read_to_string(&plan)
                .with_context(|| format!("reading {}", plan.display()))?;
            let plan: Plan = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", plan.display()))?;
            anyhow::ensure!(!plan.is_empty(), "plan is empty");
            let result = runner(&config, &cli.data_dir)?.execute(&plan, mode).await?;
            finish(&result);
        }
        Command::Session { id } => {
            let sessions = SessionStore::open(cli.data_dir.join("sessions"))?;
            let session = sessions.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        Command::Profile { set } => {
            let profiles = ProfileStore::open(cli.data_dir.join("profile.json"))?;
            let profile = if set.is_empty() {
                profiles.load()?
            } else {
                profiles.update(&Params::from_args(&set)?.into_map())?
            };
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::Dock { url } => {
            dock(&config, &cli.data_dir, &url).await?;
        }
        Command::Serve => {
            errand_runner::mcp::run_server(config, &cli.data_dir).await?;
        }
        Command::Check => {
            println!("Config valid");
            println!("  Headless: {}", config.browser.headless);
            println!("  Max steps: {}", config.agent.max_steps);
            println!("  Decision models: {}", config.llm.models.join(", "));
            println!("  Planner models: {}", config.llm.planner_models.join(", "));
            println!(
                "  Credential: {}",
                if config.llm.has_credential() { "set" } else { "missing (OPENROUTER_API_KEY)" }
            );
            println!("  Heuristics: {}", config.catalog.heuristics.len());
            for heuristic in &config.catalog.heuristics {
                println!("    - {} ({} steps)", heuristic.name, heuristic.plan.len());
            }
            println!("  Submit patterns: {}", config.catalog.submit_patterns.join(", "));
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> errand_runner::Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG),
        None => Ok(Config::default()),
    }
}

fn runner(config: &Config, data_dir: &Path) -> errand_runner::Result<Runner<errand_agent::EokaLauncher>> {
    let sessions = Arc::new(SessionStore::open(data_dir.join("sessions"))?);
    let profiles = Arc::new(ProfileStore::open(data_dir.join("profile.json"))?);
    Ok(Runner::new(config.browser.launcher(), sessions, profiles, config))
}

async fn dock(config: &Config, data_dir: &Path, url: &str) -> anyhow::Result<()> {
    use errand_agent::{GoalBridge, PageDriver};

    let runner = runner(config, data_dir)?;
    let engine = runner
        .engine()
        .cloned()
        .context("the dock needs a decision model; set OPENROUTER_API_KEY")?;
    runner.sessions().ensure(DOCK_SESSION, Mode::Assist)?;
    let log = runner.sessions().sink(DOCK_SESSION);

    let driver = runner.registry().acquire(DOCK_SESSION).await?;
    let served = async {
        driver
            .goto_ready(url, runner.agent_config().ready_timeout_ms)
            .await?;
        println!("Dock ready on {} (Ctrl-C to quit)", url);
        GoalBridge::new(driver.as_ref(), &engine, runner.agent_config(), &log)
            .run()
            .await
    };

    let outcome = tokio::select! {
        result = served => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    drop(driver);
    runner.registry().release(DOCK_SESSION).await;
    outcome
}

fn describe_source(source: &PlanSource) -> String {
    match source {
        PlanSource::Heuristic(name) => format!("heuristic {}", name),
        PlanSource::Model(model) => format!("model {}", model),
        PlanSource::Delegated => "delegated to the agent loop".into(),
    }
}

fn print_plan(plan: &Plan) {
    for (i, step) in plan.iter().enumerate() {
        let detail = match (step.value(), step.goal(), step.uses_profile()) {
            (_, _, true) => " (from profile)".to_string(),
            (Some(value), _, _) => format!(" = {:?}", value),
            (_, Some(goal), _) => format!(" goal: {:?}", goal),
            _ => String::new(),
        };
        println!("  {}. {} {}{}", i + 1, step.action.as_str(), step.target, detail);
    }
}

fn finish(result: &RunResult) {
    println!();
    if result.success {
        println!("✓ Success");
    } else {
        println!("✗ Failed");
        if let Some(ref error) = result.error {
            println!("  Error: {}", error);
        }
    }
    if result.halted {
        println!("  Halted before submit (simulate mode)");
    }
    println!("  Session: {}", result.session_id);
    println!("  Steps: {}", result.steps_completed);
    println!("  Duration: {}ms", result.duration_ms);

    if !result.success {
        std::process::exit(1);
    }
}
