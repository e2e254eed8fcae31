use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parallax_config::Config;
use parallax_core::{apply_site_overrides, task_slug, FailureStore, Planner, StrategyGenerator};
use parallax_provider::PlanContext;

#[derive(Parser)]
#[command(name = "parallax", about = "Autonomous UI workflow capture", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Provider to use (openai, anthropic, local, auto)
    #[arg(short, long)]
    provider: Option<String>,

    /// Path to a config file (defaults to $PARALLAX_CONFIG or the user dir)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and validate a plan for a task without opening a browser
    Plan {
        /// Natural-language task description
        task: String,
        /// Starting URL for the workflow
        #[arg(long, default_value = "https://example.com")]
        start_url: String,
    },
    /// Show constitution failure statistics from past runs
    Failures {
        /// Filter by agent name (e.g. A2_Executor)
        #[arg(long)]
        agent: Option<String>,
        /// Number of recent reports to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show learned selector strategies for an element description
    Strategies {
        /// Element description (e.g. "search input")
        description: String,
        /// Website pattern (e.g. wikipedia.org)
        #[arg(long)]
        website: Option<String>,
    },
    /// Validate and print the effective configuration
    Config,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(provider) = &cli.provider {
        config.provider.default = provider
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
    }
    Ok(config)
}

fn validate_start_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)
        .with_context(|| format!("Invalid URL: '{url}'. Include http:// or https://"))?;
    if parsed.host_str().is_none() {
        anyhow::bail!("Invalid URL: '{url}' has no host");
    }
    Ok(())
}

async fn cmd_plan(config: &Config, task: &str, start_url: &str) -> Result<()> {
    validate_start_url(start_url)?;

    let base_dir = PathBuf::from(&config.output.base_dir);
    let failure_store =
        std::sync::Arc::new(FailureStore::new(base_dir.join("_constitution_failures"))?);
    let strategy_generator = std::sync::Arc::new(std::sync::Mutex::new(StrategyGenerator::new(
        Some(failure_store.clone()),
        base_dir.join("_strategies").join("strategies.json"),
    )));

    let provider = parallax_provider::create_planner(config)?;
    println!("Planning with provider '{}'...", provider.name());

    let planner = Planner::new(std::sync::Arc::from(provider))
        .with_failure_store(failure_store)
        .with_strategy_generator(strategy_generator);

    let context = PlanContext {
        start_url: Some(start_url.to_string()),
        ..Default::default()
    };
    let plan = planner.plan(task, context).await?;
    let plan = apply_site_overrides(plan, Some(start_url));

    println!("Task slug: {}", task_slug(task));
    println!("Generated {} steps:", plan.steps.len());
    for (index, step) in plan.steps.iter().enumerate() {
        println!("  {:>2}. {}", index + 1, serde_json::to_string(step)?);
    }
    Ok(())
}

fn cmd_failures(config: &Config, agent: Option<&str>, limit: usize) -> Result<()> {
    let base_dir = PathBuf::from(&config.output.base_dir);
    let store = FailureStore::new(base_dir.join("_constitution_failures"))?;

    let stats = store.statistics();
    if stats.total_reports == 0 {
        println!("No constitution failures recorded.");
        return Ok(());
    }

    println!("Total reports: {}", stats.total_reports);
    println!("\nBy agent:");
    for (agent, count) in &stats.by_agent {
        println!("  {agent}: {count}");
    }
    println!("\nBy rule:");
    for (rule, count) in &stats.by_rule {
        println!("  {rule}: {count}");
    }
    println!("\nBy level:");
    for (level, count) in &stats.by_level {
        println!("  {level}: {count}");
    }

    println!("\nMost recent reports:");
    for report in store.failures(agent, limit) {
        let agent = report["agent"].as_str().unwrap_or("unknown");
        let timestamp = report["timestamp"].as_str().unwrap_or("");
        let rules: Vec<&str> = report["failures"]
            .as_array()
            .into_iter()
            .flatten()
            .chain(report["warnings"].as_array().into_iter().flatten())
            .filter_map(|f| f["rule_name"].as_str())
            .collect();
        println!("  [{timestamp}] {agent}: {}", rules.join(", "));
    }
    Ok(())
}

fn cmd_strategies(config: &Config, description: &str, website: Option<&str>) -> Result<()> {
    let base_dir = PathBuf::from(&config.output.base_dir);
    let mut generator = StrategyGenerator::new(
        None,
        base_dir.join("_strategies").join("strategies.json"),
    );
    let strategies = generator.best_strategies(description, website, 10, None);
    println!(
        "Strategies for '{description}' ({}):",
        website.unwrap_or("generic")
    );
    for strategy in strategies {
        println!(
            "  {:<16} success_rate={:.2} used={}",
            format!("{:?}", strategy.kind).to_lowercase(),
            strategy.success_rate,
            strategy.usage_count
        );
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let json = serde_json::to_value(config)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Commands::Plan { task, start_url } => cmd_plan(&config, task, start_url).await,
        Commands::Failures { agent, limit } => cmd_failures(&config, agent.as_deref(), *limit),
        Commands::Strategies {
            description,
            website,
        } => cmd_strategies(&config, description, website.as_deref()),
        Commands::Config => cmd_config(&config),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
