use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deputy_config::{find_config_path, load_config, resolve_workspace, save_config, Config};
use deputy_core::agent::subagent::SUBAGENT_TOOLS;
use deputy_core::agent::{Origin, SpawnRequest, SubagentManager, SubagentOptions};
use deputy_core::bus::MessageBus;
use deputy_core::providers::{ProviderRouter, RouterFactory, RouterSettings};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "deputy", about = "Background subagents over any LLM provider", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one subagent and print its announcement
    Run {
        /// Task for the subagent
        task: String,

        /// Short label shown in the announcement
        #[arg(short, long)]
        label: Option<String>,

        /// Model to use instead of the configured default
        #[arg(short, long)]
        model: Option<String>,

        /// Allow only these tools (repeatable)
        #[arg(short, long = "tool")]
        tools: Vec<String>,

        /// Replace the default subagent system prompt
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Show how a model would be routed with the configured credentials
    Route {
        /// Model to resolve; defaults to the configured model
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Write a default config file and create the workspace
    Init,
    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = format!("{base_filter},deputy_core::agent=debug");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);

    match cli.command {
        Commands::Init => run_init(&config_path),
        Commands::Status => run_status(&config_path),
        Commands::Route { model } => {
            let config = load_config(&config_path)?;
            run_route(&config, model.as_deref())
        }
        Commands::Run {
            task,
            label,
            model,
            tools,
            system_prompt,
        } => {
            let config = load_config(&config_path)?;
            let request = SpawnRequest {
                task,
                label,
                model,
                system_prompt,
                tool_names: (!tools.is_empty()).then_some(tools),
                origin: Origin::new("cli", "direct"),
            };
            run_task(&config, request).await
        }
    }
}

async fn run_task(config: &Config, request: SpawnRequest) -> Result<()> {
    let workspace = resolve_workspace(&config.agents.defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace '{}'", workspace.display()))?;

    for name in request.tool_names.iter().flatten() {
        if !SUBAGENT_TOOLS.contains(&name.as_str()) {
            warn!("Unknown tool '{name}' ignored (available: {})", SUBAGENT_TOOLS.join(", "));
        }
    }

    let factory = RouterFactory::new(RouterSettings::from_config(config));
    let mut bus = MessageBus::new(16);
    let manager = SubagentManager::new(
        Arc::new(factory),
        workspace,
        bus.inbound_tx.clone(),
        None,
        SubagentOptions::from_config(config),
    )
    .context("invalid provider configuration")?;

    let ack = manager.spawn(request).await;
    info!("{ack}");

    let msg = bus
        .inbound_rx
        .recv()
        .await
        .context("message bus closed before the subagent reported")?;
    println!("{}", msg.content);

    if msg.metadata.get("status").and_then(|s| s.as_str()) == Some("error") {
        anyhow::bail!("subagent failed");
    }
    Ok(())
}

fn run_route(config: &Config, model: Option<&str>) -> Result<()> {
    let router = ProviderRouter::new(RouterSettings::from_config(config))
        .context("invalid provider configuration")?;
    let route = router.route(model);

    println!("deputy route");
    println!();
    println!("  Gateway:    {}", route.gateway.map_or("(none)", |g| g.name));
    println!("  Provider:   {}", route.provider.map_or("(none)", |p| p.name));
    println!("  Transport:  {:?}", route.transport);
    println!("  Model:      {}", route.model);
    println!("  Wire model: {}", route.wire_model);
    println!("  Endpoint:   {}", route.url);
    if let Some(overrides) = route.overrides {
        println!("  Overrides:  {overrides:?}");
    }
    let names: Vec<&str> = router.credentials().iter().map(|(k, _)| k).collect();
    if !names.is_empty() {
        println!("  Credentials: {}", names.join(", "));
    }
    Ok(())
}

fn run_init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        save_config(config_path, &Config::default())?;
        println!("Created config at {}", config_path.display());
    }

    let config = load_config(config_path)?;
    let workspace = resolve_workspace(&config.agents.defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace '{}'", workspace.display()))?;
    println!("Workspace ready at {}", workspace.display());
    println!();
    println!("Next: set providers.<name>.apiKey and agents.defaults.model in the config.");
    Ok(())
}

fn run_status(config_path: &Path) -> Result<()> {
    println!("deputy status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!("  Config:    {} (not found, using defaults)", config_path.display());
    }

    let config = load_config(config_path)?;
    let workspace = resolve_workspace(&config.agents.defaults.workspace);
    println!(
        "  Workspace: {} ({})",
        workspace.display(),
        if workspace.exists() { "found" } else { "not found" }
    );

    let provider = config.active_provider().map_or("(not set)", |(name, _)| name);
    println!("  Provider:  {provider}");
    println!(
        "  Model:     {}",
        if config.agents.defaults.model.is_empty() {
            "(not set)"
        } else {
            &config.agents.defaults.model
        }
    );
    println!();
    println!("  Tools:     {}", SUBAGENT_TOOLS.join(", "));
    println!(
        "    Workspace restriction: {}",
        if config.tools.restrict_to_workspace {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("    Shell timeout: {}s", config.tools.exec.timeout_secs);
    Ok(())
}
