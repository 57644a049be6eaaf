//! ha-control
//!
//! Command-line front end for the Home Assistant control client.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ha_categories::CategoryHandler;
use ha_client::Client;
use ha_config::ClientConfig;
use ha_controllers::{CommandOutcome, ControllerResult, LightAttributes};
use ha_core::{Entity, EntityId};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ha-control", version, about = "Inspect and control Home Assistant entities")]
struct Cli {
    /// Directory containing ha-control.yaml and secrets.yaml
    #[arg(long, short = 'c', env = "HA_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List category names
    Categories,
    /// List the members of a category
    List { category: String },
    /// Find members of a category whose name contains a query
    Search { category: String, query: String },
    /// Control a single light
    Light {
        name: String,
        #[command(subcommand)]
        action: LightAction,
    },
    /// Control every light at once
    Lights {
        #[command(subcommand)]
        action: LightAction,
    },
    /// Show cache age and refresh count
    Cache,
}

#[derive(Debug, Subcommand)]
enum LightAction {
    On,
    Off,
    Toggle,
    /// Turn on with a color and/or brightness
    Set {
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        brightness: Option<i64>,
    },
    /// Print the current state
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ClientConfig::load(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;
    let client = Client::connect(&config)
        .await
        .with_context(|| format!("connecting to {}", config.url))?;

    debug!(command = ?cli.command, "Dispatching command");
    run(&client, cli.command).await
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(client: &Client, command: Command) -> Result<()> {
    match command {
        Command::Categories => {
            for name in client.category_names().await? {
                println!("{name}");
            }
        }
        Command::List { category } => {
            let handler = client.category(&category).await?;
            for entity in handler.members()? {
                print_entity(&entity);
            }
        }
        Command::Search { category, query } => {
            let handler = client.category(&category).await?;
            let found = handler.search_by_name(&query)?;
            if found.is_empty() {
                bail!("no {category} matches '{query}'");
            }
            for entity in found {
                print_entity(&entity);
            }
        }
        Command::Light { name, action } => {
            let lights = client.lights().await?;
            let Some(light) = lights.light(&name)? else {
                bail!("no light named '{name}'");
            };
            let entity_id = light.entity_id().clone();
            let result = match action {
                LightAction::On => light.turn_on().await,
                LightAction::Off => light.turn_off().await,
                LightAction::Toggle => light.toggle().await,
                LightAction::Set { color, brightness } => {
                    light.set_attributes(&attributes(color, brightness)?).await
                }
                LightAction::State => {
                    println!("{entity_id}: {}", light.current_state().await?);
                    return Ok(());
                }
            };
            print_outcome(&entity_id, &result);
            result?;
        }
        Command::Lights { action } => {
            let lights = client.lights().await?;
            let results = match action {
                LightAction::On => lights.turn_all_on().await?,
                LightAction::Off => lights.turn_all_off().await?,
                LightAction::Toggle => lights.toggle_all().await?,
                LightAction::Set { color, brightness } => {
                    lights
                        .change_attributes_of_all(&attributes(color, brightness)?)
                        .await?
                }
                LightAction::State => {
                    for entity in lights.members()? {
                        print_entity(&entity);
                    }
                    return Ok(());
                }
            };

            let mut failed = 0;
            for (entity_id, result) in &results {
                print_outcome(entity_id, result);
                failed += usize::from(result.is_err());
            }
            if failed > 0 {
                bail!("{failed} of {} light(s) failed", results.len());
            }
        }
        Command::Cache => {
            let snapshot = client.snapshot().await?;
            let cache = client.cache();
            println!("{}", cache.age_description());
            println!("Entities: {}", snapshot.len());
            println!("Refreshes: {}", cache.refresh_count());
            println!("TTL: {}s", cache.ttl().as_secs());
        }
    }
    Ok(())
}

fn attributes(color: Option<String>, brightness: Option<i64>) -> Result<LightAttributes> {
    let attributes = LightAttributes { color, brightness };
    if attributes.is_empty() {
        bail!("pass --color and/or --brightness");
    }
    Ok(attributes)
}

fn print_entity(entity: &Entity) {
    println!("{:<40} {}", entity.entity_id.as_str(), entity.state);
}

fn print_outcome(entity_id: &EntityId, result: &ControllerResult<CommandOutcome>) {
    match result {
        Ok(CommandOutcome::Confirmed(entity)) => println!("{entity_id}: {}", entity.state),
        Ok(CommandOutcome::Unconfirmed(response)) => {
            println!("{entity_id}: sent (status {})", response.status)
        }
        Err(e) => println!("{entity_id}: failed: {e}"),
    }
}
