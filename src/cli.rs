//! CLI interface for adaptive-layout
//!
//! Every command runs against a file-backed store in the data directory, so
//! separate invocations see the same layouts and interaction history.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{AdaptiveConfig, StorageKind};
use crate::container::AdaptiveContainer;
use crate::context::AdaptiveContext;
use crate::engine::EvaluationOutcome;
use crate::types::{InteractionType, InteractionValue, LayoutConfig, WidgetPosition};

#[derive(Parser)]
#[command(name = "adaptive-layout")]
#[command(about = "Track widget interactions and reorder layouts by usage", long_about = None)]
#[command(version)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(short, long, global = true, env = "ADAPTIVE_LAYOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the storage directory
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record interactions with a widget
    Track {
        /// Widget id
        widget: String,
        /// Interaction type (tap, long_press, hover, focus, scroll, swipe, custom)
        #[arg(short = 't', long = "type", default_value = "tap")]
        kind: String,
        /// Optional payload (true/false, a number, or text)
        #[arg(long)]
        value: Option<String>,
        /// Number of interactions to record
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
        /// Evaluate the rules afterwards
        #[arg(short, long)]
        evaluate: bool,
    },
    /// Manage layouts
    Layouts {
        #[command(subcommand)]
        command: LayoutCommands,
    },
    /// Apply the rule pipeline to the current layout
    Evaluate,
    /// Inspect or clear recorded interactions
    Events {
        #[command(subcommand)]
        command: EventCommands,
    },
    /// Run an in-memory walkthrough of the whole pipeline
    Demo {
        /// Taps on the favourite widget
        #[arg(long, default_value = "5")]
        taps: usize,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum LayoutCommands {
    /// List all layouts
    List,
    /// Create a layout from widget ids, in order
    Create {
        name: String,
        widgets: Vec<String>,
        /// Make it the current layout
        #[arg(short, long)]
        activate: bool,
    },
    /// Make a layout current
    Activate { id: String },
    /// Show a layout (defaults to the current one)
    Show { id: Option<String> },
    /// Delete a layout
    Delete { id: String },
}

#[derive(Subcommand)]
enum EventCommands {
    /// List interactions
    List {
        /// Only this widget
        #[arg(short, long)]
        widget: Option<String>,
    },
    /// Delete every recorded interaction
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AdaptiveConfig::load_from(path)?,
        None => AdaptiveConfig::load()?,
    };
    init_tracing(cli.verbose || config.enable_debug_logging);

    // One-shot commands need durable storage and no background timer
    if let Some(dir) = &cli.store {
        config.storage.backend = StorageKind::File;
        config.storage.path = Some(dir.clone());
    } else if config.storage.backend == StorageKind::Memory {
        config.storage.backend = StorageKind::File;
    }
    config.enable_auto_adjust = false;

    match cli.command {
        Commands::Demo { taps } => run_demo(taps).await,
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
            match &cli.config {
                Some(path) => println!("# {}", path.display()),
                None => println!("# {}", crate::config::config_path()?.display()),
            }
            println!("{}", rendered);
            Ok(())
        }
        command => {
            let context = AdaptiveContext::initialize(config).await?;
            let result = run_command(&context, command).await;
            context.shutdown().await;
            result
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Ignore a second initialization (tests, embedding)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run_command(context: &AdaptiveContext, command: Commands) -> Result<()> {
    match command {
        Commands::Track { widget, kind, value, count, evaluate } => {
            let kind = InteractionType::from_tag(&kind);
            let value = value.as_deref().map(parse_value);
            for _ in 0..count {
                context
                    .tracker()
                    .track_interaction(&widget, kind.clone(), value.clone())
                    .await;
            }
            println!("Recorded {} {} interaction(s) on {}", count, kind, widget);
            if evaluate {
                print_outcome(&context.engine().evaluate_and_apply_rules().await?);
            }
        }
        Commands::Layouts { command } => run_layout_command(context, command).await?,
        Commands::Evaluate => {
            print_outcome(&context.engine().evaluate_and_apply_rules().await?);
        }
        Commands::Events { command } => match command {
            EventCommands::List { widget } => {
                let events = match widget {
                    Some(widget) => context.tracker().get_events_for_widget(&widget).await,
                    None => context.tracker().get_all_events().await,
                };
                if events.is_empty() {
                    println!("No interactions recorded.");
                }
                for event in events {
                    let value = event
                        .value
                        .map(|v| serde_json::to_string(&v).unwrap_or_default())
                        .unwrap_or_default();
                    println!(
                        "{}  {:<12} {:<10} {}",
                        event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                        event.widget_id,
                        event.kind,
                        value
                    );
                }
            }
            EventCommands::Clear { yes } => {
                if !yes {
                    println!("This deletes every recorded interaction. Re-run with --yes to confirm.");
                } else if context.tracker().clear_all_events().await {
                    println!("Interaction history cleared.");
                } else {
                    anyhow::bail!("Failed to clear interaction history");
                }
            }
        },
        Commands::Demo { .. } | Commands::Config => {}
    }
    Ok(())
}

async fn run_layout_command(context: &AdaptiveContext, command: LayoutCommands) -> Result<()> {
    let layouts = context.layouts();
    match command {
        LayoutCommands::List => {
            let current = layouts.current_layout_id().await;
            let all = layouts.get_all_layouts().await;
            if all.is_empty() {
                println!("No layouts. Create one with `layouts create <name> <widgets>...`");
            }
            for layout in all {
                let marker = if current.as_deref() == Some(layout.id.as_str()) { "*" } else { " " };
                println!(
                    "{} {}  {:<20} {} widgets",
                    marker,
                    layout.id,
                    layout.name,
                    layout.positions.len()
                );
            }
        }
        LayoutCommands::Create { name, widgets, activate } => {
            let positions = widgets
                .iter()
                .enumerate()
                .map(|(i, id)| WidgetPosition::new(id.clone(), i as i64))
                .collect();
            let layout = layouts.create_layout(&name, positions).await;
            if activate {
                layouts.set_current_layout(&layout.id).await?;
            }
            println!("Created layout {} ({})", layout.name, layout.id);
        }
        LayoutCommands::Activate { id } => {
            layouts.set_current_layout(&id).await?;
            println!("Activated layout {}", id);
        }
        LayoutCommands::Show { id } => {
            let layout = match id {
                Some(id) => layouts.get_layout(&id).await,
                None => layouts.current_layout().await,
            }
            .context("Layout not found (or no current layout)")?;
            print_layout(&layout);
        }
        LayoutCommands::Delete { id } => {
            layouts.delete_layout(&id).await;
            println!("Deleted layout {}", id);
        }
    }
    Ok(())
}

async fn run_demo(taps: usize) -> Result<()> {
    let config = AdaptiveConfig {
        // Evaluate once, after the last scripted interaction
        threshold: (taps + 3) as u32,
        auto_adjust_interval_secs: 3600,
        ..Default::default()
    };
    let context = AdaptiveContext::initialize(config).await?;

    let cards: Vec<String> = (1..=4).map(|i| format!("card{}", i)).collect();
    let positions = cards
        .iter()
        .enumerate()
        .map(|(i, id)| WidgetPosition::new(id.clone(), i as i64))
        .collect();
    let layout = context.layouts().create_layout("demo", positions).await;
    context.layouts().set_current_layout(&layout.id).await?;

    let mut container =
        AdaptiveContainer::mount(context.tracker().clone(), context.layouts().clone(), cards.clone()).await;
    println!("Initial order: {}", container.arranged().join(", "));

    for handler in container.handlers() {
        if handler.widget_id() != "card3" {
            handler.fire(InteractionType::Tap, None).await;
        }
    }
    let favourite = container.handler_for("card3");
    for _ in 0..taps {
        favourite.fire(InteractionType::Tap, None).await;
    }

    match tokio::time::timeout(Duration::from_secs(5), container.changed()).await {
        Ok(Some(order)) => println!("Adapted order: {}", order.join(", ")),
        _ => println!("Layout did not change"),
    }

    let stats = context.engine().stats();
    println!(
        "Evaluations: {} (applied {}, count-triggered {})",
        stats.evaluations, stats.applied, stats.interaction_triggers
    );
    context.shutdown().await;
    Ok(())
}

fn parse_value(raw: &str) -> InteractionValue {
    if let Ok(flag) = raw.parse::<bool>() {
        InteractionValue::Bool(flag)
    } else if let Some(number) = raw.parse::<f64>().ok().filter(|n| n.is_finite()) {
        InteractionValue::Number(number)
    } else {
        InteractionValue::Text(raw.to_string())
    }
}

fn print_outcome(outcome: &EvaluationOutcome) {
    match outcome {
        EvaluationOutcome::Applied(order) => println!("New order: {}", order.join(", ")),
        EvaluationOutcome::NoCurrentLayout => println!("No current layout; activate one first."),
        EvaluationOutcome::NoInteractions => println!("No interactions recorded yet."),
        EvaluationOutcome::EmptyOrder => println!("Rules produced an empty order; layout unchanged."),
    }
}

fn print_layout(layout: &LayoutConfig) {
    println!("{} ({})", layout.name, layout.id);
    println!("Last modified: {}", layout.last_modified.to_rfc3339());
    let mut positions: Vec<&WidgetPosition> = layout.positions.iter().collect();
    positions.sort_by_key(|p| p.order);
    for position in positions {
        println!(
            "  {:>3}  {}{}",
            position.order,
            position.widget_id,
            if position.visible { "" } else { " (hidden)" }
        );
    }
}
