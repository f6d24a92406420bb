//! cordon CLI: query the seeded classified-graph demo.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use cordon::config::EngineConfig;
use cordon::model::ClearanceLevel;
use cordon::pipeline::QueryOutcome;
use cordon::reconcile::{self, ViewMode};
use cordon::repo::{AuditSink, UserRepository};
use cordon::seeds::demo_engine;

#[derive(Parser)]
#[command(name = "cordon", version, about = "Classified-graph query & policy engine")]
struct Cli {
    /// Path to a TOML engine configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a free-text query as a user.
    Query {
        /// Acting username (analyst-a, observer-b, cmdr).
        #[arg(long)]
        user: String,

        /// The query text, e.g. "сколько дронов в секторе A".
        text: String,

        /// Emit the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the reconciled graph view for a user.
    View {
        /// Acting username.
        #[arg(long)]
        user: String,

        /// View mode: virtual (default), level, overlay.
        #[arg(long, default_value = "virtual")]
        mode: String,

        /// Level(s) for level/overlay modes, comma-separated (u,c,s).
        #[arg(long)]
        levels: Option<String>,
    },

    /// Print the audit log.
    Audit,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = demo_engine(config)?;

    match cli.command {
        Commands::Query { user, text, json } => {
            let now = chrono::Utc::now();
            let user = engine
                .users()
                .find_by_username(&user, now)?
                .ok_or_else(|| miette::miette!("unknown user '{user}'"))?;
            let response = engine.execute(&user.id, &text)?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&response).into_diagnostic()?
                );
                return Ok(());
            }
            println!("{}", response.explanation.render_text());
            match response.outcome {
                QueryOutcome::Denied { reason } => println!("denied: {reason}"),
                QueryOutcome::Unrecognized => println!("could not understand the query"),
                QueryOutcome::Aggregate { count, message } => {
                    println!("aggregate only: count={count}");
                    println!("{message}");
                }
                QueryOutcome::Records { nodes } => {
                    println!("{} record(s):", nodes.len());
                    for n in nodes {
                        println!(
                            "  [{}] {} ({}) {}",
                            n.classification.code(),
                            n.name,
                            n.entity_type,
                            n.id
                        );
                    }
                }
            }
        }

        Commands::View { user, mode, levels } => {
            let now = chrono::Utc::now();
            let user = engine
                .users()
                .find_by_username(&user, now)?
                .ok_or_else(|| miette::miette!("unknown user '{user}'"))?;
            let mode = parse_view_mode(&mode, levels.as_deref())?;
            let view = reconcile::view_for_user(&user, &mode, engine.graph())?;
            println!("{} node(s), {} edge(s)", view.nodes.len(), view.edges.len());
            for n in &view.nodes {
                println!(
                    "  node [{}] {} ({}) logical={}",
                    n.classification.code(),
                    n.name,
                    n.entity_type,
                    n.logical_id
                );
            }
            for e in &view.edges {
                println!(
                    "  edge [{}] {} -{}-> {}",
                    e.classification.code(),
                    e.source_node_id,
                    e.relation_type,
                    e.target_node_id
                );
            }
        }

        Commands::Audit => {
            for entry in engine.audit().entries()? {
                println!(
                    "{} user={} kind={} count={} granted={} reason={} text={:?}",
                    entry.created_at.format("%H:%M:%S"),
                    entry.user_id,
                    entry.query_kind,
                    entry.result_count,
                    entry.granted,
                    entry
                        .denial_reason
                        .map(|r| r.code())
                        .unwrap_or("-"),
                    entry.query_text
                );
            }
        }
    }

    Ok(())
}

fn parse_view_mode(mode: &str, levels: Option<&str>) -> Result<ViewMode> {
    let parse_levels = |raw: &str| -> Vec<ClearanceLevel> {
        raw.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(ClearanceLevel::parse_loose)
            .collect()
    };
    match mode {
        "virtual" => Ok(ViewMode::Virtual),
        "level" => {
            let level = levels
                .map(|raw| ClearanceLevel::parse_loose(raw.trim()))
                .ok_or_else(|| miette::miette!("--levels is required for level mode"))?;
            Ok(ViewMode::Level { level })
        }
        "overlay" => Ok(ViewMode::Overlay {
            levels: levels.map(parse_levels).unwrap_or_default(),
        }),
        other => Err(miette::miette!(
            "unknown view mode '{other}' (expected virtual, level, or overlay)"
        )),
    }
}
