//! asmstep CLI - Command-line driver for the engine
//!
//! Runs specifications handed over by an external parser as JSON, checks
//! them for static errors, and lists the lexicon of the built-in plugins.

use clap::{Parser, Subcommand};
use asmstep::runtime::loader::Specification;
use asmstep::runtime::registry::PluginCatalog;
use asmstep::runtime::SchedulePolicy;
use asmstep::{Engine, EngineConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "asmstep")]
#[command(about = "Step-driven execution engine for Abstract State Machines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a specification for a number of steps
    Run {
        /// Specification (JSON)
        spec: PathBuf,

        /// Number of steps to run
        #[arg(short, long, default_value = "1")]
        steps: u64,

        /// Seed for the randomness source
        #[arg(long)]
        seed: Option<u64>,

        /// Advance agents one micro-step at a time in rotation
        #[arg(long)]
        interleave: bool,

        /// Persist the journal and snapshots under this directory
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Continue the run persisted under --root from its latest snapshot
        #[arg(long, requires = "root")]
        resume: bool,

        /// Micro-step budget per agent and step
        #[arg(long, default_value = "1000000")]
        max_micro_steps: u64,

        /// Log every committed update
        #[arg(long)]
        debug: bool,
    },

    /// Load a specification and report static errors
    Check {
        /// Specification (JSON)
        spec: PathBuf,
    },

    /// List keywords and operators of the built-in plugins
    Lexicon,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            spec,
            steps,
            seed,
            interleave,
            root,
            resume,
            max_micro_steps,
            debug,
        } => {
            let specification = Specification::from_json_file(&spec)?;
            let config = EngineConfig {
                max_micro_steps,
                seed,
                schedule: if interleave {
                    SchedulePolicy::Interleaved
                } else {
                    SchedulePolicy::Sequential
                },
                root,
                debug,
                ..EngineConfig::default()
            };

            let mut engine = match config.root.clone() {
                Some(root) if resume => Engine::open(root)?,
                _ => Engine::standard(config)?,
            };
            engine.load(&specification)?;
            if resume {
                match engine.restore_latest()? {
                    Some(step) => println!("Resuming after step {}", step),
                    None => println!("No snapshot found; starting from the initial state"),
                }
            }
            for _ in 0..steps {
                let record = engine.step()?;
                println!(
                    "Step {}: {} updates, {} agents, digest {}",
                    record.step,
                    record.updates.len(),
                    record.agents.len(),
                    record.state_digest
                );
                for failure in &record.failures {
                    println!("  agent {} failed: {}", failure.agent, failure.message);
                }
            }

            println!("State after step {}:", engine.step_number());
            for (location, value) in engine.state().iter() {
                println!("  {} = {}", location, value);
            }
        }

        Commands::Check { spec } => {
            let specification = Specification::from_json_file(&spec)?;
            let mut engine = Engine::standard(EngineConfig::default())?;
            engine.load(&specification)?;
            let declared = engine
                .signature()
                .map(|signature| signature.declared().count())
                .unwrap_or_default();
            println!(
                "{}: OK ({} agents, {} declarations)",
                specification.name,
                specification.agents.len(),
                declared
            );
        }

        Commands::Lexicon => {
            let table = PluginCatalog::global().snapshot();
            let lexicon = table.lexicon();
            println!("Keywords:");
            for (keyword, plugins) in &lexicon.keywords {
                let owners: Vec<&str> = plugins.iter().map(String::as_str).collect();
                println!("  {:<12} {}", keyword, owners.join(", "));
            }
            println!("Operators:");
            for (operator, plugins) in &lexicon.operators {
                let owners: Vec<&str> = plugins.iter().map(String::as_str).collect();
                println!("  {:<12} {}", operator, owners.join(", "));
            }
            println!("Node kinds:");
            for kind in table.kinds() {
                println!("  {:<18} {}", kind, table.plugin_of(kind).unwrap_or_default());
            }
        }
    }

    Ok(())
}
