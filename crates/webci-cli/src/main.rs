mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, run::RunArgs, EventArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "webci",
    about = "Trigger-and-run pipeline for the documentation website: checkout, runtime setup, frozen install, build",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .webci/ or .git/)
    #[arg(long, global = true, env = "WEBCI_ROOT")]
    root: Option<PathBuf>,

    /// Workflow file (default: <root>/.webci/workflow.yaml)
    #[arg(long, global = true, env = "WEBCI_WORKFLOW")]
    workflow: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default website workflow to .webci/workflow.yaml
    Init {
        /// Overwrite an existing workflow
        #[arg(long)]
        force: bool,
    },

    /// Decide whether an event would start a run
    Check(EventArgs),

    /// Run the workflow for an event; exits with the job's exit code
    Run(RunArgs),

    /// Inspect the workflow configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// List recorded runs, newest first
    History {
        /// Show one run in full (a prefix of the id is enough)
        run_id: Option<String>,

        /// Maximum number of runs to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let workflow = cli.workflow.as_deref();

    let result = match cli.command {
        Commands::Init { force } => cmd::init::run(&root, force).map(|()| 0),
        Commands::Check(args) => cmd::check::run(&root, workflow, &args, cli.json).map(|()| 0),
        Commands::Run(args) => cmd::run::run(&root, workflow, args, cli.json),
        Commands::Config { subcommand } => {
            cmd::config::run(&root, workflow, subcommand, cli.json).map(|()| 0)
        }
        Commands::History { run_id, limit } => {
            cmd::history::run(&root, run_id.as_deref(), limit, cli.json).map(|()| 0)
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
