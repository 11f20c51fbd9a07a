use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use solder::{handle_compile, handle_merge, handle_order, load_config};
use solder_core::{MergeConfig, OrderStrategy, UnresolvedPolicy};

#[derive(Parser)]
#[command(name = "solder")]
#[command(about = "Merge independently compiled contract syntax trees into one build", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Config file (defaults to solder.toml under the project root)
    #[arg(short, long, global = true, env = "SOLDER_CONFIG")]
    config: Option<PathBuf>,

    /// Project root
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the compiled syntax trees into a single build document
    Merge {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write merge diagnostics as JSON
        #[arg(long)]
        diagnostics: Option<PathBuf>,

        /// File ordering strategy
        #[arg(long, value_enum)]
        order: Option<OrderArg>,

        /// What to do with references that cannot be resolved
        #[arg(long, value_enum)]
        unresolved: Option<PolicyArg>,
    },

    /// Print the order in which files would be merged
    Order {
        /// File ordering strategy
        #[arg(long, value_enum)]
        order: Option<OrderArg>,
    },

    /// Compile every source file into the syntax-tree directory
    Compile {
        /// Compiler binary
        #[arg(long)]
        compiler: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    DependencyCount,
    Topological,
}

impl From<OrderArg> for OrderStrategy {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::DependencyCount => OrderStrategy::DependencyCount,
            OrderArg::Topological => OrderStrategy::Topological,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Skip,
    Warn,
    Error,
}

impl From<PolicyArg> for UnresolvedPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Skip => UnresolvedPolicy::Skip,
            PolicyArg::Warn => UnresolvedPolicy::Warn,
            PolicyArg::Error => UnresolvedPolicy::Error,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.debug {
        LevelFilter::TRACE
    } else if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_target(cli.debug) // Show target module in debug mode
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref(), cli.root.as_deref())?;
    if cli.config.is_some() {
        if let Some(root) = cli.root {
            config.root = root;
        }
    }

    match cli.command {
        Commands::Merge {
            output,
            diagnostics,
            order,
            unresolved,
        } => {
            apply_overrides(&mut config, order, unresolved);
            if diagnostics.is_some() {
                config.diagnostics_path = diagnostics;
            }
            handle_merge(&config, output.as_deref())
        }
        Commands::Order { order } => {
            apply_overrides(&mut config, order, None);
            for path in handle_order(&config)? {
                println!("{}", path);
            }
            Ok(())
        }
        Commands::Compile { compiler } => {
            if let Some(compiler) = compiler {
                config.compiler_path = compiler;
            }
            let summary = handle_compile(&config)?;
            info!(
                "Compiled {} sources, {} external units",
                summary.sources, summary.external
            );
            Ok(())
        }
    }
}

fn apply_overrides(
    config: &mut MergeConfig,
    order: Option<OrderArg>,
    unresolved: Option<PolicyArg>,
) {
    if let Some(order) = order {
        config.order = order.into();
    }
    if let Some(unresolved) = unresolved {
        config.unresolved = unresolved.into();
    }
}
