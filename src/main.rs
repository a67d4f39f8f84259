//! modlane CLI
//!
//! Entry point for the `modlane` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use modlane::{BuildPipeline, CancelFlag, Goal};

#[derive(Parser)]
#[command(name = "modlane")]
#[command(about = "Remapping build lane for managed-runtime plugin modules", version)]
struct Cli {
    /// Project root directory
    #[arg(long, short = 'C', default_value = ".")]
    project_root: PathBuf,

    /// Path to the config file (default: <project-root>/modlane.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Verbose progress output
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile module sources against the deobfuscated baseline
    Compile,

    /// Build the distribution archive (compiles, packages, reobfuscates)
    Package,

    /// Deobfuscate the merged baseline archive into the development scheme
    DeobfuscateBaseline,

    /// Reobfuscate the packaged development archive
    ReobfuscatePackage,

    /// Generate the build-time tags class
    InjectTags,

    /// Print the pruned task graph for a goal without executing
    Plan {
        /// Goal to plan (defaults to package)
        #[arg(default_value = "package")]
        goal: String,
    },

    /// Write IDE launch entries under runs/
    IdeConfigs,
}

fn parse_goal(name: &str) -> Option<Goal> {
    match name {
        "compile" => Some(Goal::Compile),
        "package" => Some(Goal::Package),
        "deobfuscate-baseline" => Some(Goal::DeobfuscateBaseline),
        "reobfuscate-package" => Some(Goal::ReobfuscatePackage),
        "inject-tags" => Some(Goal::InjectTags),
        _ => None,
    }
}

fn main() {
    let cli = Cli::parse();

    let mut pipeline = BuildPipeline::new(&cli.project_root).with_verbose(cli.verbose);
    if let Some(config) = cli.config {
        pipeline = pipeline.with_config_path(config);
    }

    match cli.command {
        Commands::Compile => run_goal(&pipeline, Goal::Compile),
        Commands::Package => run_goal(&pipeline, Goal::Package),
        Commands::DeobfuscateBaseline => run_goal(&pipeline, Goal::DeobfuscateBaseline),
        Commands::ReobfuscatePackage => run_goal(&pipeline, Goal::ReobfuscatePackage),
        Commands::InjectTags => run_goal(&pipeline, Goal::InjectTags),
        Commands::Plan { goal } => run_plan(&pipeline, &goal),
        Commands::IdeConfigs => run_ide_configs(&pipeline),
    }
}

fn run_goal(pipeline: &BuildPipeline, goal: Goal) {
    let cancel = CancelFlag::new();
    cancel.install_handler();

    match pipeline.run(goal, &cancel) {
        Ok(summary) => {
            println!(
                "{goal}: {} task(s) succeeded in {} ms",
                summary.tasks.len(),
                summary.duration_ms
            );
        }
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(e.exit_code());
        }
    }
}

fn run_plan(pipeline: &BuildPipeline, goal_name: &str) {
    let Some(goal) = parse_goal(goal_name) else {
        eprintln!("error: unknown goal {goal_name:?}");
        process::exit(2);
    };

    match pipeline.plan(goal) {
        Ok((order, pruned)) => {
            println!("plan for {goal}:");
            for (i, task) in order.iter().enumerate() {
                println!("  {}. {task}", i + 1);
            }
            for task in pruned {
                println!("  -  {task} (pruned by flags)");
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(e.exit_code());
        }
    }
}

fn run_ide_configs(pipeline: &BuildPipeline) {
    match pipeline.generate_ide_configs() {
        Ok(paths) => {
            for path in paths {
                println!("wrote {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(e.exit_code());
        }
    }
}
