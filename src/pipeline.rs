//! Pipeline front-end.
//!
//! Loads configuration, resolves flags into the immutable build context,
//! declares the task graph for the invoked goal, executes it, and writes the
//! build summary. Reobfuscation is declared as the dependent finalizer of
//! packaging, so the `package` goal is not complete until the distribution
//! archive exists.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{ProjectConfig, CONFIG_FILE_NAME};
use crate::context::{BuildContext, ContextError, Goal};
use crate::deps::Resolver;
use crate::graph::{GraphBuilder, GraphError, StageError, TaskGraph};
use crate::report::{BuildStatus, BuildSummary};
use crate::signal::CancelFlag;
use crate::{compile, ide, package, remap, resources, tags};

/// Errors from a build invocation
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("task {task:?} failed: {source}")]
    Task {
        task: String,
        #[source]
        source: StageError,
    },

    #[error("build cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Context(_) => 2,
            BuildError::Graph(_) => 2,
            BuildError::Task { source, .. } => source.exit_code(),
            BuildError::Cancelled => 80,
            BuildError::Io(_) => 1,
        }
    }
}

/// Build invocation front-end
pub struct BuildPipeline {
    project_root: PathBuf,
    config_path: PathBuf,
    verbose: bool,
}

impl BuildPipeline {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_path: project_root.join(CONFIG_FILE_NAME),
            verbose: false,
        }
    }

    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = path;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Load configuration and prepare the immutable context for `goal`
    pub fn load_context(&self, goal: Goal) -> Result<BuildContext, BuildError> {
        let config = ProjectConfig::from_file(&self.config_path).map_err(ContextError::from)?;
        let ctx = BuildContext::prepare(&config, &self.project_root, goal, self.verbose)?;
        Ok(ctx)
    }

    /// The pruned task order for `goal`, without executing anything
    pub fn plan(&self, goal: Goal) -> Result<(Vec<String>, Vec<String>), BuildError> {
        let ctx = self.load_context(goal)?;
        let graph = build_graph(&ctx)?;
        let order = graph.task_names().iter().map(|s| s.to_string()).collect();
        let pruned = graph.pruned().to_vec();
        Ok((order, pruned))
    }

    /// Execute `goal`. The summary is written even for failed builds; the
    /// error names the originating task.
    pub fn run(&self, goal: Goal, cancel: &CancelFlag) -> Result<BuildSummary, BuildError> {
        let ctx = self.load_context(goal)?;
        let graph = build_graph(&ctx)?;
        let outcome = graph.execute(&ctx, cancel);

        let status = if outcome.failure.is_some() {
            BuildStatus::Failed
        } else if outcome.cancelled {
            BuildStatus::Cancelled
        } else {
            BuildStatus::Succeeded
        };

        let summary = BuildSummary::new(
            ctx.build_id.clone(),
            goal.to_string(),
            ctx.version.clone(),
            ctx.started_at,
            status,
            outcome.failure.as_ref().map(|(task, _)| task.clone()),
            outcome.reports,
        );
        summary.write(&ctx.layout.reports)?;

        match outcome.failure {
            Some((task, source)) => {
                if task == "reobfuscate-package" && ctx.dev_archive_path().is_file() {
                    eprintln!(
                        "note: {} was built but is NOT distributable; only the \
                         reobfuscated archive may be published",
                        ctx.dev_archive_path().display()
                    );
                }
                Err(BuildError::Task { task, source })
            }
            None if outcome.cancelled => Err(BuildError::Cancelled),
            None => Ok(summary),
        }
    }

    /// Write the advisory IDE launch entries
    pub fn generate_ide_configs(&self) -> Result<Vec<PathBuf>, BuildError> {
        let ctx = self.load_context(Goal::Compile)?;
        Ok(ide::generate_run_configs(&ctx)?)
    }
}

/// Declare the full task graph and restrict it to the goal's target task.
///
/// Activation predicates are evaluated over the context's resolved flags;
/// the graph builder contracts edges through pruned tasks.
pub fn build_graph(ctx: &BuildContext) -> Result<TaskGraph, GraphError> {
    GraphBuilder::new()
        .task("resolve-dependencies", &[], |ctx: &BuildContext| {
            let resolver =
                Resolver::new(&ctx.repositories, &ctx.layout.dep_cache).with_verbose(ctx.verbose);
            resolver.resolve_all(&ctx.resolution_entries())?;
            Ok(())
        })
        .task("inject-tags", &[], |ctx: &BuildContext| {
            tags::inject_tags(ctx)?;
            Ok(())
        })
        .task("deobfuscate-baseline", &[], |ctx: &BuildContext| {
            remap::RemapPipeline::load(ctx)?.deobfuscate_baseline()?;
            Ok(())
        })
        .task("process-resources", &[], |ctx: &BuildContext| {
            resources::process_resources(ctx)?;
            Ok(())
        })
        .task_if(
            "register-mixins",
            &["resolve-dependencies"],
            ctx.flags.use_mixins,
            |ctx: &BuildContext| {
                let mixins = ctx
                    .mixins
                    .as_ref()
                    .expect("mixin registration prepared when useMixins is set");
                let resolver = Resolver::new(&ctx.repositories, &ctx.layout.dep_cache);
                resolver.locate(&mixins.loader)?;
                for processor in &mixins.processors {
                    resolver.locate(processor)?;
                }
                if ctx.verbose {
                    eprintln!("[mixins] refmap {}", mixins.refmap_name);
                }
                Ok(())
            },
        )
        .task(
            "compile",
            &[
                "resolve-dependencies",
                "inject-tags",
                "deobfuscate-baseline",
                "register-mixins",
            ],
            |ctx: &BuildContext| {
                compile::compile(ctx)?;
                Ok(())
            },
        )
        .task(
            "package",
            &["compile", "process-resources"],
            |ctx: &BuildContext| {
                package::assemble(ctx)?;
                Ok(())
            },
        )
        .task("reobfuscate-package", &["package"], |ctx: &BuildContext| {
            remap::RemapPipeline::load(ctx)?.reobfuscate()?;
            Ok(())
        })
        .build(target_task(ctx.goal))
}

/// The graph target of each goal; `package` finishes at reobfuscation
pub fn target_task(goal: Goal) -> &'static str {
    match goal {
        Goal::Compile => "compile",
        Goal::Package | Goal::ReobfuscatePackage => "reobfuscate-package",
        Goal::DeobfuscateBaseline => "deobfuscate-baseline",
        Goal::InjectTags => "inject-tags",
    }
}
