//! Compilation stage.
//!
//! Shells out to the configured compiler in a separate worker process, with
//! the deobfuscated baseline and resolved compile dependencies on the
//! classpath and the annotation-processor path wired from the processor
//! category plus the mixin registration. Incremental: a digest over sources,
//! classpath names, and compiler options decides whether the previous class
//! output can be kept.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::context::BuildContext;
use crate::deps::{Category, ResolveError, Resolver};
use crate::remap::baseline_dev_path;

/// Source file extension the compiler consumes
const SOURCE_EXT: &str = "java";

/// File recording the last successful compile's input digest
const DIGEST_FILE: &str = ".inputs";

/// Errors from the compilation stage
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("deobfuscated baseline missing: {0} (deobfuscate-baseline must run first)")]
    MissingBaseline(PathBuf),

    #[error("failed to launch compiler {command:?}: {source}")]
    CompilerLaunch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("compiler exited with {status}")]
    CompilerFailed { status: std::process::ExitStatus },
}

/// Result of one compile invocation
#[derive(Debug)]
pub struct CompileOutcome {
    /// True when the input digest matched and compilation was skipped
    pub up_to_date: bool,
    pub input_digest: String,
    pub source_count: usize,
}

/// Run the compilation stage
pub fn compile(ctx: &BuildContext) -> Result<CompileOutcome, CompileError> {
    let sources = collect_sources(&[&ctx.layout.sources, &ctx.layout.generated])?;
    fs::create_dir_all(&ctx.layout.classes)?;

    let baseline = baseline_dev_path(ctx);
    if !baseline.is_file() {
        return Err(CompileError::MissingBaseline(baseline));
    }

    let resolver = Resolver::new(&ctx.repositories, &ctx.layout.dep_cache);
    let classpath = build_classpath(ctx, &resolver, &baseline)?;
    let processor_path = build_processor_path(ctx, &resolver)?;
    let args = build_compiler_args(ctx, &classpath, &processor_path, &sources);

    let input_digest = input_digest(ctx, &sources, &args)?;
    let digest_path = ctx.layout.classes.join(DIGEST_FILE);
    if ctx.compiler.incremental {
        if let Ok(previous) = fs::read_to_string(&digest_path) {
            if previous == input_digest {
                if ctx.verbose {
                    eprintln!("[compile] up to date ({} sources)", sources.len());
                }
                return Ok(CompileOutcome {
                    up_to_date: true,
                    input_digest,
                    source_count: sources.len(),
                });
            }
        }
    }

    if sources.is_empty() {
        fs::write(&digest_path, &input_digest)?;
        return Ok(CompileOutcome {
            up_to_date: false,
            input_digest,
            source_count: 0,
        });
    }

    if ctx.verbose {
        eprintln!(
            "[compile] {} {} ({} sources)",
            ctx.compiler.command,
            args.first().map(String::as_str).unwrap_or(""),
            sources.len()
        );
    }

    // The compiler always runs in its own worker process
    let status = Command::new(&ctx.compiler.command)
        .args(&args)
        .current_dir(&ctx.layout.project_root)
        .status()
        .map_err(|source| CompileError::CompilerLaunch {
            command: ctx.compiler.command.clone(),
            source,
        })?;

    if !status.success() {
        return Err(CompileError::CompilerFailed { status });
    }

    fs::write(&digest_path, &input_digest)?;
    Ok(CompileOutcome {
        up_to_date: false,
        input_digest,
        source_count: sources.len(),
    })
}

/// Collect source files under the given roots, sorted for stable digests
fn collect_sources(roots: &[&Path]) -> Result<Vec<PathBuf>, CompileError> {
    let mut sources = Vec::new();
    for root in roots {
        if !root.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(root) {
            let entry = entry.map_err(|e| {
                CompileError::Io(e.into_io_error().unwrap_or_else(|| {
                    io::Error::other("walk error without I/O cause")
                }))
            })?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == SOURCE_EXT)
            {
                sources.push(entry.into_path());
            }
        }
    }
    sources.sort();
    Ok(sources)
}

/// Compile classpath: deobfuscated baseline, compile-category dependencies,
/// and the mixin loader when registered
fn build_classpath(
    ctx: &BuildContext,
    resolver: &Resolver,
    baseline: &Path,
) -> Result<Vec<PathBuf>, CompileError> {
    let mut classpath = vec![baseline.to_path_buf()];
    for entry in ctx.dependencies.by_category(Category::Compile) {
        classpath.push(resolver.locate(entry)?);
    }
    if let Some(mixins) = &ctx.mixins {
        classpath.push(resolver.locate(&mixins.loader)?);
    }
    Ok(classpath)
}

/// Annotation-processor path: processor-category dependencies plus the mixin
/// loader and its processors
fn build_processor_path(
    ctx: &BuildContext,
    resolver: &Resolver,
) -> Result<Vec<PathBuf>, CompileError> {
    let mut path = Vec::new();
    for entry in ctx.dependencies.by_category(Category::AnnotationProcessor) {
        path.push(resolver.locate(entry)?);
    }
    if let Some(mixins) = &ctx.mixins {
        path.push(resolver.locate(&mixins.loader)?);
        for processor in &mixins.processors {
            path.push(resolver.locate(processor)?);
        }
    }
    Ok(path)
}

/// Assemble the full compiler argument list
pub fn build_compiler_args(
    ctx: &BuildContext,
    classpath: &[PathBuf],
    processor_path: &[PathBuf],
    sources: &[PathBuf],
) -> Vec<String> {
    let sep = if cfg!(windows) { ";" } else { ":" };
    let join = |paths: &[PathBuf]| {
        paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(sep)
    };

    let mut args = ctx.compiler.args.clone();
    args.push("-d".to_string());
    args.push(ctx.layout.classes.to_string_lossy().into_owned());

    if !classpath.is_empty() {
        args.push("-cp".to_string());
        args.push(join(classpath));
    }
    if !processor_path.is_empty() {
        args.push("-processorpath".to_string());
        args.push(join(processor_path));
    }
    if let Some(mixins) = &ctx.mixins {
        // Companion mapping-reference file the processor emits alongside the
        // classes; packaging picks it up from the class output directory.
        args.push(format!("-ArefMapFileName={}", mixins.refmap_name));
    }

    for source in sources {
        args.push(source.to_string_lossy().into_owned());
    }
    args
}

/// Digest over everything that determines the class output
fn input_digest(
    ctx: &BuildContext,
    sources: &[PathBuf],
    args: &[String],
) -> Result<String, CompileError> {
    let mut hasher = Sha256::new();
    hasher.update(ctx.version.as_bytes());
    hasher.update(b"\n");
    for arg in args {
        hasher.update(arg.as_bytes());
        hasher.update(b"\n");
    }
    for source in sources {
        hasher.update(source.to_string_lossy().as_bytes());
        hasher.update(b"\n");
        hasher.update(&fs::read(source)?);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}
