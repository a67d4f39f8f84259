//! Resource templating and staging.
//!
//! Copies the resource tree into the staged build directory. Descriptor
//! files get `${version}` / `${targetVersion}` substitution; access
//! directive files are relocated into the packaging metadata directory when
//! the access-transformer flag is on. Substitution consumes its tokens, so
//! re-running the stage over already-substituted content is byte-identical.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::Glob;
use regex_lite::Regex;
use thiserror::Error;
use walkdir::WalkDir;

use crate::context::{BuildContext, DIRECTIVE_SUFFIX};

/// Fixed packaging location for relocated directive files
pub const PACKAGING_METADATA_DIR: &str = "META-INF";

/// Errors from resource processing
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("descriptor {0} is not valid UTF-8")]
    NonUtf8Descriptor(PathBuf),

    #[error("invalid descriptor pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Substitute the known placeholder tokens
pub fn substitute(text: &str, version: &str, target_version: &str) -> String {
    text.replace("${version}", version)
        .replace("${targetVersion}", target_version)
}

/// Stage the resource tree into `layout.staged_resources`.
///
/// The staged directory is rebuilt from scratch so deleted resources do not
/// linger between builds.
pub fn process_resources(ctx: &BuildContext) -> Result<(), ResourceError> {
    let source = &ctx.layout.resources;
    let staged = &ctx.layout.staged_resources;

    if staged.exists() {
        fs::remove_dir_all(staged)?;
    }
    fs::create_dir_all(staged)?;

    if !source.exists() {
        return Ok(());
    }

    let descriptor_set = build_descriptor_matcher(&ctx.descriptors)?;
    let leftover = Regex::new(r"\$\{[A-Za-z][A-Za-z0-9_]*\}").expect("valid pattern");

    for entry in WalkDir::new(source) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source)
            .expect("walked path is under source");
        let file_name = entry.file_name().to_string_lossy();

        let target_rel: PathBuf = if ctx.flags.use_access_transformer
            && file_name.ends_with(DIRECTIVE_SUFFIX)
        {
            Path::new(PACKAGING_METADATA_DIR).join(file_name.as_ref())
        } else {
            rel.to_path_buf()
        };

        let target = staged.join(&target_rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        if descriptor_set.is_match(file_name.as_ref()) {
            let text = fs::read_to_string(entry.path())
                .map_err(|_| ResourceError::NonUtf8Descriptor(entry.path().to_path_buf()))?;
            let substituted = substitute(&text, &ctx.version, &ctx.project.target_version);

            if ctx.verbose {
                for token in leftover.find_iter(&substituted) {
                    eprintln!(
                        "[resources] WARNING: unresolved placeholder {} in {}",
                        token.as_str(),
                        rel.display()
                    );
                }
            }
            fs::write(&target, substituted)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

fn build_descriptor_matcher(descriptors: &[String]) -> Result<globset::GlobSet, ResourceError> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in descriptors {
        let glob = Glob::new(pattern).map_err(|source| ResourceError::BadPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ResourceError::BadPattern {
        pattern: descriptors.join(","),
        source,
    })
}
