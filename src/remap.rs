//! The two-direction remapping pipeline.
//!
//! One pipeline instance owns the mapping table and the ordered directive
//! set, and both transitions go through it: the merged baseline archive is
//! deobfuscated into the development scheme before compilation, and the
//! packaged development archive is reobfuscated into the distribution
//! archive after packaging. Sharing the instance is what guarantees the
//! directive set and mapping ref cannot drift between directions.
//!
//! The deobfuscated baseline is cached across builds, keyed by the mapping
//! ref and the directive-set digest. Output archives appear atomically;
//! a conflict aborts with nothing published.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use thiserror::Error;

use modlane_remap::{ClassError, Direction, MappingError, MappingTable, Remapper};

use crate::archive::{read_entries, ArchiveError, ArchiveWriter};
use crate::context::BuildContext;

/// Errors from the remapping pipeline
#[derive(Debug, Error)]
pub enum RemapError {
    #[error("mapping table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: MappingError,
    },

    #[error("remapping conflict: {first:?} and {second:?} both map to {target:?}")]
    Conflict {
        target: String,
        first: String,
        second: String,
    },

    #[error("{0}")]
    Engine(#[from] modlane_remap::RemapError),

    #[error("class entry {entry:?}: {source}")]
    Class {
        entry: String,
        #[source]
        source: ClassError,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("baseline archive not found: {0}")]
    MissingBaseline(PathBuf),

    #[error("development archive not found: {0} (run the package goal first)")]
    MissingDevArchive(PathBuf),
}

/// Cache key of the deobfuscated baseline: mapping ref plus directive digest
pub fn baseline_cache_key(ctx: &BuildContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ctx.mapping.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(ctx.directives.digest().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Location of the cached development-scheme baseline archive
pub fn baseline_dev_path(ctx: &BuildContext) -> PathBuf {
    ctx.layout
        .baseline_cache
        .join(baseline_cache_key(ctx))
        .join("baseline-dev.tar")
}

/// Direction-parameterized remapping over the build's mapping ref and
/// directive set.
pub struct RemapPipeline<'a> {
    ctx: &'a BuildContext,
    table: MappingTable,
}

impl<'a> RemapPipeline<'a> {
    /// Load the mapping table named by the context's mapping ref
    pub fn load(ctx: &'a BuildContext) -> Result<Self, RemapError> {
        let path = ctx.mapping_table_path();
        let table = MappingTable::load(&path).map_err(|source| RemapError::Table {
            path: path.clone(),
            source,
        })?;
        Ok(Self { ctx, table })
    }

    #[cfg(test)]
    fn with_table(ctx: &'a BuildContext, table: MappingTable) -> Self {
        Self { ctx, table }
    }

    /// Deobfuscate the merged baseline archive into the development scheme.
    ///
    /// Cached: the output is reused while the mapping ref and directive set
    /// are unchanged.
    pub fn deobfuscate_baseline(&self) -> Result<PathBuf, RemapError> {
        let target = baseline_dev_path(self.ctx);
        if target.is_file() {
            if self.ctx.verbose {
                eprintln!("[remap] baseline cache hit: {}", target.display());
            }
            return Ok(target);
        }

        let input = &self.ctx.layout.baseline_archive;
        if !input.is_file() {
            return Err(RemapError::MissingBaseline(input.clone()));
        }

        let writer = self.remap_archive(Direction::Deobfuscate, input)?;
        writer.write_to(&target)?;

        if self.ctx.verbose {
            eprintln!(
                "[remap] deobfuscated baseline ({} entries) -> {}",
                writer.len(),
                target.display()
            );
        }
        Ok(target)
    }

    /// Reobfuscate the packaged development archive into the distribution
    /// archive. Runs strictly after packaging; on any failure the partial
    /// output is discarded and only the development archive remains.
    pub fn reobfuscate(&self) -> Result<PathBuf, RemapError> {
        let input = self.ctx.dev_archive_path();
        if !input.is_file() {
            return Err(RemapError::MissingDevArchive(input));
        }

        let writer = self.remap_archive(Direction::Reobfuscate, &input)?;
        let target = self.ctx.dist_archive_path();
        writer.write_to(&target)?;

        if self.ctx.verbose {
            eprintln!("[remap] distribution archive -> {}", target.display());
        }
        Ok(target)
    }

    fn remap_archive(
        &self,
        direction: Direction,
        input: &std::path::Path,
    ) -> Result<ArchiveWriter, RemapError> {
        let remapper = Remapper::new(&self.table, direction, &self.ctx.directives)?;
        let entries = read_entries(input)?;

        // Collision check over the full entry set first: a pass-through name
        // landing on a renamed one is reported before any rewriting happens.
        let mut sources: std::collections::BTreeMap<String, String> =
            std::collections::BTreeMap::new();
        let mut targets = Vec::with_capacity(entries.len());
        for (path, _) in &entries {
            let target = remapper.remap_entry_path(path);
            if let Some(first) = sources.insert(target.clone(), path.clone()) {
                return Err(RemapError::Conflict {
                    target,
                    first,
                    second: path.clone(),
                });
            }
            targets.push(target);
        }

        let mut writer = ArchiveWriter::new();
        for ((path, bytes), target) in entries.into_iter().zip(targets) {
            let bytes = if Remapper::is_class_entry(&path) {
                remapper
                    .remap_class(&bytes)
                    .map_err(|source| RemapError::Class {
                        entry: path.clone(),
                        source,
                    })?
            } else {
                bytes
            };
            writer.add_bytes(&target, bytes, &direction.to_string())?;
        }

        Ok(writer)
    }
}
