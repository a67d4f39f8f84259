//! Packaging stage.
//!
//! Assembles the development archive from compiled classes, staged
//! resources, and embedded dependency contents. Embedded directories are
//! copied file-for-file; embedded archives are unpacked and merged with
//! entry bytes verbatim. Manifest attributes follow the feature flags:
//!
//! | condition                         | attribute                      |
//! |-----------------------------------|--------------------------------|
//! | `useCoreMod`                      | `PluginEntryPoint`             |
//! | `useCoreMod` and `includeMod`     | `ContainsEmbeddedMod: true`    |
//! | `useCoreMod` and `includeMod`     | `ForceLoadAsMod` (distribution goal only) |
//! | `useAccessTransformer`            | `AccessDirectives`             |
//!
//! A sources archive is written alongside the development archive. The
//! reobfuscation step is chained after this stage by the task graph;
//! packaging is not complete until it succeeds.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::{ArchiveError, ArchiveWriter};
use crate::context::BuildContext;
use crate::deps::{Category, ResolveError, Resolver};

/// Manifest entry path inside the archive
pub const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";

/// Errors from packaging
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("embed dependency {name:?} cannot be resolved: {source}")]
    EmbedMissing {
        name: String,
        #[source]
        source: ResolveError,
    },
}

/// The conditional manifest attribute table, in write order
pub fn manifest_attributes(ctx: &BuildContext) -> Vec<(String, String)> {
    let mut attributes = Vec::new();

    if ctx.flags.use_core_mod {
        let plugin_class = ctx
            .core_plugin_class
            .clone()
            .expect("context preparation requires [core] when useCoreMod is set");
        attributes.push(("PluginEntryPoint".to_string(), plugin_class));

        if ctx.flags.include_mod {
            attributes.push(("ContainsEmbeddedMod".to_string(), "true".to_string()));
            attributes.push((
                "ForceLoadAsMod".to_string(),
                ctx.is_distribution_build().to_string(),
            ));
        }
    }

    if ctx.flags.use_access_transformer {
        attributes.push(("AccessDirectives".to_string(), ctx.directive_file_name()));
    }

    attributes
}

/// Render the manifest entry
pub fn render_manifest(attributes: &[(String, String)]) -> String {
    let mut out = String::from("Manifest-Version: 1.0\n");
    for (name, value) in attributes {
        out.push_str(&format!("{name}: {value}\n"));
    }
    out
}

/// Assemble the development archive and the attached sources archive.
/// Returns the development archive path.
pub fn assemble(ctx: &BuildContext) -> Result<PathBuf, PackageError> {
    let mut writer = ArchiveWriter::new();

    let manifest = render_manifest(&manifest_attributes(ctx));
    writer.add_bytes(MANIFEST_ENTRY, manifest.into_bytes(), "manifest")?;

    if ctx.layout.classes.is_dir() {
        writer.add_dir_contents(&ctx.layout.classes, "classes")?;
    }
    if ctx.layout.staged_resources.is_dir() {
        writer.add_dir_contents(&ctx.layout.staged_resources, "resources")?;
    }

    // Embedded dependency contents, in declaration order
    let resolver = Resolver::new(&ctx.repositories, &ctx.layout.dep_cache);
    for entry in ctx.dependencies.by_category(Category::Embed) {
        let path = resolver
            .locate(entry)
            .map_err(|source| PackageError::EmbedMissing {
                name: entry.name.clone(),
                source,
            })?;
        if path.is_dir() {
            writer.add_dir_contents(&path, &entry.name)?;
        } else {
            writer.add_archive_contents(&path, &entry.name)?;
        }
    }

    // The compile digest record is build bookkeeping, not archive content
    writer.remove(".inputs");

    let target = ctx.dev_archive_path();
    writer.write_to(&target)?;

    write_sources_archive(ctx)?;

    if ctx.verbose {
        eprintln!(
            "[package] development archive ({} entries) -> {}",
            writer.len(),
            target.display()
        );
    }
    Ok(target)
}

fn write_sources_archive(ctx: &BuildContext) -> Result<(), PackageError> {
    let mut writer = ArchiveWriter::new();
    if ctx.layout.sources.is_dir() {
        writer.add_dir_contents(&ctx.layout.sources, "sources")?;
    }
    if ctx.layout.generated.is_dir() {
        writer.add_dir_contents(&ctx.layout.generated, "generated")?;
    }
    writer.write_to(&ctx.sources_archive_path())?;
    Ok(())
}
