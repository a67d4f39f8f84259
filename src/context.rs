//! Immutable per-build context.
//!
//! Everything flag- or configuration-derived is computed here, once, before
//! any task is constructed: resolved flags, the declared dependency set, the
//! mixin registration, the mapping ref, and the ordered directive file set.
//! Tasks receive a shared reference and never mutate build-wide state, which
//! keeps each task independently testable.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use walkdir::WalkDir;

use modlane_remap::{AccessDirectiveSet, AccessError, MappingRef};

use crate::config::{
    CompilerSection, ConfigError, ProjectConfig, ProjectSection, RepositorySection,
};
use crate::deps::{DependencyEntry, DependencySet, ResolveError};
use crate::flags::{resolve_flag, FeatureFlags};
use crate::mixins::MixinRegistration;

/// Filename suffix that marks an access directive resource
pub const DIRECTIVE_SUFFIX: &str = "_at.cfg";

/// Environment variable appended to the configured version (CI builds)
pub const VERSION_SUFFIX_ENV: &str = "CI_SHA_SHORT";

/// The invoked top-level build goal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    Compile,
    Package,
    DeobfuscateBaseline,
    ReobfuscatePackage,
    InjectTags,
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Goal::Compile => "compile",
            Goal::Package => "package",
            Goal::DeobfuscateBaseline => "deobfuscate-baseline",
            Goal::ReobfuscatePackage => "reobfuscate-package",
            Goal::InjectTags => "inject-tags",
        };
        write!(f, "{name}")
    }
}

/// Errors from preparing the context
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("access directive error: {0}")]
    Access(#[from] AccessError),
}

/// Absolute directory layout of one build
#[derive(Debug, Clone)]
pub struct Layout {
    pub project_root: PathBuf,
    pub sources: PathBuf,
    pub resources: PathBuf,
    pub baseline_archive: PathBuf,
    pub dep_cache: PathBuf,
    pub mappings_dir: PathBuf,
    pub build: PathBuf,
    pub generated: PathBuf,
    pub classes: PathBuf,
    pub staged_resources: PathBuf,
    pub libs: PathBuf,
    pub baseline_cache: PathBuf,
    pub reports: PathBuf,
    pub runs: PathBuf,
}

impl Layout {
    pub fn new(project_root: &Path, config: &ProjectConfig) -> Self {
        let root = project_root.to_path_buf();
        let build = root.join(&config.paths.build);
        Self {
            sources: root.join(&config.paths.sources),
            resources: root.join(&config.paths.resources),
            baseline_archive: root.join(&config.paths.baseline_archive),
            dep_cache: root.join(&config.paths.dependency_cache),
            mappings_dir: root.join(&config.mappings.cache_dir),
            generated: build.join("generated"),
            classes: build.join("classes"),
            staged_resources: build.join("resources"),
            libs: build.join("libs"),
            baseline_cache: build.join("baseline"),
            reports: build.join("reports"),
            runs: root.join("runs"),
            build,
            project_root: root,
        }
    }
}

/// Immutable build-wide state threaded through every task
#[derive(Debug)]
pub struct BuildContext {
    pub build_id: String,
    pub started_at: DateTime<Utc>,
    pub goal: Goal,
    pub flags: FeatureFlags,
    pub project: ProjectSection,
    /// Configured version plus any CI suffix
    pub version: String,
    pub layout: Layout,
    pub compiler: CompilerSection,
    pub descriptors: Vec<String>,
    pub repositories: Vec<RepositorySection>,
    pub dependencies: DependencySet,
    pub mixins: Option<MixinRegistration>,
    pub core_plugin_class: Option<String>,
    pub mapping: MappingRef,
    pub directives: AccessDirectiveSet,
    pub tags_class_name: String,
    pub tags_extra: std::collections::BTreeMap<String, String>,
    pub verbose: bool,
}

impl BuildContext {
    /// Resolve flags, validate flag-required sections, and assemble the
    /// context. Fails before any task has run.
    pub fn prepare(
        config: &ProjectConfig,
        project_root: &Path,
        goal: Goal,
        verbose: bool,
    ) -> Result<Self, ContextError> {
        let flags = FeatureFlags::resolve(&config.properties)?;

        if flags.use_mixins && config.mixins.is_none() {
            return Err(ConfigError::MissingSection {
                section: "[mixins]",
                reason: "useMixins is enabled",
            }
            .into());
        }
        if flags.use_core_mod && config.core.is_none() {
            return Err(ConfigError::MissingSection {
                section: "[core]",
                reason: "useCoreMod is enabled",
            }
            .into());
        }

        let mixins = match (&config.mixins, flags.use_mixins) {
            (Some(section), true) => Some(MixinRegistration::from_config(
                section,
                &config.project.module_id,
            )?),
            _ => None,
        };

        let layout = Layout::new(project_root, config);
        let directives = if flags.use_access_transformer {
            let files = collect_directive_files(&layout.resources);
            AccessDirectiveSet::from_files(&files)?
        } else {
            AccessDirectiveSet::empty()
        };

        let version = match std::env::var(VERSION_SUFFIX_ENV) {
            Ok(suffix) if !suffix.is_empty() => format!("{}{}", config.project.version, suffix),
            _ => config.project.version.clone(),
        };

        // Flag-gated declarations drop out of the set entirely
        let mut dependencies = DependencySet::default();
        for section in &config.dependencies {
            let included = match &section.when {
                Some(flag) => resolve_flag(&config.properties, flag)?,
                None => true,
            };
            if included {
                dependencies.push(DependencyEntry::from_section(section)?);
            }
        }

        Ok(Self {
            build_id: ulid::Ulid::new().to_string().to_lowercase(),
            started_at: Utc::now(),
            goal,
            flags,
            project: config.project.clone(),
            version,
            layout,
            compiler: config.compiler.clone(),
            descriptors: config.resources.descriptors.clone(),
            repositories: config.repositories.clone(),
            dependencies,
            mixins,
            core_plugin_class: config.core.as_ref().map(|c| c.plugin_class.clone()),
            mapping: MappingRef::new(&config.mappings.channel, &config.mappings.version),
            directives,
            tags_class_name: config.tags_class_name(),
            tags_extra: config.tags.extra.clone(),
            verbose,
        })
    }

    /// Whether the invoked top-level goal is the full distribution build.
    ///
    /// This is the explicit predicate behind the force-load manifest flag.
    pub fn is_distribution_build(&self) -> bool {
        self.goal == Goal::Package
    }

    /// Every entry the resolver must materialize: the declared set plus the
    /// mixin registration inputs.
    pub fn resolution_entries(&self) -> Vec<DependencyEntry> {
        let mut entries = self.dependencies.entries().to_vec();
        if let Some(mixins) = &self.mixins {
            entries.extend(mixins.resolution_entries());
        }
        entries
    }

    pub fn dev_archive_path(&self) -> PathBuf {
        self.layout.libs.join(format!(
            "{}-{}.tar",
            self.project.archive_base, self.project.target_version
        ))
    }

    pub fn dist_archive_path(&self) -> PathBuf {
        self.layout.libs.join(format!(
            "{}-{}-dist.tar",
            self.project.archive_base, self.project.target_version
        ))
    }

    pub fn sources_archive_path(&self) -> PathBuf {
        self.layout.libs.join(format!(
            "{}-{}-sources.tar",
            self.project.archive_base, self.project.target_version
        ))
    }

    pub fn mapping_table_path(&self) -> PathBuf {
        self.layout.mappings_dir.join(self.mapping.file_name())
    }

    /// Name of the module's own directive file, as written into the manifest
    pub fn directive_file_name(&self) -> String {
        format!("{}{}", self.project.module_id, DIRECTIVE_SUFFIX)
    }
}

/// Collect `*_at.cfg` resources in a stable order (sorted by relative path)
pub fn collect_directive_files(resources_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(resources_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(DIRECTIVE_SUFFIX))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn base_config(extra: &str) -> ProjectConfig {
        let text = format!(
            r#"
[project]
module_id = "examplemod"
display_name = "Example Mod"
version = "1.2.0"
group = "com.example"
archive_base = "examplemod"
target_version = "1.12.2"

[properties]
useCoreMod = "false"
useMixins = "false"
useSpark = "false"
useAccessTransformer = "false"
includeMod = "false"

[mappings]
channel = "stable"
version = "39"
{extra}
"#
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_prepare_minimal() {
        let temp = TempDir::new().unwrap();
        let config = base_config("");
        let ctx = BuildContext::prepare(&config, temp.path(), Goal::Compile, false).unwrap();

        assert_eq!(ctx.flags, FeatureFlags::none());
        assert!(ctx.mixins.is_none());
        assert!(ctx.directives.is_empty());
        assert!(!ctx.is_distribution_build());
        assert_eq!(ctx.mapping.file_name(), "stable-39.srg");
        assert_eq!(ctx.directive_file_name(), "examplemod_at.cfg");
        assert!(ctx
            .dev_archive_path()
            .ends_with("build/libs/examplemod-1.12.2.tar"));
        assert!(ctx
            .dist_archive_path()
            .ends_with("build/libs/examplemod-1.12.2-dist.tar"));
    }

    #[test]
    fn test_distribution_predicate_follows_goal() {
        let temp = TempDir::new().unwrap();
        let config = base_config("");
        for goal in [
            Goal::Compile,
            Goal::DeobfuscateBaseline,
            Goal::ReobfuscatePackage,
            Goal::InjectTags,
        ] {
            let ctx = BuildContext::prepare(&config, temp.path(), goal, false).unwrap();
            assert!(!ctx.is_distribution_build(), "goal {goal}");
        }
        let ctx = BuildContext::prepare(&config, temp.path(), Goal::Package, false).unwrap();
        assert!(ctx.is_distribution_build());
    }

    #[test]
    fn test_mixins_flag_requires_section() {
        let temp = TempDir::new().unwrap();
        let mut config = base_config("");
        config
            .properties
            .insert("useMixins".to_string(), "true".to_string());

        let err = BuildContext::prepare(&config, temp.path(), Goal::Compile, false).unwrap_err();
        assert!(matches!(
            err,
            ContextError::Config(ConfigError::MissingSection { section, .. }) if section == "[mixins]"
        ));
    }

    #[test]
    fn test_mixins_registration_prepared() {
        let temp = TempDir::new().unwrap();
        let mut config = base_config("[mixins]\nloader = \"zone.rong:mixinbooter:8.9\"\n");
        config
            .properties
            .insert("useMixins".to_string(), "true".to_string());

        let ctx = BuildContext::prepare(&config, temp.path(), Goal::Compile, false).unwrap();
        let mixins = ctx.mixins.as_ref().unwrap();
        assert_eq!(mixins.refmap_name, "mixins.examplemod.refmap.json");
        assert_eq!(ctx.resolution_entries().len(), 1);
    }

    #[test]
    fn test_flag_gated_dependency_declarations() {
        let temp = TempDir::new().unwrap();
        let extra = "[[dependency]]\nname = \"profiler\"\ncoordinate = \"com.example:profiler:1.0\"\ncategory = \"runtime\"\nwhen = \"useSpark\"\n\n\
                     [[dependency]]\nname = \"always\"\ncoordinate = \"com.example:always:1.0\"\n";
        let mut config = base_config(extra);

        let ctx = BuildContext::prepare(&config, temp.path(), Goal::Compile, false).unwrap();
        let names: Vec<_> = ctx
            .dependencies
            .entries()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["always"]);

        config
            .properties
            .insert("useSpark".to_string(), "true".to_string());
        let ctx = BuildContext::prepare(&config, temp.path(), Goal::Compile, false).unwrap();
        assert_eq!(ctx.dependencies.entries().len(), 2);
    }

    #[test]
    fn test_directive_files_collected_in_order() {
        let temp = TempDir::new().unwrap();
        let resources = temp.path().join("resources");
        fs::create_dir_all(resources.join("nested")).unwrap();
        fs::write(resources.join("zeta_at.cfg"), "public com.example.Z\n").unwrap();
        fs::write(resources.join("alpha_at.cfg"), "public com.example.A\n").unwrap();
        fs::write(resources.join("nested/mid_at.cfg"), "public com.example.M\n").unwrap();
        fs::write(resources.join("mod.info"), "{}").unwrap();

        let files = collect_directive_files(&resources);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["alpha_at.cfg", "mid_at.cfg", "zeta_at.cfg"]);

        let mut config = base_config("");
        config
            .properties
            .insert("useAccessTransformer".to_string(), "true".to_string());
        let ctx = BuildContext::prepare(&config, temp.path(), Goal::Compile, false).unwrap();
        assert_eq!(ctx.directives.len(), 3);
    }
}
