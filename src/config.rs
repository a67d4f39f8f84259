//! Project configuration (`modlane.toml`)
//!
//! One file per module project. The `[properties]` table carries the boolean
//! feature properties the flag resolver reads; everything else is typed
//! sections with built-in defaults.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::deps::Category;

/// Default config file name, looked up in the project root
pub const CONFIG_FILE_NAME: &str = "modlane.toml";

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required property {0:?}")]
    MissingProperty(String),

    #[error("property {name:?} is not a boolean literal: {value:?}")]
    InvalidBoolean { name: String, value: String },

    #[error("{section} section required because {reason}")]
    MissingSection {
        section: &'static str,
        reason: &'static str,
    },
}

/// Root of `modlane.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub project: ProjectSection,

    /// Raw key/value properties; the feature flags live here
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositorySection>,

    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencySection>,

    pub mappings: MappingsSection,

    #[serde(default)]
    pub compiler: CompilerSection,

    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub tags: TagsSection,

    #[serde(default)]
    pub resources: ResourcesSection,

    /// Required when the mixin feature property is enabled
    pub mixins: Option<MixinsSection>,

    /// Required when the core-plugin feature property is enabled
    pub core: Option<CoreSection>,
}

/// Project identity and versions
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSection {
    /// Module identifier used in refmap and directive file names
    pub module_id: String,
    /// Human-readable name, injected into the tags module
    pub display_name: String,
    pub version: String,
    /// Reverse-domain group, also the default package for generated tags
    pub group: String,
    /// Base name of produced archives
    pub archive_base: String,
    /// Target environment version substituted into resources
    pub target_version: String,
}

/// A declared dependency repository location
#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySection {
    pub name: String,
    pub path: PathBuf,
}

/// One declared dependency
#[derive(Debug, Clone, Deserialize)]
pub struct DependencySection {
    pub name: String,
    /// `group:artifact:version`
    pub coordinate: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default = "default_true")]
    pub transitive: bool,
    /// Feature property gating this declaration (e.g. `useSpark`)
    pub when: Option<String>,
}

/// Which mapping table the build uses; immutable per invocation
#[derive(Debug, Clone, Deserialize)]
pub struct MappingsSection {
    pub channel: String,
    pub version: String,
    /// Directory holding mapping table files; read-only during a run
    #[serde(default = "default_mappings_dir")]
    pub cache_dir: PathBuf,
}

/// External compiler invocation
#[derive(Debug, Clone, Deserialize)]
pub struct CompilerSection {
    #[serde(default = "default_compiler_command")]
    pub command: String,
    #[serde(default = "default_compiler_args")]
    pub args: Vec<String>,
    /// Skip compilation when the input digest is unchanged
    #[serde(default = "default_true")]
    pub incremental: bool,
}

impl Default for CompilerSection {
    fn default() -> Self {
        Self {
            command: default_compiler_command(),
            args: default_compiler_args(),
            incremental: true,
        }
    }
}

/// Project-relative directory layout
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_sources_dir")]
    pub sources: PathBuf,
    #[serde(default = "default_resources_dir")]
    pub resources: PathBuf,
    #[serde(default = "default_build_dir")]
    pub build: PathBuf,
    /// Externally supplied merged baseline archive (obfuscated scheme)
    #[serde(default = "default_baseline_archive")]
    pub baseline_archive: PathBuf,
    /// Local dependency cache root
    #[serde(default = "default_dependency_cache")]
    pub dependency_cache: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            sources: default_sources_dir(),
            resources: default_resources_dir(),
            build: default_build_dir(),
            baseline_archive: default_baseline_archive(),
            dependency_cache: default_dependency_cache(),
        }
    }
}

/// Generated constants module
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsSection {
    /// Fully qualified name of the generated class; defaults to `<group>.Tags`
    pub class_name: Option<String>,
    /// Extra constants beyond version/module id/display name
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Resource templating inputs
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesSection {
    /// Descriptor files that get placeholder substitution
    #[serde(default = "default_descriptors")]
    pub descriptors: Vec<String>,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            descriptors: default_descriptors(),
        }
    }
}

/// Transformation-framework loader registration
#[derive(Debug, Clone, Deserialize)]
pub struct MixinsSection {
    /// Loader coordinate, registered non-transitively
    pub loader: String,
    /// Additional annotation-processor coordinates
    #[serde(default)]
    pub processors: Vec<String>,
}

/// Core-plugin wiring
#[derive(Debug, Clone, Deserialize)]
pub struct CoreSection {
    /// Entry-point class written into the archive manifest
    pub plugin_class: String,
}

fn default_true() -> bool {
    true
}

fn default_compiler_command() -> String {
    "javac".to_string()
}

fn default_compiler_args() -> Vec<String> {
    vec!["-encoding".to_string(), "UTF-8".to_string()]
}

fn default_mappings_dir() -> PathBuf {
    PathBuf::from("mappings")
}

fn default_sources_dir() -> PathBuf {
    PathBuf::from("src")
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("resources")
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_baseline_archive() -> PathBuf {
    PathBuf::from("baseline/merged.tar")
}

fn default_dependency_cache() -> PathBuf {
    PathBuf::from(".modlane/cache")
}

fn default_descriptors() -> Vec<String> {
    vec!["mod.info".to_string(), "pack.meta".to_string()]
}

impl ProjectConfig {
    /// Load from a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fully qualified name of the generated tags class
    pub fn tags_class_name(&self) -> String {
        self.tags
            .class_name
            .clone()
            .unwrap_or_else(|| format!("{}.Tags", self.project.group))
    }
}
