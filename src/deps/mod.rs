//! Dependency declarations and repository resolution.
//!
//! Declarations partition into four categories: compile-only,
//! annotation-processing, runtime-only, and embed (physically merged into
//! the output archive at packaging time). Resolution copies artifacts from
//! declared repository directories into the locked local cache; independent
//! resolutions run concurrently and each applies a bounded deadline.

mod cache;

pub use cache::{CacheLock, LockError};

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{DependencySection, RepositorySection};

/// Default per-artifact resolution deadline
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Dependency category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Compile classpath only
    #[default]
    Compile,
    /// Annotation-processor path
    AnnotationProcessor,
    /// Runtime classpath only (launch configurations)
    Runtime,
    /// Merged into the output archive at packaging time
    Embed,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Compile => write!(f, "compile"),
            Category::AnnotationProcessor => write!(f, "annotation-processor"),
            Category::Runtime => write!(f, "runtime"),
            Category::Embed => write!(f, "embed"),
        }
    }
}

/// Errors from dependency resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed coordinate {0:?} (expected group:artifact:version)")]
    BadCoordinate(String),

    #[error("dependency {name:?} ({coordinate}) not found in any declared repository")]
    NotFound { name: String, coordinate: String },

    #[error("resolution of {name:?} timed out after {elapsed:?}")]
    Timeout { name: String, elapsed: Duration },

    #[error("cache lock: {0}")]
    Lock(#[from] LockError),

    #[error("I/O error resolving {name:?}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// `group:artifact:version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl FromStr for Coordinate {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(group), Some(artifact), Some(version), None)
                if !group.is_empty() && !artifact.is_empty() && !version.is_empty() =>
            {
                Ok(Self {
                    group: group.to_string(),
                    artifact: artifact.to_string(),
                    version: version.to_string(),
                })
            }
            _ => Err(ResolveError::BadCoordinate(s.to_string())),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

impl Coordinate {
    /// Repository-relative path of the artifact archive
    pub fn rel_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for part in self.group.split('.') {
            path.push(part);
        }
        path.push(&self.artifact);
        path.push(&self.version);
        path.push(format!("{}-{}.tar", self.artifact, self.version));
        path
    }

    /// Repository-relative path when the artifact is an exploded directory
    pub fn rel_dir(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for part in self.group.split('.') {
            path.push(part);
        }
        path.push(&self.artifact);
        path.push(&self.version);
        path.push(format!("{}-{}", self.artifact, self.version));
        path
    }
}

/// One declared dependency with a parsed coordinate
#[derive(Debug, Clone)]
pub struct DependencyEntry {
    pub name: String,
    pub coordinate: Coordinate,
    pub category: Category,
    pub transitive: bool,
}

impl DependencyEntry {
    pub fn from_section(section: &DependencySection) -> Result<Self, ResolveError> {
        Ok(Self {
            name: section.name.clone(),
            coordinate: section.coordinate.parse()?,
            category: section.category,
            transitive: section.transitive,
        })
    }

    /// Synthesize an entry that is not part of the declared set (the mixin
    /// loader registers itself this way).
    pub fn synthetic(
        name: &str,
        coordinate: &str,
        category: Category,
        transitive: bool,
    ) -> Result<Self, ResolveError> {
        Ok(Self {
            name: name.to_string(),
            coordinate: coordinate.parse()?,
            category,
            transitive,
        })
    }

    /// Cache location of the resolved archive
    pub fn cache_path(&self, cache_root: &Path) -> PathBuf {
        cache_root.join(self.coordinate.rel_path())
    }
}

/// The declared dependency set of one build
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    entries: Vec<DependencyEntry>,
}

impl DependencySet {
    pub fn from_sections(sections: &[DependencySection]) -> Result<Self, ResolveError> {
        let entries = sections
            .iter()
            .map(DependencyEntry::from_section)
            .collect::<Result<_, _>>()?;
        Ok(Self { entries })
    }

    pub fn push(&mut self, entry: DependencyEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[DependencyEntry] {
        &self.entries
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &DependencyEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.category == category)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resolved dependency: declaration plus the on-disk location
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub name: String,
    pub category: Category,
    pub transitive: bool,
    /// Archive file in the cache, or an exploded directory served from the
    /// repository in place
    pub path: PathBuf,
}

/// Resolves declared dependencies against declared repositories.
pub struct Resolver {
    repositories: Vec<RepositorySection>,
    cache_root: PathBuf,
    timeout: Duration,
    verbose: bool,
}

impl Resolver {
    pub fn new(repositories: &[RepositorySection], cache_root: &Path) -> Self {
        Self {
            repositories: repositories.to_vec(),
            cache_root: cache_root.to_path_buf(),
            timeout: DEFAULT_RESOLVE_TIMEOUT,
            verbose: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Resolve every entry, independent entries concurrently.
    ///
    /// The first failure is reported after all in-flight resolutions have
    /// joined; the cache never holds a partially copied artifact.
    pub fn resolve_all(
        &self,
        entries: &[DependencyEntry],
    ) -> Result<Vec<ResolvedDependency>, ResolveError> {
        let results: Vec<Result<ResolvedDependency, ResolveError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = entries
                .iter()
                .map(|entry| scope.spawn(move || self.resolve_one(entry)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(_) => Err(ResolveError::Io {
                        name: "<resolver thread>".to_string(),
                        source: io::Error::other("resolver worker panicked"),
                    }),
                })
                .collect()
        });

        results.into_iter().collect()
    }

    /// Resolve a single entry: cache hit, exploded repository directory, or
    /// a locked copy of the repository archive into the cache.
    pub fn resolve_one(&self, entry: &DependencyEntry) -> Result<ResolvedDependency, ResolveError> {
        let started = Instant::now();
        let cached = entry.cache_path(&self.cache_root);

        if cached.is_file() {
            return Ok(self.resolved(entry, cached));
        }

        for repo in &self.repositories {
            let dir_candidate = repo.path.join(entry.coordinate.rel_dir());
            if dir_candidate.is_dir() {
                return Ok(self.resolved(entry, dir_candidate));
            }

            let file_candidate = repo.path.join(entry.coordinate.rel_path());
            if file_candidate.is_file() {
                self.copy_into_cache(entry, &file_candidate, &cached, started)?;
                return Ok(self.resolved(entry, cached));
            }
        }

        Err(ResolveError::NotFound {
            name: entry.name.clone(),
            coordinate: entry.coordinate.to_string(),
        })
    }

    /// Locate an entry without writing to the cache: the cached copy wins,
    /// then exploded repository directories, then repository archives read
    /// in place.
    pub fn locate(&self, entry: &DependencyEntry) -> Result<PathBuf, ResolveError> {
        let cached = entry.cache_path(&self.cache_root);
        if cached.is_file() {
            return Ok(cached);
        }
        for repo in &self.repositories {
            let dir_candidate = repo.path.join(entry.coordinate.rel_dir());
            if dir_candidate.is_dir() {
                return Ok(dir_candidate);
            }
            let file_candidate = repo.path.join(entry.coordinate.rel_path());
            if file_candidate.is_file() {
                return Ok(file_candidate);
            }
        }
        Err(ResolveError::NotFound {
            name: entry.name.clone(),
            coordinate: entry.coordinate.to_string(),
        })
    }

    fn resolved(&self, entry: &DependencyEntry, path: PathBuf) -> ResolvedDependency {
        if self.verbose {
            eprintln!("[deps] {} -> {}", entry.name, path.display());
        }
        ResolvedDependency {
            name: entry.name.clone(),
            category: entry.category,
            transitive: entry.transitive,
            path,
        }
    }

    fn copy_into_cache(
        &self,
        entry: &DependencyEntry,
        source: &Path,
        target: &Path,
        started: Instant,
    ) -> Result<(), ResolveError> {
        let remaining = self
            .timeout
            .checked_sub(started.elapsed())
            .ok_or_else(|| ResolveError::Timeout {
                name: entry.name.clone(),
                elapsed: started.elapsed(),
            })?;

        let target_dir = target.parent().expect("cache path has a parent");
        let _lock = CacheLock::acquire(target_dir, remaining)?;

        // Another resolver may have won the race while we waited
        if target.is_file() {
            return Ok(());
        }

        let temp = target_dir.join(format!(
            ".{}.part",
            target.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
        ));
        let io_err = |source| ResolveError::Io {
            name: entry.name.clone(),
            source,
        };
        fs::copy(source, &temp).map_err(io_err)?;
        fs::rename(&temp, target).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn section(name: &str, coordinate: &str, category: Category) -> DependencySection {
        DependencySection {
            name: name.to_string(),
            coordinate: coordinate.to_string(),
            category,
            transitive: true,
            when: None,
        }
    }

    fn seed_repo(repo: &Path, coordinate: &str, content: &[u8]) {
        let coord: Coordinate = coordinate.parse().unwrap();
        let path = repo.join(coord.rel_path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn resolver(temp: &TempDir) -> (Resolver, PathBuf) {
        let repo = temp.path().join("repo");
        let cache = temp.path().join("cache");
        fs::create_dir_all(&repo).unwrap();
        let resolver = Resolver::new(
            &[RepositorySection {
                name: "local".to_string(),
                path: repo.clone(),
            }],
            &cache,
        );
        (resolver, repo)
    }

    #[test]
    fn test_coordinate_parse() {
        let coord: Coordinate = "com.example:widget:1.0".parse().unwrap();
        assert_eq!(coord.group, "com.example");
        assert_eq!(
            coord.rel_path(),
            PathBuf::from("com/example/widget/1.0/widget-1.0.tar")
        );
        assert!(matches!(
            "no-colons".parse::<Coordinate>(),
            Err(ResolveError::BadCoordinate(_))
        ));
        assert!(matches!(
            "a::1.0".parse::<Coordinate>(),
            Err(ResolveError::BadCoordinate(_))
        ));
    }

    #[test]
    fn test_resolve_copies_into_cache() {
        let temp = TempDir::new().unwrap();
        let (resolver, repo) = resolver(&temp);
        seed_repo(&repo, "com.example:widget:1.0", b"archive-bytes");

        let entry =
            DependencyEntry::from_section(&section("widget", "com.example:widget:1.0", Category::Compile))
                .unwrap();
        let resolved = resolver.resolve_one(&entry).unwrap();

        assert!(resolved.path.starts_with(temp.path().join("cache")));
        assert_eq!(fs::read(&resolved.path).unwrap(), b"archive-bytes");

        // Second resolution is a cache hit even with the repository gone
        fs::remove_dir_all(&repo).unwrap();
        let again = resolver.resolve_one(&entry).unwrap();
        assert_eq!(again.path, resolved.path);
    }

    #[test]
    fn test_resolve_directory_served_in_place() {
        let temp = TempDir::new().unwrap();
        let (resolver, repo) = resolver(&temp);
        let coord: Coordinate = "com.example:assets:2.0".parse().unwrap();
        let dir = repo.join(coord.rel_dir());
        fs::create_dir_all(dir.join("data")).unwrap();
        fs::write(dir.join("data/a.txt"), b"x").unwrap();

        let entry =
            DependencyEntry::from_section(&section("assets", "com.example:assets:2.0", Category::Embed))
                .unwrap();
        let resolved = resolver.resolve_one(&entry).unwrap();
        assert!(resolved.path.is_dir());
        assert_eq!(resolved.path, dir);
    }

    #[test]
    fn test_resolve_missing_fails() {
        let temp = TempDir::new().unwrap();
        let (resolver, _repo) = resolver(&temp);

        let entry =
            DependencyEntry::from_section(&section("ghost", "com.example:ghost:0.1", Category::Compile))
                .unwrap();
        let err = resolver.resolve_one(&entry).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { name, .. } if name == "ghost"));
    }

    #[test]
    fn test_resolve_all_concurrent() {
        let temp = TempDir::new().unwrap();
        let (resolver, repo) = resolver(&temp);
        for i in 0..4 {
            seed_repo(&repo, &format!("com.example:dep{i}:1.0"), b"bytes");
        }

        let entries: Vec<DependencyEntry> = (0..4)
            .map(|i| {
                DependencyEntry::from_section(&section(
                    &format!("dep{i}"),
                    &format!("com.example:dep{i}:1.0"),
                    Category::Compile,
                ))
                .unwrap()
            })
            .collect();

        let resolved = resolver.resolve_all(&entries).unwrap();
        assert_eq!(resolved.len(), 4);
        assert!(resolved.iter().all(|r| r.path.is_file()));
    }

    #[test]
    fn test_locate_reads_repository_in_place() {
        let temp = TempDir::new().unwrap();
        let (resolver, repo) = resolver(&temp);
        seed_repo(&repo, "com.example:widget:1.0", b"archive-bytes");

        let entry =
            DependencyEntry::from_section(&section("widget", "com.example:widget:1.0", Category::Compile))
                .unwrap();

        // Without a prior resolution the repository archive is used directly
        let located = resolver.locate(&entry).unwrap();
        assert!(located.starts_with(&repo));

        // After resolution the cached copy wins
        let resolved = resolver.resolve_one(&entry).unwrap();
        let located = resolver.locate(&entry).unwrap();
        assert_eq!(located, resolved.path);
        assert!(located.starts_with(temp.path().join("cache")));
    }

    #[test]
    fn test_category_partition() {
        let sections = vec![
            section("a", "g:a:1", Category::Compile),
            section("b", "g:b:1", Category::Embed),
            section("c", "g:c:1", Category::Runtime),
            section("d", "g:d:1", Category::AnnotationProcessor),
            section("e", "g:e:1", Category::Embed),
        ];
        let set = DependencySet::from_sections(&sections).unwrap();
        assert_eq!(set.by_category(Category::Embed).count(), 2);
        assert_eq!(set.by_category(Category::Compile).count(), 1);
        assert_eq!(set.entries().len(), 5);
    }
}
