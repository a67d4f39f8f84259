//! Access directive files (`*_at.cfg`).
//!
//! Directives widen symbol visibility in the development scheme and must be
//! applied identically by both remap directions, or visibility diverges
//! between the development and distribution artifacts. The set is ordered by
//! collection order and exposes a stable digest so the deobfuscated baseline
//! cache can key on it.
//!
//! Line format, one directive per line (`#` comments, blank lines ignored):
//!
//! ```text
//! public com.example.client.Renderer
//! public-f com.example.client.Renderer renderTicks
//! protected com.example.server.Handler *
//! ```
//!
//! Class names are written dotted; a trailing `-f` strips the final modifier.
//! The member column names a field or method (a method may carry a descriptor
//! suffix, which is ignored for matching), or `*` for every member.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from parsing directive files
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed directive in {path} line {line}: {text:?}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("unknown access level {level:?} in {path} line {line}")]
    UnknownLevel {
        level: String,
        path: PathBuf,
        line: usize,
    },
}

/// Visibility level a directive assigns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Public,
    Protected,
    Private,
}

impl AccessLevel {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "protected" => Some(Self::Protected),
            "private" => Some(Self::Private),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
        }
    }
}

/// Which members of the target class a directive applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberTarget {
    /// Every field and method of the class
    All,
    /// A single field or method by name
    Named(String),
}

/// One parsed directive line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDirective {
    pub level: AccessLevel,
    pub strip_final: bool,
    /// Internal (slash) form of the development-scheme class name
    pub class_name: String,
    /// None targets the class declaration itself
    pub member: Option<MemberTarget>,
}

impl AccessDirective {
    fn parse(path: &Path, line: usize, text: &str) -> Result<Self, AccessError> {
        let mut parts = text.split_whitespace();
        let modifier = parts.next().unwrap_or_default();
        let class = parts.next().ok_or_else(|| AccessError::MalformedLine {
            path: path.to_path_buf(),
            line,
            text: text.to_string(),
        })?;
        let member = parts.next();

        if parts.next().is_some() {
            return Err(AccessError::MalformedLine {
                path: path.to_path_buf(),
                line,
                text: text.to_string(),
            });
        }

        let (level_text, strip_final) = match modifier.strip_suffix("-f") {
            Some(level) => (level, true),
            None => (modifier, false),
        };

        let level = AccessLevel::parse(level_text).ok_or_else(|| AccessError::UnknownLevel {
            level: modifier.to_string(),
            path: path.to_path_buf(),
            line,
        })?;

        let member = member.map(|m| {
            if m == "*" {
                MemberTarget::All
            } else {
                // A method descriptor suffix like `updateLighting(I)V` only
                // matters to the runtime loader; matching is by name.
                let name = m.split('(').next().unwrap_or(m);
                MemberTarget::Named(name.to_string())
            }
        });

        Ok(Self {
            level,
            strip_final,
            class_name: class.replace('.', "/"),
            member,
        })
    }

    fn canonical_line(&self) -> String {
        let mut line = String::new();
        line.push_str(self.level.as_str());
        if self.strip_final {
            line.push_str("-f");
        }
        line.push(' ');
        line.push_str(&self.class_name);
        match &self.member {
            None => {}
            Some(MemberTarget::All) => line.push_str(" *"),
            Some(MemberTarget::Named(name)) => {
                line.push(' ');
                line.push_str(name);
            }
        }
        line
    }

    /// Whether this directive targets the class declaration of `class_name`
    pub fn targets_class(&self, class_name: &str) -> bool {
        self.member.is_none() && self.class_name == class_name
    }

    /// Whether this directive targets the named member of `class_name`
    pub fn targets_member(&self, class_name: &str, member_name: &str) -> bool {
        if self.class_name != class_name {
            return false;
        }
        match &self.member {
            None => false,
            Some(MemberTarget::All) => true,
            Some(MemberTarget::Named(name)) => name == member_name,
        }
    }
}

/// Ordered set of directives collected from `*_at.cfg` files.
///
/// Both remap directions must consume the same set; the digest participates
/// in the baseline cache key so a directive edit invalidates the cache.
#[derive(Debug, Clone, Default)]
pub struct AccessDirectiveSet {
    directives: Vec<AccessDirective>,
    source_files: Vec<PathBuf>,
}

impl AccessDirectiveSet {
    /// An empty set; remapping applies no access changes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the given files in order
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, AccessError> {
        let mut set = Self::default();
        for path in paths {
            set.add_file(path.as_ref())?;
        }
        Ok(set)
    }

    /// Append the directives of one file
    pub fn add_file(&mut self, path: &Path) -> Result<(), AccessError> {
        let text = fs::read_to_string(path).map_err(|source| AccessError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        for (idx, raw) in text.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            self.directives
                .push(AccessDirective::parse(path, idx + 1, trimmed)?);
        }

        self.source_files.push(path.to_path_buf());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn directives(&self) -> &[AccessDirective] {
        &self.directives
    }

    pub fn source_files(&self) -> &[PathBuf] {
        &self.source_files
    }

    /// Stable hex digest over the canonical directive lines, in order
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for directive in &self.directives {
            hasher.update(directive.canonical_line().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}
