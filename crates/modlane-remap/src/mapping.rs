//! Mapping table model and exchange-format parser.
//!
//! A table is identified by a `MappingRef` (channel + version) and stored as
//! a line-oriented file, one entry per line:
//!
//! ```text
//! CL: a com/example/client/Renderer
//! FD: fd_1002_c renderTicks
//! MD: md_2230_a updateLighting
//! ```
//!
//! The left column is always the obfuscated scheme, the right column the
//! development scheme. `invert()` flips the table for the reobfuscation
//! direction and fails if two entries share a target name.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Remapping direction shared by both halves of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Obfuscated scheme -> development scheme (baseline preparation)
    Deobfuscate,
    /// Development scheme -> obfuscated scheme (distribution packaging)
    Reobfuscate,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Deobfuscate => write!(f, "deobfuscate"),
            Direction::Reobfuscate => write!(f, "reobfuscate"),
        }
    }
}

/// Identifies which mapping table a build uses. Immutable for a given build;
/// both remap directions must see the same ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRef {
    /// Mapping channel (e.g. "stable")
    pub channel: String,
    /// Version within the channel
    pub version: String,
}

impl MappingRef {
    pub fn new(channel: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            version: version.into(),
        }
    }

    /// File name of the table inside the mappings cache directory
    pub fn file_name(&self) -> String {
        format!("{}-{}.srg", self.channel, self.version)
    }
}

impl std::fmt::Display for MappingRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.channel, self.version)
    }
}

/// Errors from loading or parsing mapping tables
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("I/O error reading mapping table: {0}")]
    Io(#[from] io::Error),

    #[error("malformed mapping line {line}: {text:?}")]
    MalformedLine { line: usize, text: String },

    #[error("unknown record kind {kind:?} on line {line}")]
    UnknownKind { kind: String, line: usize },

    #[error("duplicate mapping for {name:?}: {first:?} and {second:?}")]
    Duplicate {
        name: String,
        first: String,
        second: String,
    },
}

/// Symbol mapping table, oriented obfuscated -> development.
///
/// Lookups that miss pass through: the remapper leaves the symbol unchanged.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    classes: BTreeMap<String, String>,
    fields: BTreeMap<String, String>,
    methods: BTreeMap<String, String>,
}

impl MappingTable {
    /// Create an empty table. Remapping with it is a pass-through.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a table from its exchange-format file
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse exchange-format text
    pub fn parse(text: &str) -> Result<Self, MappingError> {
        let mut table = Self::default();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut parts = trimmed.split_whitespace();
            let kind = parts.next().unwrap_or_default();
            let from = parts.next();
            let to = parts.next();

            let (from, to) = match (from, to) {
                (Some(f), Some(t)) if parts.next().is_none() => (f, t),
                _ => {
                    return Err(MappingError::MalformedLine {
                        line,
                        text: raw.to_string(),
                    })
                }
            };

            let map = match kind {
                "CL:" => &mut table.classes,
                "FD:" => &mut table.fields,
                "MD:" => &mut table.methods,
                other => {
                    return Err(MappingError::UnknownKind {
                        kind: other.to_string(),
                        line,
                    })
                }
            };

            if let Some(prev) = map.insert(from.to_string(), to.to_string()) {
                if prev != to {
                    return Err(MappingError::Duplicate {
                        name: from.to_string(),
                        first: prev,
                        second: to.to_string(),
                    });
                }
            }
        }

        Ok(table)
    }

    /// Invert the table for the reobfuscation direction.
    ///
    /// Returns the colliding names if two entries share a target, since an
    /// ambiguous inverse cannot produce a well-defined obfuscated archive.
    pub fn invert(&self) -> Result<MappingTable, crate::RemapError> {
        fn invert_map(
            map: &BTreeMap<String, String>,
        ) -> Result<BTreeMap<String, String>, crate::RemapError> {
            let mut out = BTreeMap::new();
            for (from, to) in map {
                if let Some(prev) = out.insert(to.clone(), from.clone()) {
                    return Err(crate::RemapError::AmbiguousInverse {
                        first: prev,
                        second: from.clone(),
                        target: to.clone(),
                    });
                }
            }
            Ok(out)
        }

        Ok(MappingTable {
            classes: invert_map(&self.classes)?,
            fields: invert_map(&self.fields)?,
            methods: invert_map(&self.methods)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.fields.is_empty() && self.methods.is_empty()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Map a plain internal class name (`com/example/Foo`), passing through
    /// names without an entry.
    pub fn map_class<'a>(&'a self, name: &'a str) -> &'a str {
        self.classes.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn map_field<'a>(&'a self, name: &'a str) -> &'a str {
        self.fields.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn map_method<'a>(&'a self, name: &'a str) -> &'a str {
        self.methods.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Map a class-constant name, which may be an array type like `[[La/b;`
    pub fn map_class_constant(&self, name: &str) -> String {
        if let Some(stripped) = name.strip_prefix('[') {
            return format!("[{}", self.map_class_constant(stripped));
        }
        if let Some(inner) = name.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
            return format!("L{};", self.map_class(inner));
        }
        self.map_class(name).to_string()
    }

    /// Rewrite class names embedded in a field/method descriptor
    pub fn map_descriptor(&self, desc: &str) -> String {
        let mut out = String::with_capacity(desc.len());
        let mut rest = desc;

        while let Some(start) = rest.find('L') {
            match rest[start..].find(';') {
                Some(end) => {
                    out.push_str(&rest[..start + 1]);
                    let name = &rest[start + 1..start + end];
                    out.push_str(self.map_class(name));
                    out.push(';');
                    rest = &rest[start + end + 1..];
                }
                None => break,
            }
        }
        out.push_str(rest);
        out
    }
}
