//! Symbol mapping tables and class remapping for the modlane build pipeline.
//!
//! The lane compiles module sources against a development naming scheme and
//! ships archives in the target environment's obfuscated scheme. This crate
//! holds the pieces both remap directions share:
//! - the mapping table (`CL:`/`FD:`/`MD:` exchange format, obf -> dev)
//! - access directives parsed from `*_at.cfg` resource files
//! - the class-file rewriter that renames constant-pool symbols and applies
//!   directive access levels
//!
//! Member names are globally unique intermediate names in both schemes, so
//! field and method mappings are plain name -> name entries with no owner
//! resolution. Names absent from the table pass through unchanged.

mod access;
mod class;
mod mapping;

pub use access::{AccessDirective, AccessDirectiveSet, AccessError, AccessLevel, MemberTarget};
pub use class::{ClassError, Remapper};
pub use mapping::{Direction, MappingError, MappingRef, MappingTable};

use thiserror::Error;

/// Errors from remapping operations
#[derive(Debug, Error)]
pub enum RemapError {
    #[error("mapping table error: {0}")]
    Mapping(#[from] MappingError),

    #[error("class parse error: {0}")]
    Class(#[from] ClassError),

    #[error("mapping is not invertible: both {first} and {second} map to {target}")]
    AmbiguousInverse {
        first: String,
        second: String,
        target: String,
    },
}
