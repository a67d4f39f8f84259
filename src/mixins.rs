//! Bytecode transformation registration.
//!
//! Active only when the mixin flag is set: the transformation-framework
//! loader is registered as a non-transitive compile and annotation-processing
//! input, and the companion mapping-reference filename is derived from the
//! module identifier for packaging metadata. Manifest attributes are not
//! written here; that belongs to packaging.
//!
//! If the loader cannot be resolved the whole build aborts — there is no
//! partial compile with a missing transformer.

use crate::config::MixinsSection;
use crate::deps::{Category, DependencyEntry, ResolveError};

/// Resolved registration inputs for the transformation framework
#[derive(Debug, Clone)]
pub struct MixinRegistration {
    /// Loader archive, non-transitive, on both the compile and processor paths
    pub loader: DependencyEntry,
    /// Additional annotation processors the framework needs
    pub processors: Vec<DependencyEntry>,
    /// `mixins.<moduleId>.refmap.json`
    pub refmap_name: String,
}

impl MixinRegistration {
    /// Derive the companion mapping-reference filename
    pub fn refmap_name_for(module_id: &str) -> String {
        format!("mixins.{module_id}.refmap.json")
    }

    pub fn from_config(section: &MixinsSection, module_id: &str) -> Result<Self, ResolveError> {
        let loader =
            DependencyEntry::synthetic("mixin-loader", &section.loader, Category::Compile, false)?;

        let processors = section
            .processors
            .iter()
            .enumerate()
            .map(|(index, coordinate)| {
                DependencyEntry::synthetic(
                    &format!("mixin-processor-{index}"),
                    coordinate,
                    Category::AnnotationProcessor,
                    false,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            loader,
            processors,
            refmap_name: Self::refmap_name_for(module_id),
        })
    }

    /// Entries the resolver must materialize before compilation
    pub fn resolution_entries(&self) -> Vec<DependencyEntry> {
        let mut entries = vec![self.loader.clone()];
        entries.extend(self.processors.iter().cloned());
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_section() -> MixinsSection {
        MixinsSection {
            loader: "zone.rong:mixinbooter:8.9".to_string(),
            processors: vec![
                "org.ow2.asm:asm-debug-all:5.2".to_string(),
                "com.google.guava:guava:24.1.1".to_string(),
            ],
        }
    }

    #[test]
    fn test_refmap_name_derivation() {
        assert_eq!(
            MixinRegistration::refmap_name_for("examplemod"),
            "mixins.examplemod.refmap.json"
        );
    }

    #[test]
    fn test_registration_from_config() {
        let reg = MixinRegistration::from_config(&sample_section(), "examplemod").unwrap();

        assert_eq!(reg.refmap_name, "mixins.examplemod.refmap.json");
        assert!(!reg.loader.transitive);
        assert_eq!(reg.loader.category, Category::Compile);
        assert_eq!(reg.processors.len(), 2);
        assert!(reg
            .processors
            .iter()
            .all(|p| p.category == Category::AnnotationProcessor && !p.transitive));
        assert_eq!(reg.resolution_entries().len(), 3);
    }

    #[test]
    fn test_bad_loader_coordinate_fails() {
        let section = MixinsSection {
            loader: "not-a-coordinate".to_string(),
            processors: vec![],
        };
        let err = MixinRegistration::from_config(&section, "examplemod").unwrap_err();
        assert!(matches!(err, ResolveError::BadCoordinate(_)));
    }
}
