//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use modlane::archive::ArchiveWriter;

/// Default property table with every flag off
pub const FLAGS_OFF: &[(&str, &str)] = &[
    ("useCoreMod", "false"),
    ("useMixins", "false"),
    ("useSpark", "false"),
    ("useAccessTransformer", "false"),
    ("includeMod", "false"),
];

/// Write a project config with the given flag values and extra sections.
/// The compiler is a no-op command so compile runs without a toolchain.
pub fn write_config(root: &Path, properties: &[(&str, &str)], extra: &str) {
    let mut text = String::from(
        r#"[project]
module_id = "examplemod"
display_name = "Example Mod"
version = "1.2.0"
group = "com.example"
archive_base = "examplemod"
target_version = "1.12.2"

[properties]
"#,
    );
    for (name, value) in properties {
        text.push_str(&format!("{name} = \"{value}\"\n"));
    }
    text.push_str(
        r#"
[mappings]
channel = "stable"
version = "39"

[compiler]
command = "true"
args = []
"#,
    );
    text.push_str(extra);
    fs::write(root.join("modlane.toml"), text).unwrap();
}

/// Write the mapping table file for the stable-39 ref
pub fn write_mapping(root: &Path, text: &str) {
    let dir = root.join("mappings");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("stable-39.srg"), text).unwrap();
}

/// Write the merged baseline archive from the given entries
pub fn write_baseline(root: &Path, entries: &[(&str, Vec<u8>)]) {
    let path = root.join("baseline/merged.tar");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = ArchiveWriter::new();
    for (name, bytes) in entries {
        writer.add_bytes(name, bytes.clone(), "fixture").unwrap();
    }
    writer.write_to(&path).unwrap();
}

/// Write a resource file under `resources/`
pub fn write_resource(root: &Path, rel: &str, content: &str) {
    let path = root.join("resources").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Minimal valid class file: a constant pool holding only the this/super
/// class names, no members.
pub fn minimal_class(this: &str, superclass: &str) -> Vec<u8> {
    let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
    out.extend_from_slice(&5u16.to_be_bytes());
    out.push(1);
    out.extend_from_slice(&(this.len() as u16).to_be_bytes());
    out.extend_from_slice(this.as_bytes());
    out.push(7);
    out.extend_from_slice(&1u16.to_be_bytes());
    out.push(1);
    out.extend_from_slice(&(superclass.len() as u16).to_be_bytes());
    out.extend_from_slice(superclass.as_bytes());
    out.push(7);
    out.extend_from_slice(&3u16.to_be_bytes());
    out.extend_from_slice(&0x0021u16.to_be_bytes());
    out.extend_from_slice(&2u16.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
    out
}
