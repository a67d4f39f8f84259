//! Build-time tag injection.
//!
//! Generates a constants class from project metadata so compiled code can
//! reference the version, module id, and display name without hand edits.
//! The file lands in the generated-sources directory and joins the normal
//! compile inputs. Writing is skipped when the content is unchanged so the
//! incremental compile digest stays stable.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::context::BuildContext;

/// Errors from tag generation
#[derive(Debug, Error)]
pub enum TagsError {
    #[error("I/O error writing tags class: {0}")]
    Io(#[from] io::Error),

    #[error("invalid tags class name {0:?}")]
    BadClassName(String),
}

/// Generate the tags class; returns the written (or up-to-date) file path
pub fn inject_tags(ctx: &BuildContext) -> Result<PathBuf, TagsError> {
    let (package, class) = split_class_name(&ctx.tags_class_name)?;

    let mut path = ctx.layout.generated.clone();
    if let Some(package) = package {
        for part in package.split('.') {
            path.push(part);
        }
    }
    fs::create_dir_all(&path)?;
    path.push(format!("{class}.java"));

    let content = render(ctx, package, class);
    let unchanged = fs::read_to_string(&path)
        .map(|existing| existing == content)
        .unwrap_or(false);
    if !unchanged {
        fs::write(&path, content)?;
    }

    if ctx.verbose {
        eprintln!("[tags] {}", path.display());
    }
    Ok(path)
}

fn split_class_name(name: &str) -> Result<(Option<&str>, &str), TagsError> {
    if name.is_empty() || name.ends_with('.') || name.starts_with('.') {
        return Err(TagsError::BadClassName(name.to_string()));
    }
    match name.rsplit_once('.') {
        Some((package, class)) if !class.is_empty() => Ok((Some(package), class)),
        Some(_) => Err(TagsError::BadClassName(name.to_string())),
        None => Ok((None, name)),
    }
}

fn render(ctx: &BuildContext, package: Option<&str>, class: &str) -> String {
    let mut out = String::new();
    out.push_str("// Generated at build time; do not edit.\n");
    if let Some(package) = package {
        out.push_str(&format!("package {package};\n\n"));
    }
    out.push_str(&format!("public final class {class} {{\n"));
    push_constant(&mut out, "VERSION", &ctx.version);
    push_constant(&mut out, "MOD_ID", &ctx.project.module_id);
    push_constant(&mut out, "NAME", &ctx.project.display_name);
    for (key, value) in &ctx.tags_extra {
        push_constant(&mut out, key, value);
    }
    out.push_str(&format!("\n    private {class}() {{}}\n}}\n"));
    out
}

fn push_constant(out: &mut String, name: &str, value: &str) {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    out.push_str(&format!(
        "    public static final String {name} = \"{escaped}\";\n"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::context::Goal;
    use tempfile::TempDir;

    fn context(temp: &TempDir, extra: &str) -> BuildContext {
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
        let config: ProjectConfig = toml::from_str(&text).unwrap();
        BuildContext::prepare(&config, temp.path(), Goal::InjectTags, false).unwrap()
    }

    #[test]
    fn test_generates_constants_class() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "");

        let path = inject_tags(&ctx).unwrap();
        assert!(path.ends_with("build/generated/com/example/Tags.java"));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("package com.example;"));
        assert!(content.contains("public final class Tags {"));
        assert!(content.contains("VERSION = \"1.2.0\""));
        assert!(content.contains("MOD_ID = \"examplemod\""));
        assert!(content.contains("NAME = \"Example Mod\""));
    }

    #[test]
    fn test_extra_constants_and_custom_class() {
        let temp = TempDir::new().unwrap();
        let ctx = context(
            &temp,
            "[tags]\nclass_name = \"com.example.internal.Reference\"\n\n[tags.extra]\nCHANNEL = \"beta\"\n",
        );

        let path = inject_tags(&ctx).unwrap();
        assert!(path.ends_with("com/example/internal/Reference.java"));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("class Reference"));
        assert!(content.contains("CHANNEL = \"beta\""));
    }

    #[test]
    fn test_rewrite_skipped_when_unchanged() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "");

        let path = inject_tags(&ctx).unwrap();
        let first = fs::metadata(&path).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        inject_tags(&ctx).unwrap();
        let second = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_quote_escaping() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp, "");
        ctx.project.display_name = "Example \"Quoted\" Mod".to_string();

        let path = inject_tags(&ctx).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains(r#"NAME = "Example \"Quoted\" Mod""#));
    }

    #[test]
    fn test_bad_class_name() {
        let err = split_class_name("com.example.").unwrap_err();
        assert!(matches!(err, TagsError::BadClassName(_)));
        assert_eq!(split_class_name("Tags").unwrap(), (None, "Tags"));
    }
}
