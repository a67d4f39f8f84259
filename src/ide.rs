//! IDE launch entry generation.
//!
//! Advisory tooling output: four launch entries covering {client, server} x
//! {development, obfuscated}, written as JSON under `runs/`. The launch
//! arguments mirror the active feature flags (core-plugin property, mixin
//! debug switches); runtime-category dependencies are listed for the
//! launcher's classpath. Nothing in the pipeline consumes these files.

use std::io;
use std::path::PathBuf;

use serde::Serialize;

use crate::context::BuildContext;
use crate::deps::Category;

/// Which half of the environment a launch entry starts
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Client,
    Server,
}

/// Which naming scheme the launched environment runs in
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Development,
    Obfuscated,
}

/// One generated launch entry
#[derive(Debug, Clone, Serialize)]
pub struct LaunchEntry {
    pub name: String,
    pub side: Side,
    pub scheme: Scheme,
    pub launch_args: Vec<String>,
    pub runtime_dependencies: Vec<String>,
}

/// Build the four launch entries for the current flags
pub fn launch_entries(ctx: &BuildContext) -> Vec<LaunchEntry> {
    let args = launch_args(ctx);
    let runtime: Vec<String> = ctx
        .dependencies
        .by_category(Category::Runtime)
        .map(|entry| entry.coordinate.to_string())
        .collect();

    let combos = [
        ("1. Run Client", Side::Client, Scheme::Development),
        ("2. Run Server", Side::Server, Scheme::Development),
        ("3. Run Obfuscated Client", Side::Client, Scheme::Obfuscated),
        ("4. Run Obfuscated Server", Side::Server, Scheme::Obfuscated),
    ];

    combos
        .into_iter()
        .map(|(name, side, scheme)| LaunchEntry {
            name: name.to_string(),
            side,
            scheme,
            launch_args: args.clone(),
            runtime_dependencies: runtime.clone(),
        })
        .collect()
}

fn launch_args(ctx: &BuildContext) -> Vec<String> {
    let mut args = vec![format!("-ea:{}", ctx.project.group)];
    if ctx.flags.use_core_mod {
        if let Some(plugin_class) = &ctx.core_plugin_class {
            args.push(format!("-Dcore.plugins.load={plugin_class}"));
        }
    }
    if ctx.flags.use_mixins {
        args.push("-Dmixin.hotSwap=true".to_string());
        args.push("-Dmixin.checks.interfaces=true".to_string());
        args.push("-Dmixin.debug.export=true".to_string());
    }
    args
}

/// Write the launch entries; returns the written paths
pub fn generate_run_configs(ctx: &BuildContext) -> io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&ctx.layout.runs)?;

    let mut written = Vec::new();
    for entry in launch_entries(ctx) {
        let file_name = format!(
            "{}-{}.json",
            match entry.scheme {
                Scheme::Development => "run",
                Scheme::Obfuscated => "run-obf",
            },
            match entry.side {
                Side::Client => "client",
                Side::Server => "server",
            }
        );
        let path = ctx.layout.runs.join(file_name);
        let json = serde_json::to_string_pretty(&entry)?;
        std::fs::write(&path, json)?;
        written.push(path);
    }
    Ok(written)
}
