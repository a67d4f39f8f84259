//! Symbol round-trip law: deobfuscating the baseline and reobfuscating a
//! package built against it restores every originally obfuscated name.

mod common;

use std::fs;

use tempfile::TempDir;

use common::{minimal_class, write_baseline, write_config, write_mapping, write_resource, FLAGS_OFF};
use modlane::archive::{read_entries, ArchiveWriter};
use modlane::context::Goal;
use modlane::remap::{baseline_dev_path, RemapPipeline};
use modlane::{BuildPipeline, CancelFlag};

const MAPPING: &str = "\
CL: a com/example/client/Renderer
CL: b com/example/server/Handler
";

fn prepared(temp: &TempDir) -> modlane::BuildContext {
    write_config(temp.path(), FLAGS_OFF, "");
    write_mapping(temp.path(), MAPPING);
    BuildPipeline::new(temp.path())
        .load_context(Goal::Package)
        .unwrap()
}

#[test]
fn round_trip_restores_obfuscated_names() {
    let temp = TempDir::new().unwrap();

    let obf_entries = vec![
        ("a.class", minimal_class("a", "java/lang/Object")),
        ("b.class", minimal_class("b", "a")),
        ("unmapped/Kept.class", minimal_class("unmapped/Kept", "a")),
        ("assets/table.bin", b"\x01\x02\x03".to_vec()),
    ];
    write_baseline(temp.path(), &obf_entries);
    let ctx = prepared(&temp);

    // Deobfuscate the baseline into the development scheme
    let pipeline = RemapPipeline::load(&ctx).unwrap();
    let dev_baseline = pipeline.deobfuscate_baseline().unwrap();
    let dev_entries = read_entries(&dev_baseline).unwrap();
    let dev_paths: Vec<_> = dev_entries.iter().map(|(p, _)| p.as_str()).collect();
    assert!(dev_paths.contains(&"com/example/client/Renderer.class"));
    assert!(dev_paths.contains(&"com/example/server/Handler.class"));
    assert!(dev_paths.contains(&"unmapped/Kept.class"));

    // Package the development-scheme entries as the module archive
    let mut dev_archive = ArchiveWriter::new();
    for (path, bytes) in &dev_entries {
        dev_archive.add_bytes(path, bytes.clone(), "dev").unwrap();
    }
    dev_archive.write_to(&ctx.dev_archive_path()).unwrap();

    // Reobfuscate and compare against the original baseline, entry by entry
    let dist = pipeline.reobfuscate().unwrap();
    let mut dist_entries = read_entries(&dist).unwrap();
    dist_entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut original = obf_entries.clone();
    original.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(dist_entries.len(), original.len());
    for ((dist_path, dist_bytes), (orig_path, orig_bytes)) in
        dist_entries.iter().zip(original.iter())
    {
        assert_eq!(dist_path, orig_path);
        assert_eq!(dist_bytes, orig_bytes, "bytes diverged for {orig_path}");
    }
}

#[test]
fn directive_set_shared_between_directions() {
    let temp = TempDir::new().unwrap();

    write_baseline(
        temp.path(),
        &[("a.class", minimal_class("a", "java/lang/Object"))],
    );
    // The fixture class is public; a protected directive visibly changes
    // its access flags in both directions
    write_resource(
        temp.path(),
        "example_at.cfg",
        "protected com.example.client.Renderer\n",
    );

    let properties = &[
        ("useCoreMod", "false"),
        ("useMixins", "false"),
        ("useSpark", "false"),
        ("useAccessTransformer", "true"),
        ("includeMod", "false"),
    ];
    write_config(temp.path(), properties, "");
    write_mapping(temp.path(), MAPPING);
    let ctx = BuildPipeline::new(temp.path())
        .load_context(Goal::Package)
        .unwrap();
    assert_eq!(ctx.directives.len(), 1);

    let pipeline = RemapPipeline::load(&ctx).unwrap();
    let dev_baseline = pipeline.deobfuscate_baseline().unwrap();
    let dev_entries = read_entries(&dev_baseline).unwrap();

    // The adjusted class keeps its directive access through the return
    // direction
    let (_, dev_bytes) = dev_entries
        .iter()
        .find(|(p, _)| p == "com/example/client/Renderer.class")
        .unwrap();

    let mut dev_archive = ArchiveWriter::new();
    dev_archive
        .add_bytes("com/example/client/Renderer.class", dev_bytes.clone(), "dev")
        .unwrap();
    dev_archive.write_to(&ctx.dev_archive_path()).unwrap();

    let dist = pipeline.reobfuscate().unwrap();
    let dist_entries = read_entries(&dist).unwrap();
    assert_eq!(dist_entries[0].0, "a.class");

    // The name round-trips but the access flags carry the directive, so the
    // distribution bytes differ from the untouched original
    let original = minimal_class("a", "java/lang/Object");
    assert_ne!(dist_entries[0].1, original, "directive must alter access flags");
}

#[test]
fn empty_mapping_table_passes_directive_covered_symbols_through() {
    let temp = TempDir::new().unwrap();

    write_baseline(
        temp.path(),
        &[("plain/Widget.class", minimal_class("plain/Widget", "java/lang/Object"))],
    );
    write_resource(temp.path(), "example_at.cfg", "public plain.Widget\n");

    let properties = &[
        ("useCoreMod", "false"),
        ("useMixins", "false"),
        ("useSpark", "false"),
        ("useAccessTransformer", "true"),
        ("includeMod", "false"),
    ];
    write_config(temp.path(), properties, "");
    // Zero entries for the directive-covered symbol
    write_mapping(temp.path(), "# empty\n");

    let ctx = BuildPipeline::new(temp.path())
        .load_context(Goal::Package)
        .unwrap();
    let pipeline = RemapPipeline::load(&ctx).unwrap();
    let dev_baseline = pipeline.deobfuscate_baseline().unwrap();
    let dev_entries = read_entries(&dev_baseline).unwrap();
    assert_eq!(dev_entries[0].0, "plain/Widget.class");

    let mut dev_archive = ArchiveWriter::new();
    dev_archive
        .add_bytes(&dev_entries[0].0, dev_entries[0].1.clone(), "dev")
        .unwrap();
    dev_archive.write_to(&ctx.dev_archive_path()).unwrap();

    // Pass-through distribution archive, not a failure
    let dist = pipeline.reobfuscate().unwrap();
    let dist_entries = read_entries(&dist).unwrap();
    assert_eq!(dist_entries[0].0, "plain/Widget.class");
}

#[test]
fn baseline_cache_reused_across_invocations() {
    let temp = TempDir::new().unwrap();
    write_baseline(
        temp.path(),
        &[("a.class", minimal_class("a", "java/lang/Object"))],
    );
    let ctx = prepared(&temp);

    let pipeline = BuildPipeline::new(temp.path());
    pipeline
        .run(Goal::DeobfuscateBaseline, &CancelFlag::new())
        .unwrap();

    let dev = baseline_dev_path(&ctx);
    let first_mtime = fs::metadata(&dev).unwrap().modified().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));
    pipeline
        .run(Goal::DeobfuscateBaseline, &CancelFlag::new())
        .unwrap();
    let second_mtime = fs::metadata(&dev).unwrap().modified().unwrap();
    assert_eq!(first_mtime, second_mtime, "cached baseline must be reused");
}
