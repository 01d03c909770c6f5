#![cfg(feature = "cli")]

use std::{fs, path::Path};

use espmap::{
    cli::{
        config::{ReconConfig, ReportConfig},
        recon::{build_bundle, primary_app, ReconOptions, ReconOutcome},
        report::render,
    },
    Error, FirmwareMap,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

mod common;

use common::*;

fn recon_options(dir: &TempDir) -> ReconOptions {
    ReconOptions::new(dir.path().join("bundle"), &ReconConfig::default())
}

#[test]
fn report_describes_the_dump() {
    let data = merged_dump();
    let map = FirmwareMap::discover(&data);

    let report = render(Path::new("dump.bin"), &data, &map, &ReportConfig::default());

    assert!(report.contains("Input file: dump.bin"));
    assert!(report.contains("Bootloader image:"));
    assert!(report.contains("Partition table @ 0x00008000"));
    assert!(report.contains("nvs"));
    assert!(report.contains("app0 @ 0x00010000:"));
    assert!(report.contains("  chip:        ESP32-S3"));
    assert!(report.contains("  spi mode:    DIO"));
    assert!(report.contains("(valid)"));
    assert!(!report.contains("MISMATCH"));
    assert!(report.contains("Declared flash span:   0x00020000"));
    assert!(report.contains("trimmed merged image"));
    assert!(report.contains("esp-idf: v5.1.2 Compiled Jan 12 2024 10:11:12"));
}

#[test]
fn report_flags_corrupted_checksums() {
    let mut data = merged_dump();
    // First payload byte of the bootloader's first segment
    data[24 + 8] ^= 0xFF;
    let map = FirmwareMap::discover(&data);

    let report = render(Path::new("dump.bin"), &data, &map, &ReportConfig::default());

    assert!(report.contains("(MISMATCH)"));
}

#[test]
fn report_without_a_partition_table() {
    let data = Flash::new().place(0x0, &bootloader()).pad_to(0x1000).build();
    let map = FirmwareMap::discover(&data);

    let report = render(Path::new("boot.bin"), &data, &map, &ReportConfig::default());

    assert!(report.contains("Partition table: not detected"));
    assert!(report.contains("Missing tail in file:  none"));
    assert!(!report.contains("Application images"));
}

#[test]
fn bundle_contains_every_piece() {
    let dir = tempfile::tempdir().unwrap();
    let data = merged_dump();
    let map = FirmwareMap::discover(&data);
    let options = recon_options(&dir);
    let out = &options.out_dir;

    let summary = build_bundle(Path::new("dump.bin"), &data, &map, &options).unwrap();
    assert_eq!(summary.outcome, ReconOutcome::Complete);

    assert_eq!(fs::read(out.join("bootloader.bin")).unwrap(), bootloader());
    assert_eq!(
        fs::read(out.join("partitions.bin")).unwrap(),
        &data[0x8000..0x9000]
    );
    assert_eq!(fs::read(out.join("app0.bin")).unwrap(), application());

    for segment in [
        "seg0_0x3C020020.bin",
        "seg1_0x40370000.bin",
        "seg2_0x42000020.bin",
    ] {
        assert!(out.join("segments").join(segment).is_file(), "{segment}");
    }
    assert_eq!(
        fs::read(out.join("segments").join("seg1_0x40370000.bin")).unwrap(),
        [0x36, 0x41, 0x00, 0x1D, 0xF0, 0x00, 0x00, 0x00]
    );

    let strings = fs::read_to_string(out.join("strings_index.txt")).unwrap();
    assert!(strings.starts_with("# Strings"));
    assert!(strings.contains("0x00000030 0x3C020050 Firmware Version 1.4.0\n"));

    let anchors = fs::read_to_string(out.join("behavior_anchors.txt")).unwrap();
    assert_eq!(
        anchors,
        "# Behavior anchors\n0x3C020050 Firmware Version 1.4.0\n"
    );

    let recon_summary = fs::read_to_string(out.join("RECON_SUMMARY.txt")).unwrap();
    assert!(recon_summary.starts_with("Input: dump.bin\n"));
    assert!(recon_summary.contains("app0.bin: offset=0x00010000"));
    assert!(recon_summary.contains("segment 2: "));
    assert_eq!(recon_summary.lines().count(), summary.lines.len());
}

#[test]
fn bundle_prefers_the_configured_app() {
    let data = Flash::new()
        .place(0x0, &bootloader())
        .place(
            0x8000,
            &table(&[
                partition(APP_TYPE, 0x10, 0x1_0000, 0x1_0000, "ota_0"),
                partition(APP_TYPE, 0x11, 0x2_0000, 0x1_0000, "app0"),
            ]),
        )
        .place(0x1_0000, &application())
        .place(0x2_0000, &application())
        .build();
    let map = FirmwareMap::discover(&data);

    let (entry, _) = primary_app(&map, "app0").unwrap();
    assert_eq!(entry.label(), "app0");

    let (entry, _) = primary_app(&map, "factory").unwrap();
    assert_eq!(entry.label(), "ota_0");
}

#[test]
fn bundle_stops_without_a_partition_table() {
    let dir = tempfile::tempdir().unwrap();
    let data = Flash::new().place(0x0, &bootloader()).pad_to(0x1000).build();
    let map = FirmwareMap::discover(&data);
    let options = recon_options(&dir);

    let summary = build_bundle(Path::new("boot.bin"), &data, &map, &options).unwrap();

    assert_eq!(summary.outcome, ReconOutcome::NoPartitionTable);
    assert!(options.out_dir.join("bootloader.bin").is_file());
    assert!(!options.out_dir.join("partitions.bin").exists());

    let recon_summary = fs::read_to_string(options.out_dir.join("RECON_SUMMARY.txt")).unwrap();
    assert!(recon_summary.ends_with("partition table: not found\n"));
}

#[test]
fn bundle_stops_without_an_app_image() {
    let dir = tempfile::tempdir().unwrap();
    let data = Flash::new()
        .place(0x0, &bootloader())
        .place(
            0x8000,
            &table(&[partition(APP_TYPE, 0x10, 0x1_0000, 0x1_0000, "app0")]),
        )
        .build();
    let map = FirmwareMap::discover(&data);
    let options = recon_options(&dir);

    let summary = build_bundle(Path::new("dump.bin"), &data, &map, &options).unwrap();

    assert_eq!(summary.outcome, ReconOutcome::NoAppImage);
    assert!(options.out_dir.join("partitions.bin").is_file());
    assert!(!options.out_dir.join("segments").exists());
}

#[test]
fn report_on_a_shorter_buffer_skips_integrity_checks() {
    let data = merged_dump();
    let map = FirmwareMap::discover(&data);
    let short = &data[..0x8000];

    let report = render(Path::new("dump.bin"), short, &map, &ReportConfig::default());

    assert!(report.contains("Partition table @ 0x00008000"));
    assert!(!report.contains("MISMATCH"));
}

#[test]
fn bundle_rejects_data_the_map_was_not_decoded_from() {
    let dir = tempfile::tempdir().unwrap();
    let data = merged_dump();
    let map = FirmwareMap::discover(&data);
    let options = recon_options(&dir);

    let result = build_bundle(Path::new("dump.bin"), &data[..0x100], &map, &options);

    assert!(matches!(result, Err(Error::MapMismatch)));
}

#[test]
fn missing_disassembler_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let data = merged_dump();
    let map = FirmwareMap::discover(&data);
    let mut options = recon_options(&dir);
    options.objdump = Some(dir.path().join("no-such-objdump"));

    let result = build_bundle(Path::new("dump.bin"), &data, &map, &options);

    assert!(matches!(result, Err(Error::IoError(_))));
}

#[cfg(unix)]
#[test]
fn failed_disassembly_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let data = merged_dump();
    let map = FirmwareMap::discover(&data);
    let mut options = recon_options(&dir);
    options.objdump = Some("false".into());

    let summary = build_bundle(Path::new("dump.bin"), &data, &map, &options).unwrap();

    // Only the two segments at executable addresses are disassembled
    let failures: Vec<_> = summary
        .lines
        .iter()
        .filter(|line| line.contains("disasm failed"))
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(summary.lines.contains(&String::from("objdump used: false")));
    assert!(!options.out_dir.join("disasm").join("seg1_0x40370000.S").exists());
}
