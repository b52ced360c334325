use std::fs;
use std::path::Path;

use spritepatch_core::{run, Manifest, PatcherError, PatcherSettings, SM_ROM_CAPACITY};

fn ips(records: &[(u32, &[u8])]) -> Vec<u8> {
    let mut out = b"PATCH".to_vec();
    for (dest, data) in records {
        out.extend_from_slice(&dest.to_be_bytes()[1..]);
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        out.extend_from_slice(data);
    }
    out.extend_from_slice(b"EOF");
    out
}

fn rdc(sprite: &[u8], author: &str) -> Vec<u8> {
    let mut out = b"RETRODATACONTAINER".to_vec();
    out.push(1);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&4u32.to_le_bytes());
    let offset = out.len() + 4 + author.len() + 1;
    out.extend_from_slice(&(offset as u32).to_le_bytes());
    out.extend_from_slice(author.as_bytes());
    out.push(0);
    out.extend_from_slice(sprite);
    out
}

fn settings(dir: &Path, rom: &[u8], patch: &[u8]) -> PatcherSettings {
    let rom_path = dir.join("Super Metroid.sfc");
    let ips_path = dir.join("sprite.ips");
    fs::write(&rom_path, rom).unwrap();
    fs::write(&ips_path, patch).unwrap();
    PatcherSettings {
        rom_path,
        ips_path,
        ..PatcherSettings::default()
    }
}

#[test]
fn patch_only_run_writes_samus_copy() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path(), &[0x11; 0x10], &ips(&[(0x20, &[1, 2, 3])]));
    settings.rom_capacity = 0x40;

    let report = run(settings).unwrap();
    assert_eq!(report.output_path, dir.path().join("Super Metroid - samus.sfc"));
    assert_eq!(report.author, None);
    assert_eq!(report.ips.copies, 1);

    let out = fs::read(&report.output_path).unwrap();
    assert_eq!(out.len(), 0x40);
    assert_eq!(&out[..0x10], &[0x11; 0x10]);
    assert_eq!(&out[0x20..0x23], &[1, 2, 3]);
    assert!(out[0x10..0x20].iter().chain(&out[0x23..]).all(|&b| b == 0));
}

#[test]
fn container_run_uses_custom_manifest_and_container_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path(), &[0; 0x20], &ips(&[(0x0, &[0xFF; 4])]));
    settings.rom_capacity = 0x40;

    let manifest_path = dir.path().join("manifest.json");
    fs::write(
        &manifest_path,
        r#"[
            { "destinations": [2], "length": 2 },
            { "destinations": [16], "length": 1, "count": 3, "stride": [0, 4, 9] }
        ]"#,
    )
    .unwrap();
    let rdc_path = dir.path().join("ninja.v2.rdc");
    fs::write(&rdc_path, rdc(&[0xA, 0xB, 0xC, 0xD, 0xE], "Kaz")).unwrap();
    settings.manifest_path = Some(manifest_path);
    settings.rdc_path = Some(rdc_path);

    let report = run(settings).unwrap();
    assert_eq!(report.output_path, dir.path().join("Super Metroid - ninja.sfc"));
    assert_eq!(report.author.as_deref(), Some("Kaz"));
    let placement = report.placement.unwrap();
    assert_eq!(placement.placements, 4);
    assert_eq!(placement.bytes_consumed, 5);

    let out = fs::read(&report.output_path).unwrap();
    // The container lands on top of the patched bytes.
    assert_eq!(&out[0..4], &[0xFF, 0xFF, 0xA, 0xB]);
    assert_eq!((out[16], out[20], out[25]), (0xC, 0xD, 0xE));
}

#[test]
fn built_in_manifest_fills_a_full_rom() {
    let dir = tempfile::tempdir().unwrap();
    let settings_base = settings(dir.path(), &[0; 0x1000], &ips(&[]));

    let manifest = Manifest::sm_player_sprite();
    let payload_len = manifest.payload_len().unwrap();
    let sprite: Vec<u8> = (0..payload_len).map(|i| (i % 251) as u8 + 1).collect();
    let rdc_path = dir.path().join("link.rdc");
    fs::write(&rdc_path, rdc(&sprite, "Artist")).unwrap();

    let out_dir = dir.path().join("out");
    fs::create_dir(&out_dir).unwrap();
    let settings = PatcherSettings {
        rdc_path: Some(rdc_path),
        output_path: Some(out_dir.clone()),
        ..settings_base
    };

    let report = run(settings).unwrap();
    assert_eq!(report.output_path, out_dir.join("Super Metroid - link.sfc"));
    let out = fs::read(&report.output_path).unwrap();
    assert_eq!(out.len(), SM_ROM_CAPACITY);

    // First DMA bank is the start of the block.
    assert_eq!(&out[0xE0000..0xE0000 + 0x7D80], &sprite[..0x7D80]);
    // The last entry (14 * 2 bytes, stride 6) consumes the final 28 bytes.
    let tail = &sprite[payload_len - 28..];
    for i in 0..14 {
        let at = 0x6CA54 + i * 6;
        assert_eq!(&out[at..at + 2], &tail[i * 2..i * 2 + 2], "ship glow {i}");
    }
    // Sepia is broadcast to both of its destinations.
    assert_eq!(&out[0xDA3A2..0xDA3C0], &out[0x6656B..0x66589]);
    assert_eq!(report.placement.unwrap().overlaps, 0);
}

#[test]
fn oversized_rom_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path(), &[0; 0x20], &ips(&[]));
    settings.rom_capacity = 0x10;

    let err = run(settings).unwrap_err();
    assert!(matches!(err, PatcherError::OutOfBounds { what: "ROM image", .. }));
}

#[test]
fn marker_check_rejects_bare_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path(), &[0; 0x20], b"NOPE\x00\x00\x00\x00\x00\x00END");
    settings.rom_capacity = 0x20;
    settings.verify_ips_markers = true;

    assert!(matches!(run(settings), Err(PatcherError::Format(_))));
}

#[test]
fn missing_rom_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let settings = PatcherSettings {
        rom_path: dir.path().join("missing.sfc"),
        ips_path: dir.path().join("missing.ips"),
        ..PatcherSettings::default()
    };
    assert!(matches!(run(settings), Err(PatcherError::Config(_))));
}
