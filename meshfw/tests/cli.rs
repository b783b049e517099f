// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    path::Path,
    process::{Command, Output},
};

use tempfile::TempDir;

fn meshfw(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_meshfw"))
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap()
}

fn recovery_image(len: usize) -> Vec<u8> {
    let mut image = b"DLK6E6010001".to_vec();
    image.resize(80, 0);
    image.extend((0..len - 80).map(|i| (i * 13 + 1) as u8));
    image
}

#[test]
fn size_gate_rejects_small_input() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("small.bin"), [0u8; 500]).unwrap();

    let output = meshfw(
        &["M32", "--CreateFactoryImage", "small.bin", "out.bin"],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("out.bin").exists());
}

#[test]
fn bad_arguments_exit_1() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("in.bin"), recovery_image(1024)).unwrap();

    for args in [
        &["X99", "-u", "in.bin", "out.bin"][..],
        &["M32", "in.bin", "out.bin"],
        &["M32", "--Bogus", "in.bin", "out.bin"],
        &["M32", "-u", "in.bin"],
    ] {
        let output = meshfw(args, dir.path());
        assert_eq!(output.status.code(), Some(1), "{args:?}");
    }

    assert!(!dir.path().join("out.bin").exists());
}

#[test]
fn help_exits_0() {
    let dir = TempDir::new().unwrap();
    let output = meshfw(&["--help"], dir.path());

    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--UpdateFirmwareHeader"));
    assert!(stdout.contains("R32"));
    assert!(stdout.contains("M60"));
    assert!(stdout.contains("Encrypt and sign a recovery image"));
}

#[test]
fn missing_input_exit_1() {
    let dir = TempDir::new().unwrap();
    let output = meshfw(&["M32", "-u", "missing.bin", "out.bin"], dir.path());

    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("out.bin").exists());
}

#[test]
fn update_create_decrypt() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("raw.bin"), recovery_image(4096)).unwrap();

    let output = meshfw(
        &["M32", "--UpdateFirmwareHeader", "raw.bin", "recovery.bin"],
        dir.path(),
    );
    assert!(output.status.success());

    let recovery = fs::read(dir.path().join("recovery.bin")).unwrap();
    assert_eq!(recovery.len(), 4096);
    assert_eq!(&recovery[0x2c..0x30], &(4096u32 - 80).to_le_bytes());

    let output = meshfw(
        &[
            "M32",
            "--CreateFactoryImage",
            "recovery.bin",
            "factory.bin",
            "--debug",
            "debug",
        ],
        dir.path(),
    );
    assert!(output.status.success());

    for name in ["Sig1.bin", "FW_and_Sig1.bin", "FWenc.bin", "IV.bin"] {
        assert!(dir.path().join("debug").join(name).exists(), "{name}");
    }

    let output = meshfw(
        &["M32", "--DecryptFactoryImage", "factory.bin", "unpacked.bin"],
        dir.path(),
    );
    assert!(output.status.success());
    assert_eq!(fs::read(dir.path().join("unpacked.bin")).unwrap(), recovery);

    // Wrong device keys.
    let output = meshfw(&["E30", "-d", "factory.bin", "other.bin"], dir.path());
    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("other.bin").exists());
}
