//! Integration tests for the `partita` binary.

use std::path::Path;
use std::process::Command;

use partita_config::ConvolutionSettings;
use partita_core::StereoSamples;
use partita_io::{WavSpec, read_wav_info, read_wav_stereo, write_wav, write_wav_stereo};
use tempfile::TempDir;

fn partita_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_partita"))
}

fn write_impulse(path: &Path, len: usize) {
    let ir: Vec<f32> = (0..len).map(|i| 0.5 * (-(i as f32) / 200.0).exp()).collect();
    let spec = WavSpec {
        channels: 1,
        sample_rate: 48000,
        bits_per_sample: 32,
    };
    write_wav(path, &ir, spec).unwrap();
}

fn write_click(path: &Path, frames: usize) {
    let mut left = vec![0.0; frames];
    left[0] = 1.0;
    let right = left.clone();
    write_wav_stereo(path, &StereoSamples::new(left, right), WavSpec::default()).unwrap();
}

#[test]
fn render_appends_the_impulse_tail() {
    let dir = TempDir::new().unwrap();
    let ir = dir.path().join("ir.wav");
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    write_impulse(&ir, 4800);
    write_click(&input, 1000);

    let status = partita_bin()
        .arg("render")
        .arg(&input)
        .arg(&output)
        .arg("--impulse")
        .arg(&ir)
        .args(["--block-size", "256", "--threads", "1"])
        .output()
        .expect("failed to run partita render");
    assert!(status.status.success(), "{}", String::from_utf8_lossy(&status.stderr));

    let (rendered, spec) = read_wav_stereo(&output).unwrap();
    assert_eq!(spec.channels, 2);
    assert_eq!(rendered.len(), 1000 + 4800);
    // The wet path runs at half level; dry is muted by default.
    assert!((rendered.left[0] - 0.25).abs() < 1e-3);
    assert!((rendered.right[100] - 0.25 * (-0.5_f32).exp()).abs() < 1e-3);
}

#[test]
fn render_uses_settings_file_and_flags() {
    let dir = TempDir::new().unwrap();
    let ir = dir.path().join("ir.wav");
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    let settings_path = dir.path().join("room.toml");
    write_impulse(&ir, 480);
    write_click(&input, 2000);

    // Relative impulse path resolves next to the settings file.
    let mut settings = ConvolutionSettings::new("room").with_impulse("ir.wav");
    settings.dry_gain_db = 0.0;
    settings.engine.worker_threads = 0;
    settings.save(&settings_path).unwrap();

    let status = partita_bin()
        .arg("render")
        .arg(&input)
        .arg(&output)
        .arg("--settings")
        .arg(&settings_path)
        .args(["--predelay", "10", "--no-tail", "--bit-depth", "24"])
        .output()
        .unwrap();
    assert!(status.status.success(), "{}", String::from_utf8_lossy(&status.stderr));

    let info = read_wav_info(&output).unwrap();
    assert_eq!(info.bits_per_sample, 24);
    let (rendered, _) = read_wav_stereo(&output).unwrap();
    assert_eq!(rendered.len(), 2000);
    // Dry click at 0 dB, wet arrives 10 ms later.
    assert!((rendered.left[0] - 1.0).abs() < 1e-3);
    assert!(rendered.left[1..480].iter().all(|s| s.abs() < 1e-3));
    assert!((rendered.left[480] - 0.25).abs() < 1e-3);
}

#[test]
fn render_without_impulse_fails() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.wav");
    write_click(&input, 100);

    let output = partita_bin()
        .arg("render")
        .arg(&input)
        .arg(dir.path().join("out.wav"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no impulse response"));
}

#[test]
fn info_prints_partition_layout() {
    let dir = TempDir::new().unwrap();
    let ir = dir.path().join("ir.wav");
    write_impulse(&ir, 48000);

    let output = partita_bin()
        .arg("info")
        .arg(&ir)
        .args(["--block-size", "256", "--sample-rate", "96000"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Sample Rate: 48000 Hz"));
    assert!(stdout.contains("96000 samples after resampling"));
    assert!(stdout.contains("head"));
    assert!(stdout.contains("tail 1"));
}

#[test]
fn settings_init_then_show() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("presets").join("hall.toml");

    let init = partita_bin()
        .args(["settings", "init"])
        .arg(&path)
        .args(["--name", "Hall", "--impulse", "hall.wav"])
        .output()
        .unwrap();
    assert!(init.status.success(), "{}", String::from_utf8_lossy(&init.stderr));

    let again = partita_bin().args(["settings", "init"]).arg(&path).output().unwrap();
    assert!(!again.status.success());

    let show = partita_bin().args(["settings", "show"]).arg(&path).output().unwrap();
    assert!(show.status.success());
    let stdout = String::from_utf8_lossy(&show.stdout);
    assert!(stdout.contains("name = \"Hall\""));
    assert!(stdout.contains("[engine]"));
}

#[test]
fn settings_show_rejects_out_of_range_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "predelay_ms = 4000.0\n").unwrap();

    let show = partita_bin().args(["settings", "show"]).arg(&path).output().unwrap();
    assert!(!show.status.success());
    assert!(String::from_utf8_lossy(&show.stderr).contains("predelay_ms"));
}
