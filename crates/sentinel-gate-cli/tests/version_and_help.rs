// sentinel-gate-cli/tests/version_and_help.rs
// ============================================================================
// Module: CLI smoke tests
// Description: End-to-end checks of the compiled `sentinel-gate` binary's
//              top-level argument handling.
// Purpose: Catch regressions in flag wiring that unit tests, which call
//          into the library directly, wouldn't exercise.
// Dependencies: sentinel-gate-cli binary
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

use std::process::Command;

fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sentinel-gate"))
}

#[test]
fn version_flag_prints_version_and_succeeds() {
    let output = binary().arg("--version").output().expect("spawn binary");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8 stdout");
    assert!(stdout.contains("sentinel-gate"));
}

#[test]
fn no_arguments_prints_help_instead_of_hanging() {
    let output = binary().output().expect("spawn binary");
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("utf8 stderr");
    assert!(stderr.to_lowercase().contains("usage"));
}

#[test]
fn serve_with_missing_config_file_fails_closed() {
    let output = binary()
        .args(["serve", "--stdio", "--config", "/nonexistent/sentinel-gate.toml"])
        .output()
        .expect("spawn binary");
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("utf8 stderr");
    assert!(stderr.contains("configuration"));
}

#[test]
fn devmode_env_override_hard_blocks_a_config_requesting_it() {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    std::io::Write::write_all(&mut file, b"[dev]\nallow_devmode = true\n").expect("write config");

    let output = binary()
        .args(["serve", "--stdio", "--config"])
        .arg(file.path())
        .env("SENTINELGATE_ALLOW_DEVMODE", "false")
        .output()
        .expect("spawn binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("utf8 stderr");
    assert!(stderr.contains("DevMode"), "stderr was: {stderr}");
}
