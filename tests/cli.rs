use std::process::{Command, Stdio};

use serde_json::Value;

fn kernel_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_scilab-kernel"));
    cmd.env("SCILAB_KERNEL_LOG", "error").stdin(Stdio::null());
    cmd
}

#[test]
fn info_prints_kernel_metadata_without_scilab() {
    let out = kernel_bin()
        .env("SCILAB_VERSION_EXECUTABLE", "/nonexistent/scilab")
        .arg("info")
        .output()
        .expect("run scilab-kernel");

    assert!(out.status.success());
    let reply: Value = serde_json::from_slice(&out.stdout).expect("json on stdout");
    assert_eq!(reply["implementation"], "scilab_kernel");
    assert_eq!(reply["protocol_version"], "5.3");
    assert_eq!(reply["language_info"]["name"], "scilab");
    assert_eq!(reply["language_info"]["file_extension"], ".sci");
    assert_eq!(reply["banner"], "");
    assert!(reply["language_info"].get("version").is_none());
}

#[test]
fn serve_fails_when_engine_cannot_start() {
    let out = kernel_bin()
        .args(["--executable", "/nonexistent/scilab-cli", "--no-history", "serve"])
        .output()
        .expect("run scilab-kernel");

    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("starting Scilab from /nonexistent/scilab-cli"), "{stderr}");
}

#[test]
fn history_flags_conflict() {
    let out = kernel_bin()
        .args(["--no-history", "--history-file", "/tmp/scilab.hist", "info"])
        .output()
        .expect("run scilab-kernel");
    assert!(!out.status.success());
}
