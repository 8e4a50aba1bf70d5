//! Admin CLI output tests

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn admin(data_dir: &Path, args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_easyscore-admin"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

#[test]
fn test_list_json_stdout_is_only_json() {
    let data = TempDir::new().unwrap();
    let scores = TempDir::new().unwrap();
    std::fs::write(scores.path().join("a.png"), b"\x89PNG\r\n\x1a\na").unwrap();
    std::fs::write(scores.path().join("b.png"), b"\x89PNG\r\n\x1a\nb").unwrap();

    admin(data.path(), &["init"]);
    admin(data.path(), &["load", scores.path().to_str().unwrap()]);
    let output = admin(data.path(), &["list", "--json"]);

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "a.png");
    assert_eq!(rows[1]["loaded"], true);

    let logs = String::from_utf8_lossy(&output.stderr);
    assert!(logs.contains("Opening library"));
}
