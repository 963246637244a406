//! Exercises the installed binary surface that never reaches the RCS
//! tools: version/usage output, option errors, the empty stream, and
//! fatal stream diagnostics.

use std::process::{Command, Stdio};

use tempfile::TempDir;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rcs-fast-import"))
}

#[test]
fn version_flag_prints_and_exits_zero() {
    let out = bin().arg("-V").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.starts_with("rcs-fast-import "));
}

#[test]
fn usage_flag_prints_and_exits_zero() {
    let out = bin().arg("-?").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("usage: rcs-fast-import"));
}

#[test]
fn unknown_flag_exits_one() {
    let out = bin().arg("-x").stderr(Stdio::piped()).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let text = String::from_utf8_lossy(&out.stderr);
    assert!(text.contains("unknown option"));
}

#[test]
fn empty_stream_succeeds_and_leaves_no_droppings() {
    let dir = TempDir::new().unwrap();
    let out = bin()
        .current_dir(dir.path())
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(out.status.success(), "{:?}", out);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

#[test]
fn unresolved_mark_is_a_fatal_diagnostic() {
    use std::io::Write;
    let dir = TempDir::new().unwrap();
    let mut child = bin()
        .current_dir(dir.path())
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"tag v1\nfrom :9\ndata 1\nx\n")
        .unwrap();
    let out = child.wait_with_output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let text = String::from_utf8_lossy(&out.stderr);
    assert!(text.contains("unknown commit :9"), "{}", text);
    // Scratch area is torn down on the error path too.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}
