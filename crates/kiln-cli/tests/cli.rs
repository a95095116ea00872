//! End-to-end tests for the kiln binary.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// A project directory with a settings file.
struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    /// Settings using a local socket under the project and `compiler`.
    fn settings(&self, compiler: &Path) -> PathBuf {
        let settings = serde_json::json!({
            "debug_symbols": "none",
            "transport": "local_socket",
            "socket_dir": self.path().join("sockets"),
            "client_timeout_secs": 30,
            "compiler": { "program": compiler },
        });
        self.write("kiln.json", &settings.to_string())
    }

    fn kiln(&self) -> Command {
        let mut cmd = Command::cargo_bin("kiln").unwrap();
        cmd.current_dir(self.path());
        cmd
    }
}

/// A compiler that writes a fixed binary and reports one warning.
#[cfg(unix)]
fn fake_compiler(project: &TestProject) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = project.write(
        "tools/fake-csc",
        r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'compiled' > "$out"
echo '{"severity":"warning","code":"CS0168","message":"unused variable"}'
"#,
    );
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// Pid of a process that has already exited.
#[cfg(unix)]
fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

// =============================================================================
// Argument errors
// =============================================================================

#[test]
fn test_missing_output_fails() {
    let project = TestProject::new();
    project.write("a.cs", "class A {}");

    project
        .kiln()
        .args(["--owner", "1", "a.cs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("-out"));
}

#[test]
fn test_missing_response_file_fails() {
    let project = TestProject::new();

    project
        .kiln()
        .args(["--owner", "1", "@missing.rsp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.rsp"));
}

#[test]
fn test_explicit_settings_must_exist() {
    let project = TestProject::new();

    project
        .kiln()
        .args(["--settings", "nope.json", "-out:Game.dll", "a.cs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read settings"));
}

#[test]
fn test_server_requires_numeric_owner() {
    let project = TestProject::new();

    project
        .kiln()
        .args(["server", "not-a-pid"])
        .assert()
        .failure();
}

// =============================================================================
// Server mode
// =============================================================================

#[cfg(unix)]
#[test]
fn test_server_with_dead_owner_exits() {
    let project = TestProject::new();
    let compiler = fake_compiler(&project);
    let settings = project.settings(&compiler);
    fs::create_dir(project.path().join("Temp")).unwrap();

    project
        .kiln()
        .arg("--settings")
        .arg(&settings)
        .args(["server", &dead_pid().to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not running"));

    let log = fs::read_to_string(project.path().join("Temp").join("kiln-server.log")).unwrap();
    assert!(log.contains("not running"), "{log}");
}

#[test]
fn test_server_without_compiler_fails() {
    let project = TestProject::new();
    let settings = project.write("kiln.json", "{}");

    project
        .kiln()
        .arg("--settings")
        .arg(&settings)
        .args(["server", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No compiler configured"));
}

// =============================================================================
// Builds
// =============================================================================

#[cfg(unix)]
#[test]
fn test_in_process_build() {
    let project = TestProject::new();
    let compiler = fake_compiler(&project);
    let settings = project.settings(&compiler);
    project.write("Assets/a.cs", "class A {}");
    project.write("Assets/b.cs", "class B {}");
    project.write("build.rsp", "-define:DEBUG\nAssets/b.cs\n");

    project
        .kiln()
        .arg("--settings")
        .arg(&settings)
        .args(["--in-process", "-out:Library/Game.dll", "@build.rsp", "Assets/a.cs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("warning CS0168: unused variable"));

    let binary = fs::read(project.path().join("Library").join("Game.dll")).unwrap();
    assert_eq!(binary, b"compiled");
}

#[cfg(unix)]
#[test]
fn test_unresolved_reference_fails_the_build() {
    let project = TestProject::new();
    let compiler = fake_compiler(&project);
    let settings = project.settings(&compiler);
    project.write("a.cs", "class A {}");

    project
        .kiln()
        .arg("--settings")
        .arg(&settings)
        .args(["--in-process", "-out:Game.dll", "-r:Missing.dll", "a.cs"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Missing.dll"));

    assert!(!project.path().join("Game.dll").exists());
}
