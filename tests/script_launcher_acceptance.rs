//! Acceptance tests for building and launching scripts
//!
//! The scripts here are shell programs "compiled" by copying, which keeps the
//! tests independent of any real compiler while exercising the whole pipeline.
#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const GREETER: &str = r#"#!/usr/bin/env binscript
# binscript-begin
# script_src: main.sh
# build_cmd: echo built >> "$BINSCRIPT_SOURCE_DIR/builds.log" && cp run.sh out && chmod +x out
# target_bin: ./out
# files:
#  - path: run.sh
#    content: |
#      #!/bin/sh
#      echo "args: $*"
#      exit 3
# binscript-end
echo "this body is not what runs"
"#;

const BROKEN: &str = r#"#!/usr/bin/env binscript
# binscript-begin
# script_src: main.sh
# build_cmd: echo built >> "$BINSCRIPT_SOURCE_DIR/builds.log"; echo "main.sh line 1 syntax error" >&2; exit 2
# target_bin: ./out
# binscript-end
"#;

const INTERRUPTIBLE: &str = r#"#!/usr/bin/env binscript
# binscript-begin
# script_src: main.sh
# build_cmd: |
#   trap 'echo got-term > "$BINSCRIPT_SOURCE_DIR/trapped"; kill $pid; exit 143' TERM
#   echo started > "$BINSCRIPT_SOURCE_DIR/started"
#   sleep 30 >/dev/null 2>&1 &
#   pid=$!
#   wait $pid
# target_bin: ./out
# binscript-end
"#;

/// Helper to set up a test workspace with its own cache and config home
struct TestWorkspace {
    temp_dir: TempDir,
    cache_dir: TempDir,
}

impl TestWorkspace {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
            cache_dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn cache_path(&self) -> &Path {
        self.cache_dir.path()
    }

    fn binscript(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_binscript"));
        cmd.env("BINSCRIPT_CACHE_DIR", self.cache_path())
            .env("XDG_CONFIG_HOME", self.path().join("xdg"))
            .env_remove("BINSCRIPT_CONFIG")
            .env_remove("BINSCRIPT_SHOW_BUILD_OUTPUT")
            .env_remove("RUST_LOG")
            .current_dir(self.path());
        cmd
    }

    fn write_script(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn build_count(&self) -> usize {
        fs::read_to_string(self.path().join("builds.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}

#[test]
fn test_first_run_builds_then_reuses_binary() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("greet.sh", GREETER);

    workspace
        .binscript()
        .arg(&script)
        .args(["a", "b"])
        .assert()
        .code(3)
        .stdout("args: a b\n");
    assert_eq!(workspace.build_count(), 1);

    workspace
        .binscript()
        .arg(&script)
        .args(["a", "b"])
        .assert()
        .code(3)
        .stdout("args: a b\n");
    assert_eq!(workspace.build_count(), 1);
}

#[test]
fn test_run_subcommand_passes_hyphenated_args() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("greet.sh", GREETER);

    workspace
        .binscript()
        .arg("run")
        .arg(&script)
        .args(["--", "-x", "--long"])
        .assert()
        .code(3)
        .stdout("args: -x --long\n");
}

#[test]
fn test_edit_triggers_rebuild() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("greet.sh", GREETER);

    workspace.binscript().arg(&script).assert().code(3);

    fs::write(&script, format!("{}# edited\n", GREETER)).unwrap();
    workspace.binscript().arg(&script).assert().code(3);

    assert_eq!(workspace.build_count(), 2);
}

#[test]
fn test_failed_build_reports_output_and_is_retried() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("broken.sh", BROKEN);

    workspace
        .binscript()
        .arg(&script)
        .assert()
        .failure()
        .stdout("")
        .stderr(predicate::str::contains("build failed"))
        .stderr(predicate::str::contains("main.sh line 1 syntax error"));

    workspace
        .binscript()
        .args(["cache", "get", "status"])
        .arg(&script)
        .assert()
        .success()
        .stdout("failed\n");

    workspace.binscript().arg(&script).assert().failure();
    assert_eq!(workspace.build_count(), 2);
}

#[test]
fn test_missing_metadata_block() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("plain.sh", "#!/bin/sh\necho hi\n");

    workspace
        .binscript()
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("parse failed"))
        .stderr(predicate::str::contains("binscript-begin"));

    assert!(fs::read_dir(workspace.cache_path()).unwrap().next().is_none());
}

#[test]
fn test_unknown_build_command_is_spawn_failure() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script(
        "missing-compiler.sh",
        &BROKEN.replace(
            r#"echo built >> "$BINSCRIPT_SOURCE_DIR/builds.log"; echo "main.sh line 1 syntax error" >&2; exit 2"#,
            "binscript-test-nonexistent-compiler main.sh",
        ),
    );

    workspace
        .binscript()
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("build failed"))
        .stderr(predicate::str::contains("failed to spawn build command"));
}

#[test]
fn test_signal_exit_code() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script(
        "killed.sh",
        &GREETER.replace("#      exit 3", "#      kill -TERM $$"),
    );

    workspace.binscript().arg(&script).assert().code(143);
}

#[test]
fn test_missing_binary_is_launch_failure() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("greet.sh", GREETER);
    workspace.binscript().arg(&script).assert().code(3);

    let output = workspace
        .binscript()
        .args(["cache", "get", "binary_path"])
        .arg(&script)
        .output()
        .unwrap();
    let binary = PathBuf::from(String::from_utf8(output.stdout).unwrap().trim());
    fs::remove_file(&binary).unwrap();

    workspace
        .binscript()
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("launch failed"));
    assert_eq!(workspace.build_count(), 1);
}

#[test]
fn test_target_outside_scaffold_is_rejected() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script(
        "escape.sh",
        &GREETER.replace("# target_bin: ./out", "# target_bin: /bin/false"),
    );

    workspace
        .binscript()
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("parse failed"))
        .stderr(predicate::str::contains("target_bin"));
    assert_eq!(workspace.build_count(), 0);
}

#[test]
fn test_termination_during_build_reaches_build_child() {
    use fs2::FileExt;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let workspace = TestWorkspace::new();
    let script = workspace.write_script("slow.sh", INTERRUPTIBLE);

    let child = std::process::Command::new(env!("CARGO_BIN_EXE_binscript"))
        .env("BINSCRIPT_CACHE_DIR", workspace.cache_path())
        .env("XDG_CONFIG_HOME", workspace.path().join("xdg"))
        .current_dir(workspace.path())
        .arg(&script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let started = workspace.path().join("started");
    let deadline = Instant::now() + Duration::from_secs(20);
    while !started.exists() {
        assert!(Instant::now() < deadline, "build never started");
        std::thread::sleep(Duration::from_millis(50));
    }

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();
    let output = child.wait_with_output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(
        fs::read_to_string(workspace.path().join("trapped")).unwrap(),
        "got-term\n"
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("build failed"));

    workspace
        .binscript()
        .args(["cache", "get", "status"])
        .arg(&script)
        .assert()
        .success()
        .stdout("failed\n");

    let output = workspace
        .binscript()
        .args(["cache", "get", "fingerprint"])
        .arg(&script)
        .output()
        .unwrap();
    let fingerprint = String::from_utf8(output.stdout).unwrap();
    let lock_path = workspace
        .cache_path()
        .join(".locks")
        .join(format!("{}.lock", fingerprint.trim()));
    let lock = fs::File::open(&lock_path).unwrap();
    lock.try_lock_exclusive().unwrap();
}

#[test]
fn test_concurrent_invocations_build_once() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script(
        "slow.sh",
        &GREETER.replace("&& cp run.sh out", "&& sleep 1 && cp run.sh out"),
    );

    let spawn = || {
        std::process::Command::new(env!("CARGO_BIN_EXE_binscript"))
            .env("BINSCRIPT_CACHE_DIR", workspace.cache_path())
            .env("XDG_CONFIG_HOME", workspace.path().join("xdg"))
            .current_dir(workspace.path())
            .arg(&script)
            .arg("x")
            .output()
    };

    let (first, second) = std::thread::scope(|s| {
        let a = s.spawn(spawn);
        let b = s.spawn(spawn);
        (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
    });

    assert_eq!(first.status.code(), Some(3));
    assert_eq!(second.status.code(), Some(3));
    assert_eq!(first.stdout, b"args: x\n");
    assert_eq!(second.stdout, b"args: x\n");
    assert_eq!(workspace.build_count(), 1);
}

#[test]
fn test_build_subcommand_modes() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("greet.sh", GREETER);

    workspace
        .binscript()
        .arg("build")
        .arg(&script)
        .assert()
        .success()
        .stderr(predicate::str::contains("Built"));

    workspace
        .binscript()
        .arg("build")
        .arg(&script)
        .assert()
        .success()
        .stderr(predicate::str::contains("Up to date"));

    workspace
        .binscript()
        .args(["build", "--build-mode", "full"])
        .arg(&script)
        .assert()
        .success()
        .stderr(predicate::str::contains("Built"));

    assert_eq!(workspace.build_count(), 2);
}

#[test]
fn test_cache_info_list_and_clean() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("greet.sh", GREETER);
    workspace.binscript().arg(&script).assert().code(3);

    let output = workspace
        .binscript()
        .args(["cache", "get", "cache_path"])
        .arg(&script)
        .output()
        .unwrap();
    let cache_path = PathBuf::from(String::from_utf8(output.stdout).unwrap().trim());
    assert!(cache_path.starts_with(workspace.cache_path()));
    assert!(cache_path.join("out").is_file());
    assert!(cache_path.join("run.sh").is_file());

    workspace
        .binscript()
        .args(["cache", "info"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("fingerprint:"))
        .stdout(predicate::str::contains("ready"));

    workspace
        .binscript()
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("greet.sh"));

    workspace
        .binscript()
        .args(["cache", "get", "no_such_item"])
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Available items"));

    workspace
        .binscript()
        .args(["cache", "clean"])
        .arg(&script)
        .assert()
        .success();
    assert!(!cache_path.exists());
}

#[test]
fn test_cache_clean_after_script_deleted() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("gone.sh", GREETER);
    workspace.binscript().arg(&script).assert().code(3);
    fs::remove_file(&script).unwrap();

    workspace
        .binscript()
        .args(["cache", "clean", "./gone.sh"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Removed 1 cache entries"));

    workspace
        .binscript()
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:    0"));
}

#[test]
fn test_cache_gc_after_edit() {
    let workspace = TestWorkspace::new();
    let script = workspace.write_script("greet.sh", GREETER);
    workspace.binscript().arg(&script).assert().code(3);

    fs::write(&script, format!("{}# edited\n", GREETER)).unwrap();

    workspace
        .binscript()
        .args(["cache", "gc", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would remove"))
        .stdout(predicate::str::contains("stale"));

    workspace
        .binscript()
        .args(["cache", "gc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed"));

    workspace
        .binscript()
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:    0"));
}

#[test]
fn test_config_file_is_discovered() {
    let workspace = TestWorkspace::new();
    fs::write(
        workspace.path().join("binscript.toml"),
        "[build]\noutput = \"inherit\"\n",
    )
    .unwrap();
    let script = workspace.write_script(
        "noisy.sh",
        &GREETER.replace("&& cp run.sh out", "&& echo compiling-now && cp run.sh out"),
    );

    workspace
        .binscript()
        .arg(&script)
        .assert()
        .code(3)
        .stdout(predicate::str::contains("compiling-now"));

    workspace
        .binscript()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("binscript.toml"))
        .stdout(predicate::str::contains("output = \"inherit\""));
}

#[test]
fn test_config_generate_and_validate() {
    let workspace = TestWorkspace::new();

    let output = workspace
        .binscript()
        .args(["config", "generate"])
        .output()
        .unwrap();
    assert!(output.status.success());
    fs::write(workspace.path().join("example.toml"), &output.stdout).unwrap();

    workspace
        .binscript()
        .args(["config", "validate", "example.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));

    fs::write(workspace.path().join("bad.toml"), "[cache]\nmax_size = \"1GB\"\n").unwrap();
    workspace
        .binscript()
        .args(["config", "validate", "bad.toml"])
        .assert()
        .failure();
}
