use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn opsweep_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_opsweep"));
    cmd.env("HOME", home);
    cmd.env_remove("OPSWEEP_CONFIG");
    cmd.env_remove("OPSWEEP_UI_COLOR");
    cmd.env_remove("OPSWEEP_UI_MAX_TABLE_ROWS");
    cmd.env_remove("OPSWEEP_SCAN_DEFAULT_DAYS");
    cmd.env_remove("OPSWEEP_SCAN_CONCURRENCY");
    cmd.env_remove("OPSWEEP_IMAGES_KEEP_TAGS");
    cmd.env_remove("OPSWEEP_AWS_REGION");
    cmd.env_remove("OPSWEEP_KUBERNETES_NAMESPACE");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    opsweep_cmd(home).args(args).output().expect("run opsweep")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!("opsweep-exit-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn apply_conflicts_with_dry_run_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["--apply", "--dry-run", "images"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn apply_without_yes_requires_tty_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["--apply", "images"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn pods_zero_restarts_threshold_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["pods", "--restarts", "0"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_keep_tag_glob_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["images", "--keep-tag", "["]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_env_override_exits_2() {
    let home = make_temp_home();
    let out = opsweep_cmd(&home)
        .env("OPSWEEP_UI_COLOR", "banana")
        .args(["config", "--show"])
        .output()
        .expect("run opsweep");
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn unreachable_source_exits_10() {
    let home = make_temp_home();
    let out = opsweep_cmd(&home)
        .env("PATH", "")
        .args(["images", "--json"])
        .output()
        .expect("run opsweep");
    assert_eq!(out.status.code(), Some(10));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn dry_run_pass_exits_0_even_without_tty() {
    let home = make_temp_home();
    let out = run(&home, &["policy", "--tool", "volumes"]);
    assert!(out.status.success());
    let _ = std::fs::remove_dir_all(&home);
}
