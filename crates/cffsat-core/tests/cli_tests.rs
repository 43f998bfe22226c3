use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use cffsat_core::{OutcomeCache, Solution};
use cffsat_formula::{is_cover_free, ProblemKey};

fn cffsat() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cffsat"));
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_solve_races_workers_and_records_the_family() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cffdata.json");

    let output = cffsat()
        .arg("--cache")
        .arg(&cache)
        .args(["--timeout", "60", "solve", "-d", "1", "4", "6"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("d=1 t=4 n=6 SAT"), "{stdout}");
    assert!(stdout.contains("(computed)"), "{stdout}");

    let record = OutcomeCache::open(&cache)
        .unwrap()
        .lookup(&ProblemKey::new(1, 4, 6))
        .unwrap();
    match record.solution {
        Solution::Blocks(blocks) => assert!(is_cover_free(&blocks, 1)),
        other => panic!("expected blocks, got {other:?}"),
    }

    // Same instance again comes from the cache.
    let output = cffsat()
        .arg("--cache")
        .arg(&cache)
        .args(["solve", "-d", "1", "4", "6"])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("(cached)"));
}

#[test]
fn test_points_and_table() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cffdata.json");

    let status = cffsat()
        .arg("--cache")
        .arg(&cache)
        .args(["--engines", "splr,batsat", "points", "-d", "1", "3:3", "3:4"])
        .status()
        .unwrap();
    assert!(status.success());

    let output = cffsat()
        .arg("--cache")
        .arg(&cache)
        .args(["table", "-d", "1"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let row: Vec<&str> = stdout.lines().nth(2).unwrap().split_whitespace().collect();
    // Sperner: the largest antichain on 3 points has 3 sets.
    assert_eq!(&row[..2], ["3", "3"]);
}

#[test]
fn test_unknown_engine_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = cffsat()
        .arg("--cache")
        .arg(dir.path().join("c.json"))
        .args(["--engines", "glucose4", "solve", "-d", "1", "2", "2"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("glucose4"));
    assert!(!dir.path().join("c.json").exists());
}

#[test]
fn test_corrupt_cache_is_reported_and_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cffdata.json");
    std::fs::write(&cache, "[{").unwrap();
    let output = cffsat()
        .arg("--cache")
        .arg(&cache)
        .args(["solve", "-d", "1", "2", "2"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("corrupt"));
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), "[{");
}

#[cfg(unix)]
#[test]
fn test_ctrl_c_cancels_the_race_without_recording_it() {
    use std::os::unix::process::CommandExt;

    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cffdata.json");
    let mut cmd = cffsat();
    cmd.arg("--cache")
        .arg(&cache)
        .args(["--timeout", "600", "solve", "-d", "2", "12", "21"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    let child = cmd.spawn().unwrap();

    thread::sleep(Duration::from_millis(1500));
    // What a terminal does on Ctrl-C: SIGINT to the whole foreground group.
    killpg(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();
    let output = child.wait_with_output().unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(130), "{stderr}");
    assert!(!stderr.contains("engine failed"), "{stderr}");
    if cache.exists() {
        let cache = OutcomeCache::open(&cache).unwrap();
        assert!(cache.lookup(&ProblemKey::new(2, 12, 21)).is_none());
    }
}
