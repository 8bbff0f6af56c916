//! Subprocess tests for the `warden` binary.
//!
//! Most tests supervise the in-memory mock backend; the process-backend
//! tests run a small `/bin/sh` engine script from the core directory.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

fn warden_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_warden"));
    cmd.env("WARDEN_LOG", "debug");
    cmd
}

fn write_config(data: &Path, auto_start: bool) {
    std::fs::write(
        data.join("starter.toml"),
        format!(
            r#"auto_start = {auto_start}

[engine]
backend = "mock"

[control]
poll_interval_ms = 20
"#
        ),
    )
    .unwrap();
}

fn spawn(core: &Path, data: &Path) -> Child {
    warden_bin()
        .arg(core)
        .arg(data)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn request(data: &Path, command: &str) {
    let control = data.join("control");
    std::fs::create_dir_all(&control).unwrap();
    std::fs::write(control.join(command), b"").unwrap();
}

#[cfg(unix)]
fn terminate(child: &Child) {
    let pid = libc::pid_t::try_from(child.id()).unwrap();
    // SAFETY: `pid` belongs to a child this test spawned and has not reaped.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    assert_eq!(rc, 0);
}

fn wait_exit(mut child: Child) -> std::process::ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("warden did not exit after SIGTERM");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn missing_arguments_is_usage_error() {
    let output = warden_bin().output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr: {stderr}");
}

#[test]
fn single_argument_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = warden_bin().arg(dir.path()).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn extra_argument_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = warden_bin()
        .arg(dir.path())
        .arg(dir.path())
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn version_flag_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = warden_bin()
        .arg("--version")
        .arg(dir.path())
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[cfg(unix)]
#[test]
fn boots_stopped_without_auto_start() {
    let core = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_config(data.path(), false);

    let child = spawn(core.path(), data.path());
    wait_for("STOPPED marker", || data.path().join("STOPPED").exists());
    assert!(!data.path().join("RUNNING").exists());

    terminate(&child);
    assert!(wait_exit(child).success());
}

#[cfg(unix)]
#[test]
fn control_requests_drive_markers() {
    let core = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_config(data.path(), false);

    let child = spawn(core.path(), data.path());
    wait_for("boot", || data.path().join("STOPPED").exists());

    request(data.path(), "START");
    wait_for("RUNNING marker", || data.path().join("RUNNING").exists());
    assert!(!data.path().join("STOPPED").exists());

    request(data.path(), "RELOAD");
    request(data.path(), "STOP");
    wait_for("STOPPED marker", || data.path().join("STOPPED").exists());
    wait_for("control dir drained", || {
        std::fs::read_dir(data.path().join("control"))
            .unwrap()
            .next()
            .is_none()
    });

    terminate(&child);
    assert!(wait_exit(child).success());
    assert!(data.path().join("STOPPED").exists());
}

#[cfg(unix)]
#[test]
fn shutdown_stops_auto_started_engine() {
    let core = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_config(data.path(), true);

    let child = spawn(core.path(), data.path());
    wait_for("RUNNING marker", || data.path().join("RUNNING").exists());

    terminate(&child);
    assert!(wait_exit(child).success());
    assert!(data.path().join("STOPPED").exists());
    assert!(!data.path().join("RUNNING").exists());
}

#[cfg(unix)]
#[test]
fn second_instance_on_same_data_dir_is_refused() {
    let core = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_config(data.path(), false);

    let first = spawn(core.path(), data.path());
    wait_for("lock file", || data.path().join("warden.lock").exists());
    wait_for("boot", || data.path().join("STOPPED").exists());

    let output = warden_bin()
        .arg(core.path())
        .arg(data.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("already owns"));

    terminate(&first);
    assert!(wait_exit(first).success());
}

/// Engine script that records its pid in the data dir given as `$1`.
#[cfg(unix)]
const ENGINE_SCRIPT: &str = "echo $$ > \"$1/engine.pid\"\nexec sleep 30\n";

/// Same, but ignores SIGTERM so a graceful stop hangs.
#[cfg(unix)]
const STUBBORN_ENGINE_SCRIPT: &str =
    "echo $$ > \"$1/engine.pid\"\ntrap '' TERM\nwhile :; do sleep 1; done\n";

#[cfg(unix)]
fn write_process_setup(core: &Path, data: &Path, engine_script: &str) {
    std::fs::create_dir_all(core).unwrap();
    std::fs::create_dir_all(data).unwrap();
    std::fs::write(core.join("engine.sh"), engine_script).unwrap();
    std::fs::write(
        core.join("prepare.sh"),
        "touch \"$WARDEN_DATA_DIR/prepared\"\n",
    )
    .unwrap();
    std::fs::write(
        data.join("starter.toml"),
        r#"auto_start = true

[engine]
program = "/bin/sh"
args = ["engine.sh", "{data_dir}"]
stop_timeout_secs = 30

[hooks]
prepare = "prepare.sh"

[control]
poll_interval_ms = 20
"#,
    )
    .unwrap();
}

#[cfg(target_os = "linux")]
fn engine_alive(pid: &str) -> bool {
    // A killed engine may linger as a zombie until someone reaps it.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .is_ok_and(|stat| !stat.contains(") Z "))
}

#[cfg(unix)]
#[test]
fn relative_directories_resolve_against_launch_dir() {
    let root = tempfile::tempdir().unwrap();
    let core = root.path().join("core");
    let data = root.path().join("data");
    write_process_setup(&core, &data, ENGINE_SCRIPT);

    let child = warden_bin()
        .current_dir(root.path())
        .arg("core")
        .arg("data")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    wait_for("RUNNING marker", || data.join("RUNNING").exists());
    assert!(data.join("prepared").exists());
    wait_for("engine pid file", || data.join("engine.pid").exists());
    assert!(!core.join("data").exists());

    terminate(&child);
    assert!(wait_exit(child).success());
    assert!(data.join("STOPPED").exists());
}

#[cfg(target_os = "linux")]
#[test]
fn second_signal_kills_engine_before_exiting() {
    let root = tempfile::tempdir().unwrap();
    let core = root.path().join("core");
    let data = root.path().join("data");
    write_process_setup(&core, &data, STUBBORN_ENGINE_SCRIPT);

    let child = spawn(&core, &data);
    wait_for("RUNNING marker", || data.join("RUNNING").exists());
    wait_for("engine pid file", || {
        std::fs::read_to_string(data.join("engine.pid")).is_ok_and(|pid| !pid.trim().is_empty())
    });
    let pid = std::fs::read_to_string(data.join("engine.pid"))
        .unwrap()
        .trim()
        .to_owned();
    assert!(engine_alive(&pid));

    terminate(&child);
    std::thread::sleep(Duration::from_millis(300));
    terminate(&child);

    assert_eq!(wait_exit(child).code(), Some(1));
    wait_for("engine exit", || !engine_alive(&pid));
    assert!(data.join("STOPPED").exists());
    assert!(!data.join("RUNNING").exists());
}
