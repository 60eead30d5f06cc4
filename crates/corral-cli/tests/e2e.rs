//! End-to-end tests against the built binary.
//!
//! The privileged tests need root and a cgroup v1 hierarchy, so they are
//! `#[ignore]`d for ordinary `cargo test` runs and re-check the environment
//! before doing anything. Run them on a prepared box with
//! `cargo test -p corral-cli -- --ignored`.

use std::io::Read;
use std::os::fd::FromRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

struct Outcome {
    code: Option<i32>,
    report: String,
    stderr: String,
}

/// Run corral with fd 3 captured into a pipe.
fn corral(args: &[&str]) -> Outcome {
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe failed");
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_corral"));
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(move || {
            if libc::dup2(write_fd, 3) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().expect("spawn corral");
    unsafe { libc::close(write_fd) };
    let output = child.wait_with_output().expect("wait corral");

    let mut report = String::new();
    let mut pipe = unsafe { std::fs::File::from_raw_fd(read_fd) };
    pipe.read_to_string(&mut report).ok();

    Outcome {
        code: output.status.code(),
        report,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

fn field<'a>(report: &'a str, key: &str) -> &'a str {
    report
        .lines()
        .find(|line| line.starts_with(key))
        .map(|line| line[key.len()..].trim())
        .unwrap_or_else(|| panic!("missing {key} in report:\n{report}"))
}

fn sandbox_ready() -> bool {
    let ready = unsafe { libc::geteuid() } == 0
        && Path::new("/sys/fs/cgroup/memory").is_dir()
        && Path::new("/sys/fs/cgroup/cpuacct").is_dir()
        && Path::new("/sys/fs/cgroup/freezer").is_dir();
    if !ready {
        eprintln!("skipping: needs root and cgroup v1 controllers");
    }
    ready
}

fn find_bin(name: &str) -> Option<String> {
    ["/bin", "/usr/bin", "/sbin", "/usr/sbin"]
        .iter()
        .map(|dir| format!("{dir}/{name}"))
        .find(|path| Path::new(path).exists())
}

const NOBODY: &[&str] = &["--uid", "65534", "--gid", "65534"];

fn supervised(extra: &[&str], command: &[&str]) -> Outcome {
    let mut args: Vec<&str> = Vec::new();
    args.extend_from_slice(NOBODY);
    args.extend_from_slice(extra);
    args.push("--");
    args.extend_from_slice(command);
    corral(&args)
}

// ---- unprivileged surface ----

#[test]
fn unknown_option_exits_one() {
    let out = corral(&["--frobnicate"]);
    assert_eq!(out.code, Some(1));
    assert!(out.stderr.contains("--frobnicate"));
    assert!(out.stderr.contains("--help"));
    assert!(out.report.is_empty());
}

#[test]
fn missing_operand_exits_one() {
    let out = corral(&["--bindfs", "/only-dest"]);
    assert_eq!(out.code, Some(1));
    assert!(out.stderr.contains("requires 2 arguments"));
}

#[test]
fn help_exits_zero() {
    let out = corral(&["--help"]);
    assert_eq!(out.code, Some(0));
    assert!(out.stderr.contains("Usage: corral"));
    assert!(out.stderr.contains("Option processing order:"));
}

#[test]
fn syscalls_help_shows_grammar() {
    let out = corral(&["--help-syscalls"]);
    assert_eq!(out.code, Some(0));
    assert!(out.stderr.contains("ARG_RULE"));
}

#[test]
fn version_exits_zero() {
    let out = corral(&["--version"]);
    assert_eq!(out.code, Some(0));
}

#[test]
fn uid_zero_is_rejected_with_all_errors() {
    let out = corral(&["--uid", "0", "--gid", "0"]);
    assert_eq!(out.code, Some(1));
    assert!(out.stderr.contains("uid = 0"));
    assert!(out.stderr.contains("gid = 0"));
    assert!(out.stderr.contains("can not be empty"));
    assert!(out.stderr.contains("Please fix these errors"));
    // Nothing may reach fd 3 before a successful launch.
    assert!(out.report.is_empty());
}

// ---- privileged end-to-end scenarios ----

#[test]
#[ignore]
fn busy_loop_exceeds_cpu_time() {
    if !sandbox_ready() {
        return;
    }
    let out = supervised(
        &["--max-cpu-time", "0.1"],
        &["/bin/sh", "-c", "while :; do :; done"],
    );
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert_eq!(field(&out.report, "EXCEED"), "CPU_TIME");
    assert_eq!(field(&out.report, "CPUTIME"), "0.100");
}

#[test]
#[ignore]
fn sleep_exceeds_real_time() {
    if !sandbox_ready() {
        return;
    }
    let out = supervised(&["--max-real-time", "0.5"], &["/bin/sleep", "5"]);
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert_eq!(field(&out.report, "EXCEED"), "REAL_TIME");
    assert_eq!(field(&out.report, "REALTIME"), "0.500");
}

#[test]
#[ignore]
fn allocation_exceeds_memory_and_is_clamped() {
    if !sandbox_ready() {
        return;
    }
    let Some(dd) = find_bin("dd") else {
        eprintln!("skipping: no dd");
        return;
    };
    // dd allocates its block buffer up front; 200M against a 64M ceiling.
    let out = supervised(
        &["--max-memory", "64m", "--max-real-time", "10"],
        &[&dd, "if=/dev/zero", "of=/dev/null", "bs=200M", "count=1"],
    );
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert_eq!(field(&out.report, "EXCEED"), "MEMORY");
    assert_eq!(field(&out.report, "MEMORY"), "67108864");
}

#[test]
#[ignore]
fn chatter_exceeds_output_limit() {
    if !sandbox_ready() {
        return;
    }
    let out = supervised(
        &["--max-output", "1k", "--max-real-time", "10"],
        &["/bin/sh", "-c", "yes | head -c 10000; sleep 2"],
    );
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert_eq!(field(&out.report, "EXCEED"), "OUTPUT");
}

#[test]
#[ignore]
fn network_namespace_blocks_loopback() {
    if !sandbox_ready() {
        return;
    }
    let Some(ping) = find_bin("ping") else {
        eprintln!("skipping: no ping");
        return;
    };
    let out = supervised(
        &["--network", "false", "--isolate-process", "true"],
        &[&ping, "-c1", "127.0.0.1"],
    );
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert_eq!(field(&out.report, "EXCEED"), "none");
    assert_ne!(field(&out.report, "EXITCODE"), "0");
}

#[test]
#[ignore]
fn blacklisted_syscall_kills_with_sigsys() {
    if !sandbox_ready() {
        return;
    }
    let Some(hostname) = find_bin("hostname") else {
        eprintln!("skipping: no hostname");
        return;
    };
    let out = supervised(
        &["--syscalls", "!sethostname:k"],
        &[&hostname, "corral-was-here"],
    );
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert_eq!(field(&out.report, "SIGNALED"), "1");
    assert_eq!(field(&out.report, "TERMSIG"), "31");
}

#[test]
#[ignore]
fn pass_exitcode_propagates_child_status() {
    if !sandbox_ready() {
        return;
    }
    let out = supervised(
        &["--pass-exitcode", "true"],
        &["/bin/sh", "-c", "exit 7"],
    );
    assert_eq!(out.code, Some(7), "stderr: {}", out.stderr);
    assert_eq!(field(&out.report, "EXITCODE"), "7");
    assert_eq!(field(&out.report, "EXCEED"), "none");
}

#[test]
#[ignore]
fn auto_named_cgroups_are_destroyed() {
    if !sandbox_ready() {
        return;
    }
    let leftovers = |dir: &str| -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.file_name().to_string_lossy().starts_with("corral"))
                    .count()
            })
            .unwrap_or(0)
    };
    let before = leftovers("/sys/fs/cgroup/memory");
    let out = supervised(&[], &["/bin/true"]);
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert_eq!(leftovers("/sys/fs/cgroup/memory"), before);
}

#[test]
#[ignore]
fn environment_reset_and_append() {
    if !sandbox_ready() {
        return;
    }
    let out = supervised(
        &["--reset-env", "true", "--env", "MARKER", "42"],
        &["/bin/sh", "-c", "test \"$MARKER\" = 42 && test -z \"$HOME\""],
    );
    assert_eq!(out.code, Some(0), "stderr: {}", out.stderr);
    assert_eq!(field(&out.report, "EXITCODE"), "0");
    assert_eq!(field(&out.report, "EXCEED"), "none");
}
