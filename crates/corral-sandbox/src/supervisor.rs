//! Supervision loop: poll the cgroup, arbitrate exit vs. limit, clean up.
//!
//! The loop uses one uniform sleep source for every limit so wall clock,
//! CPU, memory and output enforcement share the same granularity (the
//! configured interval, 20ms by default). External termination signals land
//! in a word-sized atomic that the loop samples once per tick; nothing else
//! crosses the handler boundary.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::cgroup::Cgroup;
use crate::config::Config;
use crate::errors::{EXIT_REAP, EXIT_SIGNALED};
use crate::launcher::Session;
use crate::report;

static SIGNAL_CAUGHT: AtomicI32 = AtomicI32::new(0);

extern "C" fn note_signal(sig: libc::c_int) {
    SIGNAL_CAUGHT.store(sig, Ordering::Relaxed);
}

/// Which limit classification tripped first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exceed {
    None,
    CpuTime,
    RealTime,
    Memory,
    Output,
}

impl std::fmt::Display for Exceed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Exceed::None => "none",
            Exceed::CpuTime => "CPU_TIME",
            Exceed::RealTime => "REAL_TIME",
            Exceed::Memory => "MEMORY",
            Exceed::Output => "OUTPUT",
        })
    }
}

/// Child wait status, flattened for the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitInfo {
    pub signaled: bool,
    pub exit_code: i32,
    pub term_signal: i32,
}

impl WaitInfo {
    fn from_status(status: WaitStatus) -> Option<WaitInfo> {
        match status {
            WaitStatus::Exited(_, code) => Some(WaitInfo {
                signaled: false,
                exit_code: code,
                term_signal: 0,
            }),
            WaitStatus::Signaled(_, signal, _) => Some(WaitInfo {
                signaled: true,
                exit_code: 0,
                term_signal: signal as i32,
            }),
            _ => None,
        }
    }
}

/// Final measurements after clamping against the configured limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub memory: i64,
    pub cpu: f64,
    pub real: f64,
    pub exceed: Exceed,
}

/// Re-normalize the raw measurements once the loop has ended.
///
/// The overwrite order is fixed: memory first, then CPU (a SIGXCPU death
/// counts even when the poll missed it), then output (SIGXFSZ), then real
/// time. Signal-derived causes therefore override poll-derived ones, and a
/// simultaneous wall-clock overrun wins last.
pub(crate) fn normalize(
    loop_exceed: Exceed,
    memory: i64,
    cpu: f64,
    real: f64,
    stat: WaitInfo,
    cfg: &Config,
) -> Verdict {
    let mut exceed = loop_exceed;

    let mut memory = memory;
    if cfg.memory_limit > 0 && memory >= cfg.memory_limit {
        memory = cfg.memory_limit;
        exceed = Exceed::Memory;
    }

    let mut cpu = cpu;
    let killed_by_xcpu = stat.signaled && stat.term_signal == libc::SIGXCPU;
    if killed_by_xcpu || (cfg.cpu_time_limit > 0.0 && cpu >= cfg.cpu_time_limit) {
        if cfg.cpu_time_limit > 0.0 {
            cpu = cfg.cpu_time_limit;
        }
        exceed = Exceed::CpuTime;
    }

    if stat.signaled && stat.term_signal == libc::SIGXFSZ {
        exceed = Exceed::Output;
    }

    let mut real = real;
    if cfg.real_time_limit > 0.0 && real >= cfg.real_time_limit {
        real = cfg.real_time_limit;
        exceed = Exceed::RealTime;
    }

    Verdict {
        memory,
        cpu,
        real,
        exceed,
    }
}

/// Route fatal signals into the atomic flag; PIPE and ALRM are ignored so an
/// early-closing fd-3 reader or a stray alarm can not kill the cleanup path.
pub fn install_signal_handlers() {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let note = SigAction::new(
        SigHandler::Handler(note_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGPIPE, Signal::SIGALRM] {
        // SAFETY: SigIgn carries no handler code.
        let _ = unsafe { sigaction(sig, &ignore) };
    }
    for sig in [
        Signal::SIGHUP,
        Signal::SIGINT,
        Signal::SIGTERM,
        Signal::SIGABRT,
        Signal::SIGQUIT,
        Signal::SIGFPE,
        Signal::SIGILL,
        Signal::SIGTRAP,
    ] {
        // SAFETY: the handler only stores into an atomic.
        let _ = unsafe { sigaction(sig, &note) };
    }
}

/// Run the group to completion, write the report and clean up. Returns the
/// process exit code.
pub fn supervise(mut session: Session, cfg: &Config) -> i32 {
    install_signal_handlers();

    // Priority over the watched child keeps poll deadlines honest.
    if unsafe { libc::nice(-5) } == -1 {
        tracing::warn!("can not renice supervisor");
    }

    let pid = session.child;
    let interval = Duration::from_micros(cfg.interval_usec);
    let start = Instant::now();
    let deadline = (cfg.real_time_limit > 0.0)
        .then(|| start + Duration::from_secs_f64(cfg.real_time_limit));

    tracing::info!(pid = pid.as_raw(), "entering supervision loop");

    let mut stat = WaitInfo::default();
    let mut exceed = Exceed::None;
    let mut running = true;

    while running {
        let caught = SIGNAL_CAUGHT.load(Ordering::Relaxed);
        if caught != 0 {
            eprintln!("Received signal {caught}, exiting...");
            cleanup(&mut session.cgroup, session.auto_named);
            return EXIT_SIGNALED;
        }

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => {
                if let Some(info) = WaitInfo::from_status(status) {
                    stat = info;
                    tracing::debug!(?info, "child exited");
                    break;
                }
            }
            // The child may not be registered yet right after the clone.
            Err(Errno::ECHILD) => std::thread::sleep(interval),
            Err(err) => tracing::warn!(%err, "waitpid"),
        }
        stat = WaitInfo::default();

        if cfg.cpu_time_limit > 0.0 && session.cgroup.cpu_usage() >= cfg.cpu_time_limit {
            exceed = Exceed::CpuTime;
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                exceed = Exceed::RealTime;
                break;
            }
        }
        if cfg.memory_limit > 0 && session.cgroup.memory_peak() >= cfg.memory_limit {
            exceed = Exceed::Memory;
            break;
        }

        // SIGCHLD can get lost across pid-namespace reparenting; spot the
        // zombie by hand and give waitpid one more chance.
        if process_state(pid) == Some('Z') {
            tracing::debug!("child became zombie");
            running = false;
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => {
                    if let Some(info) = WaitInfo::from_status(status) {
                        stat = info;
                    }
                }
                Err(_) => {
                    cleanup(&mut session.cgroup, session.auto_named);
                    return EXIT_REAP;
                }
            }
        }

        if cfg.output_limit > 0 {
            session.cgroup.update_output_count();
            let output = session.cgroup.output_usage();
            if output > cfg.output_limit {
                exceed = Exceed::Output;
                break;
            }
            tracing::trace!(
                cpu = session.cgroup.cpu_usage(),
                real = start.elapsed().as_secs_f64(),
                mem = session.cgroup.memory_current(),
                peak = session.cgroup.memory_peak(),
                output,
                "usage"
            );
        } else {
            tracing::trace!(
                cpu = session.cgroup.cpu_usage(),
                real = start.elapsed().as_secs_f64(),
                mem = session.cgroup.memory_current(),
                peak = session.cgroup.memory_peak(),
                "usage"
            );
        }

        if session.cgroup.empty() {
            tracing::debug!("no process remaining");
            running = false;
        }

        std::thread::sleep(interval);
    }

    let verdict = normalize(
        exceed,
        session.cgroup.memory_peak(),
        session.cgroup.cpu_usage(),
        start.elapsed().as_secs_f64(),
        stat,
        cfg,
    );
    report::write_status(&verdict, stat);

    cleanup(&mut session.cgroup, session.auto_named);

    if cfg.pass_exitcode {
        stat.exit_code
    } else {
        0
    }
}

/// Tear the group down: auto-named groups are destroyed, user-named ones
/// only emptied so their settings survive for the next invocation.
pub fn cleanup(cgroup: &mut Cgroup, auto_named: bool) {
    if auto_named {
        if !cgroup.destroy() {
            tracing::warn!("can not destroy cgroup");
        }
    } else {
        cgroup.killall();
    }
}

/// Process state letter from `/proc/<pid>/status`, if readable.
fn process_state(pid: Pid) -> Option<char> {
    let text = std::fs::read_to_string(format!("/proc/{}/status", pid.as_raw())).ok()?;
    parse_state(&text)
}

fn parse_state(status: &str) -> Option<char> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("State:"))
        .and_then(|rest| rest.trim_start().chars().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn cfg_with(cpu: f64, real: f64, memory: i64, output: i64) -> Config {
        Config {
            cpu_time_limit: cpu,
            real_time_limit: real,
            memory_limit: memory,
            output_limit: output,
            ..Config::default()
        }
    }

    #[test]
    fn exceed_rendering() {
        assert_eq!(Exceed::None.to_string(), "none");
        assert_eq!(Exceed::CpuTime.to_string(), "CPU_TIME");
        assert_eq!(Exceed::RealTime.to_string(), "REAL_TIME");
        assert_eq!(Exceed::Memory.to_string(), "MEMORY");
        assert_eq!(Exceed::Output.to_string(), "OUTPUT");
    }

    #[test]
    fn no_limits_means_no_exceed() {
        let cfg = cfg_with(-1.0, -1.0, -1, -1);
        let v = normalize(Exceed::None, 1 << 20, 0.5, 0.6, WaitInfo::default(), &cfg);
        assert_eq!(v.exceed, Exceed::None);
        assert_eq!(v.memory, 1 << 20);
        assert_eq!(v.cpu, 0.5);
    }

    #[test]
    fn memory_is_clamped_to_the_limit() {
        let cfg = cfg_with(-1.0, -1.0, 64 << 20, -1);
        let v = normalize(
            Exceed::None,
            (64 << 20) + 4096,
            0.1,
            0.2,
            WaitInfo::default(),
            &cfg,
        );
        assert_eq!(v.exceed, Exceed::Memory);
        assert_eq!(v.memory, 64 << 20);
    }

    #[test]
    fn memory_trips_on_exact_equality() {
        let cfg = cfg_with(-1.0, -1.0, 1_000_000, -1);
        let v = normalize(Exceed::None, 1_000_000, 0.0, 0.0, WaitInfo::default(), &cfg);
        assert_eq!(v.exceed, Exceed::Memory);
    }

    #[test]
    fn sigxcpu_forces_cpu_time_and_clamps() {
        let cfg = cfg_with(0.1, -1.0, -1, -1);
        let stat = WaitInfo {
            signaled: true,
            exit_code: 0,
            term_signal: libc::SIGXCPU,
        };
        let v = normalize(Exceed::None, 0, 0.04, 1.1, stat, &cfg);
        assert_eq!(v.exceed, Exceed::CpuTime);
        assert_eq!(v.cpu, 0.1);
    }

    #[test]
    fn sigxfsz_overrides_cpu() {
        let cfg = cfg_with(0.1, -1.0, -1, 1024);
        let stat = WaitInfo {
            signaled: true,
            exit_code: 0,
            term_signal: libc::SIGXFSZ,
        };
        let v = normalize(Exceed::CpuTime, 0, 0.2, 0.1, stat, &cfg);
        assert_eq!(v.exceed, Exceed::Output);
    }

    #[test]
    fn real_time_overwrites_last_and_clamps() {
        let cfg = cfg_with(-1.0, 0.5, 64 << 20, -1);
        let v = normalize(
            Exceed::None,
            (64 << 20) + 1,
            0.1,
            0.73,
            WaitInfo::default(),
            &cfg,
        );
        // Memory tripped too, but the real-time overwrite comes later in the
        // fixed order.
        assert_eq!(v.exceed, Exceed::RealTime);
        assert_eq!(v.real, 0.5);
        assert_eq!(v.memory, 64 << 20);
    }

    #[test]
    fn loop_verdict_survives_when_nothing_overwrites() {
        let cfg = cfg_with(-1.0, -1.0, -1, 1024);
        let v = normalize(Exceed::Output, 0, 0.0, 0.0, WaitInfo::default(), &cfg);
        assert_eq!(v.exceed, Exceed::Output);
    }

    #[test]
    fn state_parsing() {
        let sample = "Name:\tsleep\nUmask:\t0022\nState:\tZ (zombie)\nTgid:\t4242\n";
        assert_eq!(parse_state(sample), Some('Z'));
        assert_eq!(parse_state("Name: x\n"), None);
    }
}
