//! Cgroup v1 facade.
//!
//! A [`Cgroup`] owns the per-subsystem directories for one invocation under
//! `/sys/fs/cgroup/{memory,cpuacct,devices,freezer}/<name>` and exposes the
//! handful of reads and writes the supervisor needs. All accounting reads
//! degrade to zero with a trace message instead of failing: a vanished file
//! mid-poll means the group is being torn down, not that supervision should
//! abort.
//!
//! Output accounting has no v1 controller, so it is approximated by summing
//! the `wchar` counter of `/proc/<pid>/io` over every task ever observed in
//! the group. Best effort by design.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;

/// Mount point of the v1 hierarchy.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Device nodes allowed through the devices whitelist: null, zero, full,
/// random, urandom.
const BASIC_DEVICES: [&str; 5] = [
    "c 1:3 rwm",
    "c 1:5 rwm",
    "c 1:7 rwm",
    "c 1:8 rwm",
    "c 1:9 rwm",
];

/// Error talking to the cgroup filesystem.
#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("lock {path}: {source}")]
    Lock { path: PathBuf, source: io::Error },
}

/// The v1 subsystems a sandbox cgroup spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Subsys {
    Memory,
    Cpuacct,
    Devices,
    Freezer,
}

impl Subsys {
    pub const ALL: [Subsys; 4] = [
        Subsys::Memory,
        Subsys::Cpuacct,
        Subsys::Devices,
        Subsys::Freezer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Subsys::Memory => "memory",
            Subsys::Cpuacct => "cpuacct",
            Subsys::Devices => "devices",
            Subsys::Freezer => "freezer",
        }
    }

    pub fn from_name(name: &str) -> Option<Subsys> {
        match name {
            "memory" => Some(Subsys::Memory),
            "cpuacct" => Some(Subsys::Cpuacct),
            "devices" => Some(Subsys::Devices),
            "freezer" => Some(Subsys::Freezer),
            _ => None,
        }
    }
}

/// Handle to one invocation's control group.
#[derive(Debug)]
pub struct Cgroup {
    name: String,
    root: PathBuf,
    /// Highest `wchar` seen per task, so output survives task exit.
    output_seen: HashMap<i32, u64>,
}

impl Cgroup {
    /// Create (or reuse) the group directory in every subsystem.
    pub fn create(name: &str) -> Result<Cgroup, CgroupError> {
        let cg = Cgroup {
            name: name.to_string(),
            root: PathBuf::from(CGROUP_ROOT),
            output_seen: HashMap::new(),
        };
        for subsys in Subsys::ALL {
            let path = cg.subsys_path(subsys);
            fs::create_dir_all(&path).map_err(|source| CgroupError::Create { path: path.clone(), source })?;
        }
        tracing::debug!(name, "cgroup ready");
        Ok(cg)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All subsystem directories exist.
    pub fn valid(&self) -> bool {
        Subsys::ALL.iter().all(|s| self.subsys_path(*s).is_dir())
    }

    pub fn subsys_path(&self, subsys: Subsys) -> PathBuf {
        self.root.join(subsys.name()).join(&self.name)
    }

    fn control_file(&self, subsys: Subsys, key: &str) -> PathBuf {
        self.subsys_path(subsys).join(key)
    }

    /// Write one control file.
    pub fn set(&self, subsys: Subsys, key: &str, value: &str) -> Result<(), CgroupError> {
        let path = self.control_file(subsys, key);
        fs::write(&path, value).map_err(|source| CgroupError::Write { path: path.clone(), source })
    }

    /// Write one control file, tracing failure instead of reporting it.
    pub fn set_quiet(&self, subsys: Subsys, key: &str, value: &str) {
        if let Err(err) = self.set(subsys, key, value) {
            tracing::trace!(%err, "ignored cgroup write");
        }
    }

    fn read_u64(&self, subsys: Subsys, key: &str) -> Option<u64> {
        let path = self.control_file(subsys, key);
        let text = fs::read_to_string(&path).ok()?;
        text.trim().parse().ok()
    }

    /// Restrict the group to the basic device nodes.
    pub fn limit_devices(&self) -> Result<(), CgroupError> {
        self.set(Subsys::Devices, "devices.deny", "a\n")?;
        for entry in BASIC_DEVICES {
            self.set(Subsys::Devices, "devices.allow", entry)?;
        }
        Ok(())
    }

    /// Program the memory ceiling. The memory+swap ceiling is written too
    /// when the kernel has swap accounting; without it the write fails and
    /// swappiness 0 is the remaining guard.
    pub fn set_memory_limit(&self, bytes: i64) -> Result<(), CgroupError> {
        let value = format!("{bytes}\n");
        self.set(Subsys::Memory, "memory.limit_in_bytes", &value)?;
        self.set_quiet(Subsys::Memory, "memory.memsw.limit_in_bytes", &value);
        Ok(())
    }

    /// Zero the usage counters left by any previous occupant.
    pub fn reset_usages(&mut self) -> Result<(), CgroupError> {
        self.set(Subsys::Cpuacct, "cpuacct.usage", "0\n")?;
        self.set(Subsys::Memory, "memory.max_usage_in_bytes", "0\n")?;
        self.set_quiet(Subsys::Memory, "memory.memsw.max_usage_in_bytes", "0\n");
        self.output_seen.clear();
        Ok(())
    }

    /// Combined CPU time of the group, in seconds.
    pub fn cpu_usage(&self) -> f64 {
        self.read_u64(Subsys::Cpuacct, "cpuacct.usage").unwrap_or(0) as f64 / 1e9
    }

    /// Peak memory (+swap when accounted) in bytes.
    pub fn memory_peak(&self) -> i64 {
        self.read_u64(Subsys::Memory, "memory.memsw.max_usage_in_bytes")
            .or_else(|| self.read_u64(Subsys::Memory, "memory.max_usage_in_bytes"))
            .unwrap_or(0) as i64
    }

    /// Current memory (+swap when accounted) in bytes.
    pub fn memory_current(&self) -> i64 {
        self.read_u64(Subsys::Memory, "memory.memsw.usage_in_bytes")
            .or_else(|| self.read_u64(Subsys::Memory, "memory.usage_in_bytes"))
            .unwrap_or(0) as i64
    }

    /// Pids currently attached to the group.
    pub fn tasks(&self) -> Vec<i32> {
        let path = self.control_file(Subsys::Memory, "tasks");
        let Ok(text) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        text.lines().filter_map(|l| l.trim().parse().ok()).collect()
    }

    pub fn empty(&self) -> bool {
        self.tasks().is_empty()
    }

    /// Move a process into the group (every subsystem).
    pub fn attach(&self, pid: Pid) -> Result<(), CgroupError> {
        let line = format!("{}\n", pid.as_raw());
        for subsys in Subsys::ALL {
            self.set(subsys, "tasks", &line)?;
        }
        Ok(())
    }

    /// Refresh the per-task output counters from `/proc/<pid>/io`.
    pub fn update_output_count(&mut self) {
        for pid in self.tasks() {
            if let Some(bytes) = read_wchar(pid) {
                let seen = self.output_seen.entry(pid).or_insert(0);
                if bytes > *seen {
                    *seen = bytes;
                }
            }
        }
    }

    /// Bytes written by every task ever seen in the group.
    pub fn output_usage(&self) -> i64 {
        self.output_seen.values().map(|v| *v as i64).sum()
    }

    /// SIGKILL everything in the group. The freezer stops the group first so
    /// a forking child cannot outrun the kill sweep.
    pub fn killall(&self) {
        for round in 0..50 {
            let tasks = self.tasks();
            if tasks.is_empty() {
                return;
            }
            tracing::debug!(round, count = tasks.len(), "killing cgroup tasks");
            self.set_quiet(Subsys::Freezer, "freezer.state", "FROZEN\n");
            for pid in &tasks {
                let _ = kill(Pid::from_raw(*pid), Signal::SIGKILL);
            }
            self.set_quiet(Subsys::Freezer, "freezer.state", "THAWED\n");
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        tracing::warn!(name = %self.name, "cgroup still has tasks after kill sweep");
    }

    /// Kill everything and remove the group directories. Returns false when
    /// some directory survived.
    pub fn destroy(&self) -> bool {
        self.killall();
        let mut ok = true;
        for subsys in Subsys::ALL {
            let path = self.subsys_path(subsys);
            if path.is_dir() {
                if let Err(err) = fs::remove_dir(&path) {
                    tracing::warn!(path = %path.display(), %err, "can not remove cgroup dir");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Take the exclusive advisory lock that serializes invocations sharing
    /// this group name. Held for the whole supervision.
    pub fn lock(&self) -> Result<CgroupLock, CgroupError> {
        let path = self.subsys_path(Subsys::Memory);
        let file = fs::File::open(&path).map_err(|source| CgroupError::Lock { path: path.clone(), source })?;
        rustix::fs::flock(&file, rustix::fs::FlockOperation::LockExclusive).map_err(|errno| {
            CgroupError::Lock {
                path: path.clone(),
                source: io::Error::from(errno),
            }
        })?;
        Ok(CgroupLock { file })
    }
}

/// Exclusive advisory lock on a cgroup subsystem directory; released on drop.
#[derive(Debug)]
pub struct CgroupLock {
    file: fs::File,
}

impl Drop for CgroupLock {
    fn drop(&mut self) {
        let _ = rustix::fs::flock(&self.file, rustix::fs::FlockOperation::Unlock);
    }
}

fn read_wchar(pid: i32) -> Option<u64> {
    let text = fs::read_to_string(format!("/proc/{pid}/io")).ok()?;
    parse_wchar(&text)
}

fn parse_wchar(text: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix("wchar:"))
        .and_then(|rest| rest.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsys_roundtrip() {
        for subsys in Subsys::ALL {
            assert_eq!(Subsys::from_name(subsys.name()), Some(subsys));
        }
        assert_eq!(Subsys::from_name("blkio"), None);
    }

    #[test]
    fn subsys_paths_follow_v1_layout() {
        let cg = Cgroup {
            name: "corral42".into(),
            root: PathBuf::from("/sys/fs/cgroup"),
            output_seen: HashMap::new(),
        };
        assert_eq!(
            cg.subsys_path(Subsys::Freezer),
            PathBuf::from("/sys/fs/cgroup/freezer/corral42")
        );
        assert_eq!(
            cg.control_file(Subsys::Memory, "memory.limit_in_bytes"),
            PathBuf::from("/sys/fs/cgroup/memory/corral42/memory.limit_in_bytes")
        );
    }

    #[test]
    fn wchar_parsing() {
        let sample = "rchar: 4292\nwchar: 12345\nsyscr: 14\nsyscw: 1\n";
        assert_eq!(parse_wchar(sample), Some(12345));
        assert_eq!(parse_wchar("rchar: 1\n"), None);
    }

    #[test]
    fn output_counter_keeps_exited_tasks() {
        let mut cg = Cgroup {
            name: "t".into(),
            root: PathBuf::from("/nonexistent"),
            output_seen: HashMap::new(),
        };
        cg.output_seen.insert(100, 4096);
        cg.output_seen.insert(101, 1024);
        // Task 101 exits; its contribution must not vanish.
        assert_eq!(cg.output_usage(), 5120);
    }
}
