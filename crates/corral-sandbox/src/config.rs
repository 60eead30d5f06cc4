//! Sandbox policy bundle.
//!
//! A [`Config`] is assembled by the CLI option table (or by an embedding
//! program), checked once by [`validate`](crate::validate::validate), and
//! read-only from then on. Limit fields use `-1` as the "no limit" sentinel
//! so a single signed value carries both states.
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `cpu_time_limit` / `real_time_limit` | -1 (off) |
//! | `memory_limit` / `output_limit` | -1 (off) |
//! | `isolate_process` | true (new PID + IPC namespace) |
//! | `enable_network` | true |
//! | `no_new_privs` | true |
//! | `rlimits` | NOFILE 256, NPROC 2048, RTPRIO 0, CORE 0 |
//! | `umask` | 0o022 |
//! | `interval_usec` | 20000 |

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use nix::sys::resource::Resource;
use nix::unistd::{getgid, getuid};

use crate::cgroup::Subsys;

/// Default supervision poll interval, in microseconds.
pub const DEFAULT_INTERVAL_USEC: u64 = 20_000;

/// Memory limits in `(0, MIN_MEMORY_LIMIT)` are snapped up to this value;
/// below it the kernel OOM-kills the child before it finishes `execvp`.
pub const MIN_MEMORY_LIMIT: i64 = 500_000;

/// What happens to syscalls the filter text does not name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallAction {
    /// Unlisted syscalls fail with EPERM (whitelist mode).
    DefaultEperm,
    /// Unlisted syscalls are allowed (blacklist mode).
    OthersEperm,
}

/// Rlimit slots the policy can program in the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RlimitKey {
    Core,
    Cpu,
    Fsize,
    Nice,
    Nofile,
    Nproc,
    Rtprio,
    Stack,
}

impl RlimitKey {
    pub fn resource(self) -> Resource {
        match self {
            RlimitKey::Core => Resource::RLIMIT_CORE,
            RlimitKey::Cpu => Resource::RLIMIT_CPU,
            RlimitKey::Fsize => Resource::RLIMIT_FSIZE,
            RlimitKey::Nice => Resource::RLIMIT_NICE,
            RlimitKey::Nofile => Resource::RLIMIT_NOFILE,
            RlimitKey::Nproc => Resource::RLIMIT_NPROC,
            RlimitKey::Rtprio => Resource::RLIMIT_RTPRIO,
            RlimitKey::Stack => Resource::RLIMIT_STACK,
        }
    }
}

/// UTS identity overrides. Any populated field enables `CLONE_NEWUTS`.
///
/// `sysname`, `release` and `version` are best-effort: stock kernels expose
/// no interface to change them, so the child writes to the corresponding
/// `/proc/sys/kernel` files and ignores failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtsSpec {
    pub nodename: Option<String>,
    pub domainname: Option<String>,
    pub sysname: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
}

impl UtsSpec {
    pub fn any(&self) -> bool {
        self.nodename.is_some()
            || self.domainname.is_some()
            || self.sysname.is_some()
            || self.release.is_some()
            || self.version.is_some()
    }
}

/// The complete, immutable policy for one supervised invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Command and arguments; must be non-empty.
    pub argv: Vec<String>,

    /// CPU seconds, fractional; -1 disables.
    pub cpu_time_limit: f64,
    /// Wall-clock seconds, fractional; -1 disables.
    pub real_time_limit: f64,
    /// Bytes; -1 disables. Positive values are kept at or above
    /// [`MIN_MEMORY_LIMIT`] by the parser.
    pub memory_limit: i64,
    /// Bytes written by the whole cgroup; -1 disables.
    pub output_limit: i64,
    pub rlimits: BTreeMap<RlimitKey, u64>,

    /// Identity the child drops to; both must be non-zero.
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    /// Supplementary groups (root-only option).
    pub groups: Vec<libc::gid_t>,
    pub umask: libc::mode_t,
    pub nice: i32,

    /// New PID + IPC namespaces.
    pub isolate_process: bool,
    /// When false, the child gets an empty network namespace.
    pub enable_network: bool,
    /// Cgroup device whitelist (null, zero, full, random, urandom).
    pub basic_devices: bool,
    /// Replace /dev with a fresh tmpfs holding only the basic nodes.
    pub remount_dev: bool,
    pub reset_env: bool,
    pub no_new_privs: bool,

    /// Ordered (dest, src) bind mounts; order is user-visible because later
    /// path operands resolve through earlier binds.
    pub bindfs_list: Vec<(PathBuf, PathBuf)>,
    /// Bind destinations remounted read-only right after the bind.
    pub remount_ro: BTreeSet<PathBuf>,
    /// Ordered (path, bytes) tmpfs mounts; bytes = 0 mounts read-only.
    pub tmpfs_list: Vec<(PathBuf, i64)>,
    pub chroot_path: Option<PathBuf>,
    pub chdir_path: Option<PathBuf>,
    pub uts: UtsSpec,

    /// Ordered (key, value) pairs appended to the environment, optionally
    /// after a full reset.
    pub env_list: Vec<(String, String)>,
    /// File descriptors exempt from the pre-exec close sweep.
    pub keep_fds: BTreeSet<i32>,
    /// Shell commands run after the mount plan (root-only option).
    pub cmd_list: Vec<String>,

    pub syscall_action: SyscallAction,
    /// Filter text in the grammar of [`crate::seccomp`]; empty means no
    /// filter is installed.
    pub syscall_list: String,

    /// Empty means auto-generated and destroyed on exit; set means reused
    /// and left in place.
    pub cgname: Option<String>,
    pub cgroup_options: Vec<(Subsys, String, String)>,

    pub interval_usec: u64,
    pub pass_exitcode: bool,
}

impl Default for Config {
    fn default() -> Self {
        let mut rlimits = BTreeMap::new();
        rlimits.insert(RlimitKey::Nofile, 256);
        rlimits.insert(RlimitKey::Nproc, 2048);
        rlimits.insert(RlimitKey::Rtprio, 0);
        rlimits.insert(RlimitKey::Core, 0);

        Config {
            argv: Vec::new(),
            cpu_time_limit: -1.0,
            real_time_limit: -1.0,
            memory_limit: -1,
            output_limit: -1,
            rlimits,
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            groups: Vec::new(),
            umask: 0o022,
            nice: 0,
            isolate_process: true,
            enable_network: true,
            basic_devices: false,
            remount_dev: false,
            reset_env: false,
            no_new_privs: true,
            bindfs_list: Vec::new(),
            remount_ro: BTreeSet::new(),
            tmpfs_list: Vec::new(),
            chroot_path: None,
            chdir_path: None,
            uts: UtsSpec::default(),
            env_list: Vec::new(),
            keep_fds: BTreeSet::new(),
            cmd_list: Vec::new(),
            syscall_action: SyscallAction::OthersEperm,
            syscall_list: String::new(),
            cgname: None,
            cgroup_options: Vec::new(),
            interval_usec: DEFAULT_INTERVAL_USEC,
            pass_exitcode: false,
        }
    }
}

/// Snap a requested memory limit onto the supported range. Returns the
/// effective limit and whether it was raised.
pub fn clamp_memory_limit(bytes: i64) -> (i64, bool) {
    if bytes > 0 && bytes < MIN_MEMORY_LIMIT {
        (MIN_MEMORY_LIMIT, true)
    } else {
        (bytes, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let cfg = Config::default();
        assert_eq!(cfg.cpu_time_limit, -1.0);
        assert_eq!(cfg.memory_limit, -1);
        assert!(cfg.isolate_process);
        assert!(cfg.enable_network);
        assert!(cfg.no_new_privs);
        assert!(!cfg.basic_devices);
        assert_eq!(cfg.interval_usec, 20_000);
        assert_eq!(cfg.umask, 0o022);
        assert_eq!(cfg.rlimits.get(&RlimitKey::Nofile), Some(&256));
        assert_eq!(cfg.rlimits.get(&RlimitKey::Nproc), Some(&2048));
        assert_eq!(cfg.syscall_action, SyscallAction::OthersEperm);
    }

    #[test]
    fn memory_clamp_raises_small_positive_values() {
        assert_eq!(clamp_memory_limit(1), (MIN_MEMORY_LIMIT, true));
        assert_eq!(clamp_memory_limit(499_999), (MIN_MEMORY_LIMIT, true));
        assert_eq!(clamp_memory_limit(MIN_MEMORY_LIMIT), (MIN_MEMORY_LIMIT, false));
        assert_eq!(clamp_memory_limit(-1), (-1, false));
        assert_eq!(clamp_memory_limit(64 << 20), (64 << 20, false));
    }

    #[test]
    fn uts_presence() {
        let mut uts = UtsSpec::default();
        assert!(!uts.any());
        uts.domainname = Some("grader".into());
        assert!(uts.any());
    }
}
