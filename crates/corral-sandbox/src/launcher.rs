//! Parent-side launch: cgroup programming, clone, handshake.
//!
//! `launch` turns a validated [`Config`] into a running child that is
//! already inside its cgroup and namespaces, with the supervisor free to
//! start polling. The cgroup is fully programmed before the clone, and the
//! child blocks on the go pipe until the parent has written it into the
//! tasks files, so no child instruction runs outside the group.
//!
//! On any failure the cgroup is cleaned up here (destroyed when auto-named)
//! and the error carries the documented exit code.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::{clone, CloneFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{geteuid, getuid, pipe2, setgid, setgroups, setuid, Gid, Pid, Uid};

use crate::cgroup::{Cgroup, CgroupLock, Subsys};
use crate::child::{child_main, BindMount, ChildSpec};
use crate::config::{Config, RlimitKey};
use crate::errors::{LaunchError, Stage};
use crate::seccomp;

/// Clone stack size. The child only mounts, drops privileges and execs.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// A successfully launched invocation, ready for supervision.
pub struct Session {
    pub cgroup: Cgroup,
    pub child: Pid,
    pub auto_named: bool,
    /// Advisory lock serializing invocations that share a cgroup name; held
    /// until the session drops.
    _lock: CgroupLock,
}

/// Namespace flags for this policy. A mount namespace is unconditional.
pub fn clone_flags(cfg: &Config) -> CloneFlags {
    let mut flags = CloneFlags::CLONE_NEWNS;
    if !cfg.enable_network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    if cfg.isolate_process {
        flags |= CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWIPC;
    }
    if cfg.uts.any() {
        flags |= CloneFlags::CLONE_NEWUTS;
    }
    flags
}

/// Launch the configured command. On success the child has passed its
/// namespace setup and sits inside the cgroup.
pub fn launch(cfg: &Config) -> Result<Session, LaunchError> {
    acquire_root(&cfg.groups)?;

    let (name, auto_named) = match cfg.cgname.as_deref() {
        Some(name) if !name.is_empty() => (name.to_string(), false),
        _ => (format!("corral{}", std::process::id()), true),
    };
    tracing::info!(cgname = %name, auto_named, "creating cgroup");

    let mut cgroup = Cgroup::create(&name).map_err(LaunchError::Create)?;
    let lock = match cgroup.lock() {
        Ok(lock) => lock,
        Err(err) => {
            fail_cgroup(&cgroup, auto_named);
            return Err(LaunchError::Lock(err));
        }
    };

    match launch_locked(cfg, &mut cgroup) {
        Ok(child) => Ok(Session {
            cgroup,
            child,
            auto_named,
            _lock: lock,
        }),
        Err(err) => {
            fail_cgroup(&cgroup, auto_named);
            Err(err)
        }
    }
}

fn fail_cgroup(cgroup: &Cgroup, auto_named: bool) {
    if auto_named {
        cgroup.destroy();
    } else {
        cgroup.killall();
    }
}

fn launch_locked(cfg: &Config, cgroup: &mut Cgroup) -> Result<Pid, LaunchError> {
    program_cgroup(cfg, cgroup)?;

    // The report pipe must not leak into the child.
    set_cloexec_on_status_fd()?;

    let spec = build_child_spec(cfg)?;
    let flags = clone_flags(cfg);

    let (go_r, go_w) = pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;
    let (err_r, err_w) = pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;

    let go_fd = go_r.as_raw_fd();
    let err_fd = err_w.as_raw_fd();

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    // SAFETY: the callback only runs in the child and ends in exec or _exit.
    let child = unsafe {
        clone(
            Box::new(|| child_main(&spec, go_fd, err_fd)),
            &mut stack,
            flags,
            Some(libc::SIGCHLD),
        )
    }
    .map_err(LaunchError::Clone)?;
    tracing::debug!(pid = child.as_raw(), ?flags, "cloned child");

    // Close the child-side pipe ends in this process so EOF semantics work.
    drop(go_r);
    drop(err_w);

    if let Err(err) = cgroup.attach(child) {
        reap(child);
        return Err(LaunchError::Attach(err));
    }

    release_child(child, &go_w)?;
    await_exec(child, &err_r)?;

    Ok(child)
}

/// The supervisor needs real root for cgroups and the identity switch.
fn acquire_root(groups: &[libc::gid_t]) -> Result<(), LaunchError> {
    if !geteuid().is_root() {
        return Err(LaunchError::NotRoot {
            euid: geteuid().as_raw(),
            uid: getuid().as_raw(),
        });
    }
    setuid(Uid::from_raw(0)).map_err(|_| LaunchError::NotRoot {
        euid: geteuid().as_raw(),
        uid: getuid().as_raw(),
    })?;
    setgid(Gid::from_raw(0)).map_err(LaunchError::Credentials)?;
    let groups: Vec<Gid> = groups.iter().map(|g| Gid::from_raw(*g)).collect();
    setgroups(&groups).map_err(LaunchError::Credentials)?;
    Ok(())
}

fn program_cgroup(cfg: &Config, cgroup: &mut Cgroup) -> Result<(), LaunchError> {
    if cfg.basic_devices {
        cgroup.limit_devices().map_err(LaunchError::Devices)?;
    }
    if cfg.memory_limit > 0 {
        cgroup
            .set_memory_limit(cfg.memory_limit)
            .map_err(LaunchError::Memory)?;
    }

    // Swap would hide memory usage from the accounting; the OOM killer stays
    // enabled so a runaway child dies instead of wedging the group.
    cgroup.set_quiet(Subsys::Memory, "memory.swappiness", "0\n");
    cgroup.set_quiet(Subsys::Memory, "memory.oom_control", "0\n");

    for (subsys, key, value) in &cfg.cgroup_options {
        cgroup
            .set(*subsys, key, value)
            .map_err(|err| LaunchError::CgroupOption {
                key: format!("{}:{key}", subsys.name()),
                err,
            })?;
    }

    // The group may be reused; clear out squatters and stale counters.
    cgroup.killall();
    cgroup.reset_usages().map_err(LaunchError::Reset)?;
    Ok(())
}

fn set_cloexec_on_status_fd() -> Result<(), LaunchError> {
    let ret = unsafe { libc::fcntl(crate::report::STATUS_FD, libc::F_SETFD, libc::FD_CLOEXEC) };
    if ret != 0 {
        let errno = Errno::last();
        if errno != Errno::EBADF {
            return Err(LaunchError::StatusFd(errno));
        }
    }
    Ok(())
}

fn build_child_spec(cfg: &Config) -> Result<ChildSpec, LaunchError> {
    let binds = cfg
        .bindfs_list
        .iter()
        .map(|(dest, src)| BindMount {
            dest: dest.clone(),
            src: src.clone(),
            readonly: cfg.remount_ro.contains(dest),
        })
        .collect();

    let mut rlimits: BTreeMap<RlimitKey, u64> = cfg.rlimits.clone();
    if cfg.cpu_time_limit > 0.0 {
        // Second line of defense behind the cgroup accounting: a filter-free
        // runaway still gets SIGXCPU from the kernel.
        rlimits.insert(RlimitKey::Cpu, cfg.cpu_time_limit.ceil() as u64);
    }
    let rlimits = rlimits
        .into_iter()
        .map(|(key, value)| (key.resource(), value))
        .collect();

    let filters = if cfg.syscall_list.is_empty() {
        Vec::new()
    } else {
        seccomp::compile(cfg.syscall_action, &cfg.syscall_list)?
    };

    let argv = cfg
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LaunchError::NulArg)?;
    let program = argv.first().cloned().ok_or(LaunchError::NulArg)?;

    let envp = build_env(cfg.reset_env, std::env::vars().collect(), &cfg.env_list)
        .into_iter()
        .map(|(key, value)| CString::new(format!("{key}={value}")))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LaunchError::NulArg)?;

    Ok(ChildSpec {
        uts: cfg.uts.clone(),
        keep_fds: cfg.keep_fds.iter().copied().collect(),
        binds,
        chroot_path: cfg.chroot_path.clone(),
        mount_proc: cfg.isolate_process,
        tmpfs_list: cfg.tmpfs_list.clone(),
        remount_dev: cfg.remount_dev,
        chdir_path: cfg.chdir_path.clone(),
        cmd_list: cfg.cmd_list.clone(),
        umask: cfg.umask,
        groups: cfg.groups.iter().map(|g| Gid::from_raw(*g)).collect(),
        gid: Gid::from_raw(cfg.gid),
        uid: Uid::from_raw(cfg.uid),
        rlimits,
        nice: cfg.nice,
        no_new_privs: cfg.no_new_privs,
        filters,
        program,
        argv,
        envp,
    })
}

/// Inherited environment, optionally wiped, with the configured pairs
/// appended in order (later pairs override earlier keys).
fn build_env(
    reset: bool,
    inherited: Vec<(String, String)>,
    extra: &[(String, String)],
) -> Vec<(String, String)> {
    let mut env = if reset { Vec::new() } else { inherited };
    for (key, value) in extra {
        match env.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.clone(),
            None => env.push((key.clone(), value.clone())),
        }
    }
    env
}

fn release_child(child: Pid, go_w: &OwnedFd) -> Result<(), LaunchError> {
    let byte = [0u8; 1];
    let n = unsafe { libc::write(go_w.as_raw_fd(), byte.as_ptr().cast(), 1) };
    if n != 1 {
        reap(child);
        return Err(LaunchError::Handshake);
    }
    Ok(())
}

/// Read the error pipe until EOF (exec reached) or a failure report.
fn await_exec(child: Pid, err_r: &OwnedFd) -> Result<(), LaunchError> {
    let mut buf = [0u8; 5];
    let mut filled = 0;
    loop {
        let n = unsafe {
            libc::read(
                err_r.as_raw_fd(),
                buf[filled..].as_mut_ptr().cast(),
                buf.len() - filled,
            )
        };
        if n < 0 {
            if Errno::last() == Errno::EINTR {
                continue;
            }
            reap(child);
            return Err(LaunchError::Handshake);
        }
        if n == 0 {
            break;
        }
        filled += n as usize;
        if filled == buf.len() {
            break;
        }
    }

    if filled == 0 {
        return Ok(());
    }

    reap(child);
    let stage = Stage::from_byte(buf[0]).unwrap_or(Stage::Handshake);
    let errno = if filled >= 5 {
        Errno::from_raw(i32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]))
    } else {
        Errno::UnknownErrno
    };
    Err(LaunchError::Child { stage, errno })
}

fn reap(child: Pid) {
    let _ = kill(child, Signal::SIGKILL);
    let _ = waitpid(child, None);
}
