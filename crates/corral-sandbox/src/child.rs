//! Child-side initialization between `clone` and `execvp`.
//!
//! Runs in the cloned child while the parent holds the handshake pipes. The
//! order is a user-visible contract (it is the documented option-processing
//! order):
//!
//! 1. Wait for the release byte (the parent has put us in the cgroup)
//! 2. UTS fields
//! 3. Close every fd not kept
//! 4. Make mounts private, then ordered bind mounts (ro variants remounted)
//! 5. chroot, then `chdir("/")`
//! 6. Fresh /proc when a PID namespace exists
//! 7. tmpfs overlays in order
//! 8. Rebuild /dev when requested
//! 9. chdir into the working directory
//! 10. Post-mount shell commands
//! 11. umask, then setgroups, setgid, setuid (that order is mandatory)
//! 12. rlimits
//! 13. nice
//! 14. no-new-privs
//! 15. Install the syscall filter (last: it must cover as little of our own
//!     setup as possible, and needs no-new-privs already set)
//! 16. `execvpe`
//!
//! Any failure writes `(stage, errno)` to the error pipe and `_exit`s; the
//! pipe is close-on-exec, so the parent reads EOF exactly when the exec
//! succeeds. Everything the child touches is preallocated in
//! [`ChildSpec`] before the clone.

use std::convert::Infallible;
use std::ffi::CString;
use std::io::{self, Write as _};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::process::Command;

use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::stat::{makedev, mknod, umask, Mode, SFlag};
use nix::unistd::{chdir, chroot, execvpe, setgid, setgroups, sethostname, setuid, Gid, Uid};
use seccompiler::BpfProgram;

use crate::config::UtsSpec;
use crate::errors::Stage;
use crate::seccomp;

/// One bind mount, in plan order.
#[derive(Debug, Clone)]
pub struct BindMount {
    pub dest: PathBuf,
    pub src: PathBuf,
    pub readonly: bool,
}

/// Everything the child needs, resolved and allocated before `clone`.
#[derive(Debug)]
pub struct ChildSpec {
    pub uts: UtsSpec,
    pub keep_fds: Vec<i32>,
    pub binds: Vec<BindMount>,
    pub chroot_path: Option<PathBuf>,
    pub mount_proc: bool,
    pub tmpfs_list: Vec<(PathBuf, i64)>,
    pub remount_dev: bool,
    pub chdir_path: Option<PathBuf>,
    pub cmd_list: Vec<String>,
    pub umask: libc::mode_t,
    pub groups: Vec<Gid>,
    pub gid: Gid,
    pub uid: Uid,
    pub rlimits: Vec<(Resource, u64)>,
    pub nice: i32,
    pub no_new_privs: bool,
    pub filters: Vec<BpfProgram>,
    pub program: CString,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
}

/// Entry point of the cloned child. Never returns.
pub fn child_main(spec: &ChildSpec, go_fd: RawFd, err_fd: RawFd) -> ! {
    wait_for_release(go_fd);
    match run(spec, err_fd) {
        Ok(never) => match never {},
        Err((stage, errno)) => {
            report_failure(err_fd, stage, errno);
            unsafe { libc::_exit(stage.code()) }
        }
    }
}

fn run(spec: &ChildSpec, err_fd: RawFd) -> Result<Infallible, (Stage, Errno)> {
    let fs_err = |e: Errno| (Stage::Filesystem, e);

    apply_uts(&spec.uts).map_err(fs_err)?;
    sweep_fds(&spec.keep_fds, err_fd);
    make_rprivate().map_err(fs_err)?;
    apply_binds(&spec.binds).map_err(fs_err)?;

    if let Some(root) = &spec.chroot_path {
        chroot(root.as_path()).map_err(fs_err)?;
        chdir("/").map_err(fs_err)?;
    }
    if spec.mount_proc {
        mount_proc().map_err(fs_err)?;
    }
    apply_tmpfs(&spec.tmpfs_list).map_err(fs_err)?;
    if spec.remount_dev {
        rebuild_dev().map_err(fs_err)?;
    }
    if let Some(dir) = &spec.chdir_path {
        chdir(dir.as_path()).map_err(fs_err)?;
    }

    run_commands(&spec.cmd_list).map_err(|e| (Stage::Command, e))?;

    umask(Mode::from_bits_truncate(spec.umask));
    drop_identity(spec).map_err(|e| (Stage::Credentials, e))?;

    apply_rlimits(&spec.rlimits).map_err(|e| (Stage::Limits, e))?;

    // Advisory; a refused nice keeps the inherited priority.
    unsafe { libc::nice(spec.nice) };

    if spec.no_new_privs {
        set_no_new_privs().map_err(|e| (Stage::Limits, e))?;
    }

    if let Err(err) = seccomp::install(&spec.filters) {
        writeln!(io::stderr(), "corral: seccomp: {err}").ok();
        return Err((Stage::Seccomp, Errno::EINVAL));
    }

    execvpe(&spec.program, &spec.argv, &spec.envp).map_err(|e| (Stage::Exec, e))
}

/// Block until the parent has attached us to the cgroup.
fn wait_for_release(go_fd: RawFd) {
    let mut byte = [0u8; 1];
    loop {
        let n = unsafe { libc::read(go_fd, byte.as_mut_ptr().cast(), 1) };
        if n == 1 {
            break;
        }
        if n == 0 || Errno::last() != Errno::EINTR {
            // Parent vanished before releasing us.
            unsafe { libc::_exit(Stage::Handshake.code()) }
        }
    }
    unsafe { libc::close(go_fd) };
}

fn report_failure(err_fd: RawFd, stage: Stage, errno: Errno) {
    let mut buf = [0u8; 5];
    buf[0] = stage as u8;
    buf[1..5].copy_from_slice(&(errno as i32).to_le_bytes());
    let mut written = 0;
    while written < buf.len() {
        let n = unsafe { libc::write(err_fd, buf[written..].as_ptr().cast(), buf.len() - written) };
        if n <= 0 {
            break;
        }
        written += n as usize;
    }
}

fn apply_uts(uts: &UtsSpec) -> Result<(), Errno> {
    if let Some(nodename) = &uts.nodename {
        sethostname(nodename)?;
    }
    if let Some(domainname) = &uts.domainname {
        let ret = unsafe {
            libc::setdomainname(domainname.as_ptr().cast::<libc::c_char>(), domainname.len())
        };
        if ret != 0 {
            return Err(Errno::last());
        }
    }
    // Stock kernels expose no syscall for these; try the proc files and move
    // on when they refuse the write.
    for (path, value) in [
        ("/proc/sys/kernel/ostype", &uts.sysname),
        ("/proc/sys/kernel/osrelease", &uts.release),
        ("/proc/sys/kernel/version", &uts.version),
    ] {
        if let Some(value) = value {
            let _ = std::fs::write(path, value);
        }
    }
    Ok(())
}

/// Close every fd except stdio, the kept set and the error pipe.
fn sweep_fds(keep: &[i32], err_fd: RawFd) {
    let mut doomed = Vec::new();
    if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
        for entry in entries.flatten() {
            if let Ok(fd) = entry.file_name().to_string_lossy().parse::<i32>() {
                if fd > 2 && fd != err_fd && !keep.contains(&fd) {
                    doomed.push(fd);
                }
            }
        }
    }
    for fd in doomed {
        unsafe { libc::close(fd) };
    }
}

/// Keep bind mounts from propagating back to the host through shared
/// subtrees.
fn make_rprivate() -> Result<(), Errno> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
}

fn apply_binds(binds: &[BindMount]) -> Result<(), Errno> {
    for bind in binds {
        mount(
            Some(bind.src.as_path()),
            bind.dest.as_path(),
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )?;
        if bind.readonly {
            mount(
                None::<&str>,
                bind.dest.as_path(),
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )?;
        }
    }
    Ok(())
}

fn mount_proc() -> Result<(), Errno> {
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
}

fn apply_tmpfs(list: &[(PathBuf, i64)]) -> Result<(), Errno> {
    for (path, bytes) in list {
        if *bytes > 0 {
            let data = format!("size={bytes}");
            mount(
                Some("tmpfs"),
                path.as_path(),
                Some("tmpfs"),
                MsFlags::MS_NOSUID,
                Some(data.as_str()),
            )?;
        } else {
            mount(
                Some("tmpfs"),
                path.as_path(),
                Some("tmpfs"),
                MsFlags::MS_NOSUID | MsFlags::MS_RDONLY,
                None::<&str>,
            )?;
        }
    }
    Ok(())
}

/// Replace /dev with a fresh tmpfs holding only the basic nodes.
fn rebuild_dev() -> Result<(), Errno> {
    // /dev may not be a mount point at all; that is fine.
    let _ = umount2("/dev", MntFlags::MNT_DETACH);
    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID,
        Some("size=65536,mode=755"),
    )?;
    for (name, major, minor) in [
        ("/dev/null", 1, 3),
        ("/dev/zero", 1, 5),
        ("/dev/full", 1, 7),
        ("/dev/random", 1, 8),
        ("/dev/urandom", 1, 9),
    ] {
        mknod(
            name,
            SFlag::S_IFCHR,
            Mode::from_bits_truncate(0o666),
            makedev(major, minor),
        )?;
        // mknod honors the inherited umask; force the intended mode.
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(name, std::fs::Permissions::from_mode(0o666))
            .map_err(errno_of)?;
    }
    Ok(())
}

fn run_commands(cmds: &[String]) -> Result<(), Errno> {
    for cmd in cmds {
        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .map_err(errno_of)?;
        if !status.success() {
            writeln!(io::stderr(), "corral: command failed: {cmd}").ok();
            return Err(Errno::EINVAL);
        }
    }
    Ok(())
}

fn drop_identity(spec: &ChildSpec) -> Result<(), Errno> {
    setgroups(&spec.groups)?;
    setgid(spec.gid)?;
    setuid(spec.uid)?;
    Ok(())
}

fn apply_rlimits(rlimits: &[(Resource, u64)]) -> Result<(), Errno> {
    for (resource, limit) in rlimits {
        setrlimit(*resource, *limit, *limit)?;
    }
    Ok(())
}

fn set_no_new_privs() -> Result<(), Errno> {
    let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if ret != 0 {
        Err(Errno::last())
    } else {
        Ok(())
    }
}

fn errno_of(e: io::Error) -> Errno {
    Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_report_layout() {
        // The wire format is one stage byte plus a little-endian errno.
        let mut buf = [0u8; 5];
        buf[0] = Stage::Seccomp as u8;
        buf[1..5].copy_from_slice(&(Errno::EPERM as i32).to_le_bytes());
        assert_eq!(Stage::from_byte(buf[0]), Some(Stage::Seccomp));
        let errno = i32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(Errno::from_raw(errno), Errno::EPERM);
    }
}
