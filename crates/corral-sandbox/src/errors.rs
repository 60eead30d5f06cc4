//! Launch errors and the process exit-code policy.
//!
//! Exit codes are part of the external contract: 0 is a completed
//! supervision (or the child's own status under pass-exitcode), 1..9 are
//! validation, environment and cgroup programming failures, and 10..20
//! encode which launch stage failed as `10 + stage`.

use nix::errno::Errno;
use thiserror::Error;

use crate::cgroup::CgroupError;
use crate::seccomp::FilterError;

/// Exit code when an external signal aborts supervision.
pub const EXIT_SIGNALED: i32 = 4;
/// Exit code when the zombie fallback can not reap the child.
pub const EXIT_REAP: i32 = 6;

/// Launch pipeline stages. The stage number reaches the parent over the
/// error pipe when the child fails before `execvp`, and becomes exit code
/// `10 + stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    /// Creating the handshake pipes.
    Pipe = 1,
    /// The clone call itself.
    Clone = 2,
    /// Moving the child into the cgroup.
    Attach = 3,
    /// Releasing the child / reading its verdict.
    Handshake = 4,
    /// UTS fields, fd sweep, mounts, chroot, /proc, tmpfs, /dev, chdir.
    Filesystem = 5,
    /// Post-mount shell commands.
    Command = 6,
    /// umask, setgroups, setgid, setuid.
    Credentials = 7,
    /// rlimits, nice, no-new-privs.
    Limits = 8,
    /// Installing the syscall filter.
    Seccomp = 9,
    /// The exec itself.
    Exec = 10,
}

impl Stage {
    pub fn code(self) -> i32 {
        10 + self as i32
    }

    pub fn from_byte(byte: u8) -> Option<Stage> {
        match byte {
            1 => Some(Stage::Pipe),
            2 => Some(Stage::Clone),
            3 => Some(Stage::Attach),
            4 => Some(Stage::Handshake),
            5 => Some(Stage::Filesystem),
            6 => Some(Stage::Command),
            7 => Some(Stage::Credentials),
            8 => Some(Stage::Limits),
            9 => Some(Stage::Seccomp),
            10 => Some(Stage::Exec),
            _ => None,
        }
    }
}

/// Anything that can stop a launch before supervision starts.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("root required (euid = {euid}, uid = {uid})")]
    NotRoot { euid: u32, uid: u32 },

    #[error("can not normalize credentials: {0}")]
    Credentials(Errno),

    #[error("can not create cgroup: {0}")]
    Create(CgroupError),

    #[error("can not lock cgroup: {0}")]
    Lock(CgroupError),

    #[error("can not enable devices whitelist: {0}")]
    Devices(CgroupError),

    #[error("can not set memory limit: {0}")]
    Memory(CgroupError),

    #[error("can not set cgroup option {key}: {err}")]
    CgroupOption { key: String, err: CgroupError },

    #[error("can not reset usage counters: {0}")]
    Reset(CgroupError),

    #[error("can not set FD_CLOEXEC on fd 3: {0}")]
    StatusFd(Errno),

    #[error("syscall filter: {0}")]
    Filter(#[from] FilterError),

    #[error("argument contains NUL byte")]
    NulArg,

    #[error("sync pipe: {0}")]
    Pipe(Errno),

    #[error("clone: {0}")]
    Clone(Errno),

    #[error("can not move child into cgroup: {0}")]
    Attach(CgroupError),

    #[error("handshake with child failed")]
    Handshake,

    #[error("child setup failed at stage {stage:?}: {errno}")]
    Child { stage: Stage, errno: Errno },
}

impl LaunchError {
    /// The documented exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::NotRoot { .. }
            | LaunchError::Credentials(_)
            | LaunchError::Create(_)
            | LaunchError::Lock(_)
            | LaunchError::Filter(_)
            | LaunchError::NulArg
            | LaunchError::Devices(_) => 1,
            LaunchError::Memory(_) => 2,
            LaunchError::Reset(_) => 4,
            LaunchError::StatusFd(_) => 5,
            LaunchError::CgroupOption { .. } => 7,
            LaunchError::Pipe(_) => Stage::Pipe.code(),
            LaunchError::Clone(_) => Stage::Clone.code(),
            LaunchError::Attach(_) => Stage::Attach.code(),
            LaunchError::Handshake => Stage::Handshake.code(),
            LaunchError::Child { stage, .. } => stage.code(),
        }
    }
}
