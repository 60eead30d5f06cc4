//! corral-sandbox: per-invocation sandbox core for a contest-grade grader.
//!
//! Given an immutable [`Config`], this crate launches one untrusted command
//! inside a freshly created cgroup and a configured set of kernel namespaces,
//! enforces its resource limits, and produces a post-mortem report on fd 3.
//! The moving parts:
//!
//! - **Cgroup facade** - cgroup v1 controllers (memory, cpuacct, devices,
//!   freezer) behind a path-owning handle; no global state
//! - **Child initializer** - the fixed sequence of mounts, chroot, identity
//!   drop, rlimits and seccomp that runs between `clone` and `execvp`
//! - **Launcher** - parent-side cgroup programming, clone-flag selection and
//!   the go/error pipe handshake with the child
//! - **Supervisor** - the polling loop that arbitrates between natural exit
//!   and limit violation, then renders the report
//!
//! ## Requirements
//!
//! - Linux with cgroup v1 controllers `memory`, `cpuacct`, `devices`,
//!   `freezer` mounted under `/sys/fs/cgroup`
//! - Real root credentials (euid 0, or a setuid-root binary)
//! - Namespace support for mount/pid/net/ipc/uts

pub mod cgroup;
pub mod child;
pub mod config;
pub mod errors;
pub mod launcher;
pub mod paths;
pub mod report;
pub mod seccomp;
pub mod supervisor;
pub mod validate;

pub use cgroup::{Cgroup, CgroupError, CgroupLock, Subsys};
pub use config::{Config, RlimitKey, SyscallAction, UtsSpec};
pub use errors::{LaunchError, Stage};
pub use launcher::{launch, Session};
pub use supervisor::{cleanup, supervise, Exceed, Verdict, WaitInfo};
pub use validate::{validate, Invoker};
