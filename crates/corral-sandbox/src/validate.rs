//! Policy validation before anything privileged happens.
//!
//! Every violated rule is collected instead of short-circuiting, so one run
//! shows the complete set of problems. For non-root invokers the validator
//! also simulates the bind-mount plan: a path operand that will only exist
//! once earlier binds are in place is checked at its rewritten location.

use std::path::{Path, PathBuf};

use nix::unistd::{AccessFlags, Gid, Uid};

use crate::config::{Config, SyscallAction, MIN_MEMORY_LIMIT};
use crate::paths;

/// Who is asking. Captured once so validation stays a pure function of its
/// inputs.
#[derive(Debug, Clone, Copy)]
pub struct Invoker {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

impl Invoker {
    pub fn current() -> Invoker {
        Invoker {
            uid: Uid::current().as_raw(),
            gid: Gid::current().as_raw(),
        }
    }

    fn is_root(self) -> bool {
        self.uid == 0
    }
}

/// Check every invariant, accumulating human-readable diagnostics.
pub fn validate(cfg: &Config, invoker: Invoker) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if cfg.uid == 0 {
        errors.push(
            "For security reasons, running commands with uid = 0 is not allowed.\n\
             Please specify a user ID using `--uid`."
                .to_string(),
        );
    } else if !invoker.is_root() && cfg.uid != invoker.uid {
        errors.push("For security reasons, setting uid to another user requires root.".to_string());
    }

    if cfg.gid == 0 {
        errors.push(
            "For security reasons, running commands with gid = 0 is not allowed.\n\
             Please specify a group ID using `--gid`."
                .to_string(),
        );
    } else if !invoker.is_root() && cfg.gid != invoker.gid {
        errors.push("For security reasons, setting gid to another group requires root.".to_string());
    }

    if cfg.argv.is_empty() {
        errors.push(
            "command_args can not be empty.\nUse `--help` to see full options.".to_string(),
        );
    }

    if cfg.memory_limit > 0 && cfg.memory_limit < MIN_MEMORY_LIMIT {
        errors.push(format!(
            "memory limit below {MIN_MEMORY_LIMIT} bytes can not be enforced."
        ));
    }

    if !invoker.is_root() {
        if !cfg.cmd_list.is_empty() {
            errors.push("For security reasons, `--cmd` requires root.".to_string());
        }
        if !cfg.groups.is_empty() {
            errors.push("For security reasons, `--group` requires root.".to_string());
        }
        if !cfg.no_new_privs {
            errors.push(
                "For security reasons, `--no-new-privs false` is forbidden for non-root users."
                    .to_string(),
            );
        }
        if cfg.nice < 0 {
            errors.push("Non-root users can not set a negative `--nice` value.".to_string());
        }

        check_mount_plan(cfg, &mut errors);
    }

    if cfg.syscall_list.is_empty() && cfg.syscall_action == SyscallAction::DefaultEperm {
        errors.push("Syscall filter forbids all syscalls, which is not allowed.".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Walk the bind plan in order, probing each operand at the location it
/// resolves to once the binds before it are mounted.
fn check_mount_plan(cfg: &Config, errors: &mut Vec<String>) {
    let mut binds: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (dest, src) in &cfg.bindfs_list {
        check_path(&follow_binds(&binds, src), errors);
        let resolved_src = follow_binds(&binds, &paths::expand(src));
        binds.push((paths::expand(dest), resolved_src));
    }

    if let Some(chroot) = &cfg.chroot_path {
        check_path(&follow_binds(&binds, chroot), errors);
    }

    if let Some(chdir) = &cfg.chdir_path {
        let joined = match &cfg.chroot_path {
            Some(root) => paths::join_under(root, chdir),
            None => chdir.clone(),
        };
        check_path(&follow_binds(&binds, &joined), errors);
    }

    // `--remount-ro /` would affect the outside world; only destinations the
    // invoker binds themselves may be remounted.
    for dest in &cfg.remount_ro {
        if !cfg.bindfs_list.iter().any(|(d, _)| d == dest) {
            errors.push(
                "For security reasons, `--remount-ro A` is only allowed if there is a \
                 `--bindfs A B`."
                    .to_string(),
            );
        }
    }
}

/// Rewrite `path` through the last matching bind, newest first. One rewrite
/// is enough: each recorded bind source has already been resolved against
/// the binds before it.
fn follow_binds(binds: &[(PathBuf, PathBuf)], path: &Path) -> PathBuf {
    if !path.is_absolute() {
        return path.to_path_buf();
    }
    let expanded = paths::expand(path);
    for (dest, src) in binds.iter().rev() {
        if let Ok(rest) = expanded.strip_prefix(dest) {
            if !rest.as_os_str().is_empty() {
                return src.join(rest);
            }
        }
    }
    expanded
}

fn check_path(path: &Path, errors: &mut Vec<String>) {
    if !path.is_absolute() {
        errors.push(format!(
            "Relative paths are forbidden for non-root users.\nPlease change: {}",
            path.display()
        ));
        return;
    }
    let mut mode = AccessFlags::R_OK;
    if path.is_dir() {
        mode |= AccessFlags::X_OK;
    }
    if !paths::accessible(path, mode) {
        errors.push(format!(
            "You do not have `{}` permission on {}",
            paths::mode_str(mode),
            path.display()
        ));
    }
}
